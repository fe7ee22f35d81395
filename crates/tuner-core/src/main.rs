use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tuner_core::pipeline::{self, DecodeArgs, ResolveArgs, SummaryArgs};
use tuner_core::CliOverrides;

/// opt-tuner: find the optimistic compiler choices a benchmark tolerates.
#[derive(Parser)]
#[command(name = "opt-tuner", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for resolution, reporting and control string inspection.
#[derive(Subcommand)]
enum Command {
    /// Resolve the optimistic choices of every configured unit.
    Resolve {
        /// Path to tuner config TOML file.
        #[arg(long, default_value = "configs/tuner.toml")]
        config: PathBuf,
        /// Path for the output results JSONL file.
        #[arg(long)]
        output: PathBuf,
        /// Continue from the control strings of a previous results file.
        #[arg(long)]
        resume_from: Option<PathBuf>,
        /// Override the maximum oracle calls per resolution run.
        #[arg(long)]
        max_tries: Option<u32>,
        /// Override the wall-clock limit for the whole experiment.
        #[arg(long)]
        max_time_secs: Option<u64>,
        /// Number of units to resolve in parallel.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Override the number of annotation rounds per unit.
        #[arg(long)]
        rounds: Option<u32>,
    },
    /// Print statistics from a results file.
    Summary {
        /// Path to the results JSONL file.
        #[arg(long)]
        input: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
    /// Decode a control string into its value tokens.
    Decode {
        #[arg(long)]
        control: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Resolve {
            config,
            output,
            resume_from,
            max_tries,
            max_time_secs,
            concurrency,
            rounds,
        } => {
            pipeline::run_resolve(ResolveArgs {
                config,
                output,
                resume_from,
                overrides: CliOverrides {
                    max_tries,
                    max_time_secs,
                    concurrency,
                    rounds,
                },
            })
            .await
        }
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs { input, json }),
        Command::Decode { control } => pipeline::run_decode(DecodeArgs { control }),
    }
}
