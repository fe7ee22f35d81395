//! Subcommand implementations for the `opt-tuner` CLI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use resolution::{ResolutionReader, ResolutionWriter, RunHeader, UnitOutcome};
use search::{ControlString, SearchEngine};

use crate::config::{apply_overrides, load_tuner_toml, CliOverrides};
use crate::driver::{Driver, JsonOpportunitySource, ToolchainOracleFactory};

/// Arguments for the `resolve` subcommand.
#[derive(Debug)]
pub struct ResolveArgs {
    /// Path to the tuner config TOML file.
    pub config: PathBuf,
    /// Path for the output JSONL results file.
    pub output: PathBuf,
    /// Results file of a previous run to continue from.
    pub resume_from: Option<PathBuf>,
    pub overrides: CliOverrides,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub input: PathBuf,
    /// Output as JSON instead of human-readable text.
    pub json: bool,
}

/// Arguments for the `decode` subcommand.
#[derive(Debug)]
pub struct DecodeArgs {
    pub control: String,
}

/// Resolve every configured unit and write the results file.
pub async fn run_resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Load config
    let mut toml = load_tuner_toml(&args.config)?;
    apply_overrides(&mut toml, &args.overrides);
    toml.search.validate();
    toml.toolchain.validate()?;
    if toml.units.is_empty() {
        anyhow::bail!("config {} lists no units", args.config.display());
    }

    // 2. Load resume state
    let resume = match &args.resume_from {
        Some(path) => ResolutionReader::resume_map(path)?,
        None => Default::default(),
    };

    // 3. Build driver; the time budget covers the whole experiment
    let deadline = toml
        .search
        .max_time_secs
        .map(|secs| start + Duration::from_secs(secs));
    let engine = SearchEngine::new(toml.search.clone()).with_deadline(deadline);
    let driver = Driver::new(
        toml.driver.clone(),
        engine,
        Arc::new(JsonOpportunitySource),
        Arc::new(ToolchainOracleFactory::new(toml.toolchain.clone())),
    )
    .with_resume(resume);

    tracing::info!(
        units = toml.units.len(),
        rounds = toml.driver.annotation_rounds,
        concurrency = toml.driver.concurrency,
        max_tries = ?toml.search.max_tries,
        max_time_secs = ?toml.search.max_time_secs,
        "Starting resolution"
    );

    // 4. Resolve
    let results = driver.run(&toml.units).await?;

    // 5. Write results
    let mut writer = ResolutionWriter::new(args.output.clone());
    writer.record_run(RunHeader {
        started_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(start.elapsed().as_millis() as u64),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        units: toml.units.len(),
        max_tries: toml.search.max_tries,
        max_time_secs: toml.search.max_time_secs,
        resumed_from: args.resume_from.as_ref().map(|p| p.display().to_string()),
    });

    let resolved = results
        .iter()
        .filter(|r| r.outcome == UnitOutcome::Resolved)
        .count();
    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, UnitOutcome::Failed { .. }))
        .count();
    let optimistic: usize = results.iter().map(|r| r.optimistic_count()).sum();
    let total_choices: usize = results.iter().map(|r| r.choices.len()).sum();
    let total_tries: u64 = results.iter().map(|r| u64::from(r.tries)).sum();
    let unit_count = results.len();

    writer.record_all(results);
    writer.finish()?;

    // 6. Print summary
    let elapsed = start.elapsed();
    println!("\n--- Resolution Summary ---");
    println!("Units:      {unit_count}");
    println!("Resolved:   {resolved}");
    println!("Failed:     {failed}");
    println!("Optimistic: {optimistic}/{total_choices} choices");
    println!("Tries:      {total_tries}");
    println!("Output:     {}", args.output.display());
    println!("Elapsed:    {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

/// Print statistics from a results file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summary = ResolutionReader::read_summary(&args.input)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let percent = if summary.total_choices == 0 {
        0.0
    } else {
        100.0 * summary.optimistic_choices as f64 / summary.total_choices as f64
    };
    println!("--- Resolution Summary ---");
    println!("Runs:             {}", summary.runs);
    println!("Units:            {}", summary.units);
    println!("  resolved:       {}", summary.resolved);
    println!("  budget hit:     {}", summary.budget_exhausted);
    println!("  no choices:     {}", summary.no_opportunities);
    println!("  failed:         {}", summary.failed);
    println!(
        "Optimistic:       {}/{} ({percent:.1}%)",
        summary.optimistic_choices, summary.total_choices
    );
    println!("Tries:            {}", summary.total_tries);
    Ok(())
}

/// Print the value tokens of a control string.
pub fn run_decode(args: DecodeArgs) -> anyhow::Result<()> {
    let control = ControlString::parse(&args.control)?;
    let values = control.decode()?;
    for (position, v) in values.iter().enumerate() {
        println!(
            "{position:5}  fn {:4}  opp {:3}  value {}",
            v.function_id, v.opportunity_id, v.value
        );
    }
    println!("{} values", values.len());
    Ok(())
}
