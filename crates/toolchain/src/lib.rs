//! Async toolchain runner for validating optimistic control strings.
//!
//! A [`ToolchainRunner`] rebuilds one benchmark with a given control string,
//! optionally runs a verification command, then executes the benchmark's
//! fixtures and compares exit codes and output patterns. Every child process
//! runs under an explicit timeout and is killed when its handle is dropped.
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use toolchain::{ToolchainConfig, ToolchainRunner, Verdict};
//!
//! # async fn example(config: ToolchainConfig) -> Result<(), toolchain::ToolError> {
//! let runner = ToolchainRunner::new(config, PathBuf::from("bench/RSBench"), "xs_kernel.c")?;
//! match runner.validate("#f0f#c31").await? {
//!     Verdict::Pass => println!("control string is safe"),
//!     other => println!("rejected: {other}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod process;
pub mod runner;
pub mod types;

pub use process::{run_with_timeout, ProcessOutput};
pub use runner::ToolchainRunner;
pub use types::{CommandSpec, Fixture, OutputSource, Stage, ToolError, ToolchainConfig, Verdict};
