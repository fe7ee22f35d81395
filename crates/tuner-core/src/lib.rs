//! Experiment driver and CLI plumbing for `opt-tuner`.
//!
//! Loads a tuner config, resolves every configured unit with the search
//! engine against the toolchain, and persists the results for later runs.

pub mod config;
pub mod driver;
pub mod pipeline;

pub use config::{apply_overrides, load_tuner_toml, CliOverrides, DriverConfig, TunerToml, UnitSpec};
pub use driver::{Driver, JsonOpportunitySource, OpportunitySource, OracleFactory, ToolchainOracleFactory};
