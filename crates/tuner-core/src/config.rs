//! TOML config loading for the tuner CLI.
//!
//! Deserializes a tuner config with `[search]`, `[driver]`, `[toolchain]` and
//! `[[units]]` sections, then merges with CLI overrides.

use std::path::{Path, PathBuf};

use resolution::UnitKey;
use search::SearchConfig;
use serde::Deserialize;
use toolchain::ToolchainConfig;

/// Top-level structure of a tuner config file.
#[derive(Debug, Deserialize)]
pub struct TunerToml {
    /// Search budget.
    #[serde(default)]
    pub search: SearchConfig,
    /// Experiment driver settings.
    #[serde(default)]
    pub driver: DriverConfig,
    /// How to build and check every unit.
    pub toolchain: ToolchainConfig,
    /// Source files to resolve.
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

/// Experiment driver settings (`[driver]`).
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Maximum discovery/search rounds per unit.
    #[serde(default = "default_annotation_rounds")]
    pub annotation_rounds: u32,

    /// Only resolve opportunities with these `[category][kind]` labels.
    /// Empty means all.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Never resolve opportunities with these labels.
    #[serde(default)]
    pub deny: Vec<String>,

    /// Units resolved in parallel. Values above 1 require distinct working
    /// directories.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Check the unmodified build before searching.
    #[serde(default = "default_true")]
    pub validate_baseline: bool,

    /// Re-validate each round's final control string.
    #[serde(default = "default_true")]
    pub revalidate_final: bool,
}

fn default_annotation_rounds() -> u32 {
    14
}
fn default_concurrency() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            annotation_rounds: default_annotation_rounds(),
            allow: Vec::new(),
            deny: Vec::new(),
            concurrency: default_concurrency(),
            validate_baseline: true,
            revalidate_final: true,
        }
    }
}

impl DriverConfig {
    /// Whether opportunities with `label` take part in the search.
    pub fn admits(&self, label: &str) -> bool {
        (self.allow.is_empty() || self.allow.iter().any(|a| a == label))
            && !self.deny.iter().any(|d| d == label)
    }
}

/// One source file of one benchmark (`[[units]]`).
#[derive(Debug, Clone, Deserialize)]
pub struct UnitSpec {
    pub benchmark: String,
    /// Source file, as passed to the build command via `{source}`.
    pub source: String,
    /// Directory the build and fixtures run in.
    pub working_dir: PathBuf,
    /// JSON file listing the opportunities reported for this source.
    pub opportunities: PathBuf,
}

impl UnitSpec {
    pub fn key(&self) -> UnitKey {
        UnitKey::new(&self.benchmark, &self.source)
    }
}

/// Load a `TunerToml`, resolving relative unit paths against the config
/// file's directory.
pub fn load_tuner_toml(path: &Path) -> anyhow::Result<TunerToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    let mut config: TunerToml = toml::from_str(&contents)?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for unit in &mut config.units {
        unit.working_dir = base.join(&unit.working_dir);
        unit.opportunities = base.join(&unit.opportunities);
    }

    tracing::info!(
        path = %path.display(),
        units = config.units.len(),
        "Loaded tuner config"
    );
    Ok(config)
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub max_tries: Option<u32>,
    pub max_time_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub rounds: Option<u32>,
}

/// Apply CLI overrides.
///
/// Priority chain: serde defaults < TOML values < CLI flags.
pub fn apply_overrides(config: &mut TunerToml, overrides: &CliOverrides) {
    if let Some(n) = overrides.max_tries {
        config.search.max_tries = Some(n);
    }
    if let Some(secs) = overrides.max_time_secs {
        config.search.max_time_secs = Some(secs);
    }
    if let Some(n) = overrides.concurrency {
        config.driver.concurrency = n;
    }
    if let Some(n) = overrides.rounds {
        config.driver.annotation_rounds = n;
    }
}
