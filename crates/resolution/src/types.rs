//! Data types for persisted resolution runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one resolution unit: a source file within a benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub benchmark: String,
    pub source: String,
}

impl UnitKey {
    pub fn new(benchmark: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.benchmark, self.source)
    }
}

/// How the resolution of a unit ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Every choice was tested and fixed.
    Resolved,
    /// The try or time budget ran out; untested choices were forced to 0.
    BudgetExhausted,
    /// No annotation round reported any opportunity.
    NoOpportunities,
    /// The unit aborted (protocol violation, failed re-validation, I/O error).
    Failed { reason: String },
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::NoOpportunities => write!(f, "no_opportunities"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

impl UnitOutcome {
    /// Whether the unit's control string is safe to resume from.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Final state of a single optimistic choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRecord {
    /// Transformation category (e.g. `Mem`, `Par`, `Fn`).
    pub category: String,
    /// Transformation kind within the category (e.g. `NoAlias`).
    pub kind: String,
    /// Function number assigned by the toolchain.
    pub function_id: u32,
    /// Opportunity kind number assigned by the toolchain.
    pub opportunity_id: u32,
    /// Number of aggressiveness levels that were available.
    pub max_value: u32,
    /// Value the choice was fixed at (0 = conservative).
    pub fixed_value: u32,
    /// Index in the sorted choice order of its round.
    pub position: usize,
    /// Annotation round that reported this choice.
    pub round: u32,
    /// Name of the annotated value.
    #[serde(default)]
    pub name: String,
    /// Name of the enclosing function.
    #[serde(default)]
    pub function: String,
}

/// Result of resolving one unit across all annotation rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    pub benchmark: String,
    pub source: String,
    pub outcome: UnitOutcome,
    /// Final control string, including any resumed prefix.
    pub control_string: String,
    /// Search trials across all rounds.
    pub tries: u32,
    /// Number of annotation rounds that produced opportunities.
    pub rounds: u32,
    pub budget_exhausted: bool,
    pub wall_time_ms: u64,
    pub choices: Vec<ChoiceRecord>,
}

impl UnitResult {
    pub fn key(&self) -> UnitKey {
        UnitKey::new(&self.benchmark, &self.source)
    }

    /// Number of choices left above the conservative value.
    pub fn optimistic_count(&self) -> usize {
        self.choices.iter().filter(|c| c.fixed_value > 0).count()
    }

    /// A failed result carrying no choices.
    pub fn failed(key: &UnitKey, reason: impl Into<String>, wall_time_ms: u64) -> Self {
        Self {
            benchmark: key.benchmark.clone(),
            source: key.source.clone(),
            outcome: UnitOutcome::Failed {
                reason: reason.into(),
            },
            control_string: String::new(),
            tries: 0,
            rounds: 0,
            budget_exhausted: false,
            wall_time_ms,
            choices: Vec::new(),
        }
    }
}

/// Header written once at the start of each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHeader {
    /// Unix timestamp in milliseconds.
    pub started_ms: u64,
    pub tool_version: String,
    pub units: usize,
    #[serde(default)]
    pub max_tries: Option<u32>,
    #[serde(default)]
    pub max_time_secs: Option<u64>,
    /// Path of the results file this run resumed from, if any.
    #[serde(default)]
    pub resumed_from: Option<String>,
}

/// One line of a resolution file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionEntry {
    Run(RunHeader),
    Unit(UnitResult),
}

/// Quick statistics over a resolution file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionSummary {
    pub runs: usize,
    pub units: usize,
    pub resolved: usize,
    pub budget_exhausted: usize,
    pub no_opportunities: usize,
    pub failed: usize,
    pub total_choices: usize,
    /// Choices fixed above value 0.
    pub optimistic_choices: usize,
    pub total_tries: u64,
}
