//! Async driver loop around [`ChoiceExplorer`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::choice::Choice;
use crate::config::SearchConfig;
use crate::control::{ControlError, ControlString};
use crate::explorer::{Budget, ChoiceExplorer, Step};
use crate::observer::{SearchObserver, TracingObserver};

/// Breaches of the trial/verdict protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("verdict reported without an outstanding trial")]
    VerdictWithoutTrial,

    #[error("next trial requested while a trial is outstanding")]
    TrialOutstanding,

    #[error("explorer resumed after it terminated")]
    ResumedAfterTermination,

    #[error("choice {position} fails even at its conservative value")]
    ZeroValueStillFails { position: usize },
}

/// Errors that abort one resolution run.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("no opportunities to resolve")]
    EmptyInput,

    #[error("invalid opportunity {label}: {reason}")]
    InvalidOpportunity { label: String, reason: String },

    #[error("invalid choice list: {0}")]
    InvalidChoices(String),

    #[error("control string error: {0}")]
    Control(#[from] ControlError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),
}

/// Counters collected over one resolution run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Oracle calls performed.
    pub tries: u32,
    pub problems_pushed: u32,
    /// Deepest the problem stack got.
    pub max_problem_depth: usize,
    /// Single-level decrements of isolated choices.
    pub values_limited: u32,
    /// Choices lowered all the way to 0 by the search.
    pub choices_excluded: u32,
    /// Choices set to 0 because the budget ran out.
    pub forced_by_budget: u32,
    /// Total time spent waiting for the oracle.
    pub oracle_ms: u64,
}

/// Validates one trial control string.
///
/// The verdict is a plain `bool`: implementations must turn their own
/// timeouts and failures into `false` rather than surfacing them.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn validate(&self, control: &ControlString) -> bool;
}

/// Final state of one resolution run.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Every choice, fixed.
    pub choices: Vec<Choice>,
    /// Base prefix plus the resolved choices.
    pub control: ControlString,
    pub tries: u32,
    pub budget_exhausted: bool,
    pub stats: SearchStats,
}

impl Resolution {
    pub fn values(&self) -> Vec<u32> {
        self.choices.iter().map(|c| c.value()).collect()
    }

    /// Number of choices left above value 0.
    pub fn optimistic_count(&self) -> usize {
        self.choices.iter().filter(|c| c.value() > 0).count()
    }
}

/// Resolves choice lists against an [`Oracle`].
///
/// Holds the search budget and observer; cheap to clone and share between
/// concurrent units.
#[derive(Clone)]
pub struct SearchEngine {
    config: SearchConfig,
    deadline: Option<Instant>,
    observer: Arc<dyn SearchObserver>,
}

impl SearchEngine {
    /// Engine whose time budget starts now.
    pub fn new(config: SearchConfig) -> Self {
        let deadline = config
            .max_time_secs
            .map(|secs| Instant::now() + std::time::Duration::from_secs(secs));
        Self {
            config,
            deadline,
            observer: Arc::new(TracingObserver::default()),
        }
    }

    /// Replace the deadline, e.g. with one shared by a whole experiment.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn budget(&self) -> Budget {
        Budget {
            max_tries: self.config.max_tries,
            deadline: self.deadline,
        }
    }

    /// Fix every choice, asking `oracle` about one trial at a time.
    ///
    /// Trials are validated strictly one after another. An empty or fully
    /// fixed list returns immediately without calling the oracle.
    pub async fn resolve(
        &self,
        choices: Vec<Choice>,
        base: ControlString,
        oracle: &dyn Oracle,
    ) -> Result<Resolution, SearchError> {
        let mut explorer = ChoiceExplorer::new(
            choices,
            base,
            self.budget(),
            self.config.report_every,
            self.observer.clone(),
        )?;

        let outcome = loop {
            match explorer.next_trial()? {
                Step::Trial(trial) => {
                    let started = Instant::now();
                    let passed = oracle.validate(&trial.control).await;
                    explorer.add_oracle_time(started.elapsed());
                    explorer.report_verdict(passed)?;
                }
                Step::Done(outcome) => break outcome,
            }
        };

        let control = explorer.control();
        let (choices, stats) = explorer.into_parts();
        Ok(Resolution {
            choices,
            control,
            tries: outcome.tries,
            budget_exhausted: outcome.budget_exhausted,
            stats,
        })
    }
}
