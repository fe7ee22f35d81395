//! Search progress reporting.
//!
//! The explorer never logs directly. It emits [`SearchEvent`]s to an injected
//! [`SearchObserver`]; [`TracingObserver`] turns them into `tracing` events.

/// Why a resolution stopped before every choice was tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetCause {
    Tries(u32),
    Time,
}

/// Something that happened during one resolution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Started {
        choices: usize,
        first_pos: usize,
    },
    Trial {
        try_no: u32,
        first_pos: usize,
        end: usize,
        control: String,
    },
    Verdict {
        try_no: u32,
        first_pos: usize,
        end: usize,
        passed: bool,
    },
    ProblemPushed {
        start: usize,
        len: usize,
        depth: usize,
    },
    ChoiceLimited {
        position: usize,
        label: String,
        value: u32,
    },
    GroupStarted {
        label: String,
        position: usize,
    },
    /// A run of choices sharing `[category][kind]` is fully fixed.
    /// `histogram[v]` counts the choices fixed at value `v`.
    GroupFinished {
        label: String,
        end: usize,
        try_no: u32,
        histogram: Vec<usize>,
    },
    Progress {
        tries: u32,
        done_percent: u32,
        remaining: usize,
    },
    BudgetExhausted {
        cause: BudgetCause,
        tries: u32,
        first_pos: usize,
        total: usize,
    },
    Finished {
        tries: u32,
        budget_exhausted: bool,
    },
}

/// Receives search events. Implementations must be cheap; they run inline.
pub trait SearchObserver: Send + Sync {
    fn on_event(&self, event: &SearchEvent);
}

/// Discards every event.
pub struct NullObserver;

impl SearchObserver for NullObserver {
    fn on_event(&self, _event: &SearchEvent) {}
}

/// Forwards events to `tracing`, tagged with the unit being resolved.
pub struct TracingObserver {
    unit: String,
}

impl TracingObserver {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new("")
    }
}

impl SearchObserver for TracingObserver {
    fn on_event(&self, event: &SearchEvent) {
        let unit = self.unit.as_str();
        match event {
            SearchEvent::Started { choices, first_pos } => {
                tracing::info!(unit, choices, first_pos, "Resolving choices");
            }
            SearchEvent::Trial {
                try_no,
                first_pos,
                end,
                control,
            } => {
                tracing::debug!(unit, try_no, first_pos, end, control = %control, "Trial");
            }
            SearchEvent::Verdict {
                try_no,
                first_pos,
                end,
                passed,
            } => {
                tracing::debug!(unit, try_no, first_pos, end, passed, "Verdict");
            }
            SearchEvent::ProblemPushed { start, len, depth } => {
                tracing::debug!(unit, start, len, depth, "Problem window pushed");
            }
            SearchEvent::ChoiceLimited {
                position,
                label,
                value,
            } => {
                tracing::debug!(unit, position, label = %label, value, "Limited choice");
            }
            SearchEvent::GroupStarted { label, position } => {
                tracing::info!(unit, position, "Working on {label}");
            }
            SearchEvent::GroupFinished {
                label,
                end,
                try_no,
                histogram,
            } => {
                tracing::info!(unit, end, try_no, ?histogram, "Finished {label}");
            }
            SearchEvent::Progress {
                tries,
                done_percent,
                remaining,
            } => {
                tracing::info!(unit, tries, done_percent, remaining, "Search progress");
            }
            SearchEvent::BudgetExhausted {
                cause,
                tries,
                first_pos,
                total,
            } => match cause {
                BudgetCause::Tries(limit) => tracing::info!(
                    unit,
                    limit,
                    tries,
                    first_pos,
                    total,
                    "Reached try limit, remaining choices forced conservative"
                ),
                BudgetCause::Time => tracing::info!(
                    unit,
                    tries,
                    first_pos,
                    total,
                    "Reached time limit, remaining choices forced conservative"
                ),
            },
            SearchEvent::Finished {
                tries,
                budget_exhausted,
            } => {
                tracing::info!(unit, tries, budget_exhausted, "Resolution finished");
            }
        }
    }
}
