//! Bridges between the search [`Oracle`] trait and the toolchain runner.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use toolchain::{ToolError, ToolchainRunner, Verdict};

use crate::control::ControlString;
use crate::engine::Oracle;

/// Oracle that rebuilds and runs a benchmark for every trial.
///
/// Any verdict other than [`Verdict::Pass`] and any [`ToolError`] count as
/// a rejection. Tool errors are logged at `warn` the first time their
/// category is seen and at `debug` afterwards.
pub struct ToolchainOracle {
    runner: ToolchainRunner,
    errors: Mutex<HashMap<String, u32>>,
}

impl ToolchainOracle {
    pub fn new(runner: ToolchainRunner) -> Self {
        Self {
            runner,
            errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn runner(&self) -> &ToolchainRunner {
        &self.runner
    }

    /// Tool error counts by category.
    pub fn error_counts(&self) -> HashMap<String, u32> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn note_error(&self, err: &ToolError) {
        let category = err.category();
        let first = match self.errors.lock() {
            Ok(mut errors) => {
                let count = errors.entry(category.clone()).or_insert(0);
                *count += 1;
                *count == 1
            }
            Err(_) => true,
        };
        if first {
            tracing::warn!(
                category = %category,
                source = self.runner.source(),
                error = %err,
                "Toolchain error, treating trial as failed (further errors of this kind logged at debug)"
            );
        } else {
            tracing::debug!(category = %category, error = %err, "Toolchain error");
        }
    }
}

#[async_trait]
impl Oracle for ToolchainOracle {
    async fn validate(&self, control: &ControlString) -> bool {
        match self.runner.validate(control.as_str()).await {
            Ok(Verdict::Pass) => true,
            Ok(verdict) => {
                tracing::debug!(source = self.runner.source(), %verdict, "Trial rejected");
                false
            }
            Err(e) => {
                self.note_error(&e);
                false
            }
        }
    }
}
