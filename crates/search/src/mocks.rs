//! Mock oracles and observers for testing without a toolchain.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::choice::{build, Choice, Opportunity};
use crate::control::ControlString;
use crate::engine::Oracle;
use crate::observer::{SearchEvent, SearchObserver};

/// Convenience constructor for an `Opportunity`.
pub fn make_opportunity(
    category: &str,
    kind: &str,
    opportunity_id: u32,
    function_id: u32,
    max_value: u32,
) -> Opportunity {
    Opportunity {
        category: category.to_string(),
        kind: kind.to_string(),
        opportunity_id,
        function_id,
        max_value,
        name: format!("v{function_id}"),
        function: format!("fn{function_id}"),
        round: 1,
    }
}

/// One `[Mem][NoAlias]` choice per entry, in the given order, each in its
/// own function.
pub fn make_choices(max_values: &[u32]) -> Vec<Choice> {
    if max_values.is_empty() {
        return Vec::new();
    }
    let opportunities = max_values
        .iter()
        .enumerate()
        .map(|(i, &max)| make_opportunity("Mem", "NoAlias", 1, i as u32, max))
        .collect();
    build(opportunities).expect("valid test opportunities")
}

// ---------------------------------------------------------------------------
// ConstOracle
// ---------------------------------------------------------------------------

/// Oracle with a fixed verdict.
pub struct ConstOracle {
    verdict: bool,
    calls: AtomicU32,
}

impl ConstOracle {
    pub fn new(verdict: bool) -> Self {
        Self {
            verdict,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for ConstOracle {
    async fn validate(&self, _control: &ControlString) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict
    }
}

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

type Predicate = Box<dyn Fn(&[u32]) -> bool + Send + Sync>;

/// Oracle that decodes each trial and applies a predicate to its values.
///
/// Values not present in the trial are implicitly 0 and simply missing from
/// the slice. Malformed trials fail.
pub struct ScriptedOracle {
    predicate: Predicate,
    trials: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(predicate: impl Fn(&[u32]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            trials: Mutex::new(Vec::new()),
        }
    }

    /// Oracle failing whenever any of `unsafe_positions` is above 0.
    pub fn unsafe_at(unsafe_positions: Vec<usize>) -> Self {
        Self::new(move |values| {
            unsafe_positions
                .iter()
                .all(|&p| values.get(p).copied().unwrap_or(0) == 0)
        })
    }

    pub fn calls(&self) -> u32 {
        self.trials().len() as u32
    }

    /// Every trial seen so far, in order.
    pub fn trials(&self) -> Vec<String> {
        self.trials.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn validate(&self, control: &ControlString) -> bool {
        if let Ok(mut trials) = self.trials.lock() {
            trials.push(control.to_string());
        }
        match control.decode() {
            Ok(decoded) => {
                let values: Vec<u32> = decoded.iter().map(|d| d.value).collect();
                (self.predicate)(&values)
            }
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver
// ---------------------------------------------------------------------------

/// Observer that keeps every event for later inspection.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SearchEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SearchEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&SearchEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl SearchObserver for RecordingObserver {
    fn on_event(&self, event: &SearchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
