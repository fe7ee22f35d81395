//! Adaptive bisection search over optimistic compiler choices.
//!
//! Given an ordered list of optimistic choices and an oracle that builds and
//! checks a program under a control string, finds a fixing of every choice
//! that keeps as many of them optimistic as the oracle allows. Uses
//! trait-based abstraction so the search can be tested with mocks (no
//! compiler, no benchmark).
//!
//! # Key types
//!
//! - [`Choice`] / [`Opportunity`]: decision points and the raw records they are built from
//! - [`ControlString`] / [`ControlLayout`]: the serialized decision set
//! - [`ChoiceExplorer`]: step-wise bisection/backoff state machine
//! - [`SearchEngine`]: async loop driving the explorer against an [`Oracle`]
//! - [`SearchObserver`]: injected event sink, [`TracingObserver`] by default
//! - [`ToolchainOracle`]: oracle backed by the `toolchain` runner

pub mod adapters;
pub mod choice;
pub mod config;
pub mod control;
pub mod engine;
pub mod explorer;
pub mod mocks;
pub mod observer;

pub use adapters::ToolchainOracle;
pub use choice::{build, Choice, KindTable, LabeledValue, Opportunity};
pub use config::SearchConfig;
pub use control::{
    count_encoded_values, decode, encode, ControlError, ControlLayout, ControlString,
    DecodedValue,
};
pub use engine::{Oracle, ProtocolViolation, Resolution, SearchEngine, SearchError, SearchStats};
pub use explorer::{Budget, ChoiceExplorer, Outcome, Problem, Step, Trial};
pub use observer::{BudgetCause, NullObserver, SearchEvent, SearchObserver, TracingObserver};
