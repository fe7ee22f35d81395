//! JSON-lines persistence for optimistic-choice resolution results.
//!
//! Each resolved (benchmark, source) unit is stored with its final control
//! string and the fixed value of every choice, so a later run can resume
//! from the stored control string instead of exploring from scratch.

pub mod reader;
pub mod types;
pub mod writer;

pub use reader::ResolutionReader;
pub use types::{
    ChoiceRecord, ResolutionEntry, ResolutionSummary, RunHeader, UnitKey, UnitOutcome, UnitResult,
};
pub use writer::ResolutionWriter;
