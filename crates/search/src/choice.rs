//! Optimistic choices and their fixed total order.

use std::collections::HashMap;
use std::fmt;

use resolution::ChoiceRecord;
use serde::{Deserialize, Serialize};

use crate::control::{ControlError, DecodedValue, ALPHABET_SIZE};
use crate::engine::SearchError;

/// Raw opportunity record as reported by the toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Transformation category, e.g. `Mem`.
    pub category: String,
    /// Transformation kind within the category, e.g. `NoAlias`.
    pub kind: String,
    pub opportunity_id: u32,
    pub function_id: u32,
    /// Number of aggressiveness levels; level 0 is conservative.
    pub max_value: u32,
    /// Annotated value.
    #[serde(default)]
    pub name: String,
    /// Enclosing function.
    #[serde(default)]
    pub function: String,
    /// Annotation round that reported the opportunity.
    #[serde(default = "default_round")]
    pub round: u32,
}

fn default_round() -> u32 {
    1
}

impl Opportunity {
    /// `[category][kind]` label used for filtering and logging.
    pub fn label(&self) -> String {
        format!("[{}][{}]", self.category, self.kind)
    }
}

/// One optimization decision point.
///
/// The value starts at its most optimistic level and only ever moves down.
/// Once fixed, it never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub category: String,
    pub kind: String,
    pub opportunity_id: u32,
    pub function_id: u32,
    pub max_value: u32,
    pub name: String,
    pub function: String,
    pub round: u32,
    /// Index in the sorted order.
    pub position: usize,
    value: u32,
    fixed: bool,
}

impl Choice {
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn label(&self) -> String {
        format!("[{}][{}]", self.category, self.kind)
    }

    pub fn same_group(&self, other: &Choice) -> bool {
        self.category == other.category && self.kind == other.kind
    }

    /// Move one level toward conservative and return the new value.
    pub(crate) fn lower(&mut self) -> u32 {
        debug_assert!(!self.fixed && self.value > 0);
        self.value = self.value.saturating_sub(1);
        self.value
    }

    pub(crate) fn fix(&mut self) {
        debug_assert!(!self.fixed);
        self.fixed = true;
    }

    pub(crate) fn force_conservative(&mut self) {
        debug_assert!(!self.fixed);
        self.value = 0;
        self.fixed = true;
    }

    /// Persistable record of this choice.
    pub fn to_record(&self) -> ChoiceRecord {
        ChoiceRecord {
            category: self.category.clone(),
            kind: self.kind.clone(),
            function_id: self.function_id,
            opportunity_id: self.opportunity_id,
            max_value: self.max_value,
            fixed_value: self.value,
            position: self.position,
            round: self.round,
            name: self.name.clone(),
            function: self.function.clone(),
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} in {} = {}/{}",
            self.position,
            self.label(),
            self.name,
            self.function,
            self.value,
            self.max_value - 1
        )
    }
}

/// Build the ordered choice list for one resolution run.
///
/// Choices are sorted by `(opportunity_id, function_id)`; ties keep the order
/// in which the toolchain reported them.
pub fn build(opportunities: Vec<Opportunity>) -> Result<Vec<Choice>, SearchError> {
    if opportunities.is_empty() {
        return Err(SearchError::EmptyInput);
    }

    for opp in &opportunities {
        if opp.max_value == 0 || opp.max_value > ALPHABET_SIZE {
            return Err(SearchError::InvalidOpportunity {
                label: opp.label(),
                reason: format!(
                    "max_value {} outside 1..={ALPHABET_SIZE}",
                    opp.max_value
                ),
            });
        }
        if opp.opportunity_id >= ALPHABET_SIZE {
            return Err(SearchError::InvalidOpportunity {
                label: opp.label(),
                reason: format!(
                    "opportunity id {} does not fit the control alphabet",
                    opp.opportunity_id
                ),
            });
        }
    }

    let mut opportunities = opportunities;
    opportunities.sort_by_key(|o| (o.opportunity_id, o.function_id));

    Ok(opportunities
        .into_iter()
        .enumerate()
        .map(|(position, o)| Choice {
            value: o.max_value - 1,
            fixed: false,
            position,
            category: o.category,
            kind: o.kind,
            opportunity_id: o.opportunity_id,
            function_id: o.function_id,
            max_value: o.max_value,
            name: o.name,
            function: o.function,
            round: o.round,
        })
        .collect())
}

/// Maps opportunity ids back to their `(category, kind)`.
#[derive(Debug, Clone, Default)]
pub struct KindTable {
    kinds: HashMap<u32, (String, String)>,
}

/// A decoded value with its transformation kind restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledValue {
    pub category: String,
    pub kind: String,
    pub function_id: u32,
    pub opportunity_id: u32,
    pub value: u32,
}

impl KindTable {
    pub fn from_choices(choices: &[Choice]) -> Self {
        let kinds = choices
            .iter()
            .map(|c| (c.opportunity_id, (c.category.clone(), c.kind.clone())))
            .collect();
        Self { kinds }
    }

    pub fn insert(&mut self, opportunity_id: u32, category: &str, kind: &str) {
        self.kinds
            .insert(opportunity_id, (category.to_string(), kind.to_string()));
    }

    pub fn get(&self, opportunity_id: u32) -> Option<(&str, &str)> {
        self.kinds
            .get(&opportunity_id)
            .map(|(c, k)| (c.as_str(), k.as_str()))
    }

    /// Decode `control` and attach kinds. Unknown opportunity ids get
    /// empty labels.
    pub fn label(&self, control: &str) -> Result<Vec<LabeledValue>, ControlError> {
        Ok(crate::control::decode(control)?
            .into_iter()
            .map(|d: DecodedValue| {
                let (category, kind) = self.get(d.opportunity_id).unwrap_or(("", ""));
                LabeledValue {
                    category: category.to_string(),
                    kind: kind.to_string(),
                    function_id: d.function_id,
                    opportunity_id: d.opportunity_id,
                    value: d.value,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::encode;
    use crate::mocks::make_opportunity;

    #[test]
    fn test_build_sorts_and_positions() {
        let choices = build(vec![
            make_opportunity("Par", "Align", 7, 1, 2),
            make_opportunity("Mem", "NoAlias", 3, 9, 4),
            make_opportunity("Mem", "NoAlias", 3, 2, 2),
        ])
        .unwrap();
        let keys: Vec<_> = choices
            .iter()
            .map(|c| (c.opportunity_id, c.function_id, c.position))
            .collect();
        assert_eq!(keys, vec![(3, 2, 0), (3, 9, 1), (7, 1, 2)]);
        assert_eq!(choices[1].value(), 3);
        assert!(choices.iter().all(|c| !c.is_fixed()));
    }

    #[test]
    fn test_build_rejects_empty_and_invalid() {
        assert!(matches!(build(vec![]), Err(SearchError::EmptyInput)));
        assert!(matches!(
            build(vec![make_opportunity("Mem", "NoAlias", 1, 0, 0)]),
            Err(SearchError::InvalidOpportunity { .. })
        ));
        assert!(matches!(
            build(vec![make_opportunity("Mem", "NoAlias", 1, 0, 79)]),
            Err(SearchError::InvalidOpportunity { .. })
        ));
        assert!(matches!(
            build(vec![make_opportunity("Mem", "NoAlias", 78, 0, 2)]),
            Err(SearchError::InvalidOpportunity { .. })
        ));
    }

    #[test]
    fn test_value_moves_down_then_freezes() {
        let mut choices = build(vec![make_opportunity("Mem", "NoAlias", 1, 0, 3)]).unwrap();
        let c = &mut choices[0];
        assert_eq!(c.lower(), 1);
        c.fix();
        assert!(c.is_fixed());
        assert_eq!(c.value(), 1);
        assert_eq!(c.to_record().fixed_value, 1);
    }

    #[test]
    fn test_round_trip_through_kind_table() {
        let choices = build(vec![
            make_opportunity("Mem", "NoAlias", 2, 4, 3),
            make_opportunity("Par", "Align", 5, 4, 2),
            make_opportunity("Mem", "NoAlias", 2, 11, 5),
        ])
        .unwrap();
        let control = encode(&choices, choices.len());
        let table = KindTable::from_choices(&choices);
        let labeled = table.label(control.as_str()).unwrap();
        let expected: Vec<_> = choices
            .iter()
            .map(|c| LabeledValue {
                category: c.category.clone(),
                kind: c.kind.clone(),
                function_id: c.function_id,
                opportunity_id: c.opportunity_id,
                value: c.value(),
            })
            .collect();
        assert_eq!(labeled, expected);
    }

    #[test]
    fn test_opportunity_deserializes_with_defaults() {
        let json = r#"{"category":"Fn","kind":"NoUnwind","opportunity_id":9,
                       "function_id":3,"max_value":2}"#;
        let opp: Opportunity = serde_json::from_str(json).unwrap();
        assert_eq!(opp.round, 1);
        assert!(opp.name.is_empty());
        assert_eq!(opp.label(), "[Fn][NoUnwind]");
    }
}
