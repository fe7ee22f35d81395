//! Reads resolution entries from JSON-lines files.

use crate::types::{ResolutionEntry, ResolutionSummary, UnitKey, UnitOutcome, UnitResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Static methods for reading resolution files.
pub struct ResolutionReader;

impl ResolutionReader {
    /// Read every entry from a resolution file. Blank lines are skipped.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<ResolutionEntry>> {
        let contents = std::fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: ResolutionEntry = serde_json::from_str(line).map_err(|e| {
                anyhow::anyhow!("{}:{}: invalid resolution entry: {e}", path.display(), idx + 1)
            })?;
            entries.push(entry);
        }

        tracing::debug!(
            count = entries.len(),
            path = %path.display(),
            "Read resolution entries"
        );

        Ok(entries)
    }

    /// Read only the unit results, in file order.
    pub fn read_units(path: &Path) -> anyhow::Result<Vec<UnitResult>> {
        Ok(Self::read_all(path)?
            .into_iter()
            .filter_map(|e| match e {
                ResolutionEntry::Unit(u) => Some(u),
                ResolutionEntry::Run(_) => None,
            })
            .collect())
    }

    /// Compute summary statistics over a resolution file.
    pub fn read_summary(path: &Path) -> anyhow::Result<ResolutionSummary> {
        let mut summary = ResolutionSummary::default();
        for entry in Self::read_all(path)? {
            let unit = match entry {
                ResolutionEntry::Run(_) => {
                    summary.runs += 1;
                    continue;
                }
                ResolutionEntry::Unit(u) => u,
            };
            summary.units += 1;
            match unit.outcome {
                UnitOutcome::Resolved => summary.resolved += 1,
                UnitOutcome::BudgetExhausted => summary.budget_exhausted += 1,
                UnitOutcome::NoOpportunities => summary.no_opportunities += 1,
                UnitOutcome::Failed { .. } => summary.failed += 1,
            }
            summary.total_choices += unit.choices.len();
            summary.optimistic_choices += unit.optimistic_count();
            summary.total_tries += u64::from(unit.tries);
        }
        Ok(summary)
    }

    /// Latest resumable result per unit.
    ///
    /// Later entries win. Failed units are ignored.
    pub fn resume_map(path: &Path) -> anyhow::Result<BTreeMap<UnitKey, UnitResult>> {
        let mut map = BTreeMap::new();
        for unit in Self::read_units(path)? {
            if !unit.outcome.is_resumable() {
                continue;
            }
            map.insert(unit.key(), unit);
        }
        tracing::info!(units = map.len(), path = %path.display(), "Loaded resumable results");
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChoiceRecord, RunHeader};
    use crate::writer::ResolutionWriter;
    use tempfile::TempDir;

    fn unit(source: &str, outcome: UnitOutcome, control: &str, values: &[u32]) -> UnitResult {
        let key = UnitKey::new("bench", source);
        let mut u = UnitResult::failed(&key, "", 10);
        u.outcome = outcome;
        u.control_string = control.to_string();
        u.tries = values.len() as u32;
        u.choices = values
            .iter()
            .enumerate()
            .map(|(i, &v)| ChoiceRecord {
                category: "Mem".into(),
                kind: "Align".into(),
                function_id: 0,
                opportunity_id: 1,
                max_value: 2,
                fixed_value: v,
                position: i,
                round: 1,
                name: String::new(),
                function: String::new(),
            })
            .collect();
        u
    }

    fn write(path: &Path, units: Vec<UnitResult>) {
        let mut writer = ResolutionWriter::new(path.to_path_buf());
        writer.record_run(RunHeader {
            started_ms: 0,
            tool_version: "test".into(),
            units: units.len(),
            max_tries: None,
            max_time_secs: None,
            resumed_from: None,
        });
        writer.record_all(units);
        writer.finish().unwrap();
    }

    #[test]
    fn test_summary_counts() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("r.jsonl");
        write(
            &path,
            vec![
                unit("a.c", UnitOutcome::Resolved, "#f0f#c1101", &[1, 1, 0, 1]),
                unit("b.c", UnitOutcome::BudgetExhausted, "#f0f#c10", &[0, 0]),
                unit(
                    "c.c",
                    UnitOutcome::Failed {
                        reason: "violation".into(),
                    },
                    "",
                    &[],
                ),
            ],
        );

        let summary = ResolutionReader::read_summary(&path).unwrap();
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.units, 3);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.budget_exhausted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_choices, 6);
        assert_eq!(summary.optimistic_choices, 3);
        assert_eq!(summary.total_tries, 6);
    }

    #[test]
    fn test_resume_map_skips_failed_and_keeps_latest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("r.jsonl");
        write(
            &path,
            vec![
                unit("a.c", UnitOutcome::Resolved, "#f0f#c11", &[1]),
                unit(
                    "b.c",
                    UnitOutcome::Failed {
                        reason: "x".into(),
                    },
                    "#f0f#c11",
                    &[1],
                ),
                unit("a.c", UnitOutcome::Resolved, "#f0f#c10", &[0]),
                unit("d.c", UnitOutcome::NoOpportunities, "", &[]),
            ],
        );

        let map = ResolutionReader::resume_map(&path).unwrap();
        assert_eq!(map.len(), 2);
        let a = &map[&UnitKey::new("bench", "a.c")];
        assert_eq!(a.control_string, "#f0f#c10");
        assert_eq!(a.choices.len(), 1);
        assert_eq!(a.choices[0].fixed_value, 0);
        assert!(!map.contains_key(&UnitKey::new("bench", "b.c")));
        assert!(map[&UnitKey::new("bench", "d.c")].choices.is_empty());
    }

    #[test]
    fn test_invalid_line_reports_position() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.jsonl");
        std::fs::write(&path, "\n{\"type\":\"nope\"}\n").unwrap();
        let err = ResolutionReader::read_all(&path).unwrap_err();
        assert!(err.to_string().contains(":2:"), "got: {err}");
    }
}
