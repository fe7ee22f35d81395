//! Experiment driver: resolves every unit over several annotation rounds.
//!
//! Fixing choices in one round can change which opportunities the toolchain
//! reports in the next, so each unit runs a bounded number of
//! discover-then-resolve rounds, each building on the previous round's
//! control string.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use resolution::{ChoiceRecord, UnitKey, UnitOutcome, UnitResult};
use search::{ControlString, Opportunity, Oracle, SearchEngine, ToolchainOracle, TracingObserver};
use toolchain::{ToolchainConfig, ToolchainRunner};

use crate::config::{DriverConfig, UnitSpec};

/// Supplies the opportunities a unit exposes under a given control string.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    async fn opportunities(
        &self,
        unit: &UnitSpec,
        round: u32,
        control: &ControlString,
    ) -> anyhow::Result<Vec<Opportunity>>;
}

/// Reads pre-extracted opportunities from each unit's JSON file.
///
/// The file holds `{"opportunities": [...]}`; a round sees the records whose
/// `round` field matches.
pub struct JsonOpportunitySource;

#[derive(Deserialize)]
struct OpportunityFile {
    opportunities: Vec<Opportunity>,
}

#[async_trait]
impl OpportunitySource for JsonOpportunitySource {
    async fn opportunities(
        &self,
        unit: &UnitSpec,
        round: u32,
        _control: &ControlString,
    ) -> anyhow::Result<Vec<Opportunity>> {
        let contents = tokio::fs::read_to_string(&unit.opportunities)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "failed to read opportunities {}: {e}",
                    unit.opportunities.display()
                )
            })?;
        let file: OpportunityFile = serde_json::from_str(&contents)?;
        Ok(file
            .opportunities
            .into_iter()
            .filter(|o| o.round == round)
            .collect())
    }
}

/// Creates the oracle that validates trials for one unit.
pub trait OracleFactory: Send + Sync {
    fn oracle_for(&self, unit: &UnitSpec) -> anyhow::Result<Box<dyn Oracle>>;
}

/// Builds a [`ToolchainOracle`] in each unit's working directory.
pub struct ToolchainOracleFactory {
    config: ToolchainConfig,
}

impl ToolchainOracleFactory {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }
}

impl OracleFactory for ToolchainOracleFactory {
    fn oracle_for(&self, unit: &UnitSpec) -> anyhow::Result<Box<dyn Oracle>> {
        let runner = ToolchainRunner::new(
            self.config.clone(),
            unit.working_dir.clone(),
            unit.source.clone(),
        )?;
        Ok(Box::new(ToolchainOracle::new(runner)))
    }
}

/// Runs resolution for a list of units.
pub struct Driver {
    config: DriverConfig,
    engine: SearchEngine,
    source: Arc<dyn OpportunitySource>,
    oracles: Arc<dyn OracleFactory>,
    resume: BTreeMap<UnitKey, UnitResult>,
}

impl Driver {
    pub fn new(
        config: DriverConfig,
        engine: SearchEngine,
        source: Arc<dyn OpportunitySource>,
        oracles: Arc<dyn OracleFactory>,
    ) -> Self {
        Self {
            config,
            engine,
            source,
            oracles,
            resume: BTreeMap::new(),
        }
    }

    /// Continue units from the results of an earlier run.
    ///
    /// A resumed unit keeps the choices its earlier control string covers,
    /// along with their tries and rounds, and only searches what is left.
    pub fn with_resume(mut self, resume: BTreeMap<UnitKey, UnitResult>) -> Self {
        self.resume = resume;
        self
    }

    /// Resolve every unit, returning results in input order.
    ///
    /// A failing unit yields a [`UnitOutcome::Failed`] result; it never
    /// aborts the other units.
    pub async fn run(&self, units: &[UnitSpec]) -> anyhow::Result<Vec<UnitResult>> {
        let concurrency = self.config.concurrency.max(1);
        if concurrency > 1 {
            check_distinct_working_dirs(units)?;
        }

        let pb = ProgressBar::new(units.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let pb_ref = &pb;
        let results: Vec<UnitResult> = stream::iter(units)
            .map(|unit| async move {
                pb_ref.set_message(unit.key().to_string());
                let result = self.resolve_unit(unit).await;
                pb_ref.inc(1);
                result
            })
            .buffered(concurrency)
            .collect()
            .await;

        pb.finish_with_message("done");
        Ok(results)
    }

    /// Resolve one unit, converting any failure into a failed result.
    pub async fn resolve_unit(&self, unit: &UnitSpec) -> UnitResult {
        let started = Instant::now();
        let key = unit.key();
        match self.try_resolve_unit(unit, started).await {
            Ok(result) => {
                tracing::info!(
                    unit = %key,
                    outcome = %result.outcome,
                    tries = result.tries,
                    rounds = result.rounds,
                    optimistic = result.optimistic_count(),
                    choices = result.choices.len(),
                    "Unit finished"
                );
                result
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(unit = %key, error = %reason, "Unit failed, continuing");
                UnitResult::failed(&key, reason, elapsed_ms(started))
            }
        }
    }

    async fn try_resolve_unit(
        &self,
        unit: &UnitSpec,
        started: Instant,
    ) -> anyhow::Result<UnitResult> {
        let key = unit.key();
        let oracle = self.oracles.oracle_for(unit)?;
        let engine = self
            .engine
            .clone()
            .with_observer(Arc::new(TracingObserver::new(key.to_string())));

        let ResumeState {
            mut control,
            mut choices,
            mut tries,
            mut rounds,
            mut covered,
        } = match self.resume.get(&key) {
            Some(prior) => {
                let state = ResumeState::from_prior(prior)?;
                tracing::info!(
                    unit = %key,
                    control = %state.control,
                    choices = state.choices.len(),
                    "Resuming from previous result"
                );
                state
            }
            None => ResumeState::default(),
        };

        if self.config.validate_baseline && !oracle.validate(&control).await {
            anyhow::bail!("baseline build failed validation");
        }

        let mut budget_exhausted = false;

        for round in 1..=self.config.annotation_rounds {
            let opportunities: Vec<Opportunity> = self
                .source
                .opportunities(unit, round, &control)
                .await?
                .into_iter()
                .filter(|o| !covered.take(o))
                .filter(|o| self.config.admits(&o.label()))
                .collect();
            if opportunities.is_empty() {
                tracing::debug!(unit = %key, round, "No opportunities in round");
                continue;
            }

            let resolution = engine
                .resolve(search::build(opportunities)?, control.clone(), oracle.as_ref())
                .await?;
            let carried = choices.iter().filter(|c| c.round == round).count();
            if carried == 0 {
                rounds += 1;
            }
            tries += resolution.tries;

            if self.config.revalidate_final && !oracle.validate(&resolution.control).await {
                anyhow::bail!("final control string of round {round} failed re-validation");
            }

            tracing::info!(
                unit = %key,
                round,
                tries = resolution.tries,
                optimistic = resolution.optimistic_count(),
                choices = resolution.choices.len(),
                "Round resolved"
            );

            choices.extend(resolution.choices.iter().map(|c| {
                let mut record = c.to_record();
                record.position += carried;
                record
            }));
            control = resolution.control;
            if resolution.budget_exhausted {
                budget_exhausted = true;
                break;
            }
        }

        let outcome = if budget_exhausted {
            UnitOutcome::BudgetExhausted
        } else if rounds == 0 {
            UnitOutcome::NoOpportunities
        } else {
            UnitOutcome::Resolved
        };

        Ok(UnitResult {
            benchmark: unit.benchmark.clone(),
            source: unit.source.clone(),
            outcome,
            control_string: control.to_string(),
            tries,
            rounds,
            budget_exhausted,
            wall_time_ms: elapsed_ms(started),
            choices,
        })
    }
}

/// Progress carried over from an earlier result of the same unit.
#[derive(Default)]
struct ResumeState {
    control: ControlString,
    choices: Vec<ChoiceRecord>,
    tries: u32,
    rounds: u32,
    covered: Covered,
}

impl ResumeState {
    /// Keep the choices the prior control string encodes.
    ///
    /// Records past that point were forced to 0 when the budget ran out and
    /// are searched again.
    fn from_prior(prior: &UnitResult) -> anyhow::Result<Self> {
        let control = ControlString::parse(&prior.control_string)?;
        let kept = control.count_values()?;
        if prior.choices.len() < kept {
            anyhow::bail!(
                "resumed control string encodes {kept} values but only {} choices were recorded",
                prior.choices.len()
            );
        }
        let choices = prior.choices[..kept].to_vec();
        let covered = Covered::from_records(&choices);
        Ok(Self {
            control,
            choices,
            tries: prior.tries,
            rounds: prior.rounds,
            covered,
        })
    }
}

/// Identity of an opportunity across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OpportunityKey {
    round: u32,
    category: String,
    kind: String,
    opportunity_id: u32,
    function_id: u32,
    name: String,
    function: String,
}

impl From<&ChoiceRecord> for OpportunityKey {
    fn from(r: &ChoiceRecord) -> Self {
        Self {
            round: r.round,
            category: r.category.clone(),
            kind: r.kind.clone(),
            opportunity_id: r.opportunity_id,
            function_id: r.function_id,
            name: r.name.clone(),
            function: r.function.clone(),
        }
    }
}

impl From<&Opportunity> for OpportunityKey {
    fn from(o: &Opportunity) -> Self {
        Self {
            round: o.round,
            category: o.category.clone(),
            kind: o.kind.clone(),
            opportunity_id: o.opportunity_id,
            function_id: o.function_id,
            name: o.name.clone(),
            function: o.function.clone(),
        }
    }
}

/// Opportunities already fixed by a resumed result, with multiplicity.
#[derive(Debug, Default)]
struct Covered(HashMap<OpportunityKey, usize>);

impl Covered {
    fn from_records(records: &[ChoiceRecord]) -> Self {
        let mut counts = HashMap::new();
        for record in records {
            *counts.entry(OpportunityKey::from(record)).or_insert(0) += 1;
        }
        Self(counts)
    }

    /// Consume one covering record for `opportunity`, if any is left.
    fn take(&mut self, opportunity: &Opportunity) -> bool {
        match self.0.get_mut(&OpportunityKey::from(opportunity)) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Units built concurrently must not share build artifacts.
fn check_distinct_working_dirs(units: &[UnitSpec]) -> anyhow::Result<()> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    for unit in units {
        let dir = std::fs::canonicalize(&unit.working_dir).unwrap_or_else(|_| unit.working_dir.clone());
        if !seen.insert(dir) {
            anyhow::bail!(
                "working directory {} is shared by several units; use concurrency = 1 or separate directories",
                unit.working_dir.display()
            );
        }
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use search::SearchConfig;

    fn unit(benchmark: &str, source: &str, dir: &str) -> UnitSpec {
        UnitSpec {
            benchmark: benchmark.to_string(),
            source: source.to_string(),
            working_dir: PathBuf::from(dir),
            opportunities: PathBuf::from(format!("{dir}/{source}.json")),
        }
    }

    #[test]
    fn test_shared_working_dir_rejected() {
        let units = vec![unit("A", "a.c", "/tmp/x"), unit("A", "b.c", "/tmp/x")];
        assert!(check_distinct_working_dirs(&units).is_err());
        let units = vec![unit("A", "a.c", "/tmp/x"), unit("B", "b.c", "/tmp/y")];
        assert!(check_distinct_working_dirs(&units).is_ok());
    }

    fn record(function_id: u32, round: u32) -> ChoiceRecord {
        ChoiceRecord {
            category: "Mem".to_string(),
            kind: "NoAlias".to_string(),
            function_id,
            opportunity_id: 1,
            max_value: 2,
            fixed_value: 1,
            position: function_id as usize,
            round,
            name: String::new(),
            function: String::new(),
        }
    }

    #[test]
    fn test_resume_keeps_encoded_prefix_only() {
        let mut prior = UnitResult::failed(&UnitKey::new("B", "k.c"), "", 0);
        prior.outcome = UnitOutcome::BudgetExhausted;
        prior.control_string = "#f0f#c11#f1f1".to_string();
        prior.tries = 7;
        prior.rounds = 1;
        prior.choices = vec![record(0, 1), record(1, 1), record(2, 1)];

        let mut state = ResumeState::from_prior(&prior).unwrap();
        assert_eq!(state.choices.len(), 2);
        assert_eq!(state.tries, 7);
        assert_eq!(state.control.as_str(), "#f0f#c11#f1f1");

        let opportunity = |function_id| Opportunity {
            category: "Mem".to_string(),
            kind: "NoAlias".to_string(),
            opportunity_id: 1,
            function_id,
            max_value: 2,
            name: String::new(),
            function: String::new(),
            round: 1,
        };
        assert!(state.covered.take(&opportunity(0)));
        assert!(!state.covered.take(&opportunity(0)));
        assert!(state.covered.take(&opportunity(1)));
        assert!(!state.covered.take(&opportunity(2)));
    }

    #[test]
    fn test_resume_rejects_missing_records() {
        let mut prior = UnitResult::failed(&UnitKey::new("B", "k.c"), "", 0);
        prior.outcome = UnitOutcome::Resolved;
        prior.control_string = "#f0f#c11#f1f1".to_string();
        prior.choices = vec![record(0, 1)];
        assert!(ResumeState::from_prior(&prior).is_err());
    }

    #[tokio::test]
    async fn test_json_source_filters_by_round() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("opps.json");
        std::fs::write(
            &path,
            r#"{"opportunities": [
                {"category":"Mem","kind":"NoAlias","opportunity_id":1,"function_id":0,"max_value":2},
                {"category":"Mem","kind":"NoAlias","opportunity_id":1,"function_id":1,"max_value":2,"round":2}
            ]}"#,
        )
        .unwrap();
        let mut spec = unit("B", "k.c", "/tmp");
        spec.opportunities = path;

        let source = JsonOpportunitySource;
        let r1 = source.opportunities(&spec, 1, &ControlString::new()).await.unwrap();
        let r2 = source.opportunities(&spec, 2, &ControlString::new()).await.unwrap();
        let r3 = source.opportunities(&spec, 3, &ControlString::new()).await.unwrap();
        assert_eq!(r1.len(), 1);
        assert_eq!(r2.len(), 1);
        assert_eq!(r2[0].function_id, 1);
        assert!(r3.is_empty());
    }

    #[tokio::test]
    async fn test_missing_opportunity_file_fails_unit_only() {
        struct PassFactory;
        impl OracleFactory for PassFactory {
            fn oracle_for(&self, _unit: &UnitSpec) -> anyhow::Result<Box<dyn Oracle>> {
                Ok(Box::new(search::mocks::ConstOracle::new(true)))
            }
        }

        let driver = Driver::new(
            DriverConfig::default(),
            SearchEngine::new(SearchConfig::default()),
            Arc::new(JsonOpportunitySource),
            Arc::new(PassFactory),
        );
        let result = driver.resolve_unit(&unit("B", "gone.c", "/nonexistent")).await;
        match result.outcome {
            UnitOutcome::Failed { reason } => assert!(reason.contains("opportunities"), "{reason}"),
            other => panic!("expected failure, got {other}"),
        }
    }
}
