//! Adaptive bisection over an ordered list of choices.
//!
//! [`ChoiceExplorer`] is a step-wise state machine: [`ChoiceExplorer::next_trial`]
//! hands out one trial control string, and [`ChoiceExplorer::report_verdict`]
//! feeds back whether the oracle accepted it. At most one trial is
//! outstanding at a time.
//!
//! The explorer grows a window of consecutive unfixed choices starting at the
//! first unfixed position. A passing window is fixed as is. A failing window
//! is remembered as a problem and halved. A failing single choice is lowered
//! by one level and retried; once it reaches 0 it is fixed there.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::choice::Choice;
use crate::control::{ControlLayout, ControlString};
use crate::engine::{ProtocolViolation, SearchError, SearchStats};
use crate::observer::{BudgetCause, SearchEvent, SearchObserver};

/// Limits after which remaining choices are forced conservative.
#[derive(Debug, Clone, Copy, Default)]
pub struct Budget {
    pub max_tries: Option<u32>,
    pub deadline: Option<Instant>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    fn exhausted(&self, tries: u32) -> Option<BudgetCause> {
        if let Some(limit) = self.max_tries {
            if tries >= limit {
                return Some(BudgetCause::Tries(limit));
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(BudgetCause::Time),
            _ => None,
        }
    }
}

/// A window previously shown to contain at least one unsafe choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Problem {
    pub start: usize,
    pub len: usize,
}

impl Problem {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// One control string to validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    /// Base prefix followed by the encoded choices `[0, end)`.
    pub control: ControlString,
    pub first_pos: usize,
    pub end: usize,
    /// 1-based number of this trial.
    pub try_no: u32,
}

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub tries: u32,
    pub budget_exhausted: bool,
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Trial(Trial),
    Done(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Done(Outcome),
    Aborted,
}

/// Step-wise bisection/backoff search over one choice list.
pub struct ChoiceExplorer {
    choices: Vec<Choice>,
    layout: ControlLayout,
    base: ControlString,
    first_pos: usize,
    window: usize,
    problems: Vec<Problem>,
    changed_since_problem: bool,
    pending: Option<usize>,
    phase: Phase,
    tries: u32,
    budget: Budget,
    report_every: u32,
    group_start: usize,
    initial_first_pos: usize,
    stats: SearchStats,
    observer: Arc<dyn SearchObserver>,
}

impl ChoiceExplorer {
    /// Start a run over `choices`, every trial prefixed with `base`.
    ///
    /// Already fixed choices must form a prefix of the list; the search
    /// starts after them.
    pub fn new(
        choices: Vec<Choice>,
        base: ControlString,
        budget: Budget,
        report_every: u32,
        observer: Arc<dyn SearchObserver>,
    ) -> Result<Self, SearchError> {
        let first_pos = choices.iter().take_while(|c| c.is_fixed()).count();
        if let Some(stray) = choices[first_pos..].iter().find(|c| c.is_fixed()) {
            return Err(SearchError::InvalidChoices(format!(
                "choice {} is fixed but follows unfixed choice {first_pos}",
                stray.position
            )));
        }
        if let Some((idx, c)) = choices.iter().enumerate().find(|(i, c)| c.position != *i) {
            return Err(SearchError::InvalidChoices(format!(
                "choice at index {idx} records position {}",
                c.position
            )));
        }

        let layout = ControlLayout::new(&choices);
        let n = choices.len();
        let explorer = Self {
            choices,
            layout,
            base,
            first_pos,
            window: (n - first_pos).max(1),
            problems: Vec::new(),
            changed_since_problem: true,
            pending: None,
            phase: Phase::Running,
            tries: 0,
            budget,
            report_every,
            group_start: first_pos,
            initial_first_pos: first_pos,
            stats: SearchStats::default(),
            observer,
        };

        if first_pos < n {
            explorer.emit(SearchEvent::Started {
                choices: n,
                first_pos,
            });
            explorer.emit(SearchEvent::GroupStarted {
                label: explorer.choices[first_pos].label(),
                position: first_pos,
            });
        }
        Ok(explorer)
    }

    /// Produce the next trial, or report that the run has ended.
    pub fn next_trial(&mut self) -> Result<Step, SearchError> {
        match self.phase {
            Phase::Done(outcome) => return Ok(Step::Done(outcome)),
            Phase::Aborted => {
                return Err(ProtocolViolation::ResumedAfterTermination.into());
            }
            Phase::Running => {}
        }
        if self.pending.is_some() {
            return Err(ProtocolViolation::TrialOutstanding.into());
        }

        let n = self.choices.len();
        if self.first_pos >= n {
            return Ok(Step::Done(self.finish(false)));
        }
        if let Some(cause) = self.budget.exhausted(self.tries) {
            self.emit(SearchEvent::BudgetExhausted {
                cause,
                tries: self.tries,
                first_pos: self.first_pos,
                total: n,
            });
            self.force_remaining()?;
            return Ok(Step::Done(self.finish(true)));
        }

        if self.report_every > 0 && self.tries % self.report_every == 0 {
            self.report_progress();
        }

        self.drop_solved_problems();
        let end = (self.first_pos + self.window).min(n);
        self.pending = Some(end);
        let trial = Trial {
            control: self.base.concat(self.layout.prefix(end)),
            first_pos: self.first_pos,
            end,
            try_no: self.tries + 1,
        };
        self.emit(SearchEvent::Trial {
            try_no: trial.try_no,
            first_pos: trial.first_pos,
            end,
            control: trial.control.to_string(),
        });
        Ok(Step::Trial(trial))
    }

    /// Feed back the oracle's verdict on the outstanding trial.
    pub fn report_verdict(&mut self, passed: bool) -> Result<(), SearchError> {
        if self.phase != Phase::Running {
            return Err(ProtocolViolation::ResumedAfterTermination.into());
        }
        let end = self
            .pending
            .take()
            .ok_or(ProtocolViolation::VerdictWithoutTrial)?;

        self.tries += 1;
        self.stats.tries = self.tries;
        self.emit(SearchEvent::Verdict {
            try_no: self.tries,
            first_pos: self.first_pos,
            end,
            passed,
        });

        if passed {
            self.advance(end);
            self.retarget();
            return Ok(());
        }

        let span = end - self.first_pos;
        if span > 1 {
            self.problems.push(Problem {
                start: self.first_pos,
                len: span,
            });
            self.stats.problems_pushed += 1;
            self.stats.max_problem_depth = self.stats.max_problem_depth.max(self.problems.len());
            self.emit(SearchEvent::ProblemPushed {
                start: self.first_pos,
                len: span,
                depth: self.problems.len(),
            });
            self.window = (span / 2).max(1);
            self.changed_since_problem = false;
            return Ok(());
        }

        self.limit_first()
    }

    /// Lower the isolated choice at `first_pos` one level.
    fn limit_first(&mut self) -> Result<(), SearchError> {
        let position = self.first_pos;
        let choice = &mut self.choices[position];
        if choice.value() == 0 {
            self.phase = Phase::Aborted;
            return Err(ProtocolViolation::ZeroValueStillFails { position }.into());
        }

        let value = choice.lower();
        let label = choice.label();
        self.layout.set_value(position, value)?;
        self.stats.values_limited += 1;
        self.changed_since_problem = true;
        self.emit(SearchEvent::ChoiceLimited {
            position,
            label,
            value,
        });

        if value == 0 {
            self.stats.choices_excluded += 1;
            self.advance(position + 1);
            self.retarget();
        } else {
            self.window = 1;
        }
        Ok(())
    }

    /// Fix every choice in `[first_pos, end)` at its current value.
    fn advance(&mut self, end: usize) {
        let n = self.choices.len();
        for pos in self.first_pos..end {
            self.choices[pos].fix();
            let group_ends = pos + 1 == n || !self.choices[pos].same_group(&self.choices[pos + 1]);
            if group_ends {
                self.emit(SearchEvent::GroupFinished {
                    label: self.choices[pos].label(),
                    end: pos + 1,
                    try_no: self.tries,
                    histogram: self.histogram(self.group_start, pos + 1),
                });
                self.group_start = pos + 1;
            }
        }

        let previous = self.first_pos;
        self.first_pos = end;
        if end < n && end > previous && self.group_start == end {
            self.emit(SearchEvent::GroupStarted {
                label: self.choices[end].label(),
                position: end,
            });
        }
    }

    /// Pick the next window after `first_pos` moved.
    fn retarget(&mut self) {
        self.drop_solved_problems();
        let n = self.choices.len();
        if self.first_pos >= n {
            return;
        }
        self.window = match self.problems.last() {
            Some(problem) => {
                let gap = problem.end() - self.first_pos;
                if self.changed_since_problem {
                    gap
                } else {
                    (gap / 2).max(1)
                }
            }
            None => n - self.first_pos,
        };
    }

    fn drop_solved_problems(&mut self) {
        while self
            .problems
            .last()
            .is_some_and(|p| p.end() <= self.first_pos)
        {
            self.problems.pop();
        }
    }

    fn force_remaining(&mut self) -> Result<(), SearchError> {
        for pos in self.first_pos..self.choices.len() {
            self.choices[pos].force_conservative();
            self.layout.set_value(pos, 0)?;
            self.stats.forced_by_budget += 1;
        }
        Ok(())
    }

    fn finish(&mut self, budget_exhausted: bool) -> Outcome {
        let outcome = Outcome {
            tries: self.tries,
            budget_exhausted,
        };
        self.phase = Phase::Done(outcome);
        self.stats.tries = self.tries;
        self.emit(SearchEvent::Finished {
            tries: self.tries,
            budget_exhausted,
        });
        outcome
    }

    fn report_progress(&self) {
        let n = self.choices.len();
        let total = n - self.initial_first_pos;
        let done = self.first_pos - self.initial_first_pos;
        let done_percent = if total == 0 {
            100
        } else {
            (done * 100 / total) as u32
        };
        self.emit(SearchEvent::Progress {
            tries: self.tries,
            done_percent,
            remaining: n - self.first_pos,
        });
    }

    fn histogram(&self, start: usize, end: usize) -> Vec<usize> {
        let group = &self.choices[start..end];
        let width = group.iter().map(|c| c.max_value as usize).max().unwrap_or(0);
        let mut counts = vec![0; width];
        for c in group {
            counts[c.value() as usize] += 1;
        }
        counts
    }

    fn emit(&self, event: SearchEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn add_oracle_time(&mut self, elapsed: Duration) {
        self.stats.oracle_ms += elapsed.as_millis() as u64;
    }

    /// Index of the first unfixed choice.
    pub fn first_pos(&self) -> usize {
        self.first_pos
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.phase, Phase::Running)
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Base prefix plus every choice up to the first unfixed one.
    pub fn control(&self) -> ControlString {
        self.base.concat(self.layout.prefix(self.first_pos))
    }

    /// Consume the explorer, returning its choices and stats.
    pub fn into_parts(self) -> (Vec<Choice>, SearchStats) {
        (self.choices, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{make_choices, RecordingObserver};
    use crate::observer::NullObserver;

    fn explorer(max_values: &[u32]) -> ChoiceExplorer {
        ChoiceExplorer::new(
            make_choices(max_values),
            ControlString::new(),
            Budget::unlimited(),
            0,
            Arc::new(NullObserver),
        )
        .unwrap()
    }

    fn expect_trial(step: Step) -> Trial {
        match step {
            Step::Trial(t) => t,
            Step::Done(o) => panic!("expected a trial, run finished with {o:?}"),
        }
    }

    #[test]
    fn test_first_trial_covers_everything() {
        let mut ex = explorer(&[2, 2, 2]);
        let trial = expect_trial(ex.next_trial().unwrap());
        assert_eq!((trial.first_pos, trial.end, trial.try_no), (0, 3, 1));
        assert_eq!(trial.control.count_values().unwrap(), 3);
    }

    #[test]
    fn test_failure_pushes_problem_and_halves() {
        let mut ex = explorer(&[2, 2, 2, 2]);
        ex.next_trial().unwrap();
        ex.report_verdict(false).unwrap();
        assert_eq!(ex.problems(), &[Problem { start: 0, len: 4 }]);
        assert_eq!(ex.window(), 2);
        assert_eq!(ex.first_pos(), 0);
        assert!(ex.choices().iter().all(|c| c.value() == 1));
    }

    #[test]
    fn test_single_failure_lowers_then_fixes_at_zero() {
        let mut ex = explorer(&[3]);
        ex.next_trial().unwrap();
        ex.report_verdict(false).unwrap();
        assert_eq!(ex.choices()[0].value(), 1);
        assert!(!ex.choices()[0].is_fixed());
        assert_eq!(ex.first_pos(), 0);

        ex.next_trial().unwrap();
        ex.report_verdict(false).unwrap();
        assert_eq!(ex.choices()[0].value(), 0);
        assert!(ex.choices()[0].is_fixed());
        assert_eq!(ex.first_pos(), 1);

        assert_eq!(
            ex.next_trial().unwrap(),
            Step::Done(Outcome {
                tries: 2,
                budget_exhausted: false
            })
        );
        assert_eq!(ex.stats().choices_excluded, 1);
        assert_eq!(ex.stats().values_limited, 2);
    }

    #[test]
    fn test_zero_value_failure_is_violation() {
        let mut ex = explorer(&[1]);
        ex.next_trial().unwrap();
        let err = ex.report_verdict(false).unwrap_err();
        assert!(matches!(
            err,
            SearchError::ProtocolViolation(ProtocolViolation::ZeroValueStillFails { position: 0 })
        ));
        assert!(ex.is_finished());
        assert!(matches!(
            ex.next_trial(),
            Err(SearchError::ProtocolViolation(
                ProtocolViolation::ResumedAfterTermination
            ))
        ));
    }

    #[test]
    fn test_protocol_order_enforced() {
        let mut ex = explorer(&[2, 2]);
        assert!(matches!(
            ex.report_verdict(true),
            Err(SearchError::ProtocolViolation(
                ProtocolViolation::VerdictWithoutTrial
            ))
        ));
        ex.next_trial().unwrap();
        assert!(matches!(
            ex.next_trial(),
            Err(SearchError::ProtocolViolation(
                ProtocolViolation::TrialOutstanding
            ))
        ));
        ex.report_verdict(true).unwrap();
        assert!(matches!(ex.next_trial().unwrap(), Step::Done(_)));
        assert!(matches!(
            ex.report_verdict(true),
            Err(SearchError::ProtocolViolation(
                ProtocolViolation::ResumedAfterTermination
            ))
        ));
        // Asking again after completion keeps reporting the same outcome.
        assert!(matches!(ex.next_trial().unwrap(), Step::Done(_)));
    }

    #[test]
    fn test_retarget_toward_problem_end() {
        // Choice 5 is unsafe. Fail the whole list, pass the left half.
        let mut ex = explorer(&[2; 8]);
        ex.next_trial().unwrap();
        ex.report_verdict(false).unwrap();
        let t = expect_trial(ex.next_trial().unwrap());
        assert_eq!((t.first_pos, t.end), (0, 4));
        ex.report_verdict(true).unwrap();
        // Nothing changed since the problem was pushed: gap 4 halves to 2.
        assert_eq!(ex.first_pos(), 4);
        assert_eq!(ex.window(), 2);
        let t = expect_trial(ex.next_trial().unwrap());
        assert_eq!((t.first_pos, t.end), (4, 6));
        ex.report_verdict(false).unwrap();
        assert_eq!(ex.problems().len(), 2);
        assert_eq!(ex.window(), 1);
    }

    #[test]
    fn test_budget_forces_remaining_conservative() {
        let mut ex = ChoiceExplorer::new(
            make_choices(&[2, 2, 2, 2]),
            ControlString::new(),
            Budget {
                max_tries: Some(2),
                deadline: None,
            },
            0,
            Arc::new(NullObserver),
        )
        .unwrap();

        ex.next_trial().unwrap();
        ex.report_verdict(false).unwrap();
        ex.next_trial().unwrap();
        ex.report_verdict(true).unwrap();
        assert_eq!(ex.first_pos(), 2);

        let step = ex.next_trial().unwrap();
        assert_eq!(
            step,
            Step::Done(Outcome {
                tries: 2,
                budget_exhausted: true
            })
        );
        let values: Vec<u32> = ex.choices().iter().map(|c| c.value()).collect();
        assert_eq!(values, vec![1, 1, 0, 0]);
        assert!(ex.choices().iter().all(|c| c.is_fixed()));
        assert_eq!(ex.control().count_values().unwrap(), 2);
        assert_eq!(ex.layout.prefix(4), "#f0f#c11#f1f1#f2f0#f3f0");
        assert_eq!(ex.stats().forced_by_budget, 2);
    }

    #[test]
    fn test_expired_deadline_stops_before_first_trial() {
        let mut ex = ChoiceExplorer::new(
            make_choices(&[2, 2]),
            ControlString::new(),
            Budget {
                max_tries: None,
                deadline: Some(Instant::now()),
            },
            0,
            Arc::new(NullObserver),
        )
        .unwrap();
        assert_eq!(
            ex.next_trial().unwrap(),
            Step::Done(Outcome {
                tries: 0,
                budget_exhausted: true
            })
        );
        assert!(ex.control().is_empty());
    }

    #[test]
    fn test_fixed_choices_must_form_prefix() {
        let mut choices = make_choices(&[2, 2, 2]);
        choices[1].fix();
        let result = ChoiceExplorer::new(
            choices,
            ControlString::new(),
            Budget::unlimited(),
            0,
            Arc::new(NullObserver),
        );
        assert!(matches!(result, Err(SearchError::InvalidChoices(_))));
    }

    #[test]
    fn test_base_prefixes_every_trial() {
        let base = ControlString::parse("#f0f#c10").unwrap();
        let mut ex = ChoiceExplorer::new(
            make_choices(&[2]),
            base.clone(),
            Budget::unlimited(),
            0,
            Arc::new(NullObserver),
        )
        .unwrap();
        let t = expect_trial(ex.next_trial().unwrap());
        assert!(t.control.as_str().starts_with(base.as_str()));
        assert_eq!(t.control.count_values().unwrap(), 2);
        ex.report_verdict(true).unwrap();
        assert_eq!(ex.control().count_values().unwrap(), 2);
    }

    #[test]
    fn test_group_events_carry_histograms() {
        let observer = Arc::new(RecordingObserver::default());
        let mut ex = ChoiceExplorer::new(
            make_choices(&[2, 2, 3]),
            ControlString::new(),
            Budget::unlimited(),
            1,
            observer.clone(),
        )
        .unwrap();
        ex.next_trial().unwrap();
        ex.report_verdict(true).unwrap();
        ex.next_trial().unwrap();

        let finished: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SearchEvent::GroupFinished { histogram, end, .. } => Some((end, histogram)),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec![(3, vec![0, 2, 1])]);
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, SearchEvent::Progress { tries: 0, .. })));
    }
}
