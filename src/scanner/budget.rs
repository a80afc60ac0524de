use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};

/// Target name in timeouts from scans that were not given one.
const UNNAMED_TARGET: &str = "<input>";

/// Limits on the work spent on one target. A step is one input byte
/// walked by the automaton or one byte covered by a regex search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanBudget {
    pub max_steps: Option<u64>,
    pub timeout: Option<Duration>,
}

impl ScanBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Running tally for one scan.
#[derive(Debug)]
pub(crate) struct BudgetTracker {
    max_steps: Option<u64>,
    deadline: Option<Instant>,
    steps: u64,
}

impl BudgetTracker {
    pub(crate) fn start(budget: ScanBudget) -> Self {
        Self {
            max_steps: budget.max_steps,
            deadline: budget.timeout.map(|t| Instant::now() + t),
            steps: 0,
        }
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    /// Account for `n` steps and fail once either limit is exceeded.
    pub(crate) fn charge(&mut self, n: u64) -> Result<()> {
        self.steps = self.steps.saturating_add(n);
        let over_steps = self.max_steps.is_some_and(|max| self.steps > max);
        let over_time = self.deadline.is_some_and(|d| Instant::now() >= d);
        if over_steps || over_time {
            return Err(EngineError::ScanTimeout {
                target: UNNAMED_TARGET.into(),
                steps: self.steps,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_trips() {
        let mut tracker = BudgetTracker::start(ScanBudget::unlimited());
        tracker.charge(u64::MAX).unwrap();
        tracker.charge(1).unwrap();
    }

    #[test]
    fn step_limit_is_inclusive() {
        let mut tracker = BudgetTracker::start(ScanBudget::unlimited().with_max_steps(10));
        tracker.charge(10).unwrap();
        let err = tracker.charge(1).unwrap_err();
        assert!(matches!(err, EngineError::ScanTimeout { steps: 11, .. }));
        assert_eq!(err.to_string(), "Scan of <input> exceeded its budget after 11 steps");
    }

    #[test]
    fn elapsed_deadline_trips() {
        let mut tracker = BudgetTracker::start(ScanBudget::unlimited().with_timeout(Duration::ZERO));
        assert!(tracker.charge(0).is_err());
    }
}
