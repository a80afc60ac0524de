use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::Verdict;
use crate::target::TargetReport;

/// Policy verdict: the final pass/fail decision over a batch after
/// filtering verdicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    /// No target produced a verdict.
    pub pass: bool,
    pub targets_scanned: usize,
    pub targets_matched: usize,
    pub targets_failed: usize,
    pub total_verdicts: usize,
}

impl PolicyVerdict {
    /// Process exit code: 2 when any target failed, 1 when anything
    /// matched, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.targets_failed > 0 {
            2
        } else if !self.pass {
            1
        } else {
            0
        }
    }
}

/// Policy configuration loaded from `.sigscan.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Rule names whose verdicts are dropped.
    #[serde(default)]
    pub ignore_rules: HashSet<String>,
    /// When non-empty, only rules carrying one of these tags are reported.
    #[serde(default)]
    pub only_tags: Vec<String>,
}

impl Policy {
    fn keeps(&self, verdict: &Verdict) -> bool {
        if self.ignore_rules.contains(&verdict.rule) {
            return false;
        }
        self.only_tags.is_empty() || verdict.tags.iter().any(|t| self.only_tags.contains(t))
    }

    /// Drop verdicts of ignored rules and of rules outside `only_tags`,
    /// in place.
    pub fn apply_reports(&self, reports: &mut [TargetReport]) {
        for report in reports {
            report.verdicts.retain(|v| self.keeps(v));
        }
    }

    /// Evaluate filtered reports and produce a verdict.
    pub fn evaluate(&self, reports: &[TargetReport]) -> PolicyVerdict {
        let mut verdict = PolicyVerdict {
            pass: true,
            targets_scanned: reports.len(),
            targets_matched: 0,
            targets_failed: 0,
            total_verdicts: 0,
        };
        for report in reports {
            let kept = report.verdicts.iter().filter(|v| self.keeps(v)).count();
            if kept > 0 {
                verdict.targets_matched += 1;
                verdict.total_verdicts += kept;
            }
            if report.error.is_some() {
                verdict.targets_failed += 1;
            }
        }
        verdict.pass = verdict.total_verdicts == 0;
        verdict
    }
}
