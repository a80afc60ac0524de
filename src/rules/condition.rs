//! Rule conditions and their evaluation.
//!
//! A condition is parsed once into a `ConditionExpr` whose pattern
//! references are already resolved to indices into the rule's pattern list.
//! Evaluation reads a `RuleMatches` view and never touches the scanner.

use serde::{Deserialize, Serialize};

use crate::scanner::RuleMatches;

/// Boolean expression over a rule's pattern matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ConditionExpr {
    Bool {
        value: bool,
    },
    /// `$id`: true when the pattern matched at least once.
    Pattern {
        index: usize,
    },
    /// `$prefix*`: true when any member matched. `members` is resolved at
    /// parse time.
    Group {
        prefix: String,
        members: Vec<usize>,
    },
    /// `#id > n` / `count($id) > n`. A group sums its members' counts.
    Count {
        patterns: Vec<usize>,
        op: Comparator,
        value: u64,
    },
    /// `$id at n`
    At {
        index: usize,
        offset: u64,
    },
    /// `$id in (a..b)`, both bounds inclusive.
    In {
        index: usize,
        start: u64,
        end: u64,
    },
    /// `filesize > n`
    Filesize {
        op: Comparator,
        value: u64,
    },
    /// `any of (...)`, `all of them`, `2 of ($a*)`, `none of them`.
    Of {
        quantifier: Quantifier,
        set: Vec<usize>,
    },
    And {
        lhs: Box<ConditionExpr>,
        rhs: Box<ConditionExpr>,
    },
    Or {
        lhs: Box<ConditionExpr>,
        rhs: Box<ConditionExpr>,
    },
    Not {
        expr: Box<ConditionExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    pub fn compare(self, lhs: u64, rhs: u64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    Any,
    All,
    None,
    /// `N of (...)`: at least N members matched.
    AtLeast(u64),
}

impl ConditionExpr {
    pub fn and(lhs: ConditionExpr, rhs: ConditionExpr) -> Self {
        Self::And {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn or(lhs: ConditionExpr, rhs: ConditionExpr) -> Self {
        Self::Or {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(expr: ConditionExpr) -> Self {
        Self::Not {
            expr: Box::new(expr),
        }
    }

    /// Evaluate against one rule's matches. `and` / `or` short-circuit.
    pub fn evaluate(&self, matches: &RuleMatches<'_>) -> bool {
        match self {
            Self::Bool { value } => *value,
            Self::Pattern { index } => matches.count(*index) > 0,
            Self::Group { members, .. } => members.iter().any(|&i| matches.count(i) > 0),
            Self::Count {
                patterns,
                op,
                value,
            } => {
                let total: u64 = patterns.iter().map(|&i| matches.count(i) as u64).sum();
                op.compare(total, *value)
            }
            Self::At { index, offset } => matches.offsets(*index).binary_search(offset).is_ok(),
            Self::In { index, start, end } => {
                let offsets = matches.offsets(*index);
                // Offsets are ascending: find the first one >= start.
                let first = offsets.partition_point(|&o| o < *start);
                offsets.get(first).is_some_and(|&o| o <= *end)
            }
            Self::Filesize { op, value } => op.compare(matches.target_len(), *value),
            Self::Of { quantifier, set } => {
                let matched = set.iter().filter(|&&i| matches.count(i) > 0).count() as u64;
                match quantifier {
                    Quantifier::Any => matched > 0,
                    Quantifier::All => matched == set.len() as u64,
                    Quantifier::None => matched == 0,
                    Quantifier::AtLeast(n) => matched >= *n,
                }
            }
            Self::And { lhs, rhs } => lhs.evaluate(matches) && rhs.evaluate(matches),
            Self::Or { lhs, rhs } => lhs.evaluate(matches) || rhs.evaluate(matches),
            Self::Not { expr } => !expr.evaluate(matches),
        }
    }

    /// Mark every pattern index this expression reads.
    pub fn mark_referenced(&self, used: &mut [bool]) {
        let mut mark = |i: usize| {
            if let Some(slot) = used.get_mut(i) {
                *slot = true;
            }
        };
        match self {
            Self::Bool { .. } | Self::Filesize { .. } => {}
            Self::Pattern { index } | Self::At { index, .. } | Self::In { index, .. } => {
                mark(*index)
            }
            Self::Group { members, .. } => members.iter().for_each(|&i| mark(i)),
            Self::Count { patterns, .. } => patterns.iter().for_each(|&i| mark(i)),
            Self::Of { set, .. } => set.iter().for_each(|&i| mark(i)),
            Self::And { lhs, rhs } | Self::Or { lhs, rhs } => {
                lhs.mark_referenced(used);
                rhs.mark_referenced(used);
            }
            Self::Not { expr } => expr.mark_referenced(used),
        }
    }
}
