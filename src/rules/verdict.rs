use serde::{Deserialize, Serialize};

use super::{MetaValue, Rule};
use crate::scanner::RuleMatches;

/// A rule whose condition held for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Rule identifier.
    pub rule: String,
    pub tags: Vec<String>,
    pub metadata: Vec<(String, MetaValue)>,
    /// Matched, non-private patterns in declaration order.
    pub matches: Vec<PatternMatch>,
}

/// Offsets at which one pattern matched, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub identifier: String,
    pub offsets: Vec<u64>,
}

impl Verdict {
    pub(crate) fn new(rule: &Rule, matches: &RuleMatches<'_>) -> Self {
        let matches = rule
            .patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.modifiers.private)
            .filter_map(|(i, p)| {
                let offsets = matches.offsets(i);
                (!offsets.is_empty()).then(|| PatternMatch {
                    identifier: p.identifier.clone(),
                    offsets: offsets.to_vec(),
                })
            })
            .collect();

        Self {
            rule: rule.name.clone(),
            tags: rule.tags.clone(),
            metadata: rule.metadata.clone(),
            matches,
        }
    }

    /// Offsets for one pattern identifier, if it matched.
    pub fn offsets(&self, identifier: &str) -> Option<&[u64]> {
        self.matches
            .iter()
            .find(|m| m.identifier == identifier)
            .map(|m| m.offsets.as_slice())
    }
}
