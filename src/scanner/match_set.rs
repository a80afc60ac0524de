use crate::compiler::CompiledRuleSet;

/// Offsets recorded for every pattern of a rule set over one target,
/// indexed by global pattern id. Offsets are ascending and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    offsets: Vec<Vec<u64>>,
    target_len: u64,
}

impl MatchSet {
    pub(crate) fn new(offsets: Vec<Vec<u64>>, target_len: u64) -> Self {
        Self { offsets, target_len }
    }

    pub fn target_len(&self) -> u64 {
        self.target_len
    }

    pub fn pattern_offsets(&self, pattern: usize) -> &[u64] {
        &self.offsets[pattern]
    }

    /// Total number of recorded offsets.
    pub fn total(&self) -> usize {
        self.offsets.iter().map(Vec::len).sum()
    }

    /// The slice belonging to rule `index`.
    pub fn rule_view<'a>(&'a self, set: &CompiledRuleSet, index: usize) -> RuleMatches<'a> {
        RuleMatches::new(&self.offsets[set.rule_patterns(index)], self.target_len)
    }
}

/// One rule's matches, indexed by the rule's local pattern index.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatches<'a> {
    offsets: &'a [Vec<u64>],
    target_len: u64,
}

impl<'a> RuleMatches<'a> {
    pub fn new(offsets: &'a [Vec<u64>], target_len: u64) -> Self {
        Self { offsets, target_len }
    }

    pub fn count(&self, index: usize) -> usize {
        self.offsets(index).len()
    }

    /// Ascending offsets of pattern `index`; empty when out of range.
    pub fn offsets(&self, index: usize) -> &'a [u64] {
        self.offsets.get(index).map_or(&[][..], |v| v.as_slice())
    }

    pub fn target_len(&self) -> u64 {
        self.target_len
    }
}
