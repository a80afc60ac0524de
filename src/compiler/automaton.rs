//! Shared multi-pattern automaton over every literal variant.
//!
//! A thin wrapper around an [`aho_corasick`] DFA built with standard match
//! semantics. The scanner drives it one byte at a time through the
//! low-level [`Automaton`](aho_corasick::automaton::Automaton) trait, so the
//! state survives chunk boundaries and every overlapping match is reported.
//! Output ids are the insertion order of the variants.

use aho_corasick::automaton::Automaton as _;
use aho_corasick::dfa::DFA;
use aho_corasick::{Anchored, MatchKind, StartKind};

use crate::error::{EngineError, Result};

pub(crate) use aho_corasick::automaton::StateID;

#[derive(Debug, Clone)]
pub struct Automaton {
    dfa: DFA,
    start: StateID,
    outputs: usize,
}

impl Automaton {
    pub fn start(&self) -> StateID {
        self.start
    }

    #[inline]
    pub fn next(&self, state: StateID, byte: u8) -> StateID {
        self.dfa.next_state(Anchored::No, state, byte)
    }

    #[inline]
    pub fn is_match(&self, state: StateID) -> bool {
        self.dfa.is_match(state)
    }

    /// Call `f` with every output id recognised on entering `state`,
    /// including those of shorter suffixes.
    pub fn for_each_output(&self, state: StateID, mut f: impl FnMut(u32)) {
        if !self.dfa.is_match(state) {
            return;
        }
        for i in 0..self.dfa.match_len(state) {
            f(self.dfa.match_pattern(state, i).as_u32());
        }
    }

    /// Number of literal variants compiled in.
    pub fn output_count(&self) -> usize {
        self.outputs
    }

    /// Heap footprint of the transition table, for logging.
    pub fn heap_bytes(&self) -> usize {
        self.dfa.memory_usage()
    }
}

/// Literal variants collected before the DFA is built.
#[derive(Debug, Default)]
pub struct AutomatonBuilder {
    literals: Vec<Vec<u8>>,
}

impl AutomatonBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `bytes` and return its output id. Callers reject empty
    /// literals earlier.
    pub fn add(&mut self, bytes: Vec<u8>) -> u32 {
        self.literals.push(bytes);
        (self.literals.len() - 1) as u32
    }

    pub fn build(self) -> Result<Automaton> {
        let dfa = DFA::builder()
            .match_kind(MatchKind::Standard)
            .start_kind(StartKind::Unanchored)
            .byte_classes(true)
            .prefilter(false)
            .build(&self.literals)
            .map_err(|e| EngineError::Automaton(e.to_string()))?;
        let start = dfa
            .start_state(Anchored::No)
            .map_err(|e| EngineError::Automaton(e.to_string()))?;
        Ok(Automaton {
            dfa,
            start,
            outputs: self.literals.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// (output id, end offset) for every match, in scan order.
    fn run(automaton: &Automaton, haystack: &[u8]) -> Vec<(u32, usize)> {
        let mut state = automaton.start();
        let mut found = Vec::new();
        for (i, &b) in haystack.iter().enumerate() {
            state = automaton.next(state, b);
            if automaton.is_match(state) {
                automaton.for_each_output(state, |id| found.push((id, i)));
            }
        }
        found
    }

    fn build(patterns: &[&[u8]]) -> Automaton {
        let mut builder = AutomatonBuilder::new();
        for p in patterns {
            builder.add(p.to_vec());
        }
        builder.build().unwrap()
    }

    #[test]
    fn classic_overlapping_patterns() {
        let automaton = build(&[b"he", b"she", b"his", b"hers"]);
        let mut found = run(&automaton, b"ushers");
        found.sort();
        // "she" and "he" end at index 3, "hers" at 5.
        assert_eq!(found, vec![(0, 3), (1, 3), (3, 5)]);
    }

    #[test]
    fn suffix_outputs_are_reported() {
        let automaton = build(&[b"abcd", b"bcd", b"cd", b"d"]);
        let mut found = run(&automaton, b"xabcdx");
        found.sort();
        assert_eq!(found, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }

    #[test]
    fn repeated_matches_are_all_reported() {
        let automaton = build(&[b"aa"]);
        let found = run(&automaton, b"aaaa");
        assert_eq!(found, vec![(0, 1), (0, 2), (0, 3)]);
    }

    #[test]
    fn state_carries_across_separate_walks() {
        let automaton = build(&[b"LGPL"]);
        let mut state = automaton.start();
        for &b in b"xxLG" {
            state = automaton.next(state, b);
        }
        let mut found = Vec::new();
        for (i, &b) in b"PL".iter().enumerate() {
            state = automaton.next(state, b);
            automaton.for_each_output(state, |id| found.push((id, i)));
        }
        assert_eq!(found, vec![(0, 1)]);
    }

    #[test]
    fn interrupted_patterns_do_not_match() {
        let automaton = build(&[b"LGPL"]);
        assert!(run(&automaton, b"LG\x00PL LGP\xffL").is_empty());
        assert_eq!(run(&automaton, b"\x00\xffLGPL"), vec![(0, 5)]);
    }

    #[test]
    fn duplicate_literals_report_every_output() {
        let mut builder = AutomatonBuilder::new();
        assert_eq!(builder.add(b"abc".to_vec()), 0);
        assert_eq!(builder.add(b"abc".to_vec()), 1);
        let automaton = builder.build().unwrap();
        assert_eq!(automaton.output_count(), 2);
        let mut found = run(&automaton, b"abc");
        found.sort();
        assert_eq!(found, vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn high_bytes_and_nul_are_ordinary_symbols() {
        let automaton = build(&[b"\x00\xff\x00"]);
        assert_eq!(run(&automaton, b"\xff\x00\xff\x00"), vec![(0, 3)]);
    }

    #[test]
    fn empty_set_never_matches() {
        let automaton = build(&[]);
        assert!(run(&automaton, b"anything").is_empty());
    }
}
