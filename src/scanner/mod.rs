//! Scan engine.
//!
//! A [`Scanner`] consumes a target as a sequence of chunks. The automaton
//! state survives chunk boundaries, so literal matches spanning two chunks
//! are found without re-reading. Regex entries and `fullword` checks need
//! context on both sides of a match; the scanner keeps a short carry of the
//! previous chunk's tail for that. Scanning the same bytes in any chunking
//! yields the same offsets.

mod budget;
mod match_set;

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::compiler::CompiledRuleSet;
use crate::compiler::automaton::StateID;
use crate::error::Result;
use crate::rules::Verdict;

pub use budget::ScanBudget;
pub(crate) use budget::BudgetTracker;
pub use match_set::{MatchSet, RuleMatches};

/// Automaton bytes walked between budget checks.
const BLOCK: usize = 4096;

/// Everything learned about one target.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub matches: MatchSet,
    /// Rules whose condition held, in rule set order.
    pub verdicts: Vec<Verdict>,
    /// Hex SHA-256 of the scanned bytes.
    pub sha256: String,
    pub bytes_scanned: u64,
    pub steps: u64,
    pub duration: Duration,
}

/// A literal hit whose `fullword` lookahead lies in data not yet seen.
#[derive(Debug, Clone, Copy)]
struct Pending {
    pattern: u32,
    start: u64,
    end: u64,
    wide: bool,
}

/// Incremental scan of one target.
pub struct Scanner<'r> {
    set: &'r CompiledRuleSet,
    tracker: BudgetTracker,
    state: StateID,
    /// Bytes fed so far.
    consumed: u64,
    /// Tail of the data fed so far; starts at `consumed - carry.len()`.
    carry: Vec<u8>,
    carry_len: usize,
    /// Bytes each regex entry's match needs after its start before it is
    /// accepted ahead of end of input: its longest match, capped by the
    /// window, plus `fullword` context.
    regex_horizon: Vec<u64>,
    pending: Vec<Pending>,
    /// Absolute position each regex entry resumes searching from.
    regex_resume: Vec<u64>,
    /// Absolute position up to which each regex entry has been charged.
    regex_charged: Vec<u64>,
    offsets: Vec<Vec<u64>>,
    hits: Vec<(u32, usize)>,
    truncated: bool,
    hasher: Sha256,
    started: Instant,
}

impl<'r> Scanner<'r> {
    pub fn new(set: &'r CompiledRuleSet, budget: ScanBudget) -> Self {
        let window = set.window();
        let regex_horizon = set
            .regexes()
            .iter()
            .map(|entry| (entry.max_len.map_or(window, |len| len.min(window)) + 3) as u64)
            .collect();
        Self {
            set,
            tracker: BudgetTracker::start(budget),
            state: set.automaton().start(),
            consumed: 0,
            carry: Vec::new(),
            carry_len: window + 5,
            regex_horizon,
            pending: Vec::new(),
            regex_resume: vec![0; set.regexes().len()],
            regex_charged: vec![0; set.regexes().len()],
            offsets: vec![Vec::new(); set.pattern_count()],
            hits: Vec::new(),
            truncated: false,
            hasher: Sha256::new(),
            started: Instant::now(),
        }
    }

    /// Scan the next chunk of the target.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.hasher.update(chunk);

        let mut buf = std::mem::take(&mut self.carry);
        let base = self.consumed - buf.len() as u64;
        let from = buf.len();
        buf.extend_from_slice(chunk);
        self.consumed += chunk.len() as u64;

        self.resolve_pending(&buf, base, false);
        let result = self
            .walk(&buf, base, from)
            .and_then(|()| self.regex_round(&buf, base, false));

        let keep = buf.len().min(self.carry_len);
        buf.drain(..buf.len() - keep);
        self.carry = buf;
        result
    }

    /// Finish the target: settle deferred matches and evaluate every rule.
    pub fn finish(mut self) -> Result<ScanOutcome> {
        let buf = std::mem::take(&mut self.carry);
        let base = self.consumed - buf.len() as u64;
        self.resolve_pending(&buf, base, true);
        self.regex_round(&buf, base, true)?;

        let cap = self.set.max_matches_per_pattern();
        let mut offsets = std::mem::take(&mut self.offsets);
        for list in &mut offsets {
            if settle_offsets(list, cap) {
                self.warn_truncated(cap);
            }
        }
        let matches = MatchSet::new(offsets, self.consumed);
        let verdicts = evaluate(self.set, &matches);

        let duration = self.started.elapsed();
        tracing::debug!(
            bytes = self.consumed,
            steps = self.tracker.steps(),
            matches = matches.total(),
            verdicts = verdicts.len(),
            elapsed_us = duration.as_micros() as u64,
            "scan finished"
        );

        Ok(ScanOutcome {
            matches,
            verdicts,
            sha256: hex::encode(self.hasher.finalize()),
            bytes_scanned: self.consumed,
            steps: self.tracker.steps(),
            duration,
        })
    }

    fn walk(&mut self, buf: &[u8], base: u64, from: usize) -> Result<()> {
        let set = self.set;
        let automaton = set.automaton();
        let mut hits = std::mem::take(&mut self.hits);

        let mut block_start = from;
        while block_start < buf.len() {
            let block_end = (block_start + BLOCK).min(buf.len());
            self.tracker.charge((block_end - block_start) as u64)?;

            let mut state = self.state;
            for (i, &byte) in buf.iter().enumerate().take(block_end).skip(block_start) {
                state = automaton.next(state, byte);
                if automaton.is_match(state) {
                    automaton.for_each_output(state, |v| hits.push((v, i)));
                }
            }
            self.state = state;

            for (v, i) in hits.drain(..) {
                let variant = set.variant(v);
                let end = base + i as u64 + 1;
                let start = end - u64::from(variant.len);
                self.candidate(buf, base, variant.pattern, start, end, variant.wide, false);
            }
            block_start = block_end;
        }

        self.hits = hits;
        Ok(())
    }

    /// Search every regex entry over `buf`. Outside the final round a match
    /// is only taken once its horizon past its start is available, so
    /// its extent and `fullword` context are known. Each byte is charged to
    /// the budget once per entry, however often the carry is searched again.
    fn regex_round(&mut self, buf: &[u8], base: u64, final_round: bool) -> Result<()> {
        let set = self.set;
        let buf_end = base + buf.len() as u64;

        for (i, entry) in set.regexes().iter().enumerate() {
            let horizon = self.regex_horizon[i];
            let mut pos = self.regex_resume[i].max(base);
            while pos < buf_end {
                let found = entry.regex.find_at(buf, (pos - base) as usize);
                let covered = found.map_or(buf_end, |m| base + m.end() as u64);
                let charged = self.regex_charged[i];
                if covered > charged {
                    self.tracker.charge(covered - charged.max(pos))?;
                    self.regex_charged[i] = covered;
                }
                let Some(m) = found else {
                    break;
                };
                let start = base + m.start() as u64;
                let end = base + m.end() as u64;
                if !final_round && start + horizon > buf_end {
                    break;
                }
                let accepted =
                    self.candidate(buf, base, entry.pattern, start, end, entry.wide, final_round);
                pos = if accepted { end } else { start + 1 };
            }
            self.regex_resume[i] = if final_round {
                pos
            } else {
                pos.max(buf_end.saturating_sub(horizon))
            };
        }
        Ok(())
    }

    /// Apply the `fullword` check and record the hit. Returns false when the
    /// hit is rejected.
    #[allow(clippy::too_many_arguments)]
    fn candidate(
        &mut self,
        buf: &[u8],
        base: u64,
        pattern: u32,
        start: u64,
        end: u64,
        wide: bool,
        final_round: bool,
    ) -> bool {
        if self.set.pattern(pattern).fullword {
            if !boundary_before(buf, base, start, wide) {
                return false;
            }
            match boundary_after(buf, base, end, wide, final_round) {
                Some(true) => {}
                Some(false) => return false,
                None => {
                    self.pending.push(Pending {
                        pattern,
                        start,
                        end,
                        wide,
                    });
                    return true;
                }
            }
        }
        self.record(pattern, start);
        true
    }

    fn resolve_pending(&mut self, buf: &[u8], base: u64, final_round: bool) {
        if self.pending.is_empty() {
            return;
        }
        for p in std::mem::take(&mut self.pending) {
            match boundary_after(buf, base, p.end, p.wide, final_round) {
                Some(true) => self.record(p.pattern, p.start),
                Some(false) => {}
                None => self.pending.push(p),
            }
        }
    }

    /// Offsets arrive roughly but not strictly in order (deferred `fullword`
    /// hits, one regex entry per encoding), so a full list is settled before
    /// anything is dropped and the lowest offsets are the ones kept.
    fn record(&mut self, pattern: u32, start: u64) {
        let cap = self.set.max_matches_per_pattern();
        let list = &mut self.offsets[pattern as usize];
        list.push(start);
        if list.len() > cap.saturating_mul(2) && settle_offsets(list, cap) {
            self.warn_truncated(cap);
        }
    }

    fn warn_truncated(&mut self, cap: usize) {
        if !self.truncated {
            self.truncated = true;
            tracing::warn!(cap, "match limit reached, further offsets are dropped");
        }
    }
}

/// Sort, deduplicate and cap `list`. Returns true when offsets were dropped.
fn settle_offsets(list: &mut Vec<u64>, cap: usize) -> bool {
    list.sort_unstable();
    list.dedup();
    let dropped = list.len() > cap;
    list.truncate(cap);
    dropped
}

fn byte_at(buf: &[u8], base: u64, pos: u64) -> Option<u8> {
    pos.checked_sub(base)
        .and_then(|i| buf.get(i as usize))
        .copied()
}

fn boundary_before(buf: &[u8], base: u64, start: u64, wide: bool) -> bool {
    if wide {
        if start < 2 {
            return true;
        }
        match (byte_at(buf, base, start - 2), byte_at(buf, base, start - 1)) {
            (Some(c), Some(0)) => !c.is_ascii_alphanumeric(),
            _ => true,
        }
    } else {
        match start.checked_sub(1).and_then(|p| byte_at(buf, base, p)) {
            Some(c) => !c.is_ascii_alphanumeric(),
            None => true,
        }
    }
}

/// `None` while the following bytes have not been seen yet.
fn boundary_after(buf: &[u8], base: u64, end: u64, wide: bool, final_round: bool) -> Option<bool> {
    let buf_end = base + buf.len() as u64;
    let needed = if wide { 2 } else { 1 };
    if end + needed > buf_end {
        return final_round.then_some(true);
    }
    let c = byte_at(buf, base, end)?;
    if wide {
        let next = byte_at(buf, base, end + 1)?;
        Some(!(c.is_ascii_alphanumeric() && next == 0))
    } else {
        Some(!c.is_ascii_alphanumeric())
    }
}

/// Evaluate every rule against a finished match set.
pub fn evaluate(set: &CompiledRuleSet, matches: &MatchSet) -> Vec<Verdict> {
    set.rules()
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| {
            let view = matches.rule_view(set, i);
            rule.condition
                .evaluate(&view)
                .then(|| Verdict::new(rule, &view))
        })
        .collect()
}

/// Scan an in-memory buffer, fed in `chunk_size` slices.
pub fn scan_slice(
    set: &CompiledRuleSet,
    data: &[u8],
    budget: ScanBudget,
    chunk_size: usize,
) -> Result<ScanOutcome> {
    let mut scanner = Scanner::new(set, budget);
    for chunk in data.chunks(chunk_size.max(1)) {
        scanner.feed(chunk)?;
    }
    scanner.finish()
}

/// Scan a stream to its end, `chunk_size` bytes at a time. Short reads are
/// topped up before the chunk is scanned, so the work done does not depend
/// on how the reader splits its data.
pub fn scan_reader<R: Read>(
    set: &CompiledRuleSet,
    mut reader: R,
    budget: ScanBudget,
    chunk_size: usize,
) -> Result<ScanOutcome> {
    let mut scanner = Scanner::new(set, budget);
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let n = fill_chunk(&mut reader, &mut chunk)?;
        if n > 0 {
            scanner.feed(&chunk[..n])?;
        }
        if n < chunk.len() {
            break;
        }
    }
    scanner.finish()
}

/// Read until `chunk` is full or the stream ends. Returns the bytes read.
fn fill_chunk<R: Read>(reader: &mut R, chunk: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        match reader.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
