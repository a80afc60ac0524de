//! Auxiliary matcher for patterns that cannot go into the automaton.

use regex::bytes::{Regex, RegexBuilder};

/// Compiled size cap per regex; keeps a hostile rule from exhausting memory.
const REGEX_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// A regex searched independently of the automaton.
#[derive(Debug, Clone)]
pub struct RegexEntry {
    /// Global pattern id.
    pub pattern: u32,
    pub regex: Regex,
    /// Matches double-byte text; affects `fullword` checks.
    pub wide: bool,
    /// Longest possible match, when bounded.
    pub max_len: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexOptions {
    pub case_insensitive: bool,
    pub dot_all: bool,
}

/// Validate and compile a byte regex. Returns the regex and its maximum
/// match length, or a message describing why it was rejected.
pub fn compile_regex(source: &str, options: RegexOptions) -> Result<(Regex, Option<usize>), String> {
    let hir = regex_syntax::ParserBuilder::new()
        .unicode(false)
        .utf8(false)
        .case_insensitive(options.case_insensitive)
        .dot_matches_new_line(options.dot_all)
        .build()
        .parse(source)
        .map_err(|e| e.to_string())?;

    let props = hir.properties();
    if props.minimum_len().unwrap_or(0) == 0 {
        return Err("regular expression can match the empty string".into());
    }
    let max_len = props.maximum_len();

    let regex = RegexBuilder::new(source)
        .unicode(false)
        .case_insensitive(options.case_insensitive)
        .dot_matches_new_line(options.dot_all)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| e.to_string())?;

    Ok((regex, max_len))
}
