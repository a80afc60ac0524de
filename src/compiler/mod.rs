//! Pattern compiler.
//!
//! Every literal pattern of every rule is expanded into its variants and
//! inserted into one shared [`Automaton`]. Regex patterns, complex hex
//! strings and oversized `nocase` literals go to the auxiliary regex
//! matcher. The result is immutable and shared by all scans.

pub mod automaton;
pub mod regex_matcher;
pub mod variants;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::rules::{PatternDef, PatternPayload, Rule};

pub use automaton::Automaton;
use automaton::AutomatonBuilder;
pub use regex_matcher::RegexEntry;
use regex_matcher::{compile_regex, RegexOptions};
use variants::{expand_literal, Expansion};

/// Where a global pattern id comes from.
#[derive(Debug, Clone, Copy)]
pub struct PatternSlot {
    pub rule: u32,
    pub local: u32,
    pub fullword: bool,
}

/// One automaton output: a concrete byte string of a pattern.
#[derive(Debug, Clone, Copy)]
pub struct Variant {
    pub pattern: u32,
    pub len: u32,
    pub wide: bool,
}

/// Compiled, immutable form of a rule set.
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    rules: Vec<Rule>,
    /// Global id of each rule's first pattern. A rule's patterns occupy
    /// `pattern_base[r]..pattern_base[r] + rules[r].patterns.len()`.
    pattern_base: Vec<usize>,
    patterns: Vec<PatternSlot>,
    automaton: Automaton,
    variants: Vec<Variant>,
    regexes: Vec<RegexEntry>,
    window: usize,
    max_matches_per_pattern: usize,
}

impl CompiledRuleSet {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    pub fn variant(&self, id: u32) -> &Variant {
        &self.variants[id as usize]
    }

    pub fn pattern(&self, id: u32) -> &PatternSlot {
        &self.patterns[id as usize]
    }

    pub fn regexes(&self) -> &[RegexEntry] {
        &self.regexes
    }

    /// Global pattern ids of rule `index`.
    pub fn rule_patterns(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.pattern_base[index];
        start..start + self.rules[index].patterns.len()
    }

    /// Bytes of lookahead regex matches may need across a chunk boundary.
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn max_matches_per_pattern(&self) -> usize {
        self.max_matches_per_pattern
    }
}

/// Compile validated rules. Fails on the first bad pattern.
pub fn compile(rules: Vec<Rule>, config: &EngineConfig) -> Result<CompiledRuleSet> {
    config.validate()?;

    let mut builder = AutomatonBuilder::new();
    let mut pattern_base = Vec::with_capacity(rules.len());
    let mut patterns = Vec::new();
    let mut variants: Vec<Variant> = Vec::new();
    let mut regexes = Vec::new();

    for (rule_index, rule) in rules.iter().enumerate() {
        pattern_base.push(patterns.len());
        for (local, def) in rule.patterns.iter().enumerate() {
            let pattern_id = patterns.len() as u32;
            patterns.push(PatternSlot {
                rule: rule_index as u32,
                local: local as u32,
                fullword: def.modifiers.fullword,
            });
            match lower_pattern(rule, def, pattern_id, config)? {
                Lowered::Literals(literals) => {
                    for (bytes, wide) in literals {
                        let len = bytes.len() as u32;
                        let variant_id = builder.add(bytes);
                        debug_assert_eq!(variant_id as usize, variants.len());
                        variants.push(Variant {
                            pattern: pattern_id,
                            len,
                            wide,
                        });
                    }
                }
                Lowered::Regexes(entries) => regexes.extend(entries),
            }
        }
    }

    let automaton = builder.build()?;
    tracing::debug!(
        rules = rules.len(),
        patterns = patterns.len(),
        variants = variants.len(),
        regexes = regexes.len(),
        heap_bytes = automaton.heap_bytes(),
        "compiled rule set"
    );

    Ok(CompiledRuleSet {
        rules,
        pattern_base,
        patterns,
        automaton,
        variants,
        regexes,
        window: config.max_pattern_length.saturating_sub(1),
        max_matches_per_pattern: config.max_matches_per_pattern,
    })
}

enum Lowered {
    /// (bytes, wide) pairs for the automaton.
    Literals(Vec<(Vec<u8>, bool)>),
    Regexes(Vec<RegexEntry>),
}

fn pattern_error(rule: &Rule, def: &PatternDef, message: impl Into<String>) -> EngineError {
    EngineError::PatternCompile {
        rule: rule.name.clone(),
        pattern: def.identifier.clone(),
        message: message.into(),
    }
}

fn lower_pattern(
    rule: &Rule,
    def: &PatternDef,
    pattern_id: u32,
    config: &EngineConfig,
) -> Result<Lowered> {
    let modifiers = &def.modifiers;
    match &def.payload {
        PatternPayload::Text { bytes } | PatternPayload::Bytes { bytes } => {
            if bytes.is_empty() {
                return Err(pattern_error(rule, def, "pattern is empty"));
            }
            match expand_literal(bytes, modifiers, config.max_case_variants) {
                Expansion::Literals(literals) => {
                    let mut out = Vec::with_capacity(literals.len());
                    for literal in literals {
                        if literal.bytes.len() > config.max_pattern_length {
                            return Err(pattern_error(
                                rule,
                                def,
                                format!(
                                    "encoded length {} exceeds the maximum pattern length {}",
                                    literal.bytes.len(),
                                    config.max_pattern_length
                                ),
                            ));
                        }
                        out.push((literal.bytes, literal.wide));
                    }
                    Ok(Lowered::Literals(out))
                }
                Expansion::CaseInsensitiveRegex(sources) => {
                    let encoded = if modifiers.wants_wide() {
                        bytes.len() * 2
                    } else {
                        bytes.len()
                    };
                    if encoded > config.max_pattern_length {
                        return Err(pattern_error(
                            rule,
                            def,
                            format!(
                                "encoded length {encoded} exceeds the maximum pattern length {}",
                                config.max_pattern_length
                            ),
                        ));
                    }
                    tracing::debug!(
                        rule = %rule.name,
                        pattern = %def.identifier,
                        "too many case variants, matching with a regex"
                    );
                    let options = RegexOptions {
                        case_insensitive: true,
                        dot_all: false,
                    };
                    let mut entries = Vec::with_capacity(sources.len());
                    for (source, wide) in sources {
                        entries.push(regex_entry(rule, def, pattern_id, &source, options, wide)?);
                    }
                    Ok(Lowered::Regexes(entries))
                }
            }
        }
        PatternPayload::HexRegex { source, span } => {
            let options = RegexOptions {
                case_insensitive: false,
                dot_all: true,
            };
            if *span > config.max_pattern_length {
                return Err(pattern_error(
                    rule,
                    def,
                    format!(
                        "hex string length {span} exceeds the maximum pattern length {}",
                        config.max_pattern_length
                    ),
                ));
            }
            Ok(Lowered::Regexes(vec![regex_entry(
                rule, def, pattern_id, source, options, false,
            )?]))
        }
        PatternPayload::Regex {
            source,
            case_insensitive,
            dot_all,
        } => {
            if modifiers.wide {
                return Err(pattern_error(
                    rule,
                    def,
                    "the wide modifier is not supported on regular expressions",
                ));
            }
            check_regex_length(rule, def, source, config)?;
            let options = RegexOptions {
                case_insensitive: *case_insensitive || modifiers.nocase,
                dot_all: *dot_all,
            };
            Ok(Lowered::Regexes(vec![regex_entry(
                rule, def, pattern_id, source, options, false,
            )?]))
        }
    }
}

fn check_regex_length(rule: &Rule, def: &PatternDef, source: &str, config: &EngineConfig) -> Result<()> {
    if source.len() > config.max_pattern_length {
        return Err(pattern_error(
            rule,
            def,
            format!(
                "source length {} exceeds the maximum pattern length {}",
                source.len(),
                config.max_pattern_length
            ),
        ));
    }
    Ok(())
}

fn regex_entry(
    rule: &Rule,
    def: &PatternDef,
    pattern_id: u32,
    source: &str,
    options: RegexOptions,
    wide: bool,
) -> Result<RegexEntry> {
    let (regex, max_len) = compile_regex(source, options).map_err(|m| pattern_error(rule, def, m))?;
    if max_len.is_none() {
        tracing::trace!(
            rule = %rule.name,
            pattern = %def.identifier,
            "regex has no maximum match length"
        );
    }
    Ok(RegexEntry {
        pattern: pattern_id,
        regex,
        wide,
        max_len,
    })
}
