pub mod condition;
pub mod policy;
pub mod verdict;

use serde::{Deserialize, Serialize};

pub use condition::{Comparator, ConditionExpr, Quantifier};
pub use verdict::{PatternMatch, Verdict};

/// A parsed rule: named patterns plus the condition that decides whether
/// the rule matches a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier, unique within a registry.
    pub name: String,
    /// Tags in declaration order.
    pub tags: Vec<String>,
    /// `meta:` entries in declaration order. Keys are unique.
    pub metadata: Vec<(String, MetaValue)>,
    /// `strings:` entries in declaration order.
    pub patterns: Vec<PatternDef>,
    pub condition: ConditionExpr,
    /// Where the rule was declared.
    pub location: SourceLocation,
}

impl Rule {
    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Location in rule source text. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub source_name: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.source_name, self.line, self.column)
    }
}

/// Value of a `meta:` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// A declared pattern (`$id = ...`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDef {
    /// Identifier including the leading `$`.
    pub identifier: String,
    pub payload: PatternPayload,
    pub modifiers: Modifiers,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PatternPayload {
    /// Quoted text, escapes already decoded.
    Text { bytes: Vec<u8> },
    /// Plain hex string without wildcards or jumps.
    Bytes { bytes: Vec<u8> },
    /// Hex string with wildcards, jumps or alternations, lowered to a byte
    /// regex. `span` is its longest match in bytes; unbounded jumps count
    /// their minimum.
    HexRegex { source: String, span: usize },
    /// `/.../` regular expression.
    Regex {
        source: String,
        case_insensitive: bool,
        dot_all: bool,
    },
}

/// Trailing keywords on a pattern definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub nocase: bool,
    pub wide: bool,
    pub ascii: bool,
    pub fullword: bool,
    /// Pattern counts for the condition but is left out of verdicts.
    pub private: bool,
}

impl Modifiers {
    /// Whether the single-byte form of the pattern is searched.
    /// `wide` on its own disables it; `wide ascii` keeps both.
    pub fn wants_ascii(&self) -> bool {
        self.ascii || !self.wide
    }

    pub fn wants_wide(&self) -> bool {
        self.wide
    }
}
