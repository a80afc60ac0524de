use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Syntax error in {source_name} at {line}:{column}: {message}")]
    Syntax {
        source_name: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Duplicate identifier {identifier} in rule {rule} ({source_name}:{line}:{column})")]
    DuplicateIdentifier {
        source_name: String,
        rule: String,
        identifier: String,
        line: usize,
        column: usize,
    },

    #[error("Unresolved reference {identifier} in rule {rule} ({source_name}:{line}:{column}){hint}")]
    UnresolvedReference {
        source_name: String,
        rule: String,
        identifier: String,
        line: usize,
        column: usize,
        /// Pre-rendered suggestion, e.g. `; did you mean $string1?`.
        hint: String,
    },

    #[error("Duplicate rule name {rule}: declared in {first} and {second}")]
    DuplicateRuleName {
        rule: String,
        first: String,
        second: String,
    },

    #[error("Pattern compile error in rule {rule}, pattern {pattern}: {message}")]
    PatternCompile {
        rule: String,
        pattern: String,
        message: String,
    },

    #[error("Failed to build the pattern automaton: {0}")]
    Automaton(String),

    #[error("Include cycle detected: {0}")]
    IncludeCycle(String),

    #[error("Scan of {target} exceeded its budget after {steps} steps")]
    ScanTimeout { target: String, steps: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn exit_code(&self) -> i32 {
        2
    }

    /// Attach a target name to a timeout raised by the scanner, which does
    /// not know what it is scanning.
    pub(crate) fn with_target(self, name: &str) -> Self {
        match self {
            Self::ScanTimeout { steps, .. } => Self::ScanTimeout {
                target: name.to_string(),
                steps,
            },
            other => other,
        }
    }
}
