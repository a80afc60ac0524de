use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::rules::policy::Policy;
use crate::scanner::ScanBudget;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".sigscan.toml";

/// Top-level configuration from `.sigscan.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub scan: ScanConfig,
}

/// Limits applied while compiling and scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest encoded pattern accepted. Also sizes the carry-over window
    /// between chunks.
    pub max_pattern_length: usize,
    /// Above this many case variants a `nocase` literal is matched with a
    /// case-insensitive regex.
    pub max_case_variants: usize,
    /// Bytes read per chunk when streaming.
    pub chunk_size: usize,
    /// Offsets kept per pattern per target.
    pub max_matches_per_pattern: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pattern_length: 4096,
            max_case_variants: 1024,
            chunk_size: 1024 * 1024,
            max_matches_per_pattern: 1_000_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_pattern_length == 0 {
            return Err(EngineError::Config("engine.max_pattern_length must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::Config("engine.chunk_size must be positive".into()));
        }
        if self.max_matches_per_pattern == 0 {
            return Err(EngineError::Config(
                "engine.max_matches_per_pattern must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Per-target scan budget. Absent fields mean unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub timeout_ms: Option<u64>,
    pub max_steps: Option<u64>,
}

impl BudgetConfig {
    pub fn to_budget(&self) -> ScanBudget {
        ScanBudget {
            max_steps: self.max_steps,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Target collection and parallelism.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Worker threads for batch scans; `None` uses the global pool.
    pub threads: Option<usize>,
    pub follow_symlinks: bool,
    /// Skip files ignored by `.gitignore` and hidden files when walking
    /// directories.
    pub respect_gitignore: bool,
    /// Glob patterns for paths left out of directory walks.
    pub exclude: Vec<String>,
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.engine.validate()?;
        if config.scan.threads == Some(0) {
            return Err(EngineError::Config("scan.threads must be positive".into()));
        }
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# sigscan configuration

[engine]
# Longest encoded pattern (bytes) accepted by the compiler.
max_pattern_length = 4096
# nocase literals with more case variants than this use a regex.
max_case_variants = 1024
# Bytes read per chunk when scanning streams.
chunk_size = 1048576
max_matches_per_pattern = 1000000

[budget]
# Per-target limits; omit for unlimited.
# timeout_ms = 5000
# max_steps = 100000000

[policy]
# Rule names whose verdicts are dropped.
# ignore_rules = ["noisy_rule"]
# Only report rules carrying at least one of these tags.
# only_tags = ["license"]

[scan]
# threads = 4
follow_symlinks = false
respect_gitignore = false
# exclude = ["**/*.png", "**/.git/**"]
"#
    }
}
