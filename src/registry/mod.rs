//! Rule set registry.
//!
//! A [`RuleSetBuilder`] gathers rules from in-memory sources, files and
//! directories, then [`RuleSetBuilder::build`] validates rule names and
//! compiles everything into an immutable [`Registry`]. A registry can be
//! shared across threads and scanned concurrently.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::{compile, CompiledRuleSet};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::parser::{parse_rules, parse_source};
use crate::rules::Rule;
use crate::scanner::{self, ScanBudget, ScanOutcome};
use crate::target::{Target, TargetReport};

/// File extensions picked up by [`RuleSetBuilder::add_directory`].
pub const RULE_EXTENSIONS: &[&str] = &["yar", "yara"];

/// Rule text with a name used in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    pub name: String,
    pub text: String,
}

impl RuleSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Accumulates rules before compilation.
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    engine: EngineConfig,
    rules: Vec<Rule>,
    /// Canonical paths of files already loaded, directly or by include.
    loaded: FxHashSet<PathBuf>,
}

impl RuleSetBuilder {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            ..Default::default()
        }
    }

    /// Add rules from text. `include` directives are rejected because there
    /// is no file to resolve them against.
    pub fn add_source(&mut self, source: &RuleSource) -> Result<&mut Self> {
        let rules = parse_rules(&source.name, &source.text)?;
        tracing::debug!(source = %source.name, rules = rules.len(), "added rule source");
        self.rules.extend(rules);
        Ok(self)
    }

    /// Add rules from a file, following `include` directives relative to
    /// the including file. Rules of an included file precede the rules of
    /// the file that includes it. Each file is loaded at most once. On
    /// error nothing from this call is kept.
    pub fn add_file(&mut self, path: &Path) -> Result<&mut Self> {
        let mut loader = IncludeLoader {
            already_loaded: &self.loaded,
            loaded: FxHashSet::default(),
            stack: Vec::new(),
            rules: Vec::new(),
        };
        loader.load(path)?;

        tracing::debug!(
            path = %path.display(),
            files = loader.loaded.len(),
            rules = loader.rules.len(),
            "added rule file"
        );
        let IncludeLoader { loaded, rules, .. } = loader;
        self.loaded.extend(loaded);
        self.rules.extend(rules);
        Ok(self)
    }

    /// Add every `.yar`/`.yara` file below `dir`, in sorted path order.
    pub fn add_directory(&mut self, dir: &Path) -> Result<&mut Self> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                EngineError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_rule_file = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| RULE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_rule_file {
                files.push(entry.into_path());
            }
        }
        files.sort();
        for file in &files {
            self.add_file(file)?;
        }
        Ok(self)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Check rule names and compile.
    pub fn build(self) -> Result<Registry> {
        let mut seen: FxHashMap<&str, &Rule> = FxHashMap::default();
        for rule in &self.rules {
            if let Some(first) = seen.insert(rule.name.as_str(), rule) {
                return Err(EngineError::DuplicateRuleName {
                    rule: rule.name.clone(),
                    first: format!("{}:{}", first.location.source_name, first.location.line),
                    second: format!("{}:{}", rule.location.source_name, rule.location.line),
                });
            }
        }

        let started = Instant::now();
        let set = compile(self.rules, &self.engine)?;
        tracing::info!(
            rules = set.rules().len(),
            patterns = set.pattern_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rule set ready"
        );
        Ok(Registry {
            set,
            engine: self.engine,
        })
    }
}

/// Recursive file loader for one `add_file` call.
struct IncludeLoader<'a> {
    already_loaded: &'a FxHashSet<PathBuf>,
    loaded: FxHashSet<PathBuf>,
    /// Files currently being loaded, outermost first.
    stack: Vec<PathBuf>,
    rules: Vec<Rule>,
}

impl IncludeLoader<'_> {
    fn load(&mut self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize()?;
        if self.stack.contains(&canonical) {
            let chain = self
                .stack
                .iter()
                .chain(std::iter::once(&canonical))
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(EngineError::IncludeCycle(chain));
        }
        if self.already_loaded.contains(&canonical) || self.loaded.contains(&canonical) {
            tracing::debug!(path = %path.display(), "rule file already loaded");
            return Ok(());
        }

        let text = std::fs::read_to_string(&canonical)?;
        let parsed = parse_source(&path.display().to_string(), &text)?;

        self.stack.push(canonical.clone());
        let parent = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in &parsed.includes {
            let target = parent.join(&include.path);
            tracing::trace!(from = %path.display(), include = %target.display(), "following include");
            self.load(&target)?;
        }
        self.stack.pop();

        self.loaded.insert(canonical);
        self.rules.extend(parsed.rules);
        Ok(())
    }
}

/// Compiled, immutable rule set ready for scanning.
#[derive(Debug, Clone)]
pub struct Registry {
    set: CompiledRuleSet,
    engine: EngineConfig,
}

impl Registry {
    /// Compile in-memory sources into a registry.
    pub fn from_sources(sources: &[RuleSource], engine: EngineConfig) -> Result<Self> {
        let mut builder = RuleSetBuilder::new(engine);
        for source in sources {
            builder.add_source(source)?;
        }
        builder.build()
    }

    pub fn rules(&self) -> &[Rule] {
        self.set.rules()
    }

    pub fn rule_count(&self) -> usize {
        self.set.rules().len()
    }

    pub fn compiled(&self) -> &CompiledRuleSet {
        &self.set
    }

    pub fn scan_bytes(&self, data: &[u8], budget: ScanBudget) -> Result<ScanOutcome> {
        scanner::scan_slice(&self.set, data, budget, self.engine.chunk_size)
    }

    pub fn scan_reader<R: Read>(&self, reader: R, budget: ScanBudget) -> Result<ScanOutcome> {
        scanner::scan_reader(&self.set, reader, budget, self.engine.chunk_size)
    }

    pub fn scan_file(&self, path: &Path, budget: ScanBudget) -> Result<ScanOutcome> {
        let name = path.display().to_string();
        let file = File::open(path)?;
        self.scan_reader(file, budget)
            .map_err(|e| e.with_target(&name))
    }

    /// Scan one target, folding any error into the report.
    pub fn scan_target(&self, target: &Target, budget: ScanBudget) -> TargetReport {
        let result = match target {
            Target::File(path) => self.scan_file(path, budget),
            Target::Stdin => self
                .scan_reader(std::io::stdin().lock(), budget)
                .map_err(|e| e.with_target("-")),
        };
        match result {
            Ok(outcome) => TargetReport {
                target: target.name(),
                sha256: Some(outcome.sha256),
                bytes_scanned: outcome.bytes_scanned,
                duration_us: outcome.duration.as_micros() as u64,
                verdicts: outcome.verdicts,
                error: None,
                timed_out: false,
            },
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "scan failed");
                TargetReport::failed(target, &e)
            }
        }
    }

    /// Scan targets in parallel. Reports come back in input order. With
    /// `threads` set, a dedicated pool of that size is used.
    pub fn scan_targets(
        &self,
        targets: &[Target],
        budget: ScanBudget,
        threads: Option<usize>,
    ) -> Result<Vec<TargetReport>> {
        let run = || {
            targets
                .par_iter()
                .map(|t| self.scan_target(t, budget))
                .collect::<Vec<_>>()
        };
        match threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| EngineError::Config(format!("cannot start scan threads: {e}")))?;
                Ok(pool.install(run))
            }
            None => Ok(run()),
        }
    }
}
