//! sigscan — signature rule engine for extracted firmware and binary content.
//!
//! Rules are written in a small declarative language (named literal, hex
//! and regex patterns plus a boolean condition). A rule set is compiled
//! once into a single multi-pattern automaton and then scanned against any
//! number of byte targets, concurrently if desired.
//!
//! # Quick Start
//!
//! ```no_run
//! use sigscan::{load_rule_set, scan_bytes, EngineConfig, RuleSource, ScanBudget};
//!
//! let rules = RuleSource::new(
//!     "lgpl.yara",
//!     r#"rule lgpl21_or_later {
//!         strings:
//!             $string1 = "LGPL-2.1-or-later"
//!             $string2 = "LGPL-2.1+"
//!         condition:
//!             any of ($string*)
//!     }"#,
//! );
//! let registry = load_rule_set(&[rules], EngineConfig::default()).unwrap();
//! let verdicts = scan_bytes(&registry, b"SPDX: LGPL-2.1+", ScanBudget::unlimited()).unwrap();
//! println!("{} rule(s) matched", verdicts.len());
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod output;
pub mod parser;
pub mod registry;
pub mod rules;
pub mod scanner;
pub mod target;

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use config::{Config, EngineConfig};
pub use error::{EngineError, Result};
pub use registry::{Registry, RuleSetBuilder, RuleSource};
pub use rules::{Rule, Verdict};
pub use scanner::{MatchSet, ScanBudget, ScanOutcome};

use output::OutputFormat;
use rules::policy::{Policy, PolicyVerdict};
use target::TargetReport;

/// Compile in-memory rule sources into a registry. Fails as a whole if any
/// source is malformed, two rules share a name, or a pattern is rejected.
pub fn load_rule_set(sources: &[RuleSource], engine: EngineConfig) -> Result<Registry> {
    Registry::from_sources(sources, engine)
}

/// Scan a stream to its end and return the rules that matched.
pub fn scan<R: Read>(registry: &Registry, reader: R, budget: ScanBudget) -> Result<Vec<Verdict>> {
    Ok(registry.scan_reader(reader, budget)?.verdicts)
}

/// Scan an in-memory buffer and return the rules that matched.
pub fn scan_bytes(registry: &Registry, data: &[u8], budget: ScanBudget) -> Result<Vec<Verdict>> {
    Ok(registry.scan_bytes(data, budget)?.verdicts)
}

/// Options for a batch scan invocation.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Rule files or directories.
    pub rule_paths: Vec<PathBuf>,
    /// Files, directories, or `-` for stdin.
    pub targets: Vec<PathBuf>,
    /// Path to config file (defaults to `.sigscan.toml` in the working
    /// directory).
    pub config_path: Option<PathBuf>,
    /// Output format.
    pub format: OutputFormat,
    /// CLI overrides for the per-target budget.
    pub timeout_override: Option<Duration>,
    pub max_steps_override: Option<u64>,
    pub threads_override: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            rule_paths: Vec::new(),
            targets: Vec::new(),
            config_path: None,
            format: OutputFormat::Console,
            timeout_override: None,
            max_steps_override: None,
            threads_override: None,
        }
    }
}

/// Complete batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub generated_at: DateTime<Utc>,
    pub rules_loaded: usize,
    /// One report per target, in input order, after policy filtering.
    pub targets: Vec<TargetReport>,
    pub verdict: PolicyVerdict,
}

impl ScanReport {
    /// Apply `policy` to raw per-target reports and summarise them.
    pub fn new(rules_loaded: usize, mut targets: Vec<TargetReport>, policy: &Policy) -> Self {
        policy.apply_reports(&mut targets);
        let verdict = policy.evaluate(&targets);
        Self {
            generated_at: Utc::now(),
            rules_loaded,
            targets,
            verdict,
        }
    }
}

/// Load rules from files and directories into a registry.
pub fn load_rule_paths(paths: &[PathBuf], engine: EngineConfig) -> Result<Registry> {
    let mut builder = RuleSetBuilder::new(engine);
    for path in paths {
        if path.is_dir() {
            builder.add_directory(path)?;
        } else {
            builder.add_file(path)?;
        }
    }
    builder.build()
}

/// Run a complete batch: load config and rules, collect targets, scan them
/// in parallel, apply policy.
pub fn run(options: &ScanOptions) -> Result<ScanReport> {
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE_NAME));
    let mut config = Config::load(&config_path)?;

    // Apply CLI overrides
    if let Some(timeout) = options.timeout_override {
        config.budget.timeout_ms = Some(timeout.as_millis() as u64);
    }
    if let Some(steps) = options.max_steps_override {
        config.budget.max_steps = Some(steps);
    }
    if options.threads_override.is_some() {
        config.scan.threads = options.threads_override;
    }

    let registry = load_rule_paths(&options.rule_paths, config.engine.clone())?;
    let targets = target::collect_targets(&options.targets, &config.scan)?;
    tracing::info!(
        rules = registry.rule_count(),
        targets = targets.len(),
        "starting scan"
    );

    let reports = registry.scan_targets(&targets, config.budget.to_budget(), config.scan.threads)?;
    Ok(ScanReport::new(registry.rule_count(), reports, &config.policy))
}

/// Render a scan report in the specified format.
pub fn render_report(report: &ScanReport, format: OutputFormat) -> Result<String> {
    output::render(report, format)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::path::Path;

    const LGPL: &str = "tests/fixtures/rules/lgpl21_or_later.yara";

    fn lgpl_registry() -> Registry {
        load_rule_paths(&[PathBuf::from(LGPL)], EngineConfig::default()).unwrap()
    }

    fn names(verdicts: &[Verdict]) -> Vec<&str> {
        verdicts.iter().map(|v| v.rule.as_str()).collect()
    }

    #[test]
    fn short_lgpl_marker_matches() {
        let registry = lgpl_registry();
        let verdicts = scan_bytes(
            &registry,
            b"\x7fELF....libfoo LGPL-2.1+ \x00\x00",
            ScanBudget::unlimited(),
        )
        .unwrap();
        assert_eq!(names(&verdicts), vec!["lgpl21_or_later"]);
        assert_eq!(verdicts[0].offsets("$string2"), Some(&[15u64][..]));
    }

    #[test]
    fn unrelated_content_does_not_match() {
        let registry = lgpl_registry();
        let verdicts = scan_bytes(
            &registry,
            b"GPL-2.0-only and LGPL-3.0 and LGPL-2.1 (no plus)",
            ScanBudget::unlimited(),
        )
        .unwrap();
        assert!(verdicts.is_empty());
    }

    #[test]
    fn full_version_banner_matches() {
        let registry = lgpl_registry();
        let banner = b"License LGPLv2.1+: GNU Lesser GPL version 2.1 or later <https://gnu.org/licenses/lgpl.html>";
        let verdicts = scan_bytes(&registry, banner, ScanBudget::unlimited()).unwrap();
        assert_eq!(names(&verdicts), vec!["lgpl21_or_later"]);
        let v = &verdicts[0];
        assert_eq!(v.offsets("$string3"), Some(&[0u64][..]));
        assert!(v.offsets("$string1").is_none());
    }

    #[test]
    fn fixture_files_scan_as_expected() {
        let registry = lgpl_registry();
        let budget = ScanBudget::unlimited();
        let hit = registry
            .scan_file(Path::new("tests/fixtures/targets/libexample.txt"), budget)
            .unwrap();
        assert_eq!(names(&hit.verdicts), vec!["lgpl21_or_later"]);
        let miss = registry
            .scan_file(Path::new("tests/fixtures/targets/plain.txt"), budget)
            .unwrap();
        assert!(miss.verdicts.is_empty());
    }

    #[test]
    fn same_rule_in_two_files_fails_the_whole_load() {
        let err = load_rule_paths(
            &[
                PathBuf::from(LGPL),
                PathBuf::from("tests/fixtures/rules/duplicate/lgpl_copy.yara"),
            ],
            EngineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateRuleName { ref rule, .. } if rule == "lgpl21_or_later"
        ));
    }

    #[test]
    fn rule_directory_with_includes_loads() {
        let registry = load_rule_paths(
            &[PathBuf::from("tests/fixtures/rules/firmware")],
            EngineConfig::default(),
        )
        .unwrap();
        let mut rule_names: Vec<_> = registry.rules().iter().map(|r| r.name.clone()).collect();
        rule_names.sort();
        assert_eq!(rule_names, vec!["elf_header", "mz_header", "uboot_banner"]);

        let verdicts = scan_bytes(
            &registry,
            b"\x7fELF\x02\x01\x01 ... U-Boot 2021.04 (Jan 01 2021)",
            ScanBudget::unlimited(),
        )
        .unwrap();
        // Included rules come before the rules of the including file.
        assert_eq!(names(&verdicts), vec!["uboot_banner", "elf_header"]);
    }

    #[test]
    fn scanning_twice_is_idempotent() {
        let registry = lgpl_registry();
        let data = b"LGPL-2.1+ LGPL-2.1-or-later LGPL-2.1+";
        let first = scan_bytes(&registry, data, ScanBudget::unlimited()).unwrap();
        let second = scan_bytes(&registry, data, ScanBudget::unlimited()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].offsets("$string2"), Some(&[0u64, 28][..]));
    }

    #[test]
    fn timeout_on_one_target_leaves_a_concurrent_scan_alone() {
        let registry = lgpl_registry();
        let budget = ScanBudget::unlimited().with_max_steps(1024);
        let big = vec![b'A'; 64 * 1024];
        let small = b"LGPL-2.1+".to_vec();

        let (big_result, small_result) = std::thread::scope(|s| {
            let big_handle = s.spawn(|| registry.scan_bytes(&big, budget));
            let small_handle = s.spawn(|| registry.scan_bytes(&small, budget));
            (big_handle.join().unwrap(), small_handle.join().unwrap())
        });

        assert!(matches!(big_result, Err(EngineError::ScanTimeout { .. })));
        let outcome = small_result.unwrap();
        assert_eq!(names(&outcome.verdicts), vec!["lgpl21_or_later"]);

        // The registry is still usable after the timeout.
        let again = scan_bytes(&registry, &small, ScanBudget::unlimited()).unwrap();
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn batch_run_reports_each_target() {
        let options = ScanOptions {
            rule_paths: vec![PathBuf::from(LGPL)],
            targets: vec![
                PathBuf::from("tests/fixtures/targets/libexample.txt"),
                PathBuf::from("tests/fixtures/targets/missing.bin"),
                PathBuf::from("tests/fixtures/targets/plain.txt"),
            ],
            config_path: Some(PathBuf::from("tests/fixtures/no-such-config.toml")),
            ..Default::default()
        };
        let report = run(&options).unwrap();
        assert_eq!(report.targets.len(), 3);
        assert_eq!(report.targets[0].verdicts.len(), 1);
        assert!(report.targets[1].error.is_some());
        assert!(report.targets[2].verdicts.is_empty());
        assert_eq!(report.verdict.targets_matched, 1);
        assert_eq!(report.verdict.targets_failed, 1);
        assert_eq!(report.verdict.exit_code(), 2);

        let rendered = render_report(&report, OutputFormat::Json).unwrap();
        assert!(rendered.contains("lgpl21_or_later"));
    }

    #[test]
    fn stream_and_buffer_scans_agree() {
        let registry = lgpl_registry();
        let data = std::fs::read("tests/fixtures/targets/libexample.txt").unwrap();
        let from_stream = scan(&registry, std::io::Cursor::new(&data), ScanBudget::unlimited()).unwrap();
        let from_buffer = scan_bytes(&registry, &data, ScanBudget::unlimited()).unwrap();
        assert_eq!(from_stream, from_buffer);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    use crate::compiler::compile;
    use crate::parser::parse_rules;
    use crate::scanner::scan_slice;

    /// Rule with one plain literal pattern per entry of `needles`.
    fn literal_rule(needles: &[Vec<u8>]) -> String {
        let mut text = String::from("rule r {\n strings:\n");
        for (i, needle) in needles.iter().enumerate() {
            let escaped: String = needle.iter().map(|b| format!("\\x{b:02x}")).collect();
            text.push_str(&format!("  $p{i} = \"{escaped}\"\n"));
        }
        text.push_str(" condition: any of them\n}\n");
        text
    }

    fn naive_offsets(haystack: &[u8], needle: &[u8]) -> Vec<u64> {
        if needle.len() > haystack.len() {
            return Vec::new();
        }
        (0..=haystack.len() - needle.len())
            .filter(|&i| &haystack[i..i + needle.len()] == needle)
            .map(|i| i as u64)
            .collect()
    }

    proptest! {
        #[test]
        fn literal_offsets_match_naive_search(
            needles in prop::collection::vec(prop::collection::vec(0u8..4, 1..5), 1..4),
            haystack in prop::collection::vec(0u8..4, 0..200),
            chunk in 1usize..64,
        ) {
            let set = compile(
                parse_rules("prop", &literal_rule(&needles)).unwrap(),
                &EngineConfig::default(),
            )
            .unwrap();
            let outcome = scan_slice(&set, &haystack, ScanBudget::unlimited(), chunk).unwrap();
            for (i, needle) in needles.iter().enumerate() {
                let expected = naive_offsets(&haystack, needle);
                prop_assert_eq!(outcome.matches.pattern_offsets(i), expected.as_slice());
            }
        }

        #[test]
        fn chunking_does_not_change_matches(
            haystack in prop::collection::vec(prop::sample::select(b"ab-01 \x00".to_vec()), 0..300),
            chunk in 1usize..40,
        ) {
            let rules = parse_rules(
                "prop",
                r#"rule r {
                    strings:
                        $lit = "ab" fullword
                        $wide = "a0" wide
                        $re = /b-[01]{1,4}/
                        $hex = { 61 ?? 30 }
                    condition: any of them
                }"#,
            )
            .unwrap();
            let set = compile(rules, &EngineConfig { max_pattern_length: 16, ..Default::default() }).unwrap();
            let whole = scan_slice(&set, &haystack, ScanBudget::unlimited(), haystack.len().max(1)).unwrap();
            let chunked = scan_slice(&set, &haystack, ScanBudget::unlimited(), chunk).unwrap();
            prop_assert_eq!(&whole.matches, &chunked.matches);
            prop_assert_eq!(whole.steps, chunked.steps);
            prop_assert_eq!(whole.verdicts, chunked.verdicts);
        }

        #[test]
        fn evaluation_is_pure(haystack in prop::collection::vec(prop::sample::select(b"xyz".to_vec()), 0..100)) {
            let rules = parse_rules(
                "prop",
                r#"rule r {
                    strings: $a = "xy" $b = "zz" $c = "yx"
                    condition: ($a and not $b) or #c >= 2 or 2 of ($a, $b, $c)
                }"#,
            )
            .unwrap();
            let set = compile(rules, &EngineConfig::default()).unwrap();
            let outcome = scan_slice(&set, &haystack, ScanBudget::unlimited(), 1024).unwrap();
            let view = outcome.matches.rule_view(&set, 0);
            let condition = &set.rules()[0].condition;
            let first = condition.evaluate(&view);
            prop_assert_eq!(first, condition.evaluate(&view));
            prop_assert_eq!(first, !outcome.verdicts.is_empty());
        }
    }
}
