//! Scan targets: what the CLI and batch API hand to the registry.
//!
//! The engine only ever sees bytes. This module turns command-line paths
//! into a flat, ordered list of files (or stdin) and defines the per-target
//! report that a batch scan returns.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::{EngineError, Result};
use crate::rules::Verdict;

/// One byte source to scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    File(PathBuf),
    /// Standard input, written as `-` on the command line.
    Stdin,
}

impl Target {
    pub fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Stdin => "-".into(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Stdin => f.write_str("<stdin>"),
        }
    }
}

/// Result of scanning one target. A failed scan carries `error` and no
/// verdicts; the rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    /// Hex SHA-256 of the scanned bytes.
    pub sha256: Option<String>,
    pub bytes_scanned: u64,
    pub duration_us: u64,
    pub verdicts: Vec<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The scan ran out of its step or time budget.
    #[serde(default)]
    pub timed_out: bool,
}

impl TargetReport {
    pub fn failed(target: &Target, error: &EngineError) -> Self {
        Self {
            target: target.name(),
            sha256: None,
            bytes_scanned: 0,
            duration_us: 0,
            verdicts: Vec::new(),
            error: Some(error.to_string()),
            timed_out: matches!(error, EngineError::ScanTimeout { .. }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Expand command-line paths into targets.
///
/// `-` means stdin. Files are taken as given, even when they do not exist,
/// so the scan reports them as failed targets. Directories are walked in
/// sorted order, honouring `follow_symlinks`, `respect_gitignore` and the
/// `exclude` globs.
pub fn collect_targets(paths: &[PathBuf], config: &ScanConfig) -> Result<Vec<Target>> {
    let excludes = config
        .exclude
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| EngineError::Config(format!("invalid exclude pattern '{p}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut targets = Vec::new();
    for path in paths {
        if path.as_os_str() == "-" {
            targets.push(Target::Stdin);
        } else if path.is_dir() {
            walk_directory(path, config, &excludes, &mut targets);
        } else {
            targets.push(Target::File(path.clone()));
        }
    }
    Ok(targets)
}

fn walk_directory(root: &Path, config: &ScanConfig, excludes: &[glob::Pattern], out: &mut Vec<Target>) {
    let walker = ignore::WalkBuilder::new(root)
        .hidden(config.respect_gitignore)
        .git_ignore(config.respect_gitignore)
        .git_global(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .ignore(config.respect_gitignore)
        .parents(config.respect_gitignore)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if excludes.iter().any(|p| p.matches_path(path)) {
            tracing::debug!(path = %path.display(), "excluded");
            continue;
        }
        out.push(Target::File(path.to_path_buf()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn dash_is_stdin_and_missing_files_are_kept() {
        let targets = collect_targets(
            &[PathBuf::from("-"), PathBuf::from("does/not/exist.bin")],
            &ScanConfig::default(),
        )
        .unwrap();
        assert_eq!(
            targets,
            vec![Target::Stdin, Target::File(PathBuf::from("does/not/exist.bin"))]
        );
    }

    #[test]
    fn directories_are_walked_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.bin"));
        touch(&dir.path().join("a/inner.bin"));
        touch(&dir.path().join("c.txt"));

        let targets = collect_targets(&[dir.path().to_path_buf()], &ScanConfig::default()).unwrap();
        let names: Vec<_> = targets
            .iter()
            .map(|t| match t {
                Target::File(p) => p.strip_prefix(dir.path()).unwrap().to_path_buf(),
                Target::Stdin => PathBuf::from("-"),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a/inner.bin"),
                PathBuf::from("b.bin"),
                PathBuf::from("c.txt"),
            ]
        );
    }

    #[test]
    fn exclude_globs_drop_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("keep.bin"));
        touch(&dir.path().join("skip.png"));

        let config = ScanConfig {
            exclude: vec!["**/*.png".into()],
            ..Default::default()
        };
        let targets = collect_targets(&[dir.path().to_path_buf()], &config).unwrap();
        assert_eq!(targets, vec![Target::File(dir.path().join("keep.bin"))]);
    }

    #[test]
    fn hidden_files_are_scanned_unless_gitignore_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".hidden"));

        let all = collect_targets(&[dir.path().to_path_buf()], &ScanConfig::default()).unwrap();
        assert_eq!(all.len(), 1);

        let config = ScanConfig {
            respect_gitignore: true,
            ..Default::default()
        };
        let filtered = collect_targets(&[dir.path().to_path_buf()], &config).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn invalid_exclude_is_a_config_error() {
        let config = ScanConfig {
            exclude: vec!["[".into()],
            ..Default::default()
        };
        assert!(matches!(
            collect_targets(&[], &config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn timeout_reports_are_flagged() {
        let err = EngineError::ScanTimeout {
            target: "a".into(),
            steps: 10,
        };
        let report = TargetReport::failed(&Target::File("a".into()), &err);
        assert!(report.timed_out);
        assert!(!report.is_ok());
    }
}
