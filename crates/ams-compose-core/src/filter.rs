//! Three-tier extraction filter.
//!
//! Tier A is a fixed basename set that is always active. Tiers B (project
//! global `.ams-compose-ignore`) and C (per-library patterns) use gitignore
//! syntax and are evaluated as one ordered sequence, last match wins, so a
//! later negation can re-include a file an earlier tier excluded.

use std::path::Path;

use globset::{Glob, GlobBuilder, GlobMatcher};

use crate::errors::{ComposeError, Result};
use crate::GLOBAL_IGNORE_FILE_NAME;

/// Tier A: basenames filtered from every extraction, file or directory.
pub const BUILTIN_IGNORE_NAMES: &[&str] = &[
    ".git",
    ".gitignore",
    ".gitmodules",
    ".svn",
    ".hg",
    "CVS",
    "__pycache__",
    ".ipynb_checkpoints",
    ".vscode",
    ".idea",
    "node_modules",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
];

pub fn is_builtin_ignored(name: &str) -> bool {
    BUILTIN_IGNORE_NAMES.contains(&name)
}

/// Forced-preserve names: never filtered when check-in preservation is on.
pub fn is_license_like(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper.starts_with("LICENSE") || upper.starts_with("COPYING") || upper.starts_with("NOTICE")
}

#[derive(Debug)]
struct Rule {
    negated: bool,
    dir_only: bool,
    matcher: GlobMatcher,
}

impl Rule {
    fn parse(line: &str) -> Result<Option<Rule>> {
        let mut pattern = line.trim();
        if pattern.is_empty() || pattern.starts_with('#') {
            return Ok(None);
        }

        let negated = if let Some(rest) = pattern.strip_prefix('!') {
            pattern = rest;
            true
        } else {
            false
        };

        let dir_only = pattern.ends_with('/');
        pattern = pattern.trim_end_matches('/');
        if pattern.is_empty() {
            return Ok(None);
        }

        // Leading '/' anchors at the extraction root; so does any pattern
        // with an interior separator (gitignore rules).
        let anchored = if let Some(rest) = pattern.strip_prefix('/') {
            pattern = rest;
            true
        } else {
            pattern.contains('/')
        };

        let glob_str = if anchored {
            pattern.to_string()
        } else {
            format!("**/{pattern}")
        };
        let glob: Glob = GlobBuilder::new(&glob_str)
            .literal_separator(true)
            .build()
            .map_err(|err| {
                ComposeError::Config(format!("invalid ignore pattern {line:?}: {err}"))
            })?;

        Ok(Some(Rule {
            negated,
            dir_only,
            matcher: glob.compile_matcher(),
        }))
    }

    fn matches(&self, rel: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.matcher.is_match(rel) {
            return true;
        }
        // Gitignore libraries disagree on trailing-slash directory forms;
        // probe both spellings for directories.
        is_dir && self.matcher.is_match(format!("{rel}/"))
    }
}

/// Compiled filter for one library extraction.
#[derive(Debug)]
pub struct IgnoreEngine {
    rules: Vec<Rule>,
    preserve_licenses: bool,
}

impl IgnoreEngine {
    /// Build from explicit pattern layers: tier B lines first, then tier C.
    pub fn new(
        global_patterns: &[String],
        library_patterns: &[String],
        preserve_licenses: bool,
    ) -> Result<Self> {
        let mut rules = Vec::new();
        for line in global_patterns.iter().chain(library_patterns) {
            if let Some(rule) = Rule::parse(line)? {
                rules.push(rule);
            }
        }
        Ok(IgnoreEngine {
            rules,
            preserve_licenses,
        })
    }

    /// Build from the project-global ignore file (if present) plus the
    /// per-library patterns.
    pub fn load(
        project_root: &Path,
        library_patterns: &[String],
        preserve_licenses: bool,
    ) -> Result<Self> {
        let global_path = project_root.join(GLOBAL_IGNORE_FILE_NAME);
        let global_patterns = match std::fs::read_to_string(&global_path) {
            Ok(text) => text.lines().map(|l| l.to_string()).collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Self::new(&global_patterns, library_patterns, preserve_licenses)
    }

    /// Decide whether `rel` (relative to the extraction source) is dropped.
    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if self.preserve_licenses && !is_dir && is_license_like(&name) {
            return false;
        }
        if is_builtin_ignored(&name) {
            return true;
        }

        let rel_str = rel_to_slash_string(rel);
        let mut ignored = false;
        for rule in &self.rules {
            if rule.matches(&rel_str, is_dir) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

fn rel_to_slash_string(rel: &Path) -> String {
    let mut out = String::new();
    for (i, component) in rel.components().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}
