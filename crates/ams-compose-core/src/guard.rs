//! Security boundary: destination paths must stay inside the project root
//! and repository URLs must be lexically safe. Both checks run before any
//! filesystem or network I/O touches a library.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::errors::{ComposeError, Result};
use crate::manifest::{ImportSpec, Manifest};

const ALLOWED_SCHEMES: &[&str] = &["https", "ssh", "git", "git+https", "git+ssh"];
const SHELL_METACHARACTERS: &[&str] = &[";", "|", "`", "$(", "\n", "\r"];

/// Environment toggle that lets the test harness use `file://` URLs. Never
/// surfaced as a CLI flag.
pub const TEST_MODE_ENV: &str = "AMS_COMPOSE_TEST_MODE";

pub fn test_mode_from_env() -> bool {
    std::env::var(TEST_MODE_ENV).map(|v| v == "1").unwrap_or(false)
}

/// Resolve the absolute destination directory for a library, rejecting any
/// placement outside `project_root`.
///
/// Normalization is purely lexical (`.`/`..` resolved without touching the
/// filesystem) so a symlink planted at the destination cannot redirect the
/// containment check.
pub fn resolve_library_path(
    project_root: &Path,
    manifest: &Manifest,
    name: &str,
    spec: &ImportSpec,
) -> Result<PathBuf> {
    let candidate = match &spec.local_path {
        Some(local) => local.clone(),
        None => format!("{}/{}", manifest.library_root, name),
    };

    let candidate_path = Path::new(&candidate);
    if candidate_path.is_absolute() {
        return Err(ComposeError::PathEscape(format!(
            "{name}: absolute local_path {candidate:?} is not allowed"
        )));
    }

    let resolved = normalize_lexical(&project_root.join(candidate_path));
    if !resolved.starts_with(project_root) {
        return Err(ComposeError::PathEscape(format!(
            "{name}: {candidate:?} resolves outside the project root"
        )));
    }
    if resolved == project_root {
        return Err(ComposeError::PathEscape(format!(
            "{name}: {candidate:?} resolves to the project root itself"
        )));
    }
    Ok(resolved)
}

/// Containment check used by the extractor for `source_path` within a
/// mirror. Returns the normalized absolute path when it stays under `base`.
pub fn contained_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return Err(ComposeError::PathEscape(format!(
            "absolute source_path {relative:?} is not allowed"
        )));
    }
    let joined = normalize_lexical(&base.join(rel));
    if !joined.starts_with(base) {
        return Err(ComposeError::PathEscape(format!(
            "source_path {relative:?} escapes the repository"
        )));
    }
    Ok(joined)
}

/// Lexical-only validation of a repository URL.
///
/// Accepts the scheme allowlist plus the scp-style `host:owner/name`
/// shorthand; `file://` only when `test_mode` is set. No DNS resolution.
pub fn validate_repo_url(url: &str, test_mode: bool) -> Result<()> {
    let unsafe_url = |reason: &str| ComposeError::UnsafeUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(unsafe_url("empty url"));
    }
    for meta in SHELL_METACHARACTERS {
        if trimmed.contains(meta) {
            return Err(unsafe_url("shell metacharacters are not allowed"));
        }
    }
    if trimmed.contains(char::is_whitespace) {
        return Err(unsafe_url("whitespace is not allowed"));
    }
    if trimmed.starts_with('-') {
        return Err(unsafe_url("leading dash would be parsed as a git option"));
    }

    if let Some((scheme, _)) = trimmed.split_once("://") {
        let scheme = scheme.to_ascii_lowercase();
        if scheme == "file" {
            if !test_mode {
                return Err(unsafe_url("file:// urls are only allowed in test mode"));
            }
        } else if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
            return Err(unsafe_url("scheme is not in the allowlist"));
        }
        Url::parse(trimmed).map_err(|err| unsafe_url(&format!("unparseable url: {err}")))?;
        return Ok(());
    }

    // scp-style shorthand: [user@]host:path. Anything else would be handed
    // to git as a local path, which the manifest must never do implicitly.
    let Some((head, path)) = trimmed.split_once(':') else {
        return Err(unsafe_url("looks like a local path, not a repository url"));
    };
    if head.is_empty() || head.contains('/') {
        return Err(unsafe_url("shorthand host must precede the colon"));
    }
    if head.len() == 1 {
        return Err(unsafe_url("single-letter host is ambiguous with a drive path"));
    }
    if path.is_empty() || path.starts_with('/') || path.starts_with('-') {
        return Err(unsafe_url("shorthand path must be a relative repo path"));
    }
    Ok(())
}

/// Resolve `.` and `..` components without consulting the filesystem.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}
