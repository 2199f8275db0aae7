//! Content checksums: file digests, directory-tree digests, and the
//! normalized repository-URL digest that addresses the mirror cache.

use std::io::Read as _;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::{ComposeError, Result};
use crate::filter;
use crate::METADATA_FILE_NAME;

/// SHA-256 of a file's byte contents, streamed.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|err| ComposeError::ChecksumFailed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|err| ComposeError::ChecksumFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Deterministic digest of a directory tree.
///
/// Every file contributes `SHA-256(rel_path || 0x00 || SHA-256(content))`;
/// entries are sorted by relative path bytes and the concatenation of the
/// per-entry digests is hashed. Symlinks hash their target string and are
/// never followed. Empty directories do not contribute.
pub fn tree_digest(root: &Path, exclude: &dyn Fn(&Path) -> bool) -> Result<String> {
    let mut entries: Vec<(Vec<u8>, [u8; 32])> = Vec::new();

    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| ComposeError::ChecksumFailed {
            path: root.to_path_buf(),
            reason: err.to_string(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields paths under root");
        if exclude(rel) {
            continue;
        }

        let content_digest: [u8; 32] = if entry.file_type().is_symlink() {
            let target =
                std::fs::read_link(entry.path()).map_err(|err| ComposeError::ChecksumFailed {
                    path: entry.path().to_path_buf(),
                    reason: err.to_string(),
                })?;
            Sha256::digest(target.as_os_str().as_encoded_bytes()).into()
        } else {
            let hex = file_digest(entry.path())?;
            let mut raw = [0u8; 32];
            decode_hex_into(&hex, &mut raw);
            raw
        };

        let rel_bytes = rel_path_bytes(rel);
        let mut hasher = Sha256::new();
        hasher.update(&rel_bytes);
        hasher.update([0u8]);
        hasher.update(content_digest);
        entries.push((rel_bytes, hasher.finalize().into()));
    }

    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut hasher = Sha256::new();
    for (_, digest) in &entries {
        hasher.update(digest);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Short content address for a repository URL: normalize, SHA-256, first
/// 16 hex characters. Stable across runs and platforms.
pub fn repo_url_digest(url: &str) -> String {
    let normalized = normalize_repo_url(url);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Exclude predicate for lock-entry checksums: drops the provenance file
/// the extractor writes plus any path containing a built-in VCS/junk
/// component, so install-time and validate-time digests agree.
pub fn lock_exclude(rel: &Path) -> bool {
    for component in rel.components() {
        let name = component.as_os_str().to_string_lossy();
        if name == METADATA_FILE_NAME || filter::is_builtin_ignored(&name) {
            return true;
        }
    }
    false
}

fn normalize_repo_url(url: &str) -> String {
    let mut s = url.trim();
    if let Some((head, _)) = s.split_once('#') {
        s = head;
    }
    if let Some((head, _)) = s.split_once('?') {
        s = head;
    }
    let mut s = s.trim_end_matches('/').to_string();
    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.trim_end_matches('/').to_string();
    }
    if let Some((scheme, rest)) = s.split_once("://") {
        s = format!("{}://{}", scheme.to_ascii_lowercase(), rest);
    }
    s
}

fn rel_path_bytes(rel: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, component) in rel.components().enumerate() {
        if i > 0 {
            out.push(b'/');
        }
        out.extend_from_slice(component.as_os_str().as_encoded_bytes());
    }
    out
}

fn decode_hex_into(hex: &str, out: &mut [u8; 32]) {
    for (i, chunk) in hex.as_bytes().chunks(2).take(32).enumerate() {
        let hi = (chunk[0] as char).to_digit(16).unwrap_or(0) as u8;
        let lo = (chunk[1] as char).to_digit(16).unwrap_or(0) as u8;
        out[i] = (hi << 4) | lo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn file_digest_matches_known_vector() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("v.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn tree_digest_changes_on_content_and_rename() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a/one.txt", "hello");
        write(tmp.path(), "b/two.txt", "world");
        let base = tree_digest(tmp.path(), &|_| false).unwrap();

        write(tmp.path(), "a/one.txt", "hello!");
        let content_changed = tree_digest(tmp.path(), &|_| false).unwrap();
        assert_ne!(base, content_changed);

        write(tmp.path(), "a/one.txt", "hello");
        std::fs::rename(tmp.path().join("b/two.txt"), tmp.path().join("b/two2.txt")).unwrap();
        let renamed = tree_digest(tmp.path(), &|_| false).unwrap();
        assert_ne!(base, renamed);
    }

    #[test]
    fn tree_digest_ignores_empty_dirs_and_excluded_paths() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "keep.txt", "data");
        let base = tree_digest(tmp.path(), &|_| false).unwrap();

        std::fs::create_dir_all(tmp.path().join("empty/nested")).unwrap();
        assert_eq!(base, tree_digest(tmp.path(), &|_| false).unwrap());

        write(tmp.path(), "noise.tmp", "noise");
        let exclude =
            |rel: &Path| rel.extension().map(|e| e == "tmp").unwrap_or(false);
        assert_eq!(base, tree_digest(tmp.path(), &exclude).unwrap());
        assert_ne!(base, tree_digest(tmp.path(), &|_| false).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn tree_digest_hashes_symlink_target_not_contents() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "real.txt", "payload");
        std::os::unix::fs::symlink("real.txt", tmp.path().join("link")).unwrap();
        let base = tree_digest(tmp.path(), &|_| false).unwrap();

        // Retargeting the link changes the digest even when contents match.
        std::fs::remove_file(tmp.path().join("link")).unwrap();
        write(tmp.path(), "real2.txt", "payload");
        std::fs::remove_file(tmp.path().join("real.txt")).unwrap();
        std::os::unix::fs::symlink("real2.txt", tmp.path().join("link")).unwrap();
        write(tmp.path(), "real.txt", "payload");
        std::fs::remove_file(tmp.path().join("real2.txt")).unwrap();
        write(tmp.path(), "real2.txt", "payload");
        assert_ne!(base, tree_digest(tmp.path(), &|_| false).unwrap());
    }

    #[test]
    fn url_digest_is_stable_across_equivalent_spellings() {
        let base = repo_url_digest("https://git.example.com/org/widget");
        assert_eq!(base, repo_url_digest("https://git.example.com/org/widget/"));
        assert_eq!(base, repo_url_digest("https://git.example.com/org/widget.git"));
        assert_eq!(
            base,
            repo_url_digest("HTTPS://git.example.com/org/widget.git#frag")
        );
        assert_eq!(base.len(), 16);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn url_digest_distinguishes_repos() {
        assert_ne!(
            repo_url_digest("https://git.example.com/org/widget"),
            repo_url_digest("https://git.example.com/org/gadget")
        );
    }

    #[test]
    fn lock_exclude_drops_metadata_and_vcs_components() {
        assert!(lock_exclude(Path::new(METADATA_FILE_NAME)));
        assert!(lock_exclude(Path::new(".git/config")));
        assert!(lock_exclude(Path::new("sub/.gitignore")));
        assert!(lock_exclude(Path::new("sub/__pycache__/x.pyc")));
        assert!(!lock_exclude(Path::new("src/amplifier.sch")));
    }
}
