//! Content-addressed mirror cache.
//!
//! Each upstream repository gets one full working copy under
//! `.mirror/<16-hex>/`, shared by every library that references the same
//! URL. Clones land in a temp directory and are renamed into place, so a
//! half-built mirror is never observable; a corrupted mirror is deleted and
//! recloned once before the failure surfaces.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::checksum::repo_url_digest;
use crate::errors::{ComposeError, Result};
use crate::gitcmd::GitRunner;

pub const MIRROR_DIR_NAME: &str = ".mirror";
const LOCK_NAME: &str = ".lock";

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A mirror checked out at a known-immutable commit.
#[derive(Debug, Clone)]
pub struct MirrorCheckout {
    pub mirror_path: PathBuf,
    pub commit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    CommitLike,
    TagLike,
    BranchLike,
}

#[derive(Debug)]
pub struct MirrorCache {
    mirror_root: PathBuf,
    runner: GitRunner,
}

/// Advisory guard against concurrent invocations mutating the same cache.
/// The lock file is removed on drop.
#[derive(Debug)]
pub struct MirrorLock {
    path: PathBuf,
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl MirrorCache {
    pub fn new(project_root: &Path) -> Self {
        Self::with_runner(project_root, GitRunner::new())
    }

    pub fn with_runner(project_root: &Path, runner: GitRunner) -> Self {
        MirrorCache {
            mirror_root: project_root.join(MIRROR_DIR_NAME),
            runner,
        }
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub fn mirror_path(&self, repo_url: &str) -> PathBuf {
        self.mirror_root.join(repo_url_digest(repo_url))
    }

    pub fn acquire_lock(&self) -> Result<MirrorLock> {
        std::fs::create_dir_all(&self.mirror_root)?;
        let path = self.mirror_root.join(LOCK_NAME);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(MirrorLock { path })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ComposeError::MirrorBusy(path))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Produce a working tree for `(repo_url, reference)` and report the
    /// resolved commit. `remote_probe` forces consulting the remote for
    /// mutable refs; otherwise fetches are minimized.
    pub fn ensure(
        &self,
        repo_url: &str,
        reference: &str,
        remote_probe: bool,
    ) -> Result<MirrorCheckout> {
        let path = self.mirror_path(repo_url);
        let existed = path.exists();
        match self.ensure_inner(repo_url, reference, remote_probe) {
            Ok(checkout) => Ok(checkout),
            Err(err) if existed && recoverable(&err) => {
                // One recovery attempt: drop the mirror and restart from a
                // fresh clone.
                crate::fsutil::remove_path(&path)?;
                self.ensure_inner(repo_url, reference, remote_probe)
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve the commit a ref currently points at, fetching per the same
    /// policy as `ensure`, but without disturbing the working tree. Used by
    /// the planner's remote probe so its network activity stays inside the
    /// cache layer.
    pub fn resolve_commit(
        &self,
        repo_url: &str,
        reference: &str,
        remote_probe: bool,
    ) -> Result<String> {
        let path = self.mirror_path(repo_url);
        let existed = path.exists();
        match self.resolve_commit_inner(repo_url, reference, remote_probe) {
            Ok(commit) => Ok(commit),
            Err(err) if existed && recoverable(&err) => {
                crate::fsutil::remove_path(&path)?;
                self.resolve_commit_inner(repo_url, reference, remote_probe)
            }
            Err(err) => Err(err),
        }
    }

    fn resolve_commit_inner(
        &self,
        repo_url: &str,
        reference: &str,
        remote_probe: bool,
    ) -> Result<String> {
        let path = self.mirror_path(repo_url);
        if !path.exists() {
            return Ok(self.create(repo_url, reference)?.commit);
        }
        if !is_git_worktree(&path) {
            return Err(self.corrupt(&path, "not a git repository"));
        }
        let kind = self.classify_ref(&path, reference)?;
        self.fetch_if_needed(&path, reference, kind, remote_probe)?;
        self.resolve_ref(&path, reference)
    }

    /// Mirror digests currently present on disk.
    pub fn present_digests(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        let entries = match std::fs::read_dir(&self.mirror_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(digests),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir()
                && name.len() == 16
                && name.chars().all(|c| c.is_ascii_hexdigit())
            {
                digests.push(name);
            }
        }
        digests.sort();
        Ok(digests)
    }

    pub fn remove_digest(&self, digest: &str) -> Result<bool> {
        let path = self.mirror_root.join(digest);
        if !path.exists() {
            return Ok(false);
        }
        crate::fsutil::remove_path(&path)?;
        Ok(true)
    }

    fn ensure_inner(
        &self,
        repo_url: &str,
        reference: &str,
        remote_probe: bool,
    ) -> Result<MirrorCheckout> {
        let path = self.mirror_path(repo_url);
        if !path.exists() {
            return self.create(repo_url, reference);
        }
        if !is_git_worktree(&path) {
            return Err(self.corrupt(&path, "not a git repository"));
        }
        self.update(&path, reference, remote_probe)
    }

    fn create(&self, repo_url: &str, reference: &str) -> Result<MirrorCheckout> {
        std::fs::create_dir_all(&self.mirror_root)?;
        let path = self.mirror_path(repo_url);
        let tmp = self.temp_clone_dir(repo_url);
        crate::fsutil::remove_path(&tmp)?;

        let result = (|| -> Result<String> {
            let tmp_str = tmp.to_string_lossy().to_string();
            self.runner.run_ok(
                None,
                &["clone", "--recurse-submodules", repo_url, &tmp_str],
                self.runner.clone_timeout,
            )?;
            let sha = self.resolve_ref(&tmp, reference)?;
            self.runner.run_ok(
                Some(&tmp),
                &["checkout", "--detach", &sha],
                self.runner.ops_timeout,
            )?;
            self.runner.run_ok(
                Some(&tmp),
                &["submodule", "update", "--init", "--recursive"],
                self.runner.ops_timeout,
            )?;
            self.runner
                .run_ok(Some(&tmp), &["rev-parse", "HEAD"], self.runner.ops_timeout)
        })();

        match result {
            Ok(commit) => {
                std::fs::rename(&tmp, &path)?;
                Ok(MirrorCheckout {
                    mirror_path: path,
                    commit,
                })
            }
            Err(err) => {
                let _ = crate::fsutil::remove_path(&tmp);
                Err(err)
            }
        }
    }

    fn update(&self, path: &Path, reference: &str, remote_probe: bool) -> Result<MirrorCheckout> {
        let kind = self.classify_ref(path, reference)?;
        self.fetch_if_needed(path, reference, kind, remote_probe)?;
        let sha = self.resolve_ref(path, reference)?;
        self.runner.run_ok(
            Some(path),
            &["checkout", "--detach", &sha],
            self.runner.ops_timeout,
        )?;
        self.runner.run_ok(
            Some(path),
            &["reset", "--hard", &sha],
            self.runner.ops_timeout,
        )?;
        self.runner.run_ok(
            Some(path),
            &["submodule", "update", "--init", "--recursive"],
            self.runner.ops_timeout,
        )?;
        let commit =
            self.runner
                .run_ok(Some(path), &["rev-parse", "HEAD"], self.runner.ops_timeout)?;
        Ok(MirrorCheckout {
            mirror_path: path.to_path_buf(),
            commit,
        })
    }

    fn classify_ref(&self, path: &Path, reference: &str) -> Result<RefKind> {
        if looks_like_commit(reference) {
            return Ok(RefKind::CommitLike);
        }
        let tags = self.runner.run_ok(
            Some(path),
            &["tag", "--list", reference],
            self.runner.ops_timeout,
        )?;
        if !tags.trim().is_empty() {
            return Ok(RefKind::TagLike);
        }
        Ok(RefKind::BranchLike)
    }

    fn fetch_if_needed(
        &self,
        path: &Path,
        reference: &str,
        kind: RefKind,
        remote_probe: bool,
    ) -> Result<()> {
        match kind {
            RefKind::CommitLike => {
                let present = self.runner.check(
                    Some(path),
                    &["cat-file", "-e", &format!("{reference}^{{commit}}")],
                    self.runner.ops_timeout,
                )?;
                if !present {
                    self.fetch_all(path)?;
                }
            }
            RefKind::TagLike => {
                // A local tag is treated as an immutable pin; only a remote
                // probe re-reads it.
                if remote_probe {
                    self.fetch_all(path)?;
                }
            }
            RefKind::BranchLike => {
                if remote_probe {
                    self.runner.run_ok(
                        Some(path),
                        &[
                            "fetch",
                            "origin",
                            "+refs/heads/*:refs/remotes/origin/*",
                        ],
                        self.runner.ops_timeout,
                    )?;
                } else if !self.resolvable(path, reference)? {
                    self.fetch_all(path)?;
                }
            }
        }
        Ok(())
    }

    fn fetch_all(&self, path: &Path) -> Result<()> {
        self.runner.run_ok(
            Some(path),
            &["fetch", "--tags", "--force", "origin"],
            self.runner.ops_timeout,
        )?;
        Ok(())
    }

    fn resolvable(&self, path: &Path, reference: &str) -> Result<bool> {
        for candidate in ref_candidates(reference) {
            if self.runner.check(
                Some(path),
                &["rev-parse", "--verify", "--quiet", &candidate],
                self.runner.ops_timeout,
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resolve a ref to a full commit SHA. Tags are probed before branches:
    /// a name that is both pins to the tag.
    fn resolve_ref(&self, path: &Path, reference: &str) -> Result<String> {
        for candidate in ref_candidates(reference) {
            let out = self.runner.run(
                Some(path),
                &["rev-parse", "--verify", "--quiet", &candidate],
                self.runner.ops_timeout,
            )?;
            if out.success {
                let sha = out.stdout.trim().to_string();
                if !sha.is_empty() {
                    return Ok(sha);
                }
            }
        }
        Err(ComposeError::GitRefNotFound(reference.to_string()))
    }

    fn corrupt(&self, path: &Path, reason: &str) -> ComposeError {
        ComposeError::MirrorCorrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    fn temp_clone_dir(&self, repo_url: &str) -> PathBuf {
        let pid = std::process::id();
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.mirror_root
            .join(format!(".tmp-{}-{pid}-{n}", repo_url_digest(repo_url)))
    }
}

fn recoverable(err: &ComposeError) -> bool {
    matches!(
        err,
        ComposeError::MirrorCorrupt { .. }
            | ComposeError::Git(_)
            | ComposeError::GitRefNotFound(_)
    )
}

fn is_git_worktree(path: &Path) -> bool {
    path.join(".git").exists()
}

fn looks_like_commit(reference: &str) -> bool {
    let len = reference.len();
    (7..=40).contains(&len) && reference.chars().all(|c| c.is_ascii_hexdigit())
}

fn ref_candidates(reference: &str) -> Vec<String> {
    vec![
        format!("refs/tags/{reference}^{{commit}}"),
        format!("refs/remotes/origin/{reference}^{{commit}}"),
        format!("refs/heads/{reference}^{{commit}}"),
        format!("{reference}^{{commit}}"),
    ]
}
