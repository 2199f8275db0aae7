//! Bounded git subprocess runner.
//!
//! Every invocation is wall-clock limited: the child is polled with
//! `try_wait` and killed at the deadline while reader threads drain the
//! pipes, so a hung remote can never wedge the process.

use std::io::Read as _;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::errors::{ComposeError, Result};

pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_OPS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GitRunner {
    pub clone_timeout: Duration,
    pub ops_timeout: Duration,
    allow_file_protocol: bool,
}

#[derive(Debug)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl Default for GitRunner {
    fn default() -> Self {
        GitRunner {
            clone_timeout: DEFAULT_CLONE_TIMEOUT,
            ops_timeout: DEFAULT_OPS_TIMEOUT,
            allow_file_protocol: false,
        }
    }
}

impl GitRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit `file://` transports for submodules and clones. Only the test
    /// harness turns this on, alongside the PathGuard test mode.
    pub fn allow_file_protocol(mut self, allow: bool) -> Self {
        self.allow_file_protocol = allow;
        self
    }

    pub fn available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run `git <args>` (optionally `-C dir`) under `timeout`.
    pub fn run(&self, dir: Option<&Path>, args: &[&str], timeout: Duration) -> Result<GitOutput> {
        let mut cmd = Command::new("git");
        if self.allow_file_protocol {
            cmd.args(["-c", "protocol.file.allow=always"]);
        }
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0");

        let mut child = cmd
            .spawn()
            .map_err(|err| ComposeError::Git(format!("failed to spawn git: {err}")))?;

        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf);
            buf
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf);
            buf
        });

        let deadline = Instant::now() + timeout;
        let timed_out = loop {
            match child.try_wait() {
                Ok(Some(_)) => break false,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        break true;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ComposeError::Git(format!("wait for git failed: {err}")));
                }
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_thread.join().unwrap_or_default()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_thread.join().unwrap_or_default()).to_string();

        if timed_out {
            return Err(ComposeError::GitTimeout {
                seconds: timeout.as_secs(),
                command: args.join(" "),
            });
        }

        let status = child
            .wait()
            .map_err(|err| ComposeError::Git(format!("wait for git failed: {err}")))?;
        Ok(GitOutput {
            success: status.success(),
            stdout,
            stderr,
        })
    }

    /// Run and require success; returns trimmed stdout. Failures are
    /// classified into the error taxonomy from stderr.
    pub fn run_ok(&self, dir: Option<&Path>, args: &[&str], timeout: Duration) -> Result<String> {
        let out = self.run(dir, args, timeout)?;
        if !out.success {
            return Err(classify_failure(args, &out.stderr));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Run and report only whether the command succeeded.
    pub fn check(&self, dir: Option<&Path>, args: &[&str], timeout: Duration) -> Result<bool> {
        Ok(self.run(dir, args, timeout)?.success)
    }
}

fn classify_failure(args: &[&str], stderr: &str) -> ComposeError {
    let trimmed = stderr.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.contains("authentication failed")
        || lowered.contains("could not read username")
        || lowered.contains("could not read password")
        || lowered.contains("permission denied (publickey")
    {
        return ComposeError::GitAuthFailed(trimmed.to_string());
    }
    if lowered.contains("unknown revision")
        || lowered.contains("bad revision")
        || lowered.contains("couldn't find remote ref")
        || lowered.contains("did not match any file(s) known to git")
        || lowered.contains("pathspec")
        || lowered.contains("ambiguous argument")
    {
        return ComposeError::GitRefNotFound(trimmed.to_string());
    }
    ComposeError::Git(format!("git {}: {}", args.join(" "), trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_runs_within_timeout() {
        if !GitRunner::available() {
            return;
        }
        let out = GitRunner::new()
            .run(None, &["--version"], Duration::from_secs(10))
            .unwrap();
        assert!(out.success);
        assert!(out.stdout.contains("git version"));
    }

    #[test]
    fn nonzero_exit_is_classified() {
        if !GitRunner::available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let runner = GitRunner::new();
        runner
            .run_ok(Some(tmp.path()), &["init", "-q"], Duration::from_secs(10))
            .unwrap();
        let err = runner
            .run_ok(
                Some(tmp.path()),
                &["rev-parse", "--verify", "--quiet", "no-such-ref^{commit}"],
                Duration::from_secs(10),
            )
            .expect_err("missing ref");
        assert!(
            matches!(err, ComposeError::GitRefNotFound(_) | ComposeError::Git(_)),
            "{err}"
        );
    }

    #[test]
    fn classification_tables() {
        assert!(matches!(
            classify_failure(&["fetch"], "fatal: Authentication failed for 'https://x'"),
            ComposeError::GitAuthFailed(_)
        ));
        assert!(matches!(
            classify_failure(&["rev-parse"], "fatal: bad revision 'nope'"),
            ComposeError::GitRefNotFound(_)
        ));
        assert!(matches!(
            classify_failure(&["gc"], "fatal: something else"),
            ComposeError::Git(_)
        ));
    }
}
