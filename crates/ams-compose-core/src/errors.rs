use std::path::PathBuf;

/// Error taxonomy for compose operations.
///
/// Kinds map onto how the failure propagates: config and lock errors abort
/// the whole run, security/git/extraction errors fail only the library that
/// triggered them.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("path escapes project root: {0}")]
    PathEscape(String),

    #[error("unsafe repository url {url:?}: {reason}")]
    UnsafeUrl { url: String, reason: String },

    #[error("git timed out after {seconds}s: git {command}")]
    GitTimeout { seconds: u64, command: String },

    #[error("ref not found: {0}")]
    GitRefNotFound(String),

    #[error("git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("mirror corrupt at {path}: {reason}")]
    MirrorCorrupt { path: PathBuf, reason: String },

    #[error("mirror cache is locked by another invocation ({0})")]
    MirrorBusy(PathBuf),

    #[error("source path not found in repository: {0}")]
    SourceMissing(String),

    #[error("copy failed for {path}: {reason}")]
    CopyFailed { path: PathBuf, reason: String },

    #[error("checksum failed for {path}: {reason}")]
    ChecksumFailed { path: PathBuf, reason: String },

    #[error("lock file parse error: {0}")]
    LockParse(String),

    #[error("lock file schema_version {found} is newer than supported {supported}")]
    LockSchemaTooNew { found: u32, supported: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    /// Run-fatal errors abort before any library operation and map to exit
    /// code 2 at the CLI; everything else is captured per library.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            ComposeError::Config(_)
                | ComposeError::LockParse(_)
                | ComposeError::LockSchemaTooNew { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;
