//! Lock file model and store: `.ams-compose.lock`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ComposeError, Result};
use crate::fsutil;

pub const LOCK_SCHEMA_VERSION: u32 = 1;

/// Outcome of the most recent install/update run. Ephemeral: readers must
/// accept lock files without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Installed,
    Updated,
    UpToDate,
    Error,
    Skipped,
}

impl InstallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallStatus::Installed => "installed",
            InstallStatus::Updated => "updated",
            InstallStatus::UpToDate => "up_to_date",
            InstallStatus::Error => "error",
            InstallStatus::Skipped => "skipped",
        }
    }
}

/// Verdict of the most recent validation pass. Ephemeral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Modified,
    Missing,
    Orphaned,
    Error,
    NotInstalled,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Modified => "modified",
            ValidationStatus::Missing => "missing",
            ValidationStatus::Orphaned => "orphaned",
            ValidationStatus::Error => "error",
            ValidationStatus::NotInstalled => "not_installed",
        }
    }
}

/// Persisted record of one installed library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub repo: String,
    pub r#ref: String,
    pub source_path: String,
    pub local_path: String,
    pub checkin: bool,
    pub commit: String,
    pub checksum: String,
    pub installed_at: String,
    pub updated_at: String,
    pub license: Option<String>,
    pub license_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_status: Option<InstallStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    pub schema_version: u32,
    #[serde(default)]
    pub libraries: BTreeMap<String, LockEntry>,
}

impl Default for LockFile {
    fn default() -> Self {
        LockFile {
            schema_version: LOCK_SCHEMA_VERSION,
            libraries: BTreeMap::new(),
        }
    }
}

/// Loads and persists the lock file. Persistence is atomic: serialized to a
/// temp sibling, fsynced, renamed over the target.
#[derive(Debug)]
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    pub fn new(path: PathBuf) -> Self {
        LockStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<LockFile> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LockFile::default());
            }
            Err(err) => return Err(err.into()),
        };
        let lock: LockFile = serde_yaml::from_str(&text)
            .map_err(|err| ComposeError::LockParse(format!("{}: {err}", self.path.display())))?;
        if lock.schema_version > LOCK_SCHEMA_VERSION {
            return Err(ComposeError::LockSchemaTooNew {
                found: lock.schema_version,
                supported: LOCK_SCHEMA_VERSION,
            });
        }
        Ok(lock)
    }

    pub fn save(&self, lock: &LockFile) -> Result<()> {
        let rendered = serde_yaml::to_string(lock)
            .map_err(|err| ComposeError::LockParse(format!("serialize lock: {err}")))?;
        fsutil::write_atomic(&self.path, rendered.as_bytes())
    }
}

/// Current time as ISO-8601 UTC, second precision.
pub fn now_utc() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
