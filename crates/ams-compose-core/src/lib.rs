//! Core engine for ams-compose, a dependency manager for analog and
//! mixed-signal IC design projects.
//!
//! A declarative manifest (`ams-compose.yaml`) names git repositories,
//! refs, and subpaths. The engine materializes each requested subpath into
//! the consumer project through a content-addressed mirror cache, records
//! provenance in `.ams-compose.lock`, and validates integrity across runs.
//! Execution is single-threaded and serial: correctness under partial
//! failure is prioritized over throughput, and per-library errors never
//! abort the run.

pub mod checksum;
pub mod errors;
pub mod extract;
pub mod filter;
pub mod fsutil;
pub mod gitcmd;
pub mod guard;
pub mod install;
pub mod license;
pub mod lockfile;
pub mod manifest;
pub mod mirror;
pub mod plan;
pub mod validate;

/// The user-authored manifest, next to which all state files live.
pub const MANIFEST_FILE_NAME: &str = "ams-compose.yaml";
/// Persisted provenance for installed libraries.
pub const LOCK_FILE_NAME: &str = ".ams-compose.lock";
/// Optional project-global ignore patterns (gitignore syntax).
pub const GLOBAL_IGNORE_FILE_NAME: &str = ".ams-compose-ignore";
/// Provenance stamp written into every extracted library root.
pub const METADATA_FILE_NAME: &str = ".ams-compose-metadata.yaml";

pub use errors::{ComposeError, Result};
pub use install::{Installer, LibraryResult, RunReport};
pub use lockfile::{InstallStatus, LockEntry, LockFile, ValidationStatus};
pub use manifest::{ImportSpec, Manifest};
pub use plan::PlanOptions;
pub use validate::{CleanReport, ValidationResult};
