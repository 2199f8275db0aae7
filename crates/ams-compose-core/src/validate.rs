//! Validation and cleanup: checksum re-verification of installed
//! libraries, orphan detection, and pruning of unused mirrors.

use std::collections::BTreeSet;
use std::path::Path;

use crate::checksum;
use crate::errors::Result;
use crate::extract::ProvenanceMetadata;
use crate::fsutil;
use crate::lockfile::{LockEntry, LockFile, ValidationStatus};
use crate::manifest::Manifest;
use crate::mirror::MirrorCache;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub name: String,
    pub status: ValidationStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Default)]
pub struct CleanReport {
    pub removed_mirrors: Vec<String>,
    pub removed_entries: Vec<String>,
    pub removed_dirs: Vec<String>,
}

/// Verdict for a single library against its lock entry.
pub fn validate_library(
    project_root: &Path,
    name: &str,
    entry: Option<&LockEntry>,
) -> ValidationResult {
    let Some(entry) = entry else {
        return ValidationResult {
            name: name.to_string(),
            status: ValidationStatus::NotInstalled,
            detail: Some("no lock entry; run install".to_string()),
        };
    };

    let dest = project_root.join(&entry.local_path);
    if !dest.exists() {
        return ValidationResult {
            name: name.to_string(),
            status: ValidationStatus::Missing,
            detail: Some(format!("directory not found: {}", entry.local_path)),
        };
    }

    match checksum::tree_digest(&dest, &checksum::lock_exclude) {
        Ok(digest) if digest == entry.checksum => ValidationResult {
            name: name.to_string(),
            status: ValidationStatus::Valid,
            detail: None,
        },
        Ok(_) => ValidationResult {
            name: name.to_string(),
            status: ValidationStatus::Modified,
            detail: Some("checksum differs from lock entry".to_string()),
        },
        Err(err) => ValidationResult {
            name: name.to_string(),
            status: ValidationStatus::Error,
            detail: Some(err.to_string()),
        },
    }
}

/// Validate every library in the manifest and every library in the lock.
/// Lock entries with no manifest counterpart are marked orphaned.
pub fn validate_installation(
    project_root: &Path,
    manifest: &Manifest,
    lock: &LockFile,
) -> Vec<ValidationResult> {
    let mut results = Vec::new();

    for (name, _) in manifest.imports.iter() {
        results.push(validate_library(
            project_root,
            name,
            lock.libraries.get(name),
        ));
    }

    for name in lock.libraries.keys() {
        if !manifest.imports.contains(name) {
            results.push(ValidationResult {
                name: name.clone(),
                status: ValidationStatus::Orphaned,
                detail: Some("present in lock but not in manifest".to_string()),
            });
        }
    }

    results
}

/// Drop orphaned lock entries, optionally remove their directories, and
/// prune mirrors no remaining lock entry references.
///
/// A directory is only ever removed when its provenance stamp names the
/// same library and repository as the stale lock entry; anything else is
/// assumed to be user-created and left alone.
pub fn clean(
    project_root: &Path,
    manifest: &Manifest,
    lock: &mut LockFile,
    mirrors: &MirrorCache,
    prune_files: bool,
) -> Result<CleanReport> {
    let mut report = CleanReport::default();

    let orphaned: Vec<String> = lock
        .libraries
        .keys()
        .filter(|name| !manifest.imports.contains(name))
        .cloned()
        .collect();

    for name in orphaned {
        let entry = lock.libraries.remove(&name).expect("key just listed");
        report.removed_entries.push(name.clone());

        if prune_files {
            let dest = project_root.join(&entry.local_path);
            if provenance_matches(&dest, &name, &entry) {
                fsutil::remove_path(&dest)?;
                report.removed_dirs.push(entry.local_path.clone());
            }
        }
    }

    let referenced: BTreeSet<String> = lock
        .libraries
        .values()
        .map(|entry| checksum::repo_url_digest(&entry.repo))
        .collect();
    for digest in mirrors.present_digests()? {
        if !referenced.contains(&digest) && mirrors.remove_digest(&digest)? {
            report.removed_mirrors.push(digest);
        }
    }

    Ok(report)
}

fn provenance_matches(dest: &Path, name: &str, entry: &LockEntry) -> bool {
    match ProvenanceMetadata::load(dest) {
        Some(stamp) => stamp.library_name == name && stamp.repo == entry.repo,
        None => false,
    }
}
