//! Selective extraction: copy a subpath of a mirror into the project
//! through the three-tier filter, stamp provenance, checksum the result,
//! and swap it into place atomically.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::errors::{ComposeError, Result};
use crate::filter::IgnoreEngine;
use crate::fsutil;
use crate::guard;
use crate::license;
use crate::lockfile::now_utc;
use crate::manifest::ImportSpec;
use crate::{MANIFEST_FILE_NAME, METADATA_FILE_NAME};

pub const PROVENANCE_SCHEMA_VERSION: u32 = 1;

/// Provenance stamp written into every extracted library root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMetadata {
    pub schema_version: u32,
    pub library_name: String,
    pub repo: String,
    pub r#ref: String,
    pub commit: String,
    pub source_path: String,
    pub checkin: bool,
    pub license: Option<String>,
    pub license_file: Option<String>,
    pub extracted_at: String,
}

impl ProvenanceMetadata {
    /// Read the stamp from an installed library directory, if present and
    /// parseable.
    pub fn load(library_dir: &Path) -> Option<ProvenanceMetadata> {
        let text = std::fs::read_to_string(library_dir.join(METADATA_FILE_NAME)).ok()?;
        serde_yaml::from_str(&text).ok()
    }
}

#[derive(Debug)]
pub struct ExtractRequest<'a> {
    pub name: &'a str,
    pub spec: &'a ImportSpec,
    pub mirror_path: &'a Path,
    pub dest: &'a Path,
    pub commit: &'a str,
    pub engine: &'a IgnoreEngine,
}

#[derive(Debug)]
pub struct ExtractOutcome {
    pub checksum: String,
    pub license: Option<String>,
    pub license_file: Option<String>,
    pub nested_manifest: bool,
}

/// Materialize one library. The destination is replaced atomically: the
/// filtered tree is staged in a temp sibling, checksummed, then renamed
/// over the previous installation (which is quarantined until the swap
/// completes).
pub fn extract_library(req: &ExtractRequest<'_>) -> Result<ExtractOutcome> {
    let src = resolve_source(req.mirror_path, &req.spec.source_path)?;

    let dest_tmp = fsutil::temp_path_next_to(req.dest);
    let staged = stage(req, &src, &dest_tmp);
    match staged {
        Ok(outcome) => {
            swap_into_place(&dest_tmp, req.dest)?;
            if !req.spec.checkin {
                write_optout_gitignore(req.dest)?;
            }
            Ok(outcome)
        }
        Err(err) => {
            let _ = fsutil::remove_path(&dest_tmp);
            Err(err)
        }
    }
}

fn resolve_source(mirror_path: &Path, source_path: &str) -> Result<PathBuf> {
    let src = if source_path == "." {
        mirror_path.to_path_buf()
    } else {
        guard::contained_join(mirror_path, source_path)?
    };
    if !src.exists() {
        return Err(ComposeError::SourceMissing(source_path.to_string()));
    }
    Ok(src)
}

fn stage(req: &ExtractRequest<'_>, src: &Path, dest_tmp: &Path) -> Result<ExtractOutcome> {
    std::fs::create_dir_all(dest_tmp).map_err(|err| copy_failed(dest_tmp, &err))?;

    let mut nested_manifest = false;
    if src.is_file() {
        let file_name = src.file_name().expect("source file has a name");
        copy_entry(src, &dest_tmp.join(file_name))?;
    } else {
        copy_filtered_tree(src, dest_tmp, req.engine, &mut nested_manifest)?;
    }

    // A subpath extraction of a checked-in library carries the repository
    // root license along, unless the subtree already ships one.
    if req.spec.checkin && req.spec.source_path != "." {
        inject_root_license(req.mirror_path, dest_tmp)?;
    }

    let detected = license::scan_dir(dest_tmp)?;
    let license_file = detected.file.map(|p| p.to_string_lossy().to_string());
    let license_id = match &req.spec.license {
        Some(asserted) => Some(asserted.clone()),
        None => detected.id,
    };

    let provenance = ProvenanceMetadata {
        schema_version: PROVENANCE_SCHEMA_VERSION,
        library_name: req.name.to_string(),
        repo: req.spec.repo.clone(),
        r#ref: req.spec.r#ref.clone(),
        commit: req.commit.to_string(),
        source_path: req.spec.source_path.clone(),
        checkin: req.spec.checkin,
        license: license_id.clone(),
        license_file: license_file.clone(),
        extracted_at: now_utc(),
    };
    let rendered = serde_yaml::to_string(&provenance)
        .map_err(|err| copy_failed_msg(dest_tmp, &format!("serialize provenance: {err}")))?;
    std::fs::write(dest_tmp.join(METADATA_FILE_NAME), rendered)
        .map_err(|err| copy_failed(dest_tmp, &err))?;

    let digest = checksum::tree_digest(dest_tmp, &checksum::lock_exclude)?;

    Ok(ExtractOutcome {
        checksum: digest,
        license: license_id,
        license_file,
        nested_manifest,
    })
}

fn copy_filtered_tree(
    src: &Path,
    dest_tmp: &Path,
    engine: &IgnoreEngine,
    nested_manifest: &mut bool,
) -> Result<()> {
    let walker = walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let Ok(rel) = entry.path().strip_prefix(src) else {
                return true;
            };
            if rel.as_os_str().is_empty() {
                return true;
            }
            !engine.is_ignored(rel, entry.file_type().is_dir())
        });

    for entry in walker {
        let entry = entry.map_err(|err| copy_failed_msg(src, &err.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under src");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dest_tmp.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out).map_err(|err| copy_failed(&out, &err))?;
        } else {
            if rel.file_name().map(|n| n == MANIFEST_FILE_NAME).unwrap_or(false) {
                *nested_manifest = true;
            }
            copy_entry(entry.path(), &out)?;
        }
    }
    Ok(())
}

fn copy_entry(src: &Path, out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|err| copy_failed(parent, &err))?;
    }
    let meta = std::fs::symlink_metadata(src).map_err(|err| copy_failed(src, &err))?;
    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(src).map_err(|err| copy_failed(src, &err))?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, out).map_err(|err| copy_failed(out, &err))?;
        #[cfg(not(unix))]
        {
            // Symlinks are preserved only on unix; elsewhere the link is
            // dropped rather than silently dereferenced.
            let _ = target;
        }
        return Ok(());
    }
    std::fs::copy(src, out).map_err(|err| copy_failed(out, &err))?;
    Ok(())
}

fn inject_root_license(mirror_path: &Path, dest_tmp: &Path) -> Result<()> {
    let root_license = license::scan_dir(mirror_path)?;
    let Some(rel) = root_license.file else {
        return Ok(());
    };
    let Some(basename) = rel.file_name() else {
        return Ok(());
    };
    let target = dest_tmp.join(basename);
    if target.exists() {
        return Ok(());
    }
    copy_entry(&mirror_path.join(&rel), &target)
}

fn swap_into_place(dest_tmp: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|err| copy_failed(parent, &err))?;
    }

    if !dest.exists() {
        return std::fs::rename(dest_tmp, dest).map_err(|err| copy_failed(dest, &err));
    }

    let quarantine = fsutil::temp_path_next_to(dest);
    std::fs::rename(dest, &quarantine).map_err(|err| copy_failed(dest, &err))?;
    match std::fs::rename(dest_tmp, dest) {
        Ok(()) => {
            let _ = fsutil::remove_path(&quarantine);
            Ok(())
        }
        Err(err) => {
            // Put the previous installation back before surfacing.
            let _ = std::fs::rename(&quarantine, dest);
            Err(copy_failed(dest, &err))
        }
    }
}

fn write_optout_gitignore(dest: &Path) -> Result<()> {
    let contents = format!("*\n!{METADATA_FILE_NAME}\n");
    std::fs::write(dest.join(".gitignore"), contents)
        .map_err(|err| copy_failed(dest, &err))?;
    Ok(())
}

fn copy_failed(path: &Path, err: &dyn std::fmt::Display) -> ComposeError {
    ComposeError::CopyFailed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn copy_failed_msg(path: &Path, msg: &str) -> ComposeError {
    ComposeError::CopyFailed {
        path: path.to_path_buf(),
        reason: msg.to_string(),
    }
}
