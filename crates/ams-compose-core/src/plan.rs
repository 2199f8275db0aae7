//! Reconciliation planner: diffs the manifest against the lock file (and,
//! on request, against remote state) into a minimal per-library action set.
//! Side-effect free except for the optional remote probe, which is routed
//! through the mirror cache.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::errors::ComposeError;
use crate::guard;
use crate::lockfile::LockFile;
use crate::manifest::Manifest;
use crate::mirror::MirrorCache;

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub force: bool,
    pub remote_probe: bool,
    pub targets: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Install,
    Update,
    UpToDate,
    Skipped,
    Reject,
}

#[derive(Debug)]
pub struct PlanEntry {
    pub name: String,
    pub action: PlannedAction,
    pub reason: String,
    /// Set only for `Reject`.
    pub error: Option<ComposeError>,
    /// Absolute destination, set whenever path resolution succeeded.
    pub dest: Option<PathBuf>,
}

impl PlanEntry {
    fn decided(name: &str, action: PlannedAction, reason: &str, dest: PathBuf) -> Self {
        PlanEntry {
            name: name.to_string(),
            action,
            reason: reason.to_string(),
            error: None,
            dest: Some(dest),
        }
    }

    fn rejected(name: &str, error: ComposeError) -> Self {
        PlanEntry {
            name: name.to_string(),
            action: PlannedAction::Reject,
            reason: error.to_string(),
            error: Some(error),
            dest: None,
        }
    }
}

/// Environment the planner evaluates against.
pub struct PlanContext<'a> {
    pub project_root: &'a Path,
    pub test_mode: bool,
}

pub fn plan(
    ctx: &PlanContext<'_>,
    manifest: &Manifest,
    lock: &LockFile,
    mirrors: &MirrorCache,
    opts: &PlanOptions,
) -> Vec<PlanEntry> {
    let mut entries = Vec::with_capacity(manifest.imports.len());

    for (name, spec) in manifest.imports.iter() {
        if let Some(targets) = &opts.targets {
            if !targets.contains(name) {
                entries.push(PlanEntry {
                    name: name.clone(),
                    action: PlannedAction::Skipped,
                    reason: "not in requested set".to_string(),
                    error: None,
                    dest: None,
                });
                continue;
            }
        }

        // Security boundary: both checks run before any I/O for this
        // library.
        if let Err(err) = guard::validate_repo_url(&spec.repo, ctx.test_mode) {
            entries.push(PlanEntry::rejected(name, err));
            continue;
        }
        let dest = match guard::resolve_library_path(ctx.project_root, manifest, name, spec) {
            Ok(dest) => dest,
            Err(err) => {
                entries.push(PlanEntry::rejected(name, err));
                continue;
            }
        };

        if opts.force {
            entries.push(PlanEntry::decided(
                name,
                PlannedAction::Install,
                "forced",
                dest,
            ));
            continue;
        }

        let Some(locked) = lock.libraries.get(name) else {
            entries.push(PlanEntry::decided(
                name,
                PlannedAction::Install,
                "not installed",
                dest,
            ));
            continue;
        };

        let dest_rel = dest
            .strip_prefix(ctx.project_root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| locked.local_path.clone());
        if locked.repo != spec.repo
            || locked.source_path != spec.source_path
            || locked.local_path != dest_rel
            || locked.checkin != spec.checkin
        {
            entries.push(PlanEntry::decided(
                name,
                PlannedAction::Install,
                "import spec changed",
                dest,
            ));
            continue;
        }

        if !dest.exists() {
            entries.push(PlanEntry::decided(
                name,
                PlannedAction::Install,
                "destination missing",
                dest,
            ));
            continue;
        }

        if locked.r#ref != spec.r#ref {
            entries.push(PlanEntry::decided(
                name,
                PlannedAction::Update,
                "ref changed",
                dest,
            ));
            continue;
        }

        if opts.remote_probe {
            match mirrors.resolve_commit(&spec.repo, &spec.r#ref, true) {
                Ok(remote_commit) if remote_commit != locked.commit => {
                    entries.push(PlanEntry::decided(
                        name,
                        PlannedAction::Update,
                        "upstream advanced",
                        dest,
                    ));
                }
                Ok(_) => {
                    entries.push(PlanEntry::decided(
                        name,
                        PlannedAction::UpToDate,
                        "matches upstream",
                        dest,
                    ));
                }
                Err(err) => entries.push(PlanEntry::rejected(name, err)),
            }
            continue;
        }

        entries.push(PlanEntry::decided(
            name,
            PlannedAction::UpToDate,
            "lock matches manifest",
            dest,
        ));
    }

    entries
}
