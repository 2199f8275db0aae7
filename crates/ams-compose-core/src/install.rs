//! Orchestrator: executes the reconciliation plan library by library,
//! wiring the mirror cache, extractor, and lock store together. Per-library
//! failures are captured into the run report; the lock file is persisted
//! once, at the end of the run.

use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::extract::{self, ExtractRequest};
use crate::filter::IgnoreEngine;
use crate::gitcmd::GitRunner;
use crate::guard;
use crate::license;
use crate::lockfile::{now_utc, InstallStatus, LockEntry, LockFile, LockStore};
use crate::manifest::{ImportSpec, Manifest};
use crate::mirror::MirrorCache;
use crate::plan::{plan, PlanContext, PlanEntry, PlanOptions, PlannedAction};
use crate::validate::{self, CleanReport, ValidationResult};
use crate::{LOCK_FILE_NAME, MANIFEST_FILE_NAME};

/// Per-library outcome of one run.
#[derive(Debug)]
pub struct LibraryResult {
    pub name: String,
    pub status: InstallStatus,
    pub detail: Option<String>,
    pub warnings: Vec<String>,
}

/// Result of a full install/update run.
#[derive(Debug)]
pub struct RunReport {
    pub results: Vec<LibraryResult>,
    pub lock: LockFile,
}

impl RunReport {
    pub fn had_errors(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status == InstallStatus::Error)
    }
}

#[derive(Debug)]
pub struct Installer {
    project_root: PathBuf,
    mirrors: MirrorCache,
    lock_store: LockStore,
    test_mode: bool,
}

impl Installer {
    pub fn new(project_root: &Path) -> Result<Self> {
        let project_root = project_root.canonicalize()?;
        let test_mode = guard::test_mode_from_env();
        Ok(Self::assemble(project_root, test_mode))
    }

    /// Test-harness constructor: enables `file://` URLs and the matching
    /// git transport without going through the environment.
    pub fn new_with_test_mode(project_root: &Path, test_mode: bool) -> Result<Self> {
        let project_root = project_root.canonicalize()?;
        Ok(Self::assemble(project_root, test_mode))
    }

    fn assemble(project_root: PathBuf, test_mode: bool) -> Self {
        let runner = GitRunner::new().allow_file_protocol(test_mode);
        let mirrors = MirrorCache::with_runner(&project_root, runner);
        let lock_store = LockStore::new(project_root.join(LOCK_FILE_NAME));
        Installer {
            project_root,
            mirrors,
            lock_store,
            test_mode,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.project_root.join(MANIFEST_FILE_NAME)
    }

    pub fn load_manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.manifest_path())
    }

    pub fn load_lock(&self) -> Result<LockFile> {
        self.lock_store.load()
    }

    /// Reconcile the manifest against the lock file and execute the
    /// resulting plan in manifest order.
    pub fn run(&self, opts: &PlanOptions) -> Result<RunReport> {
        let manifest = self.load_manifest()?;
        let mut lock = self.lock_store.load()?;
        let _mirror_guard = self.mirrors.acquire_lock()?;

        let ctx = PlanContext {
            project_root: &self.project_root,
            test_mode: self.test_mode,
        };
        let entries = plan(&ctx, &manifest, &lock, &self.mirrors, opts);

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let result = self.execute_entry(&manifest, &mut lock, entry);
            results.push(result);
        }

        self.lock_store.save(&lock)?;
        Ok(RunReport { results, lock })
    }

    /// Validate every library in the manifest and the lock.
    pub fn validate(&self) -> Result<Vec<ValidationResult>> {
        let manifest = self.load_manifest()?;
        let lock = self.lock_store.load()?;
        Ok(validate::validate_installation(
            &self.project_root,
            &manifest,
            &lock,
        ))
    }

    /// Prune orphaned lock entries and unused mirrors; optionally remove
    /// orphaned library directories whose provenance stamp matches.
    pub fn clean(&self, prune_files: bool) -> Result<CleanReport> {
        let manifest = self.load_manifest()?;
        let mut lock = self.lock_store.load()?;
        let _mirror_guard = self.mirrors.acquire_lock()?;
        let report = validate::clean(
            &self.project_root,
            &manifest,
            &mut lock,
            &self.mirrors,
            prune_files,
        )?;
        self.lock_store.save(&lock)?;
        Ok(report)
    }

    fn execute_entry(
        &self,
        manifest: &Manifest,
        lock: &mut LockFile,
        entry: PlanEntry,
    ) -> LibraryResult {
        match entry.action {
            PlannedAction::Skipped => LibraryResult {
                name: entry.name,
                status: InstallStatus::Skipped,
                detail: Some(entry.reason),
                warnings: Vec::new(),
            },
            PlannedAction::Reject => {
                let detail = entry
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| entry.reason.clone());
                if let Some(locked) = lock.libraries.get_mut(&entry.name) {
                    locked.install_status = Some(InstallStatus::Error);
                }
                LibraryResult {
                    name: entry.name,
                    status: InstallStatus::Error,
                    detail: Some(detail),
                    warnings: Vec::new(),
                }
            }
            PlannedAction::UpToDate => {
                if let Some(locked) = lock.libraries.get_mut(&entry.name) {
                    locked.install_status = Some(InstallStatus::UpToDate);
                }
                LibraryResult {
                    name: entry.name,
                    status: InstallStatus::UpToDate,
                    detail: None,
                    warnings: Vec::new(),
                }
            }
            PlannedAction::Install | PlannedAction::Update => {
                let name = entry.name.clone();
                let spec = manifest
                    .imports
                    .get(&name)
                    .expect("plan entries come from the manifest")
                    .clone();
                let status = if entry.action == PlannedAction::Update {
                    InstallStatus::Updated
                } else {
                    InstallStatus::Installed
                };
                let dest = entry.dest.expect("decided entries carry a destination");
                match self.install_library(&name, &spec, &dest, lock.libraries.get(&name), status) {
                    Ok((locked, warnings)) => {
                        lock.libraries.insert(name.clone(), locked);
                        LibraryResult {
                            name,
                            status,
                            detail: Some(entry.reason),
                            warnings,
                        }
                    }
                    Err(err) => {
                        if let Some(locked) = lock.libraries.get_mut(&name) {
                            locked.install_status = Some(InstallStatus::Error);
                        }
                        LibraryResult {
                            name,
                            status: InstallStatus::Error,
                            detail: Some(err.to_string()),
                            warnings: Vec::new(),
                        }
                    }
                }
            }
        }
    }

    fn install_library(
        &self,
        name: &str,
        spec: &ImportSpec,
        dest: &Path,
        prior: Option<&LockEntry>,
        status: InstallStatus,
    ) -> Result<(LockEntry, Vec<String>)> {
        let checkout = self.mirrors.ensure(&spec.repo, &spec.r#ref, false)?;
        let engine = IgnoreEngine::load(&self.project_root, &spec.ignore_patterns, spec.checkin)?;
        let outcome = extract::extract_library(&ExtractRequest {
            name,
            spec,
            mirror_path: &checkout.mirror_path,
            dest,
            commit: &checkout.commit,
            engine: &engine,
        })?;

        let mut warnings = Vec::new();
        if outcome.nested_manifest {
            warnings.push(format!(
                "{name} contains its own {MANIFEST_FILE_NAME}; nested imports are not resolved"
            ));
        }

        let license_change = prior.and_then(|old| {
            (old.license != outcome.license).then(|| {
                format!(
                    "license changed: {} -> {}",
                    old.license.as_deref().unwrap_or("none"),
                    outcome.license.as_deref().unwrap_or("none")
                )
            })
        });
        let license_warning = if spec.checkin {
            outcome
                .license
                .as_deref()
                .and_then(license::compatibility_warning)
        } else {
            None
        };

        let now = now_utc();
        let installed_at = prior
            .map(|old| old.installed_at.clone())
            .unwrap_or_else(|| now.clone());
        let local_path = dest
            .strip_prefix(&self.project_root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| dest.to_string_lossy().to_string());

        let locked = LockEntry {
            repo: spec.repo.clone(),
            r#ref: spec.r#ref.clone(),
            source_path: spec.source_path.clone(),
            local_path,
            checkin: spec.checkin,
            commit: checkout.commit,
            checksum: outcome.checksum,
            installed_at,
            updated_at: now,
            license: outcome.license,
            license_file: outcome.license_file,
            install_status: Some(status),
            validation_status: None,
            license_change,
            license_warning,
        };
        Ok((locked, warnings))
    }
}

// Exercised end to end in tests/install_flow.rs against real git
// repositories; unit coverage for the decision ladder lives in plan.rs.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ComposeError;

    #[test]
    fn run_requires_a_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = Installer::new_with_test_mode(tmp.path(), true).unwrap();
        let err = installer.run(&PlanOptions::default()).expect_err("no manifest");
        assert!(matches!(err, ComposeError::Config(_)));
        assert!(err.is_run_fatal());
    }

    #[test]
    fn empty_manifest_run_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILE_NAME), "library_root: libs\n").unwrap();
        let installer = Installer::new_with_test_mode(tmp.path(), true).unwrap();
        let report = installer.run(&PlanOptions::default()).unwrap();
        assert!(report.results.is_empty());
        assert!(!report.had_errors());
        assert!(tmp.path().join(LOCK_FILE_NAME).exists());
    }
}
