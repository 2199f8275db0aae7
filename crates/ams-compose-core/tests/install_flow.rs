//! End-to-end install/update flows against real local git repositories.
//!
//! Fixtures are plain `git init` repos addressed through `file://` URLs,
//! which the installer only accepts in test mode. Every test is guarded on
//! a working `git` binary and skips silently without one.

use std::path::{Path, PathBuf};
use std::process::Command;

use ams_compose_core::checksum;
use ams_compose_core::lockfile::{InstallStatus, LockFile};
use ams_compose_core::{Installer, PlanOptions, LOCK_FILE_NAME, MANIFEST_FILE_NAME, METADATA_FILE_NAME};

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "protocol.file.allow=always"])
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).expect("create repo dir");
    run_git(dir, &["init", "-q", "-b", "main"]);
}

fn commit_all(dir: &Path, message: &str) {
    run_git(dir, &["add", "-A"]);
    run_git(
        dir,
        &[
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=Test",
            "commit",
            "-q",
            "-m",
            message,
        ],
    );
}

fn head_commit(dir: &Path) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "HEAD"])
        .output()
        .expect("rev-parse");
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn file_url(dir: &Path) -> String {
    format!("file://{}", dir.canonicalize().expect("canonicalize").display())
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

const MIT_TEXT: &str =
    "MIT License\n\nPermission is hereby granted, free of charge, to any person\n";

/// Upstream repo with a license at the root and a design library under
/// `src/widget`.
fn widget_repo(base: &Path) -> PathBuf {
    let repo = base.join("upstream/widget");
    init_repo(&repo);
    write(&repo, "LICENSE", MIT_TEXT);
    write(&repo, "README.md", "widget ip\n");
    write(&repo, "src/widget/cell.sch", "* cell schematic\n");
    write(&repo, "src/widget/cell.sym", "v {xschem}\n");
    write(&repo, "src/widget/sim/tb.spice", ".tran 1n 1u\n");
    commit_all(&repo, "initial import");
    repo
}

fn project_with_manifest(base: &Path, manifest: &str) -> PathBuf {
    let project = base.join("project");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join(MANIFEST_FILE_NAME), manifest).unwrap();
    project
}

fn installer(project: &Path) -> Installer {
    Installer::new_with_test_mode(project, true).expect("installer")
}

fn read_lock(project: &Path) -> LockFile {
    let text = std::fs::read_to_string(project.join(LOCK_FILE_NAME)).expect("lock file");
    serde_yaml::from_str(&text).expect("parse lock")
}

fn install_opts() -> PlanOptions {
    PlanOptions::default()
}

fn update_opts() -> PlanOptions {
    PlanOptions {
        remote_probe: true,
        ..Default::default()
    }
}

#[test]
fn fresh_install_materializes_subpath_with_license() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: main\n    source_path: src/widget\n",
            file_url(&repo)
        ),
    );

    let report = installer(&project).run(&install_opts()).unwrap();
    assert!(!report.had_errors());
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, InstallStatus::Installed);

    let dest = project.join("libs/widget");
    assert!(dest.join("cell.sch").exists());
    assert!(dest.join("sim/tb.spice").exists());
    assert!(dest.join("LICENSE").exists(), "root license is carried along");
    assert!(dest.join(METADATA_FILE_NAME).exists());
    assert!(!dest.join(".git").exists());

    let lock = read_lock(&project);
    let entry = lock.libraries.get("widget").expect("lock entry");
    assert_eq!(entry.commit.len(), 40);
    assert!(entry.commit.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(entry.commit, head_commit(&repo));
    assert_eq!(entry.checksum.len(), 64);
    assert_eq!(entry.local_path, "libs/widget");
    assert_eq!(entry.license.as_deref(), Some("MIT"));
    assert_eq!(entry.install_status, Some(InstallStatus::Installed));

    // The mirror is content-addressed and checked out at the locked commit.
    let mirror = project
        .join(".mirror")
        .join(checksum::repo_url_digest(&file_url(&repo)));
    assert!(mirror.join(".git").exists());
    assert_eq!(head_commit(&mirror), entry.commit);

    // Install-time checksum is reproducible by the validation predicate.
    let recomputed = checksum::tree_digest(&dest, &checksum::lock_exclude).unwrap();
    assert_eq!(entry.checksum, recomputed);
}

#[test]
fn reinstall_is_a_noop_without_fetching() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: main\n    source_path: src/widget\n",
            file_url(&repo)
        ),
    );

    let inst = installer(&project);
    inst.run(&install_opts()).unwrap();
    let first = read_lock(&project);

    // Upstream advances, but a plain install never probes the remote.
    write(&repo, "src/widget/new_cell.sch", "* new\n");
    commit_all(&repo, "advance main");

    let report = inst.run(&install_opts()).unwrap();
    assert_eq!(report.results[0].status, InstallStatus::UpToDate);

    let second = read_lock(&project);
    let (a, b) = (
        first.libraries.get("widget").unwrap(),
        second.libraries.get("widget").unwrap(),
    );
    assert_eq!(a.commit, b.commit);
    assert_eq!(a.checksum, b.checksum);
    assert_eq!(a.installed_at, b.installed_at);
    assert_eq!(a.updated_at, b.updated_at);
    assert!(!project.join("libs/widget/new_cell.sch").exists());
}

#[test]
fn update_follows_branch_and_preserves_installed_at() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: main\n    source_path: src/widget\n",
            file_url(&repo)
        ),
    );

    let inst = installer(&project);
    inst.run(&install_opts()).unwrap();
    let before = read_lock(&project);

    write(&repo, "src/widget/new_cell.sch", "* new\n");
    commit_all(&repo, "advance main");
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let report = inst.run(&update_opts()).unwrap();
    assert_eq!(report.results[0].status, InstallStatus::Updated);

    let after = read_lock(&project);
    let (old, new) = (
        before.libraries.get("widget").unwrap(),
        after.libraries.get("widget").unwrap(),
    );
    assert_ne!(old.commit, new.commit);
    assert_eq!(new.commit, head_commit(&repo));
    assert_ne!(old.checksum, new.checksum);
    assert_eq!(old.installed_at, new.installed_at);
    assert_ne!(old.updated_at, new.updated_at);
    assert!(project.join("libs/widget/new_cell.sch").exists());
}

#[test]
fn tag_pin_ignores_branch_advance() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    run_git(&repo, &["tag", "v1.0.0"]);
    let pinned_commit = head_commit(&repo);
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: v1.0.0\n    source_path: src/widget\n",
            file_url(&repo)
        ),
    );

    let inst = installer(&project);
    inst.run(&install_opts()).unwrap();

    write(&repo, "src/widget/new_cell.sch", "* new\n");
    commit_all(&repo, "advance main past the tag");

    let report = inst.run(&update_opts()).unwrap();
    assert_eq!(report.results[0].status, InstallStatus::UpToDate);
    assert_eq!(
        read_lock(&project).libraries.get("widget").unwrap().commit,
        pinned_commit
    );
}

#[test]
fn commit_pin_installs_exact_sha() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let pinned = head_commit(&repo);
    write(&repo, "src/widget/later.sch", "* later\n");
    commit_all(&repo, "newer work");

    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: {pinned}\n    source_path: src/widget\n",
            file_url(&repo)
        ),
    );

    installer(&project).run(&install_opts()).unwrap();
    let lock = read_lock(&project);
    assert_eq!(lock.libraries.get("widget").unwrap().commit, pinned);
    assert!(!project.join("libs/widget/later.sch").exists());
}

#[test]
fn ref_change_in_manifest_updates_pin() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    run_git(&repo, &["tag", "v1.0.0"]);
    write(&repo, "src/widget/v2.sch", "* v2\n");
    commit_all(&repo, "second release");
    run_git(&repo, &["tag", "v2.0.0"]);

    let manifest_for = |tag: &str| {
        format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: {tag}\n    source_path: src/widget\n",
            file_url(&repo)
        )
    };
    let project = project_with_manifest(tmp.path(), &manifest_for("v1.0.0"));

    let inst = installer(&project);
    inst.run(&install_opts()).unwrap();
    assert!(!project.join("libs/widget/v2.sch").exists());

    std::fs::write(project.join(MANIFEST_FILE_NAME), manifest_for("v2.0.0")).unwrap();
    let report = inst.run(&install_opts()).unwrap();
    assert_eq!(report.results[0].status, InstallStatus::Updated);
    assert!(project.join("libs/widget/v2.sch").exists());
    assert_eq!(
        read_lock(&project).libraries.get("widget").unwrap().r#ref,
        "v2.0.0"
    );
}

#[test]
fn checkin_false_gets_optout_gitignore_without_license_injection() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: main\n    source_path: src/widget\n    checkin: false\n",
            file_url(&repo)
        ),
    );

    installer(&project).run(&install_opts()).unwrap();

    let dest = project.join("libs/widget");
    let gitignore = std::fs::read_to_string(dest.join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l == "*"));
    assert!(gitignore.lines().any(|l| l == format!("!{METADATA_FILE_NAME}")));
    assert!(!dest.join("LICENSE").exists());
    assert!(dest.join(METADATA_FILE_NAME).exists());
}

#[test]
fn three_tier_filtering_applies_during_install() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("upstream/noisy");
    init_repo(&repo);
    write(&repo, "lib/cell.sch", "* keep\n");
    write(&repo, "lib/sim.log", "tier B noise\n");
    write(&repo, "lib/big.raw", "tier C noise\n");
    write(&repo, "lib/keep.raw", "re-included\n");
    write(&repo, "lib/notes/.DS_Store", "tier A noise\n");
    commit_all(&repo, "noisy tree");

    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  noisy:\n    repo: {}\n    ref: main\n    source_path: lib\n    ignore_patterns:\n      - \"*.raw\"\n      - \"!keep.raw\"\n",
            file_url(&repo)
        ),
    );
    std::fs::write(project.join(".ams-compose-ignore"), "*.log\n").unwrap();

    installer(&project).run(&install_opts()).unwrap();

    let dest = project.join("libs/noisy");
    assert!(dest.join("cell.sch").exists());
    assert!(!dest.join("sim.log").exists(), "tier B filters");
    assert!(!dest.join("big.raw").exists(), "tier C filters");
    assert!(dest.join("keep.raw").exists(), "negation re-includes");
    assert!(!dest.join("notes/.DS_Store").exists(), "tier A filters");
}

#[test]
fn path_escape_fails_one_library_and_spares_the_rest() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  evil:\n    repo: {url}\n    ref: main\n    source_path: src/widget\n    local_path: ../../etc\n  widget:\n    repo: {url}\n    ref: main\n    source_path: src/widget\n",
            url = file_url(&repo)
        ),
    );

    let report = installer(&project).run(&install_opts()).unwrap();
    assert!(report.had_errors());

    let by_name: std::collections::BTreeMap<_, _> = report
        .results
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();
    assert_eq!(by_name["evil"].status, InstallStatus::Error);
    assert!(by_name["evil"]
        .detail
        .as_deref()
        .unwrap()
        .contains("project root"));
    assert_eq!(by_name["widget"].status, InstallStatus::Installed);

    let lock = read_lock(&project);
    assert!(lock.libraries.contains_key("widget"));
    assert!(!lock.libraries.contains_key("evil"));
    assert!(!tmp.path().join("etc").exists());
}

#[test]
fn missing_ref_is_captured_per_library() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  widget:\n    repo: {}\n    ref: no-such-branch\n    source_path: src/widget\n",
            file_url(&repo)
        ),
    );

    let report = installer(&project).run(&install_opts()).unwrap();
    assert!(report.had_errors());
    assert_eq!(report.results[0].status, InstallStatus::Error);
    assert!(!project.join("libs/widget").exists());
}

#[test]
fn targeted_install_skips_other_libraries() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  first:\n    repo: {url}\n    ref: main\n    source_path: src/widget\n  second:\n    repo: {url}\n    ref: main\n    source_path: src/widget\n",
            url = file_url(&repo)
        ),
    );

    let opts = PlanOptions {
        targets: Some(["second".to_string()].into_iter().collect()),
        ..Default::default()
    };
    let report = installer(&project).run(&opts).unwrap();
    let by_name: std::collections::BTreeMap<_, _> = report
        .results
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();
    assert_eq!(by_name["first"].status, InstallStatus::Skipped);
    assert_eq!(by_name["second"].status, InstallStatus::Installed);
    assert!(!project.join("libs/first").exists());
    assert!(project.join("libs/second").exists());
}

#[test]
fn shared_repo_uses_one_mirror() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = widget_repo(tmp.path());
    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  cells:\n    repo: {url}\n    ref: main\n    source_path: src/widget\n  docs:\n    repo: {url}\n    ref: main\n    source_path: .\n",
            url = file_url(&repo)
        ),
    );

    installer(&project).run(&install_opts()).unwrap();

    let mirror_root = project.join(".mirror");
    let mirrors: Vec<_> = std::fs::read_dir(&mirror_root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    assert_eq!(mirrors.len(), 1, "same repo URL shares a single mirror");
}

#[test]
fn submodules_are_materialized_into_the_extraction() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();

    let child = tmp.path().join("upstream/child");
    init_repo(&child);
    write(&child, "model.lib", "* shared model\n");
    commit_all(&child, "child initial");

    let parent = tmp.path().join("upstream/parent");
    init_repo(&parent);
    write(&parent, "top.sch", "* top\n");
    commit_all(&parent, "parent initial");
    run_git(
        &parent,
        &["submodule", "add", &file_url(&child), "third_party/child"],
    );
    commit_all(&parent, "add submodule");

    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  parent:\n    repo: {}\n    ref: main\n    source_path: .\n",
            file_url(&parent)
        ),
    );

    let report = installer(&project).run(&install_opts()).unwrap();
    assert!(!report.had_errors(), "{:?}", report.results);
    assert!(project.join("libs/parent/top.sch").exists());
    assert!(
        project.join("libs/parent/third_party/child/model.lib").exists(),
        "submodule contents are extracted"
    );
    // The submodule's own git plumbing never reaches the project.
    assert!(!project.join("libs/parent/third_party/child/.git").exists());
    assert!(!project.join("libs/parent/.gitmodules").exists());
}

#[test]
fn nested_manifest_is_surfaced_as_warning() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("upstream/nested");
    init_repo(&repo);
    write(&repo, "cell.sch", "* cell\n");
    write(&repo, MANIFEST_FILE_NAME, "library_root: libs\n");
    commit_all(&repo, "repo that is itself composed");

    let project = project_with_manifest(
        tmp.path(),
        &format!(
            "library_root: libs\nimports:\n  nested:\n    repo: {}\n    ref: main\n    source_path: .\n",
            file_url(&repo)
        ),
    );

    let report = installer(&project).run(&install_opts()).unwrap();
    assert!(!report.had_errors());
    assert!(report.results[0]
        .warnings
        .iter()
        .any(|w| w.contains("nested imports are not resolved")));
}
