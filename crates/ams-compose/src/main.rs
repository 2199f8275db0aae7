use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use ams_compose_core::lockfile::ValidationStatus;
use ams_compose_core::manifest::{Manifest, DEFAULT_LIBRARY_ROOT, MANIFEST_SCHEMA_TEXT};
use ams_compose_core::{ComposeError, Installer, PlanOptions, MANIFEST_FILE_NAME};

mod render;

#[derive(Debug, Parser)]
#[command(name = "ams-compose")]
#[command(about = "Dependency manager for analog/mixed-signal IC design projects.")]
#[command(version)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    project_root: Option<PathBuf>,

    /// Emit machine-readable JSON reports on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress output.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scaffold an ams-compose.yaml and the library directory.
    Init(InitArgs),
    /// Reconcile libraries against the lock file (offline fast path).
    Install(InstallArgs),
    /// Reconcile with a remote probe: re-resolve mutable refs upstream.
    Update(InstallArgs),
    /// Render lock entries for installed libraries.
    List(ListArgs),
    /// Re-verify checksums and detect orphaned libraries.
    Validate,
    /// Prune unused mirrors and orphaned lock entries.
    Clean(CleanArgs),
    /// Print the manifest schema.
    Schema,
}

#[derive(Debug, Args)]
struct InitArgs {
    /// Directory where libraries are installed.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_LIBRARY_ROOT)]
    library_root: String,

    /// Overwrite an existing manifest.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct InstallArgs {
    /// Restrict the run to these libraries.
    libraries: Vec<String>,

    /// Reinstall even when the lock file says up to date.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Multi-line output with full provenance per library.
    #[arg(long)]
    detailed: bool,
}

#[derive(Debug, Args)]
struct CleanArgs {
    /// Also delete orphaned library directories whose provenance stamp
    /// matches the stale lock entry.
    #[arg(long)]
    prune_files: bool,
}

#[derive(Debug)]
struct Reporter {
    json: bool,
    quiet: bool,
}

impl Reporter {
    fn progress(&self, msg: &str) {
        if self.json || self.quiet {
            return;
        }
        eprintln!("{msg}");
    }

    fn line(&self, msg: &str) {
        if self.json {
            return;
        }
        println!("{msg}");
    }
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<ComposeError>() {
                Some(compose) if !compose.is_run_fatal() => ExitCode::from(1),
                _ => ExitCode::from(2),
            }
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let root = match &cli.project_root {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let reporter = Reporter {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.cmd {
        Command::Init(args) => cmd_init(&root, args, &reporter),
        Command::Install(args) => cmd_reconcile(&root, args, false, &reporter),
        Command::Update(args) => cmd_reconcile(&root, args, true, &reporter),
        Command::List(args) => cmd_list(&root, args, &reporter),
        Command::Validate => cmd_validate(&root, &reporter),
        Command::Clean(args) => cmd_clean(&root, args, &reporter),
        Command::Schema => {
            print!("{MANIFEST_SCHEMA_TEXT}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_init(root: &std::path::Path, args: InitArgs, reporter: &Reporter) -> Result<ExitCode> {
    let manifest_path = root.join(MANIFEST_FILE_NAME);
    if manifest_path.exists() && !args.force {
        eprintln!(
            "error: {} already exists (use --force to overwrite)",
            manifest_path.display()
        );
        return Ok(ExitCode::from(2));
    }

    let libs_dir = root.join(&args.library_root);
    if !libs_dir.exists() {
        std::fs::create_dir_all(&libs_dir)
            .with_context(|| format!("create {}", libs_dir.display()))?;
        reporter.progress(&format!("created {}/", args.library_root));
    }

    std::fs::write(&manifest_path, Manifest::template(&args.library_root))
        .with_context(|| format!("write {}", manifest_path.display()))?;
    reporter.line(&format!(
        "initialized ams-compose project in {}",
        root.display()
    ));
    reporter.line(&format!(
        "edit {MANIFEST_FILE_NAME} to add imports, then run `ams-compose install`"
    ));
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct JsonLibraryResult<'a> {
    name: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct JsonRunReport<'a> {
    ok: bool,
    command: &'static str,
    results: Vec<JsonLibraryResult<'a>>,
}

fn cmd_reconcile(
    root: &std::path::Path,
    args: InstallArgs,
    remote_probe: bool,
    reporter: &Reporter,
) -> Result<ExitCode> {
    let command = if remote_probe { "update" } else { "install" };
    let targets: Option<BTreeSet<String>> = if args.libraries.is_empty() {
        None
    } else {
        Some(args.libraries.iter().cloned().collect())
    };
    if let Some(targets) = &targets {
        let names: Vec<&str> = targets.iter().map(|s| s.as_str()).collect();
        reporter.progress(&format!("{command}: {}", names.join(", ")));
    } else {
        reporter.progress(&format!("{command}: all libraries from {MANIFEST_FILE_NAME}"));
    }

    let installer = Installer::new(root)?;
    let report = installer.run(&PlanOptions {
        force: args.force,
        remote_probe,
        targets,
    })?;

    if reporter.json {
        let json = JsonRunReport {
            ok: !report.had_errors(),
            command,
            results: report
                .results
                .iter()
                .map(|r| JsonLibraryResult {
                    name: &r.name,
                    status: r.status.as_str(),
                    detail: r.detail.as_deref(),
                    warnings: r.warnings.iter().map(|w| w.as_str()).collect(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string(&json)?);
    } else {
        if report.results.is_empty() {
            reporter.line("no libraries to install");
        }
        for result in &report.results {
            reporter.line(&render::run_result_line(result));
        }
    }

    if report.had_errors() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn cmd_list(root: &std::path::Path, args: ListArgs, reporter: &Reporter) -> Result<ExitCode> {
    let installer = Installer::new(root)?;
    let lock = installer.load_lock()?;

    if reporter.json {
        println!("{}", serde_json::to_string(&lock)?);
        return Ok(ExitCode::SUCCESS);
    }

    if lock.libraries.is_empty() {
        reporter.line("no libraries installed");
        return Ok(ExitCode::SUCCESS);
    }
    reporter.line(&format!("installed libraries ({}):", lock.libraries.len()));
    let rendered = if args.detailed {
        render::lock_detailed(&lock)
    } else {
        render::lock_table(&lock, false)
    };
    print!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct JsonValidationReport<'a> {
    ok: bool,
    results: Vec<JsonLibraryResult<'a>>,
}

fn cmd_validate(root: &std::path::Path, reporter: &Reporter) -> Result<ExitCode> {
    let installer = Installer::new(root)?;
    let manifest = installer.load_manifest()?;
    reporter.progress(&format!(
        "configuration valid: {} libraries defined",
        manifest.imports.len()
    ));

    let results = installer.validate()?;
    let all_valid = results
        .iter()
        .all(|r| r.status == ValidationStatus::Valid);

    if reporter.json {
        let json = JsonValidationReport {
            ok: all_valid,
            results: results
                .iter()
                .map(|r| JsonLibraryResult {
                    name: &r.name,
                    status: r.status.as_str(),
                    detail: r.detail.as_deref(),
                    warnings: Vec::new(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string(&json)?);
    } else if results.is_empty() {
        reporter.line("no libraries to validate");
    } else {
        for result in &results {
            reporter.line(&render::validation_line(result));
        }
    }

    if all_valid {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

#[derive(Debug, Serialize)]
struct JsonCleanReport<'a> {
    ok: bool,
    removed_mirrors: &'a [String],
    removed_entries: &'a [String],
    removed_dirs: &'a [String],
}

fn cmd_clean(root: &std::path::Path, args: CleanArgs, reporter: &Reporter) -> Result<ExitCode> {
    let installer = Installer::new(root)?;
    let report = installer.clean(args.prune_files)?;

    if report.removed_mirrors.is_empty() {
        reporter.line("no unused mirrors found");
    } else {
        reporter.line(&format!(
            "removed {} unused mirror(s)",
            report.removed_mirrors.len()
        ));
    }
    if report.removed_entries.is_empty() {
        reporter.line("no orphaned libraries found");
    } else {
        reporter.line(&format!(
            "removed {} orphaned lock entr{} ({})",
            report.removed_entries.len(),
            if report.removed_entries.len() == 1 { "y" } else { "ies" },
            report.removed_entries.join(", ")
        ));
    }
    for dir in &report.removed_dirs {
        reporter.line(&format!("removed directory {dir}"));
    }

    // Surface anything cleanup could not resolve.
    let results = installer.validate()?;
    let remaining: Vec<_> = results
        .iter()
        .filter(|r| r.status != ValidationStatus::Valid)
        .collect();

    if reporter.json {
        let json = JsonCleanReport {
            ok: remaining.is_empty(),
            removed_mirrors: &report.removed_mirrors,
            removed_entries: &report.removed_entries,
            removed_dirs: &report.removed_dirs,
        };
        println!("{}", serde_json::to_string(&json)?);
    }

    if remaining.is_empty() {
        reporter.line(&format!("all {} libraries valid", results.len()));
        Ok(ExitCode::SUCCESS)
    } else {
        for result in remaining {
            reporter.line(&render::validation_line(result));
        }
        Ok(ExitCode::from(1))
    }
}
