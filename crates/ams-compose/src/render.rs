//! Human-readable renderings of lock entries and run results.

use ams_compose_core::lockfile::{LockEntry, LockFile};
use ams_compose_core::validate::ValidationResult;
use ams_compose_core::LibraryResult;

/// Aligned one-line-per-library table:
/// `name | commit:<8-hex> | ref:<ref> | license:<id> | status:<s>`.
pub fn lock_table(lock: &LockFile, statuses: bool) -> String {
    if lock.libraries.is_empty() {
        return String::new();
    }

    let name_width = column_width(lock.libraries.keys().map(|s| s.len()));
    let ref_width = column_width(lock.libraries.values().map(|e| e.r#ref.len()));
    let license_width =
        column_width(lock.libraries.values().map(|e| license_display(e).len()));

    let mut out = String::new();
    for (name, entry) in &lock.libraries {
        let commit8 = &entry.commit[..entry.commit.len().min(8)];
        let license = license_display(entry);
        out.push_str(&format!(
            "{name:<name_width$} | commit:{commit8} | ref:{:<ref_width$} | license:{license:<license_width$}",
            entry.r#ref
        ));
        if statuses {
            let status = entry
                .install_status
                .map(|s| s.as_str())
                .or(entry.validation_status.map(|s| s.as_str()))
                .unwrap_or("unknown");
            out.push_str(&format!(" | status:{status}"));
        }
        out.push('\n');

        if let Some(change) = &entry.license_change {
            out.push_str(&format!("  note: {change}\n"));
        }
        if let Some(warning) = &entry.license_warning {
            out.push_str(&format!("  warning: {warning}\n"));
        }
    }
    out
}

/// Multi-line rendering for `list --detailed`.
pub fn lock_detailed(lock: &LockFile) -> String {
    let mut out = String::new();
    for (name, entry) in &lock.libraries {
        out.push_str(&format!("{name}\n"));
        out.push_str(&format!("  Repository: {}\n", entry.repo));
        out.push_str(&format!("  Reference:  {}\n", entry.r#ref));
        out.push_str(&format!("  Commit:     {}\n", entry.commit));
        out.push_str(&format!("  Path:       {}\n", entry.local_path));
        out.push_str(&format!("  Checkin:    {}\n", entry.checkin));
        out.push_str(&format!("  License:    {}\n", license_display(entry)));
        out.push_str(&format!("  Installed:  {}\n", entry.installed_at));
        out.push_str(&format!("  Updated:    {}\n", entry.updated_at));
        if let Some(warning) = &entry.license_warning {
            out.push_str(&format!("  Warning:    {warning}\n"));
        }
        out.push('\n');
    }
    out
}

/// One line per library for install/update runs.
pub fn run_result_line(result: &LibraryResult) -> String {
    let mut line = format!("{}: {}", result.name, result.status.as_str());
    if let Some(detail) = &result.detail {
        line.push_str(&format!(" ({detail})"));
    }
    for warning in &result.warnings {
        line.push_str(&format!("\n  warning: {warning}"));
    }
    line
}

pub fn validation_line(result: &ValidationResult) -> String {
    match &result.detail {
        Some(detail) => format!("{}: {} ({detail})", result.name, result.status.as_str()),
        None => format!("{}: {}", result.name, result.status.as_str()),
    }
}

fn license_display(entry: &LockEntry) -> String {
    entry.license.clone().unwrap_or_else(|| "None".to_string())
}

fn column_width(lengths: impl Iterator<Item = usize>) -> usize {
    lengths.max().unwrap_or(0)
}
