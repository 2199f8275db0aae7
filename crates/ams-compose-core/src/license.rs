//! License file detection: canonical filename scan plus a small anchored
//! pattern table over the first few KiB of the file.

use std::path::{Path, PathBuf};

use crate::errors::Result;

/// Canonical license basenames, in priority order.
const CANONICAL_NAMES: &[&str] = &[
    "LICENSE",
    "LICENSE.txt",
    "LICENSE.md",
    "COPYING",
    "NOTICE",
    "COPYRIGHT",
];

/// Well-known subdirectories probed one level deep when the directory root
/// has no canonical file.
const FALLBACK_SUBDIRS: &[&str] = &["licenses", "license", "legal"];

/// How much of the file the identifier match reads.
const HEAD_BYTES: usize = 4096;

/// Identifier patterns, first hit wins. Each entry is (identifier,
/// all-of-these-substrings), matched case-insensitively.
const PATTERNS: &[(&str, &[&str])] = &[
    ("Apache-2.0", &["apache license", "version 2.0"]),
    ("MIT", &["mit license"]),
    ("MIT", &["permission is hereby granted, free of charge"]),
    ("GPL-3.0", &["gnu general public license", "version 3"]),
    ("GPL-2.0", &["gnu general public license", "version 2"]),
    (
        "BSD-3-Clause",
        &[
            "redistribution and use in source and binary forms",
            "neither the name",
        ],
    ),
    (
        "BSD-2-Clause",
        &["redistribution and use in source and binary forms"],
    ),
    ("MPL-2.0", &["mozilla public license", "2.0"]),
    (
        "Unlicense",
        &["this is free and unencumbered software released into the public domain"],
    ),
    ("CC0-1.0", &["cc0"]),
    ("CC0-1.0", &["creative commons zero"]),
];

/// Result of scanning a directory for a license.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LicenseInfo {
    /// Detected identifier, `"Unknown"` when a file exists but no pattern
    /// matched, `None` when no license file was found.
    pub id: Option<String>,
    /// Path of the detected file, relative to the scanned directory.
    pub file: Option<PathBuf>,
}

/// Scan `dir` for a canonical license file and identify it.
pub fn scan_dir(dir: &Path) -> Result<LicenseInfo> {
    if let Some(rel) = find_canonical(dir, Path::new(""))? {
        return identify_file(dir, rel);
    }
    for sub in FALLBACK_SUBDIRS {
        let subdir = dir.join(sub);
        if subdir.is_dir() {
            if let Some(rel) = find_canonical(&subdir, Path::new(sub))? {
                return identify_file(dir, rel);
            }
        }
    }
    Ok(LicenseInfo::default())
}

/// Advisory warning for identifiers that complicate redistribution of
/// checked-in copies.
pub fn compatibility_warning(id: &str) -> Option<String> {
    let upper = id.to_ascii_uppercase();
    if upper.starts_with("GPL-") || upper.starts_with("AGPL-") {
        return Some(format!(
            "{id} is a copyleft license; review redistribution terms before \
             checking this library into your repository"
        ));
    }
    None
}

fn find_canonical(dir: &Path, prefix: &Path) -> Result<Option<PathBuf>> {
    let mut names: Vec<String> = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    for wanted in CANONICAL_NAMES {
        if let Some(hit) = names
            .iter()
            .find(|name| name.eq_ignore_ascii_case(wanted))
        {
            return Ok(Some(prefix.join(hit)));
        }
    }
    Ok(None)
}

fn identify_file(base: &Path, rel: PathBuf) -> Result<LicenseInfo> {
    let head = read_head(&base.join(&rel))?;
    let lowered = head.to_ascii_lowercase();
    for (id, needles) in PATTERNS {
        if needles.iter().all(|needle| lowered.contains(needle)) {
            return Ok(LicenseInfo {
                id: Some((*id).to_string()),
                file: Some(rel),
            });
        }
    }
    Ok(LicenseInfo {
        id: Some("Unknown".to_string()),
        file: Some(rel),
    })
}

fn read_head(path: &Path) -> Result<String> {
    use std::io::Read as _;
    let mut buf = vec![0u8; HEAD_BYTES];
    let mut file = std::fs::File::open(path)?;
    let mut filled = 0;
    loop {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == buf.len() {
            break;
        }
    }
    buf.truncate(filled);
    Ok(String::from_utf8_lossy(&buf).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIT_TEXT: &str = "MIT License\n\nCopyright (c) 2024 Example\n\n\
        Permission is hereby granted, free of charge, to any person...";
    const APACHE_TEXT: &str =
        "                              Apache License\n                        Version 2.0, January 2004\n";
    const GPL3_TEXT: &str = "GNU GENERAL PUBLIC LICENSE\nVersion 3, 29 June 2007\n";

    #[test]
    fn detects_identifier_from_file_head() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("LICENSE"), MIT_TEXT).unwrap();
        let info = scan_dir(tmp.path()).unwrap();
        assert_eq!(info.id.as_deref(), Some("MIT"));
        assert_eq!(info.file.as_deref(), Some(Path::new("LICENSE")));
    }

    #[test]
    fn filename_priority_prefers_license_over_copying() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("COPYING"), GPL3_TEXT).unwrap();
        std::fs::write(tmp.path().join("LICENSE"), APACHE_TEXT).unwrap();
        let info = scan_dir(tmp.path()).unwrap();
        assert_eq!(info.id.as_deref(), Some("Apache-2.0"));
        assert_eq!(info.file.as_deref(), Some(Path::new("LICENSE")));
    }

    #[test]
    fn matching_is_case_insensitive_on_filenames() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("license.TXT"), MIT_TEXT).unwrap();
        let info = scan_dir(tmp.path()).unwrap();
        assert_eq!(info.file.as_deref(), Some(Path::new("license.TXT")));
    }

    #[test]
    fn unrecognized_text_reports_unknown_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("LICENSE"), "all rights reserved, probably").unwrap();
        let info = scan_dir(tmp.path()).unwrap();
        assert_eq!(info.id.as_deref(), Some("Unknown"));
        assert!(info.file.is_some());
    }

    #[test]
    fn falls_back_into_licenses_subdir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("licenses")).unwrap();
        std::fs::write(tmp.path().join("licenses/COPYING"), GPL3_TEXT).unwrap();
        let info = scan_dir(tmp.path()).unwrap();
        assert_eq!(info.id.as_deref(), Some("GPL-3.0"));
        assert_eq!(info.file.as_deref(), Some(Path::new("licenses/COPYING")));
    }

    #[test]
    fn empty_dir_yields_no_license() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(scan_dir(tmp.path()).unwrap(), LicenseInfo::default());
    }

    #[test]
    fn copyleft_warning_only_for_gpl_family() {
        assert!(compatibility_warning("GPL-3.0").is_some());
        assert!(compatibility_warning("GPL-2.0").is_some());
        assert!(compatibility_warning("MIT").is_none());
        assert!(compatibility_warning("Apache-2.0").is_none());
    }
}
