//! Manifest model: `ams-compose.yaml`.
//!
//! Parsing is strict — unknown keys and duplicate library names are
//! configuration errors — and import order is preserved, because libraries
//! are processed in declaration order.

use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{ComposeError, Result};

pub const DEFAULT_LIBRARY_ROOT: &str = "designs/libs";

/// One library import as authored in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportSpec {
    pub repo: String,
    pub r#ref: String,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default = "default_checkin")]
    pub checkin: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

fn default_checkin() -> bool {
    true
}

/// Insertion-ordered name → ImportSpec mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportMap {
    entries: Vec<(String, ImportSpec)>,
}

impl ImportMap {
    pub fn get(&self, name: &str) -> Option<&ImportSpec> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, spec)| spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, name: String, spec: ImportSpec) {
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = spec,
            None => self.entries.push((name, spec)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ImportSpec)> {
        self.entries.iter().map(|(name, spec)| (name, spec))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ImportMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, spec) in &self.entries {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ImportMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ImportMapVisitor;

        impl<'de> Visitor<'de> for ImportMapVisitor {
            type Value = ImportMap;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a mapping of library name to import spec")
            }

            // A bare `imports:` key (comments only below it) parses as
            // null; treat it as an empty mapping.
            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(ImportMap::default())
            }

            fn visit_none<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(ImportMap::default())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut map = ImportMap::default();
                while let Some((name, spec)) = access.next_entry::<String, ImportSpec>()? {
                    if map.contains(&name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate library name: {name}"
                        )));
                    }
                    map.entries.push((name, spec));
                }
                Ok(map)
            }
        }

        deserializer.deserialize_any(ImportMapVisitor)
    }
}

/// The user-authored manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default = "default_library_root")]
    pub library_root: String,
    #[serde(default)]
    pub imports: ImportMap,
}

fn default_library_root() -> String {
    DEFAULT_LIBRARY_ROOT.to_string()
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ComposeError::Config(format!(
                    "manifest not found: {}",
                    path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };
        let manifest: Manifest = serde_yaml::from_str(&text)
            .map_err(|err| ComposeError::Config(format!("parse {}: {err}", path.display())))?;
        manifest.check()?;
        Ok(manifest)
    }

    fn check(&self) -> Result<()> {
        if self.library_root.trim().is_empty() {
            return Err(ComposeError::Config("library_root must not be empty".into()));
        }
        for (name, spec) in self.imports.iter() {
            for (field, value) in [
                ("repo", &spec.repo),
                ("ref", &spec.r#ref),
                ("source_path", &spec.source_path),
            ] {
                if value.trim().is_empty() {
                    return Err(ComposeError::Config(format!(
                        "import {name:?}: {field} must not be empty"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Scaffold contents for `ams-compose init`.
    pub fn template(library_root: &str) -> String {
        format!(
            "\
# ams-compose configuration file.
#
# Each entry under `imports` names one library to materialize from an
# upstream git repository. Tags behave as immutable pins; branches are
# re-resolved by `ams-compose update`.

library_root: {library_root}

imports:
  # my_analog_lib:
  #   repo: https://github.com/example/analog-library.git
  #   ref: main                  # branch, tag, or commit
  #   source_path: lib/analog    # path within the repository, \".\" for all
  #   # local_path: custom/path  # optional override of library_root placement
  #   # checkin: false           # keep the library out of your VCS
  #   # ignore_patterns:         # gitignore-style, layered on built-ins
  #   #   - \"*.raw\"
  #   # license: Apache-2.0      # assert when auto-detection is wrong
"
        )
    }
}

/// Manifest format description for `ams-compose schema`.
pub const MANIFEST_SCHEMA_TEXT: &str = "\
ams-compose.yaml schema

library_root: <string>            # default \"designs/libs\"
imports:                          # mapping, insertion order preserved
  <name>:                         # unique library name
    repo: <url>                   # required; https/ssh/git/git+https/git+ssh
                                  # or host:owner/name shorthand
    ref: <branch|tag|sha>         # required
    source_path: <path>           # required; \".\" extracts the whole tree
    local_path: <path>            # optional; relative to the project root
    checkin: <bool>               # optional, default true
    ignore_patterns: [<glob>...]  # optional gitignore-style patterns
    license: <id>                 # optional SPDX-ish assertion

Unknown keys are rejected. Lock state lives in .ams-compose.lock; global
ignore patterns in .ams-compose-ignore.
";
