//! Scan configuration parsing (`depend.toml`).
//!
//! The build orchestrator writes one of these files per target and
//! language; it carries everything a scan needs: the (source, object)
//! pairs, the include search path, preprocessor definitions, the set of
//! known generated files, and the Fortran module bookkeeping knobs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DependInfo {
    /// "C", "Fortran" or "Java".
    pub language: String,
    /// Directory holding the persisted outputs: `depend.make`,
    /// `depend.internal`, the include cache, `fortran.internal` and the
    /// module stamp files.
    pub target_dir: String,
    #[serde(default)]
    pub sources: Vec<SourcePair>,
    #[serde(default)]
    pub include_path: Vec<String>,
    /// Preprocessor definitions; values are ignored, presence only.
    #[serde(default)]
    pub definitions: Vec<String>,
    /// Files produced later by the build itself. Never reported missing.
    #[serde(default)]
    pub generated: Vec<String>,
    /// References matching this are traversed transitively (C only).
    #[serde(default = "default_scan_regex")]
    pub scan_regex: String,
    /// An unresolvable reference matching this fails the scan (C only).
    #[serde(default = "default_complain_regex")]
    pub complain_regex: String,
    /// Fortran compiler id ("GNU", "Intel", "IntelLLVM", "SunPro", ...).
    #[serde(default)]
    pub compiler_id: String,
    #[serde(default = "default_submodule_sep")]
    pub submodule_sep: String,
    #[serde(default = "default_submodule_ext")]
    pub submodule_ext: String,
    /// Directory where the compiler drops `.mod` files; defaults to the
    /// target directory.
    #[serde(default)]
    pub module_dir: String,
    /// Target directories of linked targets whose `fortran.internal`
    /// manifests are consulted for remote modules.
    #[serde(default)]
    pub linked_dirs: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SourcePair {
    pub src: String,
    pub obj: String,
}

fn default_scan_regex() -> String {
    "^.*$".to_string()
}

fn default_complain_regex() -> String {
    "^$".to_string()
}

fn default_submodule_sep() -> String {
    "@".to_string()
}

fn default_submodule_ext() -> String {
    ".smod".to_string()
}

impl DependInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read depend info \"{}\"", path.display()))?;
        let info: Self = toml::from_str(&content)
            .with_context(|| format!("Cannot parse depend info \"{}\"", path.display()))?;
        Ok(info)
    }

    /// Definition names with any `NAME=value` truncated at the `=`.
    pub fn pp_definitions(&self) -> BTreeSet<String> {
        self.definitions
            .iter()
            .map(|d| match d.split_once('=') {
                Some((name, _)) => name.to_string(),
                None => d.clone(),
            })
            .collect()
    }

    pub fn module_dir(&self) -> &str {
        if self.module_dir.is_empty() {
            &self.target_dir
        } else {
            &self.module_dir
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let info: DependInfo = toml::from_str(
            r#"
language = "C"
target_dir = "build/dep/app"

[[sources]]
src = "src/main.c"
obj = "build/obj/main.o"
"#,
        )
        .unwrap();
        assert_eq!(info.language, "C");
        assert_eq!(info.sources.len(), 1);
        assert_eq!(info.scan_regex, "^.*$");
        assert_eq!(info.complain_regex, "^$");
        assert_eq!(info.submodule_sep, "@");
        assert_eq!(info.submodule_ext, ".smod");
        assert_eq!(info.module_dir(), "build/dep/app");
    }

    #[test]
    fn test_definitions_truncated_at_assignment() {
        let info: DependInfo = toml::from_str(
            r#"
language = "Fortran"
target_dir = "t"
definitions = ["FOO=BAR", "BAZ"]
"#,
        )
        .unwrap();
        let defs = info.pp_definitions();
        assert!(defs.contains("FOO"));
        assert!(defs.contains("BAZ"));
        assert!(!defs.contains("FOO=BAR"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err =
            toml::from_str::<DependInfo>("language = \"C\"\ntarget_dir = \"t\"\nbogus = 1\n");
        assert!(err.is_err());
    }
}
