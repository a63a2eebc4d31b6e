//! Fortran dependency walker and module resolver.
//!
//! Two phases per target. Phase 1 parses every source into a
//! [`SourceInfo`] (see [`parser`]). Phase 2, in `finalize`, matches the
//! modules required across all sources against the modules provided
//! locally and by linked targets, then writes the make rules: include
//! dependencies, stamp-file dependencies for resolved modules, and the
//! copy-and-stamp rules that refresh a module's stamp only when its
//! interface really changed (see [`moddiff`]).
//!
//! A module required but resolvable nowhere is looked up as a plain
//! `.mod` file on the include path; when that also fails the edge is
//! omitted without error. The build may then under-declare a
//! dependency, but the module is most likely intrinsic or external and
//! unrebuildable anyway.

pub mod moddiff;
pub mod parser;

pub use moddiff::{FortranCompiler, modules_differ};
pub use parser::SourceInfo;

use crate::config::DependInfo;
use crate::writer;
use anyhow::{Context, Result, bail};
use colored::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Manifest file listing the modules a target provides, read by the
/// targets that link against it.
const PROVIDES_MANIFEST: &str = "fortran.internal";

pub struct FortranDepends {
    include_path: Vec<String>,
    pp_defs: BTreeSet<String>,
    compiler_id: String,
    smod_sep: String,
    smod_ext: String,
    target_dir: String,
    module_dir: String,
    linked_dirs: Vec<String>,
    /// One entry per object file, keyed by object path.
    object_info: BTreeMap<String, SourceInfo>,
    /// Modules provided by any source in this target.
    target_provides: BTreeSet<String>,
    /// Required module name -> stamp location, empty until resolved.
    target_requires: BTreeMap<String, String>,
    verbose: bool,
}

impl FortranDepends {
    pub fn new(info: &DependInfo, verbose: bool) -> Self {
        Self {
            include_path: info.include_path.clone(),
            pp_defs: info.pp_definitions(),
            compiler_id: info.compiler_id.clone(),
            smod_sep: info.submodule_sep.clone(),
            smod_ext: info.submodule_ext.clone(),
            target_dir: info.target_dir.clone(),
            module_dir: info.module_dir().to_string(),
            linked_dirs: info.linked_dirs.clone(),
            object_info: BTreeMap::new(),
            target_provides: BTreeSet::new(),
            target_requires: BTreeMap::new(),
            verbose,
        }
    }

    /// Phase 1: parse each source feeding one object. A parse failure is
    /// reported and poisons the aggregate result, but the remaining
    /// sources are still scanned so partial information gets written.
    pub fn parse_sources(&mut self, sources: &BTreeSet<String>, obj: &str) -> bool {
        if sources.is_empty() || obj.is_empty() {
            eprintln!("{} Cannot scan dependencies without a source and object file.", "x".red());
            return false;
        }
        let mut okay = true;
        for src in sources {
            let info = self
                .object_info
                .entry(obj.to_string())
                .or_insert_with(|| SourceInfo {
                    source: src.clone(),
                    ..Default::default()
                });
            let mut parser = parser::FortranParser::new(
                &self.include_path,
                self.pp_defs.clone(),
                &self.smod_sep,
                &self.smod_ext,
                info,
            );
            if let Err(err) = parser.parse_file(src) {
                okay = false;
                eprintln!(
                    "{} Failed to parse dependencies from Fortran source '{src}': {err:#}",
                    "!".yellow()
                );
            }
        }
        okay
    }

    /// Phase 2: resolve modules across sources and targets, then write
    /// all dependency output plus this target's provides manifest.
    pub fn finalize<W1: Write, W2: Write>(
        &mut self,
        make_out: &mut W1,
        internal_out: &mut W2,
    ) -> Result<()> {
        self.locate_modules()?;

        for (obj, info) in &self.object_info {
            self.write_object(obj, info, make_out, internal_out)?;
        }

        let manifest = crate::join_path(&self.target_dir, PROVIDES_MANIFEST);
        let mut out = fs::File::create(Path::new(&manifest))
            .with_context(|| format!("Cannot write provides manifest \"{manifest}\""))?;
        writeln!(out, "# The fortran modules provided by this target.")?;
        writeln!(out, "provides")?;
        for name in &self.target_provides {
            writeln!(out, " {name}")?;
        }
        Ok(())
    }

    fn locate_modules(&mut self) -> Result<()> {
        for info in self.object_info.values() {
            self.target_provides.extend(info.provides.iter().cloned());
            for required in &info.requires {
                self.target_requires.entry(required.clone()).or_default();
            }
        }
        if self.target_requires.is_empty() {
            return Ok(());
        }

        // Local modules win over anything a linked target provides.
        self.match_local_modules();

        let linked = self.linked_dirs.clone();
        for dir in linked {
            let manifest = crate::join_path(&dir, PROVIDES_MANIFEST);
            let file = fs::File::open(Path::new(&manifest)).with_context(|| {
                format!("Failed to open \"{manifest}\" for module information")
            })?;
            self.match_remote_modules(BufReader::new(file), &dir);
        }
        Ok(())
    }

    fn match_local_modules(&mut self) {
        let stamp_dir = self.target_dir.clone();
        for name in self.target_provides.clone() {
            self.consider_module(&name, &stamp_dir);
        }
    }

    fn match_remote_modules<R: BufRead>(&mut self, reader: R, stamp_dir: &str) {
        let mut doing_provides = false;
        for line in reader.lines().map_while(|l| l.ok()) {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix(' ') {
                if doing_provides {
                    let mut name = name.to_string();
                    if !has_module_ext(&name) {
                        // Manifests from older versions list bare names.
                        name.push_str(".mod");
                    }
                    self.consider_module(&name, stamp_dir);
                }
            } else {
                doing_provides = line == "provides";
            }
        }
    }

    /// Bind a provided module to its stamp file for any still-unresolved
    /// requirement of that name. First binding wins, which is what makes
    /// local providers take precedence over remote ones.
    fn consider_module(&mut self, name: &str, stamp_dir: &str) {
        if let Some(location) = self.target_requires.get_mut(name)
            && location.is_empty()
        {
            *location = crate::join_path(stamp_dir, &format!("{name}.stamp"));
        }
    }

    fn write_object<W1: Write, W2: Write>(
        &self,
        obj: &str,
        info: &SourceInfo,
        make_out: &mut W1,
        internal_out: &mut W2,
    ) -> Result<()> {
        writer::write_internal(
            internal_out,
            obj,
            std::iter::once(&info.source).chain(info.includes.iter()),
        )?;
        writer::write_rules(make_out, obj, &info.includes)?;

        let obj_m = writer::make_path(obj);
        for required in &info.requires {
            // A module both used and defined by this source needs no
            // edge onto itself.
            if info.provides.contains(required) {
                continue;
            }
            match self.target_requires.get(required) {
                Some(location) if !location.is_empty() => {
                    // Provided by this target or a linked one; depend on
                    // the interface stamp.
                    writeln!(make_out, "{obj_m}: {}", writer::make_path(location))?;
                }
                _ => {
                    // Unknown to the build. Depend on the module file
                    // where the compiler would find it, if anywhere.
                    if let Some(found) = self.find_module(required) {
                        writeln!(make_out, "{obj_m}: {}", writer::make_path(&found))?;
                    } else if self.verbose {
                        println!(
                            "{} Module \"{required}\" is not provided by any target; no dependency recorded.",
                            "ℹ".blue()
                        );
                    }
                }
            }
        }

        if !info.provides.is_empty() {
            for provided in &info.provides {
                let mod_file = crate::join_path(&self.module_dir, provided);
                let stamp =
                    crate::join_path(&self.target_dir, &format!("{provided}.stamp"));
                let stamp_m = writer::make_path(&stamp);
                writeln!(make_out, "{obj_m}.provides.build: {stamp_m}")?;
                // The stamp is refreshed only when the module interface
                // changed, so this rule re-fires on builds where the
                // interface stayed put. Accepted cost of avoiding
                // recursive make.
                writeln!(make_out, "{stamp_m}: {obj_m}")?;
                write!(
                    make_out,
                    "\t$(DEPSCAN) copy-mod {} {stamp_m}",
                    writer::make_path(&mod_file)
                )?;
                if !self.compiler_id.is_empty() {
                    write!(make_out, " {}", self.compiler_id)?;
                }
                writeln!(make_out)?;
            }
            writeln!(make_out, "{obj_m}.provides.build:")?;
            writeln!(make_out, "\t@touch {obj_m}.provides.build")?;
            // The target driver waits on the proxy so stamps are in
            // place before the target is considered built.
            let driver = crate::join_path(&self.target_dir, "build");
            writeln!(
                make_out,
                "{}: {obj_m}.provides.build",
                writer::make_path(&driver)
            )?;
            writeln!(make_out)?;
        }
        Ok(())
    }

    /// Best-effort search for a module file the compiler would see,
    /// trying the lower-case then upper-case spelling in each include
    /// directory.
    fn find_module(&self, name: &str) -> Option<String> {
        let (upper, lower) = module_upper_lower(name);
        for ip in &self.include_path {
            let candidate = crate::join_path(ip, &lower);
            if crate::file_exists(&candidate) {
                return Some(candidate);
            }
            let candidate = crate::join_path(ip, &upper);
            if crate::file_exists(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

fn has_module_ext(name: &str) -> bool {
    name.ends_with(".mod") || name.ends_with(".smod") || name.ends_with(".sub")
}

/// Upper- and lower-case spellings of a module file name; the extension
/// is never case-folded.
fn module_upper_lower(name: &str) -> (String, String) {
    let ext_len = if name.ends_with(".smod") {
        5
    } else if name.ends_with(".mod") || name.ends_with(".sub") {
        4
    } else {
        0
    };
    let (stem, ext) = name.split_at(name.len() - ext_len);
    (
        format!("{}{ext}", stem.to_uppercase()),
        name.to_string(),
    )
}

/// Implements the `copy-mod` step scheduled by the rules above: copy the
/// compiler's module file over the stamp, but only when the interface
/// changed, so downstream objects are not rebuilt for nothing. The
/// module file's case depends on the compiler; both spellings are tried.
pub fn copy_module(module: &str, stamp: &str, compiler_id: &str) -> Result<()> {
    let mut module = module.to_string();
    if !has_module_ext(&module) {
        // Rule files from older versions omit the extension.
        module.push_str(".mod");
    }
    let dir = crate::parent_dir(&module);
    let name = module.rsplit('/').next().unwrap_or(&module).to_string();
    let (upper, lower) = module_upper_lower(&name);
    let compiler = FortranCompiler::from_id(compiler_id);

    for candidate in [crate::join_path(&dir, &upper), crate::join_path(&dir, &lower)] {
        if crate::file_exists(&candidate) {
            if modules_differ(&candidate, stamp, compiler) {
                fs::copy(Path::new(&candidate), Path::new(stamp)).with_context(|| {
                    format!("Error copying Fortran module from \"{candidate}\" to \"{stamp}\"")
                })?;
            }
            return Ok(());
        }
    }
    bail!(
        "Error copying Fortran module \"{module}\". Tried \"{}\" and \"{}\".",
        crate::join_path(&dir, &upper),
        crate::join_path(&dir, &lower)
    );
}
