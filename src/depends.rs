//! Language dispatch and staleness checking.
//!
//! One scanner instance exists per (target, language) invocation. The
//! language variants are a closed set behind a tagged enum; the Java
//! variant is a stub that writes nothing.
//!
//! Staleness checking reads the internal record written by the previous
//! run and is deliberately conservative: any parse problem, missing
//! dependee or out-of-date depender discards the record and forces a
//! rescan.

use crate::c::CDepends;
use crate::config::DependInfo;
use crate::filetime::FileTimeCache;
use crate::fortran::FortranDepends;
use anyhow::{Result, bail};
use colored::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Dependees recorded for each depender that survived the staleness
/// check. Consumed by the C walker to skip re-walking valid objects.
pub type DependencyMap = HashMap<String, Vec<String>>;

pub enum DependencyScanner {
    C(CDepends),
    Fortran(FortranDepends),
    /// Recognized but not scanned; class files carry their own deps.
    Java,
}

impl DependencyScanner {
    pub fn new(info: &DependInfo, valid_deps: DependencyMap, verbose: bool) -> Result<Self> {
        match info.language.as_str() {
            "C" | "CXX" => Ok(Self::C(CDepends::new(info, valid_deps, verbose)?)),
            "Fortran" => Ok(Self::Fortran(FortranDepends::new(info, verbose))),
            "Java" => Ok(Self::Java),
            other => bail!("No dependency scanner for language \"{other}\""),
        }
    }

    /// Scan every (source, object) pair and write both output streams.
    ///
    /// Returns `Ok(false)` when some Fortran source failed to parse but
    /// partial output was still written; hard failures (missing required
    /// header, unreadable manifest) return `Err` and the outputs must not
    /// be trusted.
    pub fn write<W1: Write, W2: Write>(
        &mut self,
        info: &DependInfo,
        make_out: &mut W1,
        internal_out: &mut W2,
    ) -> Result<bool> {
        let mut by_object: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for pair in &info.sources {
            by_object
                .entry(pair.obj.clone())
                .or_default()
                .insert(pair.src.clone());
        }

        let mut okay = true;
        for (obj, sources) in &by_object {
            match self {
                Self::C(c) => c.write_dependencies(sources, obj, make_out, internal_out)?,
                Self::Fortran(f) => {
                    if !f.parse_sources(sources, obj) {
                        okay = false;
                    }
                }
                Self::Java => {}
            }
        }

        match self {
            Self::C(c) => c.save_cache()?,
            Self::Fortran(f) => f.finalize(make_out, internal_out)?,
            Self::Java => {}
        }
        Ok(okay)
    }
}

/// Validate the previous run's record. Returns the surviving per-object
/// dependency lists and whether the record as a whole was still valid;
/// when it was not, both output files are cleared so the next build
/// cannot trust them.
pub fn check(
    make_path: &str,
    internal_path: &str,
    verbose: bool,
) -> Result<(bool, DependencyMap)> {
    let mut valid = DependencyMap::new();
    let okay = match fs::File::open(Path::new(internal_path)) {
        Ok(file) => check_dependencies(
            BufReader::new(file),
            internal_path,
            &mut valid,
            verbose,
        ),
        Err(_) => false,
    };
    if !okay {
        clear(make_path, verbose)?;
        let _ = fs::remove_file(Path::new(internal_path));
    }
    Ok((okay, valid))
}

/// Replace the rule file with an empty placeholder.
pub fn clear(make_path: &str, verbose: bool) -> Result<()> {
    if verbose {
        println!("{} Clearing dependencies in \"{make_path}\".", "ℹ".blue());
    }
    fs::write(
        Path::new(make_path),
        "# Empty dependencies file\n# This may be replaced when dependencies are built.\n",
    )?;
    Ok(())
}

/// Parse the internal record and decide whether dependencies must be
/// regenerated:
/// * a dependee does not exist, or
/// * the depender exists and is older than a dependee, or
/// * the depender does not exist and a dependee is newer than the
///   record file itself.
///
/// Stale dependers are removed from `valid` and their object files are
/// deleted so they are certain to rebuild.
fn check_dependencies<R: BufRead>(
    reader: R,
    internal_path: &str,
    valid: &mut DependencyMap,
    verbose: bool,
) -> bool {
    let mut times = FileTimeCache::new();
    let mut okay = true;
    let mut depender = String::new();
    let mut depender_exists = false;
    let mut tracking = false;

    for line in reader.lines().map_while(|l| l.ok()) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with(' ') {
            depender = line.to_string();
            // Checking existence once per depender halves the stat count
            // versus checking inside the dependee loop.
            depender_exists = crate::file_exists(&depender);
            // Appending instead of replacing keeps dependees from earlier
            // records when a depender appears more than once.
            valid.entry(depender.clone()).or_default();
            tracking = true;
            continue;
        }

        let dependee = &line[1..];
        if tracking {
            valid
                .get_mut(&depender)
                .expect("depender entry exists")
                .push(dependee.to_string());
        }

        let mut regenerate = false;
        if !crate::file_exists(dependee) {
            regenerate = true;
            if verbose {
                println!(
                    "{} Dependee \"{dependee}\" does not exist for depender \"{depender}\".",
                    "ℹ".blue()
                );
            }
        } else if depender_exists {
            let out_of_date = !matches!(
                times.compare(&depender, dependee),
                Ok(Ordering::Greater) | Ok(Ordering::Equal)
            );
            if out_of_date {
                regenerate = true;
                if verbose {
                    println!(
                        "{} Dependee \"{dependee}\" is newer than depender \"{depender}\".",
                        "ℹ".blue()
                    );
                }
            }
        } else {
            let out_of_date = !matches!(
                times.compare(internal_path, dependee),
                Ok(Ordering::Greater) | Ok(Ordering::Equal)
            );
            if out_of_date {
                regenerate = true;
                if verbose {
                    println!(
                        "{} Dependee \"{dependee}\" is newer than depends file \"{internal_path}\".",
                        "ℹ".blue()
                    );
                }
            }
        }

        if regenerate {
            okay = false;
            if tracking {
                valid.remove(&depender);
                tracking = false;
            }
            if depender_exists {
                let _ = fs::remove_file(Path::new(&depender));
                depender_exists = false;
            }
        }
    }
    okay
}
