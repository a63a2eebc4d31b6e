//! # depscan - Incremental Dependency Scanner
//!
//! depscan discovers, per object file, the transitive closure of files a
//! translation unit depends on (C/C++ headers, Fortran modules) and writes
//! make-consumable rebuild rules plus an internal record used for
//! staleness checking on the next run.
//!
//! ## Features
//!
//! - **Incremental**: per-file scan results are cached across runs keyed
//!   by modification time, so unchanged headers are never re-opened
//! - **C/C++**: breadth-first include-graph walk with quote-style
//!   resolution, generated-file awareness and configurable scan/complain
//!   patterns
//! - **Fortran**: statement-level parsing of `use`/`module`/`submodule`/
//!   `include` with preprocessor branch tracking, cross-target module
//!   resolution and interface-aware `.mod` diffing
//!
//! ## Quick Start
//!
//! ```bash
//! # Scan one target's sources
//! depscan scan --info build/dep/app/depend.toml
//!
//! # Copy a compiled module over its stamp only if the interface changed
//! depscan copy-mod build/mod/alpha.mod build/dep/app/alpha.mod.stamp GNU
//! ```
//!
//! ## Module Organization
//!
//! - [`depends`] - Language dispatch and staleness checking
//! - [`c`] - C/C++ include-graph walker
//! - [`fortran`] - Fortran parser, module resolver and `.mod` diffing
//! - [`scan_cache`] - Persistent per-file scan cache
//! - [`writer`] - Rule and internal-record serialization

/// C/C++ include-graph walker.
pub mod c;

/// Scan configuration parsing (`depend.toml`).
pub mod config;

/// Language dispatch, staleness checking and output clearing.
pub mod depends;

/// Modification-time comparison with per-run memoization.
pub mod filetime;

/// Fortran dependency walker, module resolver and `.mod` diffing.
pub mod fortran;

/// Persistent per-file scan cache.
pub mod scan_cache;

/// Line-oriented `#include` scanning.
pub mod scanner;

/// Rule and internal-record serialization.
pub mod writer;

use std::path::Path;

/// True for absolute paths, including Windows drive-letter spellings.
pub fn is_full_path(path: &str) -> bool {
    if Path::new(path).is_absolute() {
        return true;
    }
    let b = path.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// Join `name` onto `dir` with a forward slash. A bare `.` directory is
/// skipped so cache keys and rule paths avoid a leading `./`.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{}/{name}", dir.trim_end_matches('/'))
    }
}

/// True when `path` exists and is a regular file.
pub fn file_exists(path: &str) -> bool {
    Path::new(path).is_file()
}

/// Directory portion of `path`, empty when there is none.
pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}
