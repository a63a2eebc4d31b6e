//! Modification-time comparison with per-run memoization.
//!
//! During a dependency walk the same file is compared against many
//! dependers, so raw `stat` results are cached for the lifetime of one
//! `FileTimeCache`. The cache never persists across runs.

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

#[derive(Default)]
pub struct FileTimeCache {
    times: HashMap<String, SystemTime>,
}

impl FileTimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modification time of `path`, memoized per instance.
    ///
    /// Resolution is whatever the platform reports through
    /// `Metadata::modified()` (nanoseconds on Linux, coarser elsewhere).
    pub fn load(&mut self, path: &str) -> Result<SystemTime> {
        if let Some(t) = self.times.get(path) {
            return Ok(*t);
        }
        let mtime = fs::metadata(Path::new(path))
            .and_then(|m| m.modified())
            .with_context(|| format!("Cannot stat \"{path}\""))?;
        self.times.insert(path.to_string(), mtime);
        Ok(mtime)
    }

    /// Compare the modification times of two files: `Less` means `a` is
    /// older than `b`. Fails when either file cannot be stat'ed.
    pub fn compare(&mut self, a: &str, b: &str) -> Result<Ordering> {
        let ta = self.load(a)?;
        let tb = self.load(b)?;
        Ok(ta.cmp(&tb))
    }

    /// True when `a` was modified strictly after `b`.
    pub fn newer(&mut self, a: &str, b: &str) -> Result<bool> {
        Ok(self.compare(a, b)? == Ordering::Greater)
    }
}
