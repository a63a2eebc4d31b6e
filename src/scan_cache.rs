//! Per-file scan cache persisted across runs (`<lang>.includecache`).
//!
//! The cache remembers, for every file scanned in a previous run, the list
//! of references it contained, so unchanged files are never re-opened.
//! Staleness is decided purely by timestamps: an entry survives only if
//! the cache file itself is newer than the file it describes.
//!
//! Format: four regex marker lines, then blank-line separated records.
//! A record is the absolute path of the scanned file followed by pairs of
//! lines per reference: the name as written, then its quote-resolved
//! location or `-`.

use crate::filetime::FileTimeCache;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

const LINE_MARKER: &str = "#IncludeRegexLine: ";
const SCAN_MARKER: &str = "#IncludeRegexScan: ";
const COMPLAIN_MARKER: &str = "#IncludeRegexComplain: ";
// Include transforms are not implemented; the marker is kept so cache
// files round-trip against tools that expect all four headers.
const TRANSFORM_MARKER: &str = "#IncludeRegexTransform: ";

/// One pending include reference, exactly as written in the directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnscannedEntry {
    pub file_name: String,
    /// For quote-style includes, the name joined onto the including
    /// file's directory. Empty for angle-bracket includes.
    pub quoted_location: String,
}

#[derive(Debug, Default)]
pub struct IncludeLines {
    /// Set when the entry was referenced during the current run. Unused
    /// entries are dropped at save time, so an entry survives exactly one
    /// run past its last use.
    pub used: bool,
    pub entries: Vec<UnscannedEntry>,
}

pub struct IncludeCache {
    path: String,
    line_marker: String,
    scan_marker: String,
    complain_marker: String,
    transform_marker: String,
    files: HashMap<String, IncludeLines>,
}

impl IncludeCache {
    pub fn new(path: &str, scan_regex: &str, complain_regex: &str) -> Self {
        Self {
            path: path.to_string(),
            line_marker: format!("{LINE_MARKER}{}", crate::scanner::INCLUDE_REGEX_LINE),
            scan_marker: format!("{SCAN_MARKER}{scan_regex}"),
            complain_marker: format!("{COMPLAIN_MARKER}{complain_regex}"),
            transform_marker: TRANSFORM_MARKER.to_string(),
            files: HashMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&IncludeLines> {
        self.files.get(path)
    }

    pub fn mark_used(&mut self, path: &str) {
        if let Some(entry) = self.files.get_mut(path) {
            entry.used = true;
        }
    }

    /// Create a fresh, used entry for a file about to be scanned.
    pub fn insert(&mut self, path: &str, entries: Vec<UnscannedEntry>) {
        self.files.insert(
            path.to_string(),
            IncludeLines { used: true, entries },
        );
    }

    /// Populate the map from the persisted cache, best effort. A record
    /// is kept only when the cache file's own mtime is newer than the
    /// recorded file's mtime; a regex marker that does not match the
    /// current configuration aborts the whole load, since every cached
    /// reference list would have been produced by different patterns.
    pub fn load(&mut self, times: &mut FileTimeCache) {
        let Ok(file) = fs::File::open(Path::new(&self.path)) else {
            return;
        };
        let cache_time_good = times.load(&self.path).is_ok();

        let mut current: Option<String> = None;
        let mut have_file_name = false;
        let mut lines = BufReader::new(file).lines().map_while(|l| l.ok());
        while let Some(line) = lines.next() {
            if line.is_empty() {
                current = None;
                have_file_name = false;
                continue;
            }
            if !have_file_name {
                have_file_name = true;
                let newer = cache_time_good
                    && times.newer(&self.path, &line).unwrap_or(false);
                if newer {
                    current = Some(line);
                    self.files.entry(current.clone().unwrap()).or_default();
                } else if times.load(&line).is_err() {
                    // Not an existing file; must be one of the marker
                    // headers. Reject the cache if the patterns changed.
                    let expected = if line.starts_with(LINE_MARKER) {
                        Some(&self.line_marker)
                    } else if line.starts_with(SCAN_MARKER) {
                        Some(&self.scan_marker)
                    } else if line.starts_with(COMPLAIN_MARKER) {
                        Some(&self.complain_marker)
                    } else if line.starts_with(TRANSFORM_MARKER) {
                        Some(&self.transform_marker)
                    } else {
                        None
                    };
                    if let Some(expected) = expected
                        && line != *expected
                    {
                        self.files.clear();
                        return;
                    }
                }
            } else if let Some(ref path) = current {
                let file_name = line;
                if let Some(loc) = lines.next() {
                    let quoted_location = if loc == "-" { String::new() } else { loc };
                    self.files
                        .get_mut(path)
                        .expect("current entry exists")
                        .entries
                        .push(UnscannedEntry {
                            file_name,
                            quoted_location,
                        });
                }
            }
        }
    }

    /// Write back every entry whose `used` flag was set this run.
    pub fn save(&self) -> Result<()> {
        let mut out = fs::File::create(Path::new(&self.path))
            .with_context(|| format!("Cannot write include cache \"{}\"", self.path))?;
        writeln!(out, "{}\n", self.line_marker)?;
        writeln!(out, "{}\n", self.scan_marker)?;
        writeln!(out, "{}\n", self.complain_marker)?;
        writeln!(out, "{}\n", self.transform_marker)?;

        let mut paths: Vec<&String> = self
            .files
            .iter()
            .filter(|(_, v)| v.used)
            .map(|(k, _)| k)
            .collect();
        paths.sort();
        for path in paths {
            writeln!(out, "{path}")?;
            for entry in &self.files[path].entries {
                writeln!(out, "{}", entry.file_name)?;
                if entry.quoted_location.is_empty() {
                    writeln!(out, "-")?;
                } else {
                    writeln!(out, "{}", entry.quoted_location)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn entry(name: &str, loc: &str) -> UnscannedEntry {
        UnscannedEntry {
            file_name: name.to_string(),
            quoted_location: loc.to_string(),
        }
    }

    /// Push a file's mtime safely into the past so "strictly newer"
    /// comparisons never hinge on filesystem timestamp resolution.
    fn backdate(path: &Path) {
        let past = SystemTime::now() - Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(past)
            .unwrap();
    }

    #[test]
    fn test_round_trip_used_entries() {
        let dir = tempfile::tempdir().unwrap();
        let scanned = dir.path().join("a.h");
        fs::write(&scanned, "#include <b.h>\n").unwrap();
        backdate(&scanned);
        let cache_path = dir.path().join("C.includecache");

        let mut cache = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        cache.insert(
            scanned.to_str().unwrap(),
            vec![entry("b.h", ""), entry("c.h", "/proj/c.h")],
        );
        cache.save().unwrap();

        // The cache file was written after a.h, so the record survives.
        let mut reloaded = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        reloaded.load(&mut FileTimeCache::new());
        let lines = reloaded.get(scanned.to_str().unwrap()).unwrap();
        assert!(!lines.used);
        assert_eq!(lines.entries, vec![entry("b.h", ""), entry("c.h", "/proj/c.h")]);
    }

    #[test]
    fn test_stale_entry_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let scanned = dir.path().join("a.h");
        fs::write(&scanned, "#include <b.h>\n").unwrap();
        let cache_path = dir.path().join("C.includecache");

        let mut cache = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        cache.insert(scanned.to_str().unwrap(), vec![entry("b.h", "")]);
        cache.save().unwrap();

        // Backdate the cache file so a.h appears to have changed since.
        backdate(&cache_path);

        let mut reloaded = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        reloaded.load(&mut FileTimeCache::new());
        assert!(reloaded.get(scanned.to_str().unwrap()).is_none());
    }

    #[test]
    fn test_unused_entries_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let scanned = dir.path().join("a.h");
        fs::write(&scanned, "").unwrap();
        backdate(&scanned);
        let cache_path = dir.path().join("C.includecache");

        let mut cache = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        cache.insert(scanned.to_str().unwrap(), vec![entry("b.h", "")]);
        cache.save().unwrap();

        let mut second = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        second.load(&mut FileTimeCache::new());
        assert!(second.get(scanned.to_str().unwrap()).is_some());
        // Never marked used this run, so the rewrite drops it.
        second.save().unwrap();

        let mut third = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        third.load(&mut FileTimeCache::new());
        assert!(third.get(scanned.to_str().unwrap()).is_none());
    }

    #[test]
    fn test_changed_scan_regex_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("C.includecache");

        let scanned = dir.path().join("a.h");
        fs::write(&scanned, "").unwrap();
        let mut cache = IncludeCache::new(cache_path.to_str().unwrap(), "^.*$", "^$");
        cache.insert(scanned.to_str().unwrap(), vec![entry("b.h", "")]);
        cache.save().unwrap();

        let mut reloaded = IncludeCache::new(cache_path.to_str().unwrap(), "^z.*$", "^$");
        reloaded.load(&mut FileTimeCache::new());
        assert!(reloaded.files.is_empty());
    }
}
