//! C/C++ include-graph walker.
//!
//! Breadth-first worklist traversal over the textual include graph of one
//! translation unit. Each reference is resolved against quote-relative
//! and include-path rules, the per-file scan cache is consulted before
//! any file is opened, and the flattened result is serialized through
//! [`crate::writer`].

use crate::config::DependInfo;
use crate::depends::DependencyMap;
use crate::filetime::FileTimeCache;
use crate::scan_cache::{IncludeCache, UnscannedEntry};
use crate::scanner::IncludeScanner;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::io::{BufReader, Write};
use std::path::Path;

pub struct CDepends {
    include_path: Vec<String>,
    scanner: IncludeScanner,
    complain_re: Regex,
    generated: BTreeSet<String>,
    cache: IncludeCache,
    /// Dependencies validated by the staleness check; objects found here
    /// skip the walk entirely.
    valid_deps: DependencyMap,
    /// Resolved locations memoized per instance, since the same header
    /// name is typically included from many files.
    header_locations: HashMap<String, String>,
    verbose: bool,
}

impl CDepends {
    pub fn new(info: &DependInfo, valid_deps: DependencyMap, verbose: bool) -> Result<Self> {
        let cache_path = crate::join_path(
            &info.target_dir,
            &format!("{}.includecache", info.language),
        );
        let mut cache = IncludeCache::new(&cache_path, &info.scan_regex, &info.complain_regex);
        let mut times = FileTimeCache::new();
        cache.load(&mut times);

        Ok(Self {
            include_path: info.include_path.clone(),
            scanner: IncludeScanner::new(&info.scan_regex)?,
            complain_re: Regex::new(&info.complain_regex)
                .with_context(|| format!("Invalid complain regex \"{}\"", info.complain_regex))?,
            generated: info.generated.iter().cloned().collect(),
            cache,
            valid_deps,
            header_locations: HashMap::new(),
            verbose,
        })
    }

    /// Walk the include graph starting from `sources` and write one rule
    /// stanza plus one internal record for `obj`.
    pub fn write_dependencies<W1: Write, W2: Write>(
        &mut self,
        sources: &BTreeSet<String>,
        obj: &str,
        make_out: &mut W1,
        internal_out: &mut W2,
    ) -> Result<()> {
        if sources.is_empty() || sources.iter().next().is_none_or(|s| s.is_empty()) {
            bail!("Cannot scan dependencies without a source file.");
        }
        if obj.is_empty() {
            bail!("Cannot scan dependencies without an object file.");
        }

        let dependencies = match self.valid_deps.get(obj) {
            Some(prior) => {
                if self.verbose {
                    println!("Reusing {} valid dependencies for \"{obj}\".", prior.len());
                }
                prior.iter().cloned().collect()
            }
            None => self.walk(sources)?,
        };

        crate::writer::write_rules(make_out, obj, &dependencies)?;
        crate::writer::write_internal(internal_out, obj, &dependencies)?;
        Ok(())
    }

    /// Persist the scan cache for the next run. Entries never marked used
    /// during this run are dropped.
    pub fn save_cache(&self) -> Result<()> {
        self.cache.save()
    }

    fn walk(&mut self, sources: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        // Fresh traversal context per invocation.
        let mut unscanned: VecDeque<UnscannedEntry> = VecDeque::new();
        let mut encountered: HashSet<String> = HashSet::new();
        let mut scanned: HashSet<String> = HashSet::new();
        let mut dependencies = BTreeSet::new();

        // The starting sources are literal paths, never subject to the
        // include-path search.
        let mut src_files = sources.len();
        for src in sources {
            encountered.insert(src.clone());
            unscanned.push_back(UnscannedEntry {
                file_name: src.clone(),
                quoted_location: String::new(),
            });
        }

        while let Some(current) = unscanned.pop_front() {
            let full_name = self.resolve(&current, src_files > 0);
            src_files = src_files.saturating_sub(1);

            let Some(full_name) = full_name else {
                if self.complain_re.is_match(&current.file_name) {
                    bail!("Cannot find file \"{}\".", current.file_name);
                }
                // Optional or external header; drop the edge silently.
                continue;
            };

            if !scanned.insert(full_name.clone()) {
                continue;
            }
            dependencies.insert(full_name.clone());

            if !crate::file_exists(&full_name) {
                // A known generated file not produced yet. Resolved and
                // counted as a dependency, but there is nothing to scan.
                continue;
            }

            if self.cache.get(&full_name).is_some() {
                self.cache.mark_used(&full_name);
                let entries = self
                    .cache
                    .get(&full_name)
                    .expect("entry just found")
                    .entries
                    .clone();
                self.enqueue(entries, &mut unscanned, &mut encountered);
            } else if let Ok(file) = fs::File::open(Path::new(&full_name)) {
                let dir = crate::parent_dir(&full_name);
                let entries: Vec<UnscannedEntry> =
                    self.scanner.scan(BufReader::new(file), &dir).collect();
                self.cache.insert(&full_name, entries.clone());
                self.enqueue(entries, &mut unscanned, &mut encountered);
            } else {
                // Unreadable file; leave it as a bare dependency edge.
            }
        }

        Ok(dependencies)
    }

    /// Queue references not yet encountered in this invocation. The
    /// de-duplication key is the name as written in the directive, not
    /// the resolved path; see the note in `resolve`.
    fn enqueue(
        &self,
        entries: Vec<UnscannedEntry>,
        unscanned: &mut VecDeque<UnscannedEntry>,
        encountered: &mut HashSet<String>,
    ) {
        for entry in entries {
            if !self.scanner.should_recurse(&entry.file_name) {
                continue;
            }
            if encountered.insert(entry.file_name.clone()) {
                unscanned.push_back(entry);
            }
        }
    }

    /// Resolve one pending reference to a usable path.
    ///
    /// Order: literal path (for roots and absolute names), then the
    /// quote-style location, then each include-path entry in order. A
    /// path present in the generated-files set counts as existing even
    /// before the build produces it.
    ///
    /// Two different literal spellings of the same physical header can
    /// each be resolved and scanned once, since the encountered set is
    /// keyed by spelling. Accepted imprecision: the result is the same
    /// dependency set, at the cost of a redundant scan.
    fn resolve(&mut self, current: &UnscannedEntry, is_root: bool) -> Option<String> {
        if is_root || crate::is_full_path(&current.file_name) {
            if self.exists_or_generated(&current.file_name) {
                return Some(current.file_name.clone());
            }
            return None;
        }
        if !current.quoted_location.is_empty() && self.exists_or_generated(&current.quoted_location)
        {
            return Some(current.quoted_location.clone());
        }
        if let Some(found) = self.header_locations.get(&current.file_name) {
            return Some(found.clone());
        }
        for ip in &self.include_path {
            let candidate = crate::join_path(ip, &current.file_name);
            if self.exists_or_generated(&candidate) {
                self.header_locations
                    .insert(current.file_name.clone(), candidate.clone());
                return Some(candidate);
            }
        }
        None
    }

    /// Regular files only: a directory sharing an include's name must
    /// not resolve as a header.
    fn exists_or_generated(&self, path: &str) -> bool {
        crate::file_exists(path) || self.generated.contains(path)
    }
}
