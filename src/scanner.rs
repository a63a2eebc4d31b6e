//! Line-oriented `#include` scanning.
//!
//! A single fixed pattern recognizes `#`/`%` directives (`include` and
//! `import`) and captures the referenced name plus its closing delimiter.
//! No preprocessing is performed: every directive is taken unconditionally,
//! even inside `#if 0`. Over-declaring a dependency can only cause an
//! extra rebuild, never a missed one.

use crate::scan_cache::UnscannedEntry;
use anyhow::{Context, Result};
use regex::Regex;
use std::io::BufRead;

/// Pattern matched against each source line.
pub const INCLUDE_REGEX_LINE: &str =
    r#"^[ \t]*[#%][ \t]*(include|import)[ \t]*[<"]([^">]+)([">])"#;

pub struct IncludeScanner {
    line_re: Regex,
    scan_re: Regex,
}

impl IncludeScanner {
    /// `scan_regex` decides which referenced names are traversed
    /// transitively. Names that do not match are still recorded as
    /// dependency edges but their contents are never opened.
    pub fn new(scan_regex: &str) -> Result<Self> {
        Ok(Self {
            line_re: Regex::new(INCLUDE_REGEX_LINE).expect("include line pattern is valid"),
            scan_re: Regex::new(scan_regex)
                .with_context(|| format!("Invalid scan regex \"{scan_regex}\""))?,
        })
    }

    pub fn should_recurse(&self, name: &str) -> bool {
        self.scan_re.is_match(name)
    }

    /// Scan one open text stream. `directory` is the directory containing
    /// the file being scanned; quote-style includes with relative names get
    /// it joined in as their `quoted_location`.
    ///
    /// Lines are read as raw bytes and decoded lossily, so a stray
    /// non-UTF-8 line (a Latin-1 comment, say) cannot cut the scan short
    /// and hide the directives after it.
    ///
    /// The returned sequence is lazy, finite and not restartable.
    pub fn scan<'a, R: BufRead + 'a>(
        &'a self,
        mut reader: R,
        directory: &'a str,
    ) -> impl Iterator<Item = UnscannedEntry> + 'a {
        let mut buf = Vec::new();
        std::iter::from_fn(move || loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    if let Some(entry) =
                        self.match_line(line.trim_end_matches(['\n', '\r']), directory)
                    {
                        return Some(entry);
                    }
                }
            }
        })
    }

    fn match_line(&self, line: &str, directory: &str) -> Option<UnscannedEntry> {
        let caps = self.line_re.captures(line)?;
        let mut entry = UnscannedEntry {
            file_name: caps[2].replace('\\', "/"),
            quoted_location: String::new(),
        };
        if &caps[3] == "\"" && !crate::is_full_path(&entry.file_name) {
            // Double-quoted include with a relative path. The directory
            // containing the including file is searched first.
            entry.quoted_location = crate::join_path(directory, &entry.file_name);
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn scan_all(src: &str) -> Vec<UnscannedEntry> {
        let scanner = IncludeScanner::new("^.*$").unwrap();
        scanner.scan(Cursor::new(src.to_string()), "/proj/src").collect()
    }

    #[test]
    fn test_angle_and_quote_includes() {
        let entries = scan_all("#include <stdio.h>\n#include \"util.h\"\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name, "stdio.h");
        assert_eq!(entries[0].quoted_location, "");
        assert_eq!(entries[1].file_name, "util.h");
        assert_eq!(entries[1].quoted_location, "/proj/src/util.h");
    }

    #[test]
    fn test_whitespace_and_import_forms() {
        let entries = scan_all("  #  include   <a.h>\n%include \"b.h\"\n#import <c.h>\n");
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.h", "b.h", "c.h"]);
    }

    #[test]
    fn test_conditionals_are_not_evaluated() {
        let entries = scan_all("#if 0\n#include \"never.h\"\n#endif\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "never.h");
    }

    #[test]
    fn test_non_utf8_line_does_not_stop_scan() {
        let scanner = IncludeScanner::new("^.*$").unwrap();
        let mut source = b"#include \"first.h\"\n".to_vec();
        source.extend_from_slice(b"/* caf\xe9 */\n");
        source.extend_from_slice(b"#include \"real.h\"\n");
        let names: Vec<_> = scanner
            .scan(Cursor::new(source), "/proj/src")
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["first.h", "real.h"]);
    }

    #[test]
    fn test_non_directive_lines_ignored() {
        let entries = scan_all("int x; // #include <fake.h>\ninclude <no_hash.h>\n");
        assert!(entries.is_empty());
    }

    #[test]
    fn test_absolute_quoted_include_keeps_no_location() {
        let entries = scan_all("#include \"/abs/path.h\"\n");
        assert_eq!(entries[0].file_name, "/abs/path.h");
        assert_eq!(entries[0].quoted_location, "");
    }

    #[test]
    fn test_recurse_filter() {
        let scanner = IncludeScanner::new(r"^z").unwrap();
        assert!(scanner.should_recurse("zlib.h"));
        assert!(!scanner.should_recurse("stdio.h"));
    }
}
