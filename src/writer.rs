//! Serialization of dependency sets.
//!
//! Two streams are produced per scan: the make-consumable rule file
//! (`depend.make`) and the internal record (`depend.internal`) that only
//! this crate reads back on the next run for its staleness check. No
//! resolution happens here.

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Escape a path for use in a make rule.
pub fn make_path(path: &str) -> String {
    if path.contains(' ') {
        path.replace(' ', "\\ ")
    } else {
        path.to_string()
    }
}

/// One `object: dependency` line per edge, blank line after the stanza.
pub fn write_rules<W: Write, S: AsRef<str>>(
    out: &mut W,
    object: &str,
    deps: impl IntoIterator<Item = S>,
) -> io::Result<()> {
    let obj_m = make_path(object);
    let mut any = false;
    for dep in deps {
        writeln!(out, "{obj_m}: {}", make_path(dep.as_ref()))?;
        any = true;
    }
    if any {
        writeln!(out)?;
    }
    Ok(())
}

/// The object path, then one space-prefixed dependency per line, blank
/// line terminated. Paths are written verbatim so the record can be
/// compared against the filesystem next run.
pub fn write_internal<W: Write, S: AsRef<str>>(
    out: &mut W,
    object: &str,
    deps: impl IntoIterator<Item = S>,
) -> io::Result<()> {
    writeln!(out, "{object}")?;
    for dep in deps {
        writeln!(out, " {}", dep.as_ref())?;
    }
    writeln!(out)?;
    Ok(())
}

/// Replace `path` with `contents` through a temporary sibling and a
/// rename, so a concurrent reader never observes a half-written file.
pub fn commit(path: &str, contents: &[u8]) -> Result<()> {
    let tmp = format!("{path}.tmp");
    fs::write(Path::new(&tmp), contents)
        .with_context(|| format!("Cannot write \"{tmp}\""))?;
    fs::rename(Path::new(&tmp), Path::new(path))
        .with_context(|| format!("Cannot rename \"{tmp}\" to \"{path}\""))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_stanza() {
        let mut buf = Vec::new();
        write_rules(&mut buf, "main.o", ["a.h", "/inc/b.h"]).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "main.o: a.h\nmain.o: /inc/b.h\n\n"
        );
    }

    #[test]
    fn test_empty_dependency_set_writes_no_rules() {
        let mut buf = Vec::new();
        write_rules(&mut buf, "main.o", Vec::<String>::new()).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_internal_record() {
        let mut buf = Vec::new();
        write_internal(&mut buf, "main.o", ["a.h"]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "main.o\n a.h\n\n");
    }

    #[test]
    fn test_make_path_escapes_spaces() {
        assert_eq!(make_path("my lib/a.h"), "my\\ lib/a.h");
        assert_eq!(make_path("plain.h"), "plain.h");
    }

    #[test]
    fn test_commit_replaces_file_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("depend.make");
        fs::write(&target, "stale\n").unwrap();

        let path = target.display().to_string();
        commit(&path, b"main.o: a.h\n\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "main.o: a.h\n\n");
        assert!(!dir.path().join("depend.make.tmp").exists());
    }
}
