//! Compiler-aware `.mod` file comparison.
//!
//! Module file formats are compiler-proprietary and several embed a
//! compile timestamp, so a byte-for-byte comparison would report a
//! change on every recompile and cascade rebuilds through everything
//! that `use`s the module. Each known compiler family gets a strategy
//! that ignores the volatile preamble; anything unrecognized falls back
//! to whole-content comparison.

use colored::*;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FortranCompiler {
    /// gfortran. Before 4.9 the first line carries a date; 4.9+ emits
    /// gzip-compressed modules with no date at all.
    Gnu,
    /// ifort/ifx. Binary format; a version byte and a timestamped
    /// preamble end at the first `\n\0`.
    Intel,
    /// Produces byte-identical modules across repeated compiles.
    SunPro,
    Unknown,
}

impl FortranCompiler {
    pub fn from_id(id: &str) -> Self {
        match id {
            "GNU" => Self::Gnu,
            "Intel" | "IntelLLVM" => Self::Intel,
            "SunPro" => Self::SunPro,
            _ => Self::Unknown,
        }
    }
}

/// Decide whether the compiled module meaningfully differs from the
/// stamp copy. `true` means the stamp must be refreshed (and dependents
/// rebuilt). Missing files always differ.
pub fn modules_differ(mod_file: &str, stamp_file: &str, compiler: FortranCompiler) -> bool {
    let Ok(mod_bytes) = fs::read(Path::new(mod_file)) else {
        return true;
    };
    let Ok(stamp_bytes) = fs::read(Path::new(stamp_file)) else {
        return true;
    };

    match compiler {
        FortranCompiler::SunPro | FortranCompiler::Unknown => mod_bytes != stamp_bytes,
        FortranCompiler::Gnu => {
            if mod_bytes.starts_with(&[0x1f, 0x8b]) {
                // gzip'd module (GNU >= 4.9): content is stable, compare
                // whole files.
                return mod_bytes != stamp_bytes;
            }
            let Some(mod_rest) = skip_past(&mod_bytes, b"\n") else {
                eprintln!(
                    "{} GNU fortran module {mod_file} has unexpected format.",
                    "!".yellow()
                );
                return true;
            };
            let Some(stamp_rest) = skip_past(&stamp_bytes, b"\n") else {
                return true;
            };
            mod_rest != stamp_rest
        }
        FortranCompiler::Intel => {
            // Leading byte is a version number; the search below fails
            // anyway on a short file.
            let mod_tail = mod_bytes.get(1..).unwrap_or_default();
            let stamp_tail = stamp_bytes.get(1..).unwrap_or_default();
            let Some(mod_rest) = skip_past(mod_tail, b"\n\0") else {
                eprintln!(
                    "{} Intel fortran module {mod_file} has unexpected format.",
                    "!".yellow()
                );
                return true;
            };
            let Some(stamp_rest) = skip_past(stamp_tail, b"\n\0") else {
                return true;
            };
            mod_rest != stamp_rest
        }
    }
}

/// Content after the first occurrence of `seq`, or `None` when absent.
fn skip_past<'a>(bytes: &'a [u8], seq: &[u8]) -> Option<&'a [u8]> {
    bytes
        .windows(seq.len())
        .position(|w| w == seq)
        .map(|pos| &bytes[pos + seq.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(a: &[u8], b: &[u8]) -> (tempfile::TempDir, String, String) {
        let dir = tempfile::tempdir().unwrap();
        let pa = dir.path().join("alpha.mod");
        let pb = dir.path().join("alpha.mod.stamp");
        fs::write(&pa, a).unwrap();
        fs::write(&pb, b).unwrap();
        let (sa, sb) = (pa.display().to_string(), pb.display().to_string());
        (dir, sa, sb)
    }

    #[test]
    fn test_missing_file_differs() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.mod");
        fs::write(&existing, b"content").unwrap();
        assert!(modules_differ(
            existing.to_str().unwrap(),
            "/nonexistent/a.mod.stamp",
            FortranCompiler::Unknown
        ));
        assert!(modules_differ(
            "/nonexistent/a.mod",
            existing.to_str().unwrap(),
            FortranCompiler::Gnu
        ));
    }

    #[test]
    fn test_gnu_ignores_dated_first_line() {
        let (_d, m, s) = write_pair(
            b"FORTRAN module created on Sun Dec 30 22:47:58 2007\nSTABLE BODY",
            b"FORTRAN module created on Mon Jan  7 09:12:04 2008\nSTABLE BODY",
        );
        assert!(!modules_differ(&m, &s, FortranCompiler::Gnu));
    }

    #[test]
    fn test_gnu_detects_body_change() {
        let (_d, m, s) = write_pair(b"date A\nBODY ONE", b"date B\nBODY TWO");
        assert!(modules_differ(&m, &s, FortranCompiler::Gnu));
    }

    #[test]
    fn test_gnu_missing_newline_is_unexpected_format() {
        let (_d, m, s) = write_pair(b"no newline at all", b"also none");
        assert!(modules_differ(&m, &s, FortranCompiler::Gnu));
    }

    #[test]
    fn test_gnu_gzip_magic_compares_whole_content() {
        let gz = [0x1f, 0x8b, 0x08, 0x00, 0x01, 0x02];
        let (_d, m, s) = write_pair(&gz, &gz);
        assert!(!modules_differ(&m, &s, FortranCompiler::Gnu));
        let gz2 = [0x1f, 0x8b, 0x08, 0x00, 0x09, 0x09];
        let (_d2, m2, s2) = write_pair(&gz, &gz2);
        assert!(modules_differ(&m2, &s2, FortranCompiler::Gnu));
    }

    #[test]
    fn test_intel_skips_version_byte_and_preamble() {
        let (_d, m, s) = write_pair(
            b"\x03stamp 2024-01-01\n\0INTERFACE",
            b"\x03stamp 2024-06-30\n\0INTERFACE",
        );
        assert!(!modules_differ(&m, &s, FortranCompiler::Intel));
        let (_d2, m2, s2) = write_pair(
            b"\x03x\n\0INTERFACE A",
            b"\x03x\n\0INTERFACE B",
        );
        assert!(modules_differ(&m2, &s2, FortranCompiler::Intel));
    }

    #[test]
    fn test_unknown_compiler_whole_content() {
        let (_d, m, s) = write_pair(b"same", b"same");
        assert!(!modules_differ(&m, &s, FortranCompiler::Unknown));
        let (_d2, m2, s2) = write_pair(b"one", b"two");
        assert!(modules_differ(&m2, &s2, FortranCompiler::Unknown));
    }

    #[test]
    fn test_compiler_id_parsing() {
        assert_eq!(FortranCompiler::from_id("GNU"), FortranCompiler::Gnu);
        assert_eq!(FortranCompiler::from_id("Intel"), FortranCompiler::Intel);
        assert_eq!(FortranCompiler::from_id("IntelLLVM"), FortranCompiler::Intel);
        assert_eq!(FortranCompiler::from_id("SunPro"), FortranCompiler::SunPro);
        assert_eq!(FortranCompiler::from_id("Cray"), FortranCompiler::Unknown);
        assert_eq!(FortranCompiler::from_id(""), FortranCompiler::Unknown);
    }
}
