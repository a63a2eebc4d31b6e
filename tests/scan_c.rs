//! End-to-end C scanning: load a `depend.toml`, run the
//! check-then-rescan cycle against a temporary source tree, and inspect
//! the files left behind.

use depscan::config::DependInfo;
use depscan::depends::{self, DependencyScanner};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

struct Target {
    dir: tempfile::TempDir,
    info_path: PathBuf,
}

impl Target {
    fn target_dir(&self) -> PathBuf {
        self.dir.path().join("dep")
    }

    fn make_path(&self) -> PathBuf {
        self.target_dir().join("depend.make")
    }

    fn internal_path(&self) -> PathBuf {
        self.target_dir().join("depend.internal")
    }

    /// The check-then-maybe-rescan cycle the `scan` command runs for one
    /// target. Returns whether the previous output was still fresh.
    fn scan(&self) -> bool {
        let info = DependInfo::load(&self.info_path).unwrap();
        fs::create_dir_all(self.target_dir()).unwrap();
        let make_path = self.make_path().display().to_string();
        let internal_path = self.internal_path().display().to_string();

        let (fresh, valid) = depends::check(&make_path, &internal_path, false).unwrap();
        if fresh {
            return true;
        }
        let mut scanner = DependencyScanner::new(&info, valid, false).unwrap();
        let mut make_out = Vec::new();
        let mut internal_out = Vec::new();
        assert!(scanner.write(&info, &mut make_out, &mut internal_out).unwrap());
        fs::write(&make_path, make_out).unwrap();
        fs::write(&internal_path, internal_out).unwrap();
        false
    }
}

fn c_project(main_c: &str, headers: &[(&str, &str)]) -> Target {
    let dir = tempfile::tempdir().unwrap();
    let src_dir = dir.path().join("src");
    let inc_dir = dir.path().join("inc");
    fs::create_dir_all(&src_dir).unwrap();
    fs::create_dir_all(&inc_dir).unwrap();
    fs::write(src_dir.join("main.c"), main_c).unwrap();
    for (name, content) in headers {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    let info_path = dir.path().join("depend.toml");
    let toml = format!(
        r#"language = "C"
target_dir = "{target}"
include_path = ["{inc}"]

[[sources]]
src = "{src}"
obj = "main.o"
"#,
        target = dir.path().join("dep").display(),
        inc = inc_dir.display(),
        src = src_dir.join("main.c").display(),
    );
    fs::write(&info_path, toml).unwrap();
    Target { dir, info_path }
}

fn backdate(path: &Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn test_scan_writes_rules_and_record() {
    let target = c_project(
        "#include \"a.h\"\n",
        &[("src/a.h", "#include <b.h>\n"), ("inc/b.h", "int b;\n")],
    );
    assert!(!target.scan());

    let make = fs::read_to_string(target.make_path()).unwrap();
    let src = target.dir.path().join("src");
    let inc = target.dir.path().join("inc");
    assert!(make.contains(&format!("main.o: {}/main.c", src.display())));
    assert!(make.contains(&format!("main.o: {}/a.h", src.display())));
    assert!(make.contains(&format!("main.o: {}/b.h", inc.display())));

    let internal = fs::read_to_string(target.internal_path()).unwrap();
    assert!(internal.contains("main.o\n"));
    assert!(internal.contains(&format!(" {}/a.h", src.display())));

    // The scan cache was persisted alongside.
    assert!(target.target_dir().join("C.includecache").exists());
}

#[test]
fn test_second_run_is_up_to_date() {
    let target = c_project("#include \"a.h\"\n", &[("src/a.h", "int a;\n")]);
    assert!(!target.scan());

    // The object named in the record does not exist, so freshness hinges
    // on the record file being newer than every dependee; make it so.
    backdate(&target.dir.path().join("src/main.c"), 100);
    backdate(&target.dir.path().join("src/a.h"), 100);

    let before = fs::read_to_string(target.make_path()).unwrap();
    assert!(target.scan());
    let after = fs::read_to_string(target.make_path()).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_touched_header_forces_rescan() {
    let target = c_project("#include \"a.h\"\n", &[("src/a.h", "int a;\n")]);
    assert!(!target.scan());
    backdate(&target.dir.path().join("src/main.c"), 100);

    // A header edit that adds a new include must surface after rescan.
    backdate(&target.internal_path(), 50);
    backdate(&target.make_path(), 50);
    fs::write(
        target.dir.path().join("src/a.h"),
        "#include \"c.h\"\nint a;\n",
    )
    .unwrap();
    fs::write(target.dir.path().join("src/c.h"), "int c;\n").unwrap();

    assert!(!target.scan());
    let make = fs::read_to_string(target.make_path()).unwrap();
    assert!(make.contains("c.h"));
}

#[test]
fn test_deleted_header_clears_outputs_then_rescans() {
    let target = c_project("#include \"a.h\"\n", &[("src/a.h", "int a;\n")]);
    assert!(!target.scan());
    fs::remove_file(target.dir.path().join("src/a.h")).unwrap();

    // Header now unresolvable; the rescan succeeds with the edge dropped.
    assert!(!target.scan());
    let make = fs::read_to_string(target.make_path()).unwrap();
    assert!(!make.contains("a.h"));
    assert!(make.contains("main.c"));
}

#[test]
fn test_clear_writes_placeholder() {
    let target = c_project("int main(void) { return 0; }\n", &[]);
    assert!(!target.scan());
    let make_path = target.make_path().display().to_string();
    depends::clear(&make_path, false).unwrap();
    let cleared = fs::read_to_string(target.make_path()).unwrap();
    assert_eq!(
        cleared,
        "# Empty dependencies file\n# This may be replaced when dependencies are built.\n"
    );
}
