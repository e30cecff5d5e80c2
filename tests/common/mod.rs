//! Throwaway project trees with a fake toolchain.
//!
//! The fake `cc` and `ar` are shell scripts that append every invocation to
//! `tools.log` inside the workspace and create whatever `-o` (or, for `ar`,
//! the archive argument) names. A source containing `BROKEN` makes the
//! compiler fail with a missing-header diagnostic, and while
//! `tools/fail-link` exists every link (a call without `-c`) fails.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use kiln::build::{self, BuildReport};
use kiln::config::{BuildOptions, Project, load_project};
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let ws = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(ws.path("tools")).unwrap();
        let log = ws.path("tools.log");

        ws.script(
            "tools/cc",
            &format!(
                r#"#!/bin/sh
echo "cc $*" >> "{log}"
out=""
prev=""
compile=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  if [ "$arg" = "-c" ]; then compile=1; fi
  case "$arg" in
    *.c|*.cpp)
      if grep -q BROKEN "$arg" 2>/dev/null; then
        echo "$arg:1:10: fatal error: missing.h: No such file or directory" >&2
        exit 1
      fi
      ;;
  esac
  prev="$arg"
done
if [ -z "$compile" ] && [ -e "{fail_link}" ]; then
  echo "ld: cannot open output file" >&2
  exit 1
fi
if [ -n "$out" ]; then echo "built from $*" > "$out"; fi
exit 0
"#,
                log = log.display(),
                fail_link = ws.path("tools/fail-link").display()
            ),
        );
        ws.script(
            "tools/ar",
            &format!(
                r#"#!/bin/sh
echo "ar $*" >> "{log}"
echo "archive of $*" > "$2"
exit 0
"#,
                log = log.display()
            ),
        );
        ws
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn script(&self, rel: &str, body: &str) {
        let path = self.path(rel);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Append to a source so both its size and content change.
    pub fn edit(&self, rel: &str) {
        let path = self.path(rel);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("\n// edited\n");
        fs::write(path, content).unwrap();
    }

    /// Make every link fail until [`Workspace::fix_linker`].
    pub fn break_linker(&self) {
        fs::write(self.path("tools/fail-link"), "").unwrap();
    }

    pub fn fix_linker(&self) {
        fs::remove_file(self.path("tools/fail-link")).unwrap();
    }

    pub fn cc(&self) -> String {
        self.path("tools/cc").display().to_string()
    }

    pub fn ar(&self) -> String {
        self.path("tools/ar").display().to_string()
    }

    /// Write `<dir>/project.yaml` for a C project using the fake tools.
    pub fn project(&self, dir: &str, name: &str, kind: &str, extra: &str) {
        let output = if kind == "library" {
            format!("lib{name}.a")
        } else {
            format!("bin/{name}")
        };
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        self.write(
            &format!("{prefix}project.yaml"),
            &format!(
                "project: {name}\nauthors: Test\nlicense: MIT\nversion: 1.0.0\nlanguage: c\nstandard: c11\ncompiler: {cc}\narchiver: {ar}\nproject_type: {kind}\noutput: {output}\nproject_dirs: [src]\n{extra}",
                cc = self.cc(),
                ar = self.ar(),
            ),
        );
    }

    /// `app` (executable, `src/main.c`) depending on `core` (library,
    /// `src/a.c` and `src/b.c`).
    pub fn lib_and_app(&self) {
        self.project("", "app", "executable", "subprojects: [core]\n");
        self.write("src/main.c", "int main(void) { return core_a() + core_b(); }\n");
        self.project("core", "core", "library", "");
        self.write("core/src/a.c", "int core_a(void) { return 0; }\n");
        self.write("core/src/b.c", "int core_b(void) { return 0; }\n");
    }

    pub fn load(&self) -> Project {
        load_project(self.root()).unwrap()
    }

    pub fn build(&self) -> BuildReport {
        self.build_with(BuildOptions::default())
    }

    pub fn build_with(&self, options: BuildOptions) -> BuildReport {
        let options = BuildOptions {
            silent: true,
            ..options
        };
        build::build(&self.load(), &options).unwrap()
    }

    /// Every logged tool invocation so far.
    pub fn log(&self) -> Vec<String> {
        fs::read_to_string(self.path("tools.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn clear_log(&self) {
        let _ = fs::remove_file(self.path("tools.log"));
    }

    /// Compiler invocations with `-c`.
    pub fn compiles(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|l| l.starts_with("cc ") && l.split_whitespace().any(|a| a == "-c"))
            .collect()
    }

    /// Compiler invocations without `-c`.
    pub fn links(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|l| l.starts_with("cc ") && !l.split_whitespace().any(|a| a == "-c"))
            .collect()
    }

    pub fn archives(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|l| l.starts_with("ar "))
            .collect()
    }
}
