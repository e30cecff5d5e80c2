//! Source discovery.
//!
//! Walks a project's `project_dirs` and returns its translation units in a
//! deterministic order (lexicographic by project-relative path). Symlinks are
//! followed, but every directory and file is visited at most once by real
//! path, so link cycles terminate.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{DESCRIPTOR_FILE, Project};
use crate::error::{KilnError, Result};
use crate::fingerprint::FileFingerprint;
use crate::manifest::ProjectEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    C,
    Cpp,
    Asm,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy();
        match ext.as_ref() {
            "c" => Some(SourceKind::C),
            "cpp" | "cc" | "cxx" | "c++" => Some(SourceKind::Cpp),
            "s" | "S" | "asm" => Some(SourceKind::Asm),
            _ => None,
        }
    }
}

/// A source file found on disk, before fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the project directory, `/`-separated. Manifest key.
    pub rel: String,
    pub kind: SourceKind,
}

#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub path: PathBuf,
    pub rel: String,
    pub kind: SourceKind,
    pub fingerprint: FileFingerprint,
}

impl TranslationUnit {
    /// `<project>/obj/<rel>.o`
    pub fn object_path(&self, project: &Project) -> PathBuf {
        object_path(project, &self.rel)
    }
}

pub fn object_path(project: &Project, rel: &str) -> PathBuf {
    project.obj_dir().join(format!("{}.o", rel))
}

enum IgnoreRule {
    Path(String),
    Glob { pattern: Regex, basename_only: bool },
}

impl IgnoreRule {
    fn parse(entry: &str) -> Self {
        let entry = entry.trim().trim_start_matches("./").trim_end_matches('/');
        if entry.contains(['*', '?', '[']) {
            // An invalid glob degrades to a literal path match.
            if let Ok(pattern) = Regex::new(&glob_to_regex(entry)) {
                return IgnoreRule::Glob {
                    pattern,
                    basename_only: !entry.contains('/'),
                };
            }
        }
        IgnoreRule::Path(entry.to_string())
    }

    fn matches(&self, rel: &str) -> bool {
        match self {
            IgnoreRule::Path(p) => {
                rel == p
                    || rel.starts_with(&format!("{}/", p))
                    || rel.rsplit('/').next() == Some(p.as_str())
            }
            IgnoreRule::Glob {
                pattern,
                basename_only,
            } => {
                if *basename_only {
                    rel.split('/').any(|part| pattern.is_match(part))
                } else {
                    pattern.is_match(rel)
                }
            }
        }
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                out.push('[');
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' {
                        out.push_str("\\\\");
                    } else {
                        out.push(c);
                    }
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Enumerate the compilable sources of `project`, sorted by relative path.
pub fn find_sources(project: &Project) -> Result<Vec<SourceFile>> {
    let rules: Vec<IgnoreRule> = project.ignore.iter().map(|e| IgnoreRule::parse(e)).collect();
    let obj_dir = project.obj_dir();

    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut files = Vec::new();

    for src_dir in &project.project_dirs {
        let root = project.dir.join(src_dir);
        if !root.exists() {
            warn!(
                project = %project.name,
                "source directory {} does not exist, skipping",
                root.display()
            );
            continue;
        }

        let mut walker = WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.loop_ancestor().is_some() => {
                    debug!("symlink loop at {:?}, not descending", e.path());
                    continue;
                }
                Err(e) => {
                    return Err(KilnError::Discovery {
                        project: project.name.clone(),
                        path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone()),
                        message: e.to_string(),
                    });
                }
            };
            let path = entry.path();

            let real = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            if !visited.insert(real) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_dir() {
                let nested_project = entry.depth() > 0
                    && path != project.dir
                    && path.join(DESCRIPTOR_FILE).exists();
                if nested_project {
                    warn!(
                        project = %project.name,
                        "{} has its own {}; list it under subprojects to build it",
                        path.display(),
                        DESCRIPTOR_FILE
                    );
                    walker.skip_current_dir();
                } else if path == obj_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            let Some(kind) = SourceKind::from_path(path) else {
                continue;
            };
            let rel = relative_key(&project.dir, path);
            if rules.iter().any(|rule| rule.matches(&rel)) {
                debug!("ignoring {}", rel);
                continue;
            }
            files.push(SourceFile {
                path: path.to_path_buf(),
                rel,
                kind,
            });
        }
    }

    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    files.dedup_by(|a, b| a.rel == b.rel);
    Ok(files)
}

/// Discover and fingerprint every translation unit of `project`.
///
/// `previous` supplies the last recorded fingerprints for the size+mtime fast path.
pub fn discover(project: &Project, previous: Option<&ProjectEntry>) -> Result<Vec<TranslationUnit>> {
    let sources = find_sources(project)?;
    sources
        .into_par_iter()
        .map(|src| {
            let prev = previous.and_then(|p| p.files.get(&src.rel)).map(|f| &f.fingerprint);
            let fingerprint =
                FileFingerprint::compute(&src.path, prev).map_err(|e| KilnError::Discovery {
                    project: project.name.clone(),
                    path: src.path.clone(),
                    message: e.to_string(),
                })?;
            Ok(TranslationUnit {
                path: src.path,
                rel: src.rel,
                kind: src.kind,
                fingerprint,
            })
        })
        .collect()
}

/// `/`-joined path of `path` relative to `base`. Parent components are
/// rewritten so object paths never escape the object directory.
fn relative_key(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            Component::ParentDir => Some("__".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
