//! Persisted build state (`.kiln/manifest.json`).
//!
//! One manifest per build root. It is read once when a build starts and
//! rewritten atomically when it ends. Only successful tasks publish updates,
//! so entries for failed or skipped work keep their previous values and the
//! next build recomputes them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{KilnError, Result};
use crate::fingerprint::FileFingerprint;

pub const MANIFEST_DIR: &str = ".kiln";
pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub version: u32,
    /// Keyed by project key (directory relative to the build root).
    pub projects: BTreeMap<String, ProjectEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectEntry {
    /// Link/archive flags fingerprint of the last successful link.
    pub flags: Option<String>,
    /// Output artifact written by the last successful link.
    pub output: Option<String>,
    pub artifact_mtime: Option<u64>,
    /// Objects were compiled after the last successful link.
    #[serde(default)]
    pub link_pending: bool,
    /// Subproject artifact mtimes observed by the last successful link.
    #[serde(default)]
    pub dependencies: BTreeMap<String, u64>,
    /// Source set that went into the last successful link.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Keyed by source path relative to the project directory.
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub fingerprint: FileFingerprint,
    /// Compile flags fingerprint the object was produced with.
    pub flags: String,
}

/// A change published by one successful task.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestUpdate {
    Compiled {
        project: String,
        rel: String,
        entry: FileEntry,
    },
    Linked {
        project: String,
        flags: String,
        output: String,
        artifact_mtime: Option<u64>,
        dependencies: BTreeMap<String, u64>,
        sources: Vec<String>,
    },
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            projects: BTreeMap::new(),
        }
    }
}

impl Manifest {
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(MANIFEST_DIR).join(MANIFEST_FILE)
    }

    /// Read the manifest at `path`. A missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| KilnError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|e| KilnError::Manifest {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(KilnError::Manifest {
                path: path.to_path_buf(),
                message: format!(
                    "format version {} is not supported (expected {})",
                    manifest.version, MANIFEST_VERSION
                ),
            });
        }
        Ok(manifest)
    }

    /// Like [`Manifest::load`], but an unusable manifest means a full rebuild.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("{}; rebuilding from scratch", e);
                Self::default()
            }
        }
    }

    /// Write to a sibling temp file, then rename over the old manifest.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| KilnError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| KilnError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| KilnError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| KilnError::io(path, e))
    }

    pub fn project(&self, key: &str) -> Option<&ProjectEntry> {
        self.projects.get(key)
    }

    pub fn apply(&mut self, update: ManifestUpdate) {
        match update {
            ManifestUpdate::Compiled {
                project,
                rel,
                entry,
            } => {
                let project = self.projects.entry(project).or_default();
                project.files.insert(rel, entry);
                project.link_pending = true;
            }
            ManifestUpdate::Linked {
                project,
                flags,
                output,
                artifact_mtime,
                dependencies,
                sources,
            } => {
                let entry = self.projects.entry(project).or_default();
                entry.files.retain(|rel, _| sources.binary_search(rel).is_ok());
                entry.flags = Some(flags);
                entry.output = Some(output);
                entry.artifact_mtime = artifact_mtime;
                entry.link_pending = false;
                entry.dependencies = dependencies;
                entry.sources = sources;
            }
        }
    }

    /// Forget everything recorded for `key`.
    pub fn remove_project(&mut self, key: &str) {
        self.projects.remove(key);
    }
}
