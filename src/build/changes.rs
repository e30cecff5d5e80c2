//! Change detection against the manifest.
//!
//! A translation unit is rebuilt when its content, its effective flags or its
//! object file differ from what the manifest recorded. The link is rebuilt
//! when any of its inputs changed, which includes the artifacts of direct
//! subprojects.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::config::Project;
use crate::discovery::TranslationUnit;
use crate::fingerprint::path_mtime;
use crate::manifest::ProjectEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No manifest entry for the file.
    New,
    ContentChanged,
    FlagsChanged,
    MissingObject,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StaleReason::New => "new file",
            StaleReason::ContentChanged => "content changed",
            StaleReason::FlagsChanged => "flags changed",
            StaleReason::MissingObject => "object missing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkReason {
    NeverLinked,
    SourcesRecompiled,
    /// Objects compiled by an earlier build never made it into the output.
    PendingObjects,
    FlagsChanged,
    OutputMissing,
    SourceSetChanged,
    SubprojectRelinked(String),
    SubprojectChanged(String),
}

impl fmt::Display for LinkReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkReason::NeverLinked => write!(f, "never linked"),
            LinkReason::SourcesRecompiled => write!(f, "sources recompiled"),
            LinkReason::PendingObjects => write!(f, "objects newer than output"),
            LinkReason::FlagsChanged => write!(f, "flags changed"),
            LinkReason::OutputMissing => write!(f, "output missing"),
            LinkReason::SourceSetChanged => write!(f, "source set changed"),
            LinkReason::SubprojectRelinked(key) => write!(f, "subproject {} relinks", key),
            LinkReason::SubprojectChanged(key) => write!(f, "subproject {} changed", key),
        }
    }
}

/// What a direct subproject looks like from its parent's link step.
#[derive(Debug, Clone)]
pub struct SubprojectState {
    pub key: String,
    pub artifact: PathBuf,
    /// The subproject relinks in this build.
    pub relinking: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Indexes into the unit list, in discovery order.
    pub stale: Vec<(usize, StaleReason)>,
    pub link: Option<LinkReason>,
}

impl ChangeSet {
    pub fn is_up_to_date(&self) -> bool {
        self.stale.is_empty() && self.link.is_none()
    }

    pub fn link_stale(&self) -> bool {
        self.link.is_some()
    }
}

/// Classify a single unit. `None` means the recorded object is still valid.
pub fn unit_staleness(
    project: &Project,
    unit: &TranslationUnit,
    flags: &str,
    previous: Option<&ProjectEntry>,
) -> Option<StaleReason> {
    let Some(entry) = previous.and_then(|p| p.files.get(&unit.rel)) else {
        return Some(StaleReason::New);
    };
    if !entry.fingerprint.same_content(&unit.fingerprint) {
        return Some(StaleReason::ContentChanged);
    }
    if entry.flags != flags {
        return Some(StaleReason::FlagsChanged);
    }
    if !unit.object_path(project).exists() {
        return Some(StaleReason::MissingObject);
    }
    None
}

/// Current subproject artifact stamps, keyed like [`ProjectEntry::dependencies`].
pub fn dependency_stamps(subprojects: &[SubprojectState]) -> BTreeMap<String, u64> {
    subprojects
        .iter()
        .filter_map(|s| path_mtime(&s.artifact).map(|m| (s.key.clone(), m)))
        .collect()
}

/// Compare `units` against the previous manifest entry.
///
/// `units` must be sorted by `rel` (as returned by discovery).
pub fn detect(
    project: &Project,
    units: &[TranslationUnit],
    flags: &str,
    previous: Option<&ProjectEntry>,
    subprojects: &[SubprojectState],
) -> ChangeSet {
    let stale: Vec<(usize, StaleReason)> = units
        .iter()
        .enumerate()
        .filter_map(|(i, unit)| unit_staleness(project, unit, flags, previous).map(|r| (i, r)))
        .collect();

    let link = link_reason(project, units, flags, previous, subprojects, !stale.is_empty());
    ChangeSet { stale, link }
}

fn link_reason(
    project: &Project,
    units: &[TranslationUnit],
    flags: &str,
    previous: Option<&ProjectEntry>,
    subprojects: &[SubprojectState],
    any_stale: bool,
) -> Option<LinkReason> {
    let Some(entry) = previous.filter(|e| e.flags.is_some()) else {
        return Some(LinkReason::NeverLinked);
    };
    if any_stale {
        return Some(LinkReason::SourcesRecompiled);
    }
    if entry.link_pending {
        return Some(LinkReason::PendingObjects);
    }
    if entry.flags.as_deref() != Some(flags) {
        return Some(LinkReason::FlagsChanged);
    }
    if !project.output_path().exists() {
        return Some(LinkReason::OutputMissing);
    }
    if entry.sources.len() != units.len()
        || entry.sources.iter().zip(units).any(|(rel, unit)| *rel != unit.rel)
    {
        return Some(LinkReason::SourceSetChanged);
    }
    if let Some(sub) = subprojects.iter().find(|s| s.relinking) {
        return Some(LinkReason::SubprojectRelinked(sub.key.clone()));
    }
    let stamps = dependency_stamps(subprojects);
    if stamps != entry.dependencies {
        let changed = subprojects
            .iter()
            .find(|s| stamps.get(&s.key) != entry.dependencies.get(&s.key))
            .map(|s| s.key.clone())
            .unwrap_or_default();
        return Some(LinkReason::SubprojectChanged(changed));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DescriptorNode, parse_descriptor};
    use crate::discovery::SourceKind;
    use crate::fingerprint::FileFingerprint;
    use crate::manifest::FileEntry;
    use std::fs;
    use std::path::Path;

    fn project(dir: &Path) -> Project {
        let yaml = "project: app\nauthors: a\nlicense: MIT\nlanguage: c\nstandard: c11\ncompiler: cc\nproject_type: executable\noutput: app\nproject_dirs: [src]\n";
        let node = DescriptorNode {
            dir: dir.to_path_buf(),
            descriptor: parse_descriptor(Path::new("project.yaml"), yaml).unwrap(),
            children: vec![],
        };
        Project::resolve(&node, dir, None).unwrap()
    }

    fn unit(dir: &Path, rel: &str, hash: &str) -> TranslationUnit {
        TranslationUnit {
            path: dir.join(rel),
            rel: rel.to_string(),
            kind: SourceKind::C,
            fingerprint: FileFingerprint {
                hash: hash.into(),
                size: 1,
                mtime: 1,
            },
        }
    }

    /// Entry describing a completed build of `units` with `flags`.
    fn built(project: &Project, units: &[TranslationUnit], flags: &str) -> ProjectEntry {
        let mut entry = ProjectEntry {
            flags: Some(flags.into()),
            output: Some("app".into()),
            sources: units.iter().map(|u| u.rel.clone()).collect(),
            ..Default::default()
        };
        for u in units {
            let obj = u.object_path(project);
            fs::create_dir_all(obj.parent().unwrap()).unwrap();
            fs::write(&obj, "o").unwrap();
            entry.files.insert(
                u.rel.clone(),
                FileEntry {
                    fingerprint: u.fingerprint.clone(),
                    flags: flags.into(),
                },
            );
        }
        fs::write(project.output_path(), "bin").unwrap();
        entry
    }

    #[test]
    fn test_first_build_everything_stale() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1"), unit(dir.path(), "src/b.c", "2")];
        let changes = detect(&p, &units, "f", None, &[]);
        assert_eq!(changes.stale.len(), 2);
        assert_eq!(changes.stale[0].1, StaleReason::New);
        assert_eq!(changes.link, Some(LinkReason::NeverLinked));
    }

    #[test]
    fn test_unchanged_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1")];
        let entry = built(&p, &units, "f");
        assert!(detect(&p, &units, "f", Some(&entry), &[]).is_up_to_date());
    }

    #[test]
    fn test_content_change_only_that_unit() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1"), unit(dir.path(), "src/b.c", "2")];
        let entry = built(&p, &units, "f");
        let edited = vec![units[0].clone(), unit(dir.path(), "src/b.c", "3")];
        let changes = detect(&p, &edited, "f", Some(&entry), &[]);
        assert_eq!(changes.stale, vec![(1, StaleReason::ContentChanged)]);
        assert_eq!(changes.link, Some(LinkReason::SourcesRecompiled));
    }

    #[test]
    fn test_objects_compiled_without_link_relink() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1")];
        let mut entry = built(&p, &units, "f");
        entry.link_pending = true;
        let changes = detect(&p, &units, "f", Some(&entry), &[]);
        assert!(changes.stale.is_empty());
        assert_eq!(changes.link, Some(LinkReason::PendingObjects));
    }

    #[test]
    fn test_flag_change_invalidates_all() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1"), unit(dir.path(), "src/b.c", "2")];
        let entry = built(&p, &units, "f");
        let changes = detect(&p, &units, "g", Some(&entry), &[]);
        assert!(changes.stale.iter().all(|(_, r)| *r == StaleReason::FlagsChanged));
        assert_eq!(changes.stale.len(), 2);
    }

    #[test]
    fn test_missing_object_recompiles() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1")];
        let entry = built(&p, &units, "f");
        fs::remove_file(units[0].object_path(&p)).unwrap();
        let changes = detect(&p, &units, "f", Some(&entry), &[]);
        assert_eq!(changes.stale, vec![(0, StaleReason::MissingObject)]);
    }

    #[test]
    fn test_removed_source_relinks_without_compiling() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1"), unit(dir.path(), "src/b.c", "2")];
        let entry = built(&p, &units, "f");
        let changes = detect(&p, &units[..1], "f", Some(&entry), &[]);
        assert!(changes.stale.is_empty());
        assert_eq!(changes.link, Some(LinkReason::SourceSetChanged));
    }

    #[test]
    fn test_missing_output_relinks() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1")];
        let entry = built(&p, &units, "f");
        fs::remove_file(p.output_path()).unwrap();
        assert_eq!(
            detect(&p, &units, "f", Some(&entry), &[]).link,
            Some(LinkReason::OutputMissing)
        );
    }

    #[test]
    fn test_subproject_changes_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path());
        let units = vec![unit(dir.path(), "src/a.c", "1")];
        let lib = dir.path().join("libcore.a");
        fs::write(&lib, "lib").unwrap();
        let mut entry = built(&p, &units, "f");
        let sub = SubprojectState {
            key: "core".into(),
            artifact: lib.clone(),
            relinking: false,
        };
        entry.dependencies = dependency_stamps(std::slice::from_ref(&sub));
        assert!(detect(&p, &units, "f", Some(&entry), std::slice::from_ref(&sub)).is_up_to_date());

        let relinking = SubprojectState {
            relinking: true,
            ..sub.clone()
        };
        assert_eq!(
            detect(&p, &units, "f", Some(&entry), &[relinking]).link,
            Some(LinkReason::SubprojectRelinked("core".into()))
        );

        entry.dependencies.insert("core".into(), 0);
        assert_eq!(
            detect(&p, &units, "f", Some(&entry), &[sub]).link,
            Some(LinkReason::SubprojectChanged("core".into()))
        );
    }
}
