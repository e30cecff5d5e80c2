//! Build artifact cleanup.
//!
//! `kiln clean` removes each project's `obj/` directory and output artifact
//! and forgets the project in the manifest, so the next build starts over.
//!
//! ## Options
//!
//! - `kiln clean` - Clean the root project and every subproject
//! - `kiln clean --no-subprojects` - Clean the root project only

use colored::*;
use tracing::debug;

use std::fs;
use std::path::PathBuf;

use crate::config::Project;
use crate::error::{KilnError, Result};
use crate::manifest::Manifest;

/// Remove build outputs of `root` (and its subprojects when `recursive`).
/// Returns the paths that were deleted.
pub fn clean(root: &Project, recursive: bool, silent: bool) -> Result<Vec<PathBuf>> {
    let projects = if recursive {
        root.iter()
    } else {
        vec![root]
    };

    let manifest_path = Manifest::path_for(&root.dir);
    let mut manifest = Manifest::load_or_default(&manifest_path);
    let mut removed = Vec::new();

    for project in projects {
        let obj_dir = project.obj_dir();
        if obj_dir.exists() {
            fs::remove_dir_all(&obj_dir).map_err(|e| KilnError::io(&obj_dir, e))?;
            removed.push(obj_dir);
        }

        let output = project.output_path();
        if output.is_file() {
            fs::remove_file(&output).map_err(|e| KilnError::io(&output, e))?;
            removed.push(output);
        }

        manifest.remove_project(&project.key);
        debug!(project = %project.name, "cleaned");
    }

    if recursive {
        let dir = manifest_path.parent().map(PathBuf::from);
        if let Some(dir) = dir.filter(|d| d.exists()) {
            fs::remove_dir_all(&dir).map_err(|e| KilnError::io(&dir, e))?;
            removed.push(dir);
        }
    } else if manifest_path.exists() {
        manifest.save(&manifest_path)?;
    }

    if !silent {
        for path in &removed {
            println!("{} Removed {}", "🗑️".red(), path.display());
        }
        if removed.is_empty() {
            println!("{} Nothing to clean", "!".yellow());
        } else {
            println!("{} Clean complete.", "✓".green());
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_project;
    use crate::manifest::ManifestUpdate;

    fn write_tree(dir: &std::path::Path) {
        let common = "authors: a\nlicense: MIT\nlanguage: c\nstandard: c11\ncompiler: cc\nproject_dirs: [src]\n";
        fs::create_dir_all(dir.join("core")).unwrap();
        fs::write(
            dir.join("project.yaml"),
            format!("project: app\n{common}project_type: executable\noutput: app\nsubprojects: [core]\n"),
        )
        .unwrap();
        fs::write(
            dir.join("core/project.yaml"),
            format!("project: core\n{common}project_type: library\noutput: libcore.a\n"),
        )
        .unwrap();
        for (obj, out) in [("obj/src", "app"), ("core/obj/src", "core/libcore.a")] {
            fs::create_dir_all(dir.join(obj)).unwrap();
            fs::write(dir.join(obj).join("a.c.o"), "o").unwrap();
            fs::write(dir.join(out), "bin").unwrap();
        }
    }

    fn record(manifest: &mut Manifest, key: &str) {
        manifest.apply(ManifestUpdate::Linked {
            project: key.into(),
            flags: "f".into(),
            output: "out".into(),
            artifact_mtime: None,
            dependencies: Default::default(),
            sources: vec![],
        });
    }

    #[test]
    fn test_clean_recursive() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let root = load_project(dir.path()).unwrap();
        let mut manifest = Manifest::default();
        record(&mut manifest, ".");
        manifest.save(&Manifest::path_for(dir.path())).unwrap();

        let removed = clean(&root, true, true).unwrap();
        assert!(!removed.is_empty());
        assert!(!dir.path().join("obj").exists());
        assert!(!dir.path().join("app").exists());
        assert!(!dir.path().join("core/obj").exists());
        assert!(!dir.path().join("core/libcore.a").exists());
        assert!(!Manifest::path_for(dir.path()).exists());
        // Sources and descriptors stay.
        assert!(dir.path().join("core/project.yaml").exists());
    }

    #[test]
    fn test_clean_root_only_keeps_subprojects() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let root = load_project(dir.path()).unwrap();
        let path = Manifest::path_for(dir.path());
        let mut manifest = Manifest::default();
        record(&mut manifest, ".");
        record(&mut manifest, "core");
        manifest.save(&path).unwrap();

        clean(&root, false, true).unwrap();
        assert!(!dir.path().join("app").exists());
        assert!(dir.path().join("core/libcore.a").exists());

        let manifest = Manifest::load(&path).unwrap();
        assert!(manifest.project(".").is_none());
        assert!(manifest.project("core").is_some());
    }

    #[test]
    fn test_clean_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let root = load_project(dir.path()).unwrap();
        clean(&root, true, true).unwrap();
        assert!(clean(&root, true, true).unwrap().is_empty());
    }
}
