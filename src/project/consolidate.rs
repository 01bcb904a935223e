//! Project Consolidation
//!
//! Replaces the symlinks in a project's `src`, `ontology` and
//! `informants` directories with copies of their targets, so the project
//! no longer depends on the shared files.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Project subdirectories whose links are consolidated.
pub const CONSOLIDATED_DIRS: [&str; 3] = ["src", "ontology", "informants"];

/// Resolves where a symlink points, relative targets against the link's
/// own directory.
fn link_target(link: &Path) -> Result<PathBuf> {
    let target = fs::read_link(link).map_err(|e| Error::io(link, e))?;
    if target.is_absolute() {
        return Ok(target);
    }
    Ok(link
        .parent()
        .map(|dir| dir.join(&target))
        .unwrap_or(target))
}

/// Checks that `link` points at a readable regular file and returns it.
fn checked_target(link: &Path) -> Result<PathBuf> {
    let target = link_target(link)?;

    match fs::metadata(&target) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(Error::Project(format!(
                "'{}' links to '{}', which is not a regular file",
                link.display(),
                target.display()
            )))
        }
        Err(e) => {
            return Err(Error::Project(format!(
                "'{}' links to '{}', which is not accessible: {}",
                link.display(),
                target.display(),
                e
            )))
        }
    }
    fs::File::open(&target).map_err(|e| Error::io(&target, e))?;
    Ok(target)
}

/// Sibling path the copy is written to before it replaces the link.
fn staging_path(link: &Path) -> PathBuf {
    let name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    link.with_file_name(format!(".{}.ont_rdb-tmp", name))
}

/// Copies `target` next to `link`, then renames the copy over the link.
/// The link is untouched if the copy fails.
fn replace_with_copy(link: &Path, target: &Path) -> Result<()> {
    let staging = staging_path(link);

    if let Err(e) = fs::copy(target, &staging) {
        let _ = fs::remove_file(&staging);
        return Err(Error::io(target, e));
    }
    if let Err(e) = fs::rename(&staging, link) {
        let _ = fs::remove_file(&staging);
        return Err(Error::io(link, e));
    }

    debug!("Replaced {} with a copy of {}", link.display(), target.display());
    Ok(())
}

/// Replaces every symlink in the project with a copy of its target and
/// returns how many were replaced.
///
/// Every link is checked before any is replaced, so a broken link
/// leaves the project as it was. Missing subdirectories are skipped.
pub fn consolidate_project(project_dir: &Path) -> Result<usize> {
    if !project_dir.is_dir() {
        return Err(Error::Project(format!(
            "'{}' is not a project directory",
            project_dir.display()
        )));
    }

    let mut links = Vec::new();
    for subdir in CONSOLIDATED_DIRS {
        let dir = project_dir.join(subdir);
        if !dir.is_dir() {
            warn!("Skipping missing directory {}", dir.display());
            continue;
        }

        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                Error::Project(format!("Failed to walk '{}': {}", dir.display(), e))
            })?;
            if entry.path_is_symlink() {
                links.push(entry.into_path());
            }
        }
    }

    let pairs = links
        .iter()
        .map(|link| checked_target(link).map(|target| (link, target)))
        .collect::<Result<Vec<_>>>()?;

    for (link, target) in &pairs {
        replace_with_copy(link, target)?;
    }

    info!(
        "Replaced {} symbolic link(s) with file copies in {}",
        links.len(),
        project_dir.display()
    );
    Ok(links.len())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn is_symlink(path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    #[test]
    fn test_consolidate_replaces_links() {
        let shared = tempdir().unwrap();
        fs::write(shared.path().join("informant_class.py"), "class Informant: pass\n").unwrap();
        fs::write(shared.path().join("df.pkl"), "pickle").unwrap();

        let project = tempdir().unwrap();
        for subdir in CONSOLIDATED_DIRS {
            fs::create_dir_all(project.path().join(subdir)).unwrap();
        }
        symlink(
            shared.path().join("informant_class.py"),
            project.path().join("src/informant_class.py"),
        )
        .unwrap();
        symlink(shared.path().join("df.pkl"), project.path().join("informants/df.pkl")).unwrap();
        fs::write(project.path().join("src/local.py"), "x = 1\n").unwrap();

        let replaced = consolidate_project(project.path()).unwrap();
        assert_eq!(replaced, 2);

        let copy = project.path().join("src/informant_class.py");
        assert!(!is_symlink(&copy));
        assert_eq!(fs::read_to_string(&copy).unwrap(), "class Informant: pass\n");
        assert_eq!(
            fs::read_to_string(project.path().join("informants/df.pkl")).unwrap(),
            "pickle"
        );

        // Copies are independent of the originals
        fs::write(shared.path().join("df.pkl"), "changed").unwrap();
        assert_eq!(
            fs::read_to_string(project.path().join("informants/df.pkl")).unwrap(),
            "pickle"
        );
    }

    #[test]
    fn test_consolidate_relative_link() {
        let project = tempdir().unwrap();
        fs::create_dir_all(project.path().join("ontology")).unwrap();
        fs::write(project.path().join("data_ontology.py"), "class Data: pass\n").unwrap();
        symlink("../data_ontology.py", project.path().join("ontology/data_ontology.py")).unwrap();

        assert_eq!(consolidate_project(project.path()).unwrap(), 1);
        let copy = project.path().join("ontology/data_ontology.py");
        assert!(!is_symlink(&copy));
        assert_eq!(fs::read_to_string(copy).unwrap(), "class Data: pass\n");
    }

    #[test]
    fn test_consolidate_broken_link_keeps_link() {
        let project = tempdir().unwrap();
        fs::create_dir_all(project.path().join("src")).unwrap();
        let link = project.path().join("src/gone.py");
        symlink("/nonexistent/gone.py", &link).unwrap();

        assert!(matches!(consolidate_project(project.path()), Err(Error::Project(_))));
        assert!(is_symlink(&link));
    }

    #[test]
    fn test_broken_link_leaves_other_links_in_place() {
        let shared = tempdir().unwrap();
        fs::write(shared.path().join("informant_class.py"), "class Informant: pass\n").unwrap();

        let project = tempdir().unwrap();
        fs::create_dir_all(project.path().join("src")).unwrap();
        fs::create_dir_all(project.path().join("informants")).unwrap();
        let good = project.path().join("src/informant_class.py");
        let broken = project.path().join("informants/gone.pkl");
        symlink(shared.path().join("informant_class.py"), &good).unwrap();
        symlink("/nonexistent/gone.pkl", &broken).unwrap();

        assert!(consolidate_project(project.path()).is_err());
        assert!(is_symlink(&good));
        assert!(is_symlink(&broken));
    }

    #[test]
    fn test_failed_copy_keeps_link() {
        let shared = tempdir().unwrap();
        let target = shared.path().join("df.pkl");
        fs::write(&target, "pickle").unwrap();

        let project = tempdir().unwrap();
        let link = project.path().join("df.pkl");
        symlink(&target, &link).unwrap();
        // A directory where the copy is staged makes the copy fail
        fs::create_dir_all(staging_path(&link)).unwrap();

        assert!(replace_with_copy(&link, &target).is_err());
        assert!(is_symlink(&link));
        assert_eq!(fs::read_to_string(&link).unwrap(), "pickle");
    }

    #[test]
    fn test_replace_leaves_no_staging_file() {
        let shared = tempdir().unwrap();
        let target = shared.path().join("o.py");
        fs::write(&target, "class O: pass\n").unwrap();

        let project = tempdir().unwrap();
        let link = project.path().join("o.py");
        symlink(&target, &link).unwrap();

        replace_with_copy(&link, &target).unwrap();
        assert!(!is_symlink(&link));
        assert!(!staging_path(&link).exists());
    }

    #[test]
    fn test_consolidate_missing_dirs_and_project() {
        let project = tempdir().unwrap();
        assert_eq!(consolidate_project(project.path()).unwrap(), 0);

        let result = consolidate_project(&project.path().join("absent"));
        assert!(matches!(result, Err(Error::Project(_))));
    }
}
