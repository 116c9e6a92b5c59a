//! Solution materializer (§4.9): fan-out parallel export of every locked
//! project into its vendor-tree destination, plus the four independent
//! pruning passes a front-end may opt into.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use depman_schemas::LockedProject;

use crate::errors::DepmanError;
use crate::source_manager::{ProjectIdentifier, SourceManager};
use crate::version::{Revision, Version};

/// The four independent post-export pruning passes (§4.9). Each can be
/// enabled on its own; none depend on any other.
#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    /// Delete any `vendor/` directory that is not the top-level vendor
    /// root. Export already strips these as it goes (§4.5 step 7); this
    /// flag is a second, independently-toggleable pass over the final tree,
    /// for sources an export path might not otherwise have covered.
    pub nested_vendor_dirs: bool,
    /// Delete source files in sub-package directories the LockedProject's
    /// `packages` list doesn't name, preserving directory structure.
    pub unused_packages: bool,
    /// Delete files that aren't source files, preserving license-adjacent
    /// ones by name.
    pub non_source_files: bool,
    /// Delete files whose name ends with the test suffix.
    pub test_files: bool,
}

const SOURCE_SUFFIX: &str = ".src";
const TEST_SUFFIX: &str = "_test.src";
const LICENSE_PREFIXES: &[&str] = &["license", "licence", "copying", "unlicense", "copyright", "copyleft"];
const LICENSE_SUBSTRINGS: &[&str] = &["legal", "notice", "disclaimer", "patent", "third-party", "thirdparty"];

fn is_source_file(name: &str) -> bool {
    name.ends_with(SOURCE_SUFFIX)
}

fn is_license_adjacent(lower_name: &str) -> bool {
    LICENSE_PREFIXES.iter().any(|p| lower_name.starts_with(p)) || LICENSE_SUBSTRINGS.iter().any(|s| lower_name.contains(s))
}

/// Materialize every project in `projects` into `<vendor_root>/<ProjectRoot>`,
/// fanning the exports out across a thread per project. On any failure the
/// entire vendor root is removed and a single composite error describes
/// every project that failed, including ones that panicked.
pub fn materialize(
    source_manager: &SourceManager,
    vendor_root: &Path,
    projects: &[LockedProject],
    prune: &PruneOptions,
) -> Result<(), DepmanError> {
    depman_util::paths::create_dir_all(vendor_root)?;

    let (tx, rx) = mpsc::sync_channel::<(String, Result<(), String>)>(projects.len().max(1));

    std::thread::scope(|scope| {
        for project in projects {
            let tx = tx.clone();
            scope.spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    export_one(source_manager, vendor_root, project, prune)
                }));
                let result = match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("panicked while exporting `{}`", project.name)),
                };
                let _ = tx.send((project.name.clone(), result));
            });
        }
        drop(tx);

        let mut failures = Vec::new();
        for (name, result) in rx {
            if let Err(reason) = result {
                failures.push((name, reason));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let _ = depman_util::paths::remove_dir_all(vendor_root);
            Err(DepmanError::Materialization {
                vendor_root: vendor_root.to_path_buf(),
                failures,
            })
        }
    })
}

fn export_one(source_manager: &SourceManager, vendor_root: &Path, project: &LockedProject, prune: &PruneOptions) -> anyhow::Result<()> {
    let dest = vendor_root.join(&project.name);
    let id = match &project.source {
        Some(source) => ProjectIdentifier::with_source(project.name.clone(), source.clone()),
        None => ProjectIdentifier::new(project.name.clone()),
    };

    source_manager.export_project(&id, &Version::Revision(Revision(project.revision.clone())), &dest)?;

    if prune.nested_vendor_dirs {
        prune_nested_vendor_dirs(&dest)?;
    }
    if prune.unused_packages {
        prune_unused_packages(&dest, &project.packages)?;
    }
    if prune.non_source_files {
        prune_non_source_files(&dest)?;
    }
    if prune.test_files {
        prune_test_files(&dest)?;
    }
    if prune.nested_vendor_dirs || prune.unused_packages || prune.non_source_files || prune.test_files {
        remove_empty_dirs(&dest);
    }

    Ok(())
}

fn prune_nested_vendor_dirs(dest: &Path) -> anyhow::Result<()> {
    for entry in walkdir::WalkDir::new(dest).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_dir() && entry.file_name() == "vendor" {
            depman_util::paths::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

fn prune_unused_packages(dest: &Path, packages: &[String]) -> anyhow::Result<()> {
    let keep: std::collections::HashSet<&str> = packages.iter().map(|s| s.as_str()).collect();
    for entry in walkdir::WalkDir::new(dest).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_source_file(&name) {
            continue;
        }
        let rel_dir = entry
            .path()
            .parent()
            .and_then(|p| p.strip_prefix(dest).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if !rel_dir.is_empty() && !keep.contains(rel_dir.as_str()) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn prune_non_source_files(dest: &Path) -> anyhow::Result<()> {
    for entry in walkdir::WalkDir::new(dest).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let lower = entry.file_name().to_string_lossy().to_lowercase();
        if is_source_file(&lower) || is_license_adjacent(&lower) {
            continue;
        }
        fs::remove_file(entry.path())?;
    }
    Ok(())
}

fn prune_test_files(dest: &Path) -> anyhow::Result<()> {
    for entry in walkdir::WalkDir::new(dest).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(TEST_SUFFIX) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn remove_empty_dirs(root: &Path) {
    let mut dirs: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();
    // Deepest first, so a directory only empties out after its children
    // have already been considered.
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for dir in dirs {
        if fs::read_dir(&dir).map(|mut it| it.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(&dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn license_adjacent_names_recognized_by_prefix_and_substring() {
        assert!(is_license_adjacent("license.txt"));
        assert!(is_license_adjacent("licence-mit"));
        assert!(is_license_adjacent("third-party-notices.md"));
        assert!(is_license_adjacent("patents"));
        assert!(!is_license_adjacent("readme.md"));
    }

    #[test]
    fn source_and_test_suffix_recognition() {
        assert!(is_source_file("lib.src"));
        assert!(!is_source_file("README.md"));
        assert!("handler_test.src".ends_with(TEST_SUFFIX));
        assert!(!"handler.src".ends_with(TEST_SUFFIX));
    }

    #[test]
    fn empty_directories_are_removed_bottom_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        remove_empty_dirs(dir.path());
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn non_empty_directory_survives() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("keep.src"), b"package keep\n").unwrap();
        remove_empty_dirs(dir.path());
        assert!(nested.exists());
    }
}
