use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use depman_platform::{Platform, PlatformTable};
use serde::{Deserialize, Serialize};

/// Directory names that are never descended into while walking a tree.
const EXCLUDED_DIRS: &[&str] = &["vendor", "testdata", ".bzr", ".git", ".hg", ".svn"];

/// The conventional directory whose package is allowed to differ from its
/// siblings' declared name without being flagged as a conflict.
const DOCUMENTATION_PACKAGE: &str = "documentation";

/// One source-level package: its import path, declared short name, the
/// file (if any) carrying its package-level doc comment, and its ordered,
/// deduplicated regular and test import lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Package {
    pub import_path: String,
    pub name: String,
    pub doc_file: Option<String>,
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum WalkError {
    #[error("directory declares more than one package: {0:?}")]
    MultiplePackages(Vec<String>),
    #[error("failed to parse `{file}`: {reason}")]
    Parse { file: String, reason: String },
}

/// A directory either yields a well-formed [`Package`], or an error
/// explaining why it couldn't be turned into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageOrErr {
    Package(Package),
    Error(WalkError),
}

/// The result of walking one source tree: every package (or error) found,
/// keyed by its full import path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageTree {
    pub import_root: String,
    pub packages: BTreeMap<String, PackageOrErr>,
}

/// Walk `root_dir` on disk, treating it as the root of import path
/// `import_root`, collecting one [`PackageOrErr`] per directory that
/// contains at least one source file.
///
/// Idempotent and side-effect free: running it twice over an unchanged
/// tree produces an identical tree.
pub fn walk_package_tree(root_dir: &Path, import_root: &str, platforms: &PlatformTable) -> PackageTree {
    let mut tree = PackageTree {
        import_root: import_root.to_string(),
        packages: BTreeMap::new(),
    };
    walk_dir(root_dir, root_dir, import_root, platforms, &mut tree);
    tree
}

fn walk_dir(root_dir: &Path, dir: &Path, import_path: &str, platforms: &PlatformTable, tree: &mut PackageTree) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    let mut source_files = Vec::new();
    let mut subdirs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            if file_name.starts_with('_') || EXCLUDED_DIRS.contains(&file_name.as_str()) {
                continue;
            }
            subdirs.push((file_name, path));
        } else if file_name.ends_with(".src") {
            source_files.push(path);
        }
    }

    if !source_files.is_empty() {
        let pkg_or_err = parse_directory(root_dir, &source_files, import_path, platforms);
        tree.packages.insert(import_path.to_string(), pkg_or_err);
    }

    subdirs.sort();
    for (name, path) in subdirs {
        let child_import_path = if import_path.is_empty() {
            name
        } else {
            format!("{import_path}/{name}")
        };
        walk_dir(root_dir, &path, &child_import_path, platforms, tree);
    }
}

fn parse_directory(
    root_dir: &Path,
    files: &[PathBuf],
    import_path: &str,
    platforms: &PlatformTable,
) -> PackageOrErr {
    let mut names = Vec::new();
    let mut doc_file = None;
    let mut imports = Vec::new();
    let mut test_imports = Vec::new();

    let mut sorted_files = files.to_vec();
    sorted_files.sort();

    for file in &sorted_files {
        let content = match std::fs::read_to_string(file) {
            Ok(c) => c,
            Err(e) => {
                return PackageOrErr::Error(WalkError::Parse {
                    file: display_rel(root_dir, file),
                    reason: e.to_string(),
                })
            }
        };

        if let Some(constraint) = extract_build_constraint(&content) {
            match constraint.parse::<Platform>() {
                Ok(platform) if !platforms.any_satisfies(&platform) => continue,
                Err(e) => {
                    return PackageOrErr::Error(WalkError::Parse {
                        file: display_rel(root_dir, file),
                        reason: e.to_string(),
                    })
                }
                _ => {}
            }
        }

        let mut has_doc_comment = false;
        for line in content.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("//!") {
                if !rest.trim().is_empty() {
                    has_doc_comment = true;
                }
            } else if let Some(rest) = line.strip_prefix("package ") {
                names.push(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("import_test ") {
                test_imports.push(unquote(rest.trim()));
            } else if let Some(rest) = line.strip_prefix("import ") {
                imports.push(unquote(rest.trim()));
            }
        }

        if has_doc_comment && doc_file.is_none() {
            doc_file = Some(display_rel(root_dir, file));
        }
    }

    names.sort();
    names.dedup();

    let name = match names.len() {
        0 => import_path.rsplit('/').next().unwrap_or(import_path).to_string(),
        1 => names.into_iter().next().unwrap(),
        _ if names.iter().any(|n| n == DOCUMENTATION_PACKAGE) && names.len() == 2 => names
            .into_iter()
            .find(|n| n != DOCUMENTATION_PACKAGE)
            .unwrap(),
        _ => return PackageOrErr::Error(WalkError::MultiplePackages(names)),
    };

    imports.sort();
    imports.dedup();
    test_imports.sort();
    test_imports.dedup();

    PackageOrErr::Package(Package {
        import_path: import_path.to_string(),
        name,
        doc_file,
        imports,
        test_imports,
    })
}

fn extract_build_constraint(content: &str) -> Option<&str> {
    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("//depman:build ") {
            return Some(rest.trim());
        }
        if !line.is_empty() && !line.starts_with("//") {
            break;
        }
    }
    None
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

fn display_rel(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn single_package_with_imports() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "main.src",
            "package app\nimport \"example.com/a\"\nimport_test \"example.com/testhelper\"\n",
        );
        let tree = walk_package_tree(dir.path(), "example.com/app", &PlatformTable::default());
        let pkg = match tree.packages.get("example.com/app").unwrap() {
            PackageOrErr::Package(p) => p,
            PackageOrErr::Error(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(pkg.name, "app");
        assert_eq!(pkg.imports, vec!["example.com/a".to_string()]);
        assert_eq!(pkg.test_imports, vec!["example.com/testhelper".to_string()]);
    }

    #[test]
    fn conflicting_package_names_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.src", "package one\n");
        write(dir.path(), "b.src", "package two\n");
        let tree = walk_package_tree(dir.path(), "example.com/app", &PlatformTable::default());
        match tree.packages.get("example.com/app").unwrap() {
            PackageOrErr::Error(WalkError::MultiplePackages(names)) => {
                assert_eq!(names, &["one".to_string(), "two".to_string()]);
            }
            other => panic!("expected MultiplePackages, got {other:?}"),
        }
    }

    #[test]
    fn documentation_package_exception() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.src", "package app\n");
        write(dir.path(), "doc.src", "package documentation\n");
        let tree = walk_package_tree(dir.path(), "example.com/app", &PlatformTable::default());
        match tree.packages.get("example.com/app").unwrap() {
            PackageOrErr::Package(p) => assert_eq!(p.name, "app"),
            other => panic!("expected Package, got {other:?}"),
        }
    }

    #[test]
    fn excluded_directories_are_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "vendor/x.src", "package x\n");
        write(dir.path(), "_hidden/y.src", "package y\n");
        write(dir.path(), "testdata/z.src", "package z\n");
        write(dir.path(), "main.src", "package app\n");
        let tree = walk_package_tree(dir.path(), "example.com/app", &PlatformTable::default());
        assert_eq!(tree.packages.len(), 1);
    }

    #[test]
    fn unsatisfiable_build_constraint_skips_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "plan9_only.src",
            "//depman:build cfg(target_os = \"plan9\")\npackage app\nimport \"example.com/only-plan9\"\n",
        );
        write(dir.path(), "main.src", "package app\nimport \"example.com/a\"\n");
        let tree = walk_package_tree(dir.path(), "example.com/app", &PlatformTable::default());
        let pkg = match tree.packages.get("example.com/app").unwrap() {
            PackageOrErr::Package(p) => p,
            other => panic!("expected Package, got {other:?}"),
        };
        assert_eq!(pkg.imports, vec!["example.com/a".to_string()]);
    }
}
