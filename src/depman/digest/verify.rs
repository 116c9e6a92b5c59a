use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

use super::hash::{digest_from_directory, Digest};

/// Outcome of comparing one project's recorded digest against what is
/// actually on disk under the vendor root (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestStatus {
    /// Present in the vendor tree but the lock records no digest for it.
    NotInLock,
    /// Recorded in the lock but no matching directory exists in the tree.
    NotInTree,
    /// Recorded digest and the tree's computed digest agree.
    NoMismatch,
    /// The lock recorded [`Digest::EMPTY`] for this project — never hashed.
    EmptyDigestInLock,
    /// Recorded digest and the tree's computed digest disagree.
    DigestMismatchInLock,
}

/// Compare `vendor_root` against `expected`, a map of project import path
/// to the digest recorded for it in the lock, and report the status of
/// every project path encountered on either side.
///
/// Traversal stops descending into a directory as soon as its relative
/// path (using `/` regardless of platform) matches a key of `expected` —
/// that subtree is hashed as a whole and compared, rather than walked
/// project-by-project. A node that matches, and every ancestor directory
/// between it and `vendor_root`, is "required" (§4.10 step 2) and never
/// reported itself; a node that is *not* required is reported as
/// [`DigestStatus::NotInLock`] only when its immediate parent *is*
/// required (§4.10 step 3) — so the namespace segments leading up to a
/// matched project (e.g. `github.com`, `github.com/alice` for a project
/// rooted at `github.com/alice/tool`) never produce spurious entries,
/// while an untracked sibling directory next to a real project does.
pub fn verify_dep_tree(
    vendor_root: &Path,
    expected: &BTreeMap<String, Digest>,
) -> io::Result<BTreeMap<String, DigestStatus>> {
    let mut parents: BTreeMap<String, String> = BTreeMap::new();
    let mut matches: Vec<String> = Vec::new();
    let mut statuses = BTreeMap::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    walk(vendor_root, vendor_root, None, expected, &mut parents, &mut matches, &mut statuses, &mut seen)?;

    let mut required: BTreeSet<String> = BTreeSet::new();
    for m in &matches {
        let mut cur = Some(m.clone());
        while let Some(node) = cur {
            if !required.insert(node.clone()) {
                break;
            }
            cur = parents.get(&node).cloned();
        }
    }

    for (child, parent) in &parents {
        if required.contains(child) {
            continue;
        }
        if required.contains(parent) {
            statuses.insert(child.clone(), DigestStatus::NotInLock);
        }
    }

    for path in expected.keys() {
        if !seen.contains(path) {
            statuses.insert(path.clone(), DigestStatus::NotInTree);
        }
    }

    Ok(statuses)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    vendor_root: &Path,
    dir: &Path,
    parent_rel: Option<&str>,
    expected: &BTreeMap<String, Digest>,
    parents: &mut BTreeMap<String, String>,
    matches: &mut Vec<String>,
    statuses: &mut BTreeMap<String, DigestStatus>,
    seen: &mut BTreeSet<String>,
) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let rel = path
            .strip_prefix(vendor_root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");

        if let Some(parent) = parent_rel {
            parents.insert(rel.clone(), parent.to_string());
        }

        if let Some(recorded) = expected.get(&rel) {
            seen.insert(rel.clone());
            matches.push(rel.clone());
            let status = if recorded.is_empty() {
                DigestStatus::EmptyDigestInLock
            } else {
                let actual = digest_from_directory(&path)?;
                if actual == *recorded {
                    DigestStatus::NoMismatch
                } else {
                    DigestStatus::DigestMismatchInLock
                }
            };
            statuses.insert(rel, status);
        } else {
            walk(vendor_root, &path, Some(&rel), expected, parents, matches, statuses, seen)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn reports_all_five_statuses() {
        let root = tempfile::tempdir().unwrap();

        write(root.path(), "alice/match/main.src", b"package main\n");
        write(root.path(), "alice/mismatch/main.src", b"package main\n");
        write(root.path(), "bob/empty/main.src", b"package main\n");
        write(root.path(), "alice/notInLock/main.src", b"package main\n");

        let match_digest = digest_from_directory(&root.path().join("alice/match")).unwrap();

        let mut expected = BTreeMap::new();
        expected.insert("alice/match".to_string(), match_digest);
        expected.insert("alice/mismatch".to_string(), "a1".repeat(32).parse().unwrap());
        expected.insert("bob/empty".to_string(), Digest::EMPTY);
        expected.insert("charlie/notInTree".to_string(), "c1".repeat(32).parse().unwrap());

        let statuses = verify_dep_tree(root.path(), &expected).unwrap();

        assert_eq!(statuses.get("alice/match"), Some(&DigestStatus::NoMismatch));
        assert_eq!(statuses.get("alice/mismatch"), Some(&DigestStatus::DigestMismatchInLock));
        assert_eq!(statuses.get("bob/empty"), Some(&DigestStatus::EmptyDigestInLock));
        assert_eq!(statuses.get("charlie/notInTree"), Some(&DigestStatus::NotInTree));
        assert_eq!(statuses.get("alice/notInLock"), Some(&DigestStatus::NotInLock));
        assert_eq!(statuses.len(), 5, "namespace ancestors like `alice`/`bob` must not appear");
    }

    #[test]
    fn deep_project_root_does_not_report_ancestor_segments() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "github.com/alice/tool/main.src", b"package main\n");

        let digest = digest_from_directory(&root.path().join("github.com/alice/tool")).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("github.com/alice/tool".to_string(), digest);

        let statuses = verify_dep_tree(root.path(), &expected).unwrap();

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses.get("github.com/alice/tool"), Some(&DigestStatus::NoMismatch));
        assert!(!statuses.contains_key("github.com"));
        assert!(!statuses.contains_key("github.com/alice"));
    }

    #[test]
    fn stops_descending_once_a_project_matches() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "alice/proj/nested/deep.src", b"x\n");

        let digest = digest_from_directory(&root.path().join("alice/proj")).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("alice/proj".to_string(), digest);

        let statuses = verify_dep_tree(root.path(), &expected).unwrap();

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses.get("alice/proj"), Some(&DigestStatus::NoMismatch));
        assert!(!statuses.contains_key("alice/proj/nested"));
    }
}
