use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::walk::{PackageOrErr, PackageTree};

/// A set of import-path prefixes to prune from a reachability traversal
/// before it starts. A trailing `*` makes an entry a wildcard prefix match;
/// otherwise it is a literal match.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    literals: HashSet<String>,
    wildcard_prefixes: Vec<String>,
}

impl IgnoreSet {
    pub fn new(patterns: impl IntoIterator<Item = String>) -> IgnoreSet {
        let mut literals = HashSet::new();
        let mut wildcard_prefixes = Vec::new();
        for p in patterns {
            if let Some(stripped) = p.strip_suffix('*') {
                wildcard_prefixes.push(stripped.to_string());
            } else {
                literals.insert(p);
            }
        }
        IgnoreSet {
            literals,
            wildcard_prefixes,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.literals.contains(path) || self.wildcard_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// The outcome of reachability analysis for one internal package: either
/// the set of external import paths its compilation closure needs, or a
/// marker that it (or a dependency of it) is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReachEntry {
    External(BTreeSet<String>),
    Unreachable,
}

/// `ToReachMap` (§4.3): per local package, the transitive closure of
/// external import paths needed to compile it.
#[derive(Debug, Clone, Default)]
pub struct ReachMap(pub BTreeMap<String, ReachEntry>);

impl ReachMap {
    /// The union of every `External` entry's import paths: the flattened
    /// external import list the solver seeds its initial constraints from.
    pub fn all_external_imports(&self) -> BTreeSet<String> {
        let mut all = BTreeSet::new();
        for entry in self.0.values() {
            if let ReachEntry::External(set) = entry {
                all.extend(set.iter().cloned());
            }
        }
        all
    }
}

impl PackageTree {
    /// Build a reach map over this tree.
    ///
    /// - `include_main`: if false, packages named `main` are excluded as roots
    ///   (but may still be traversed as dependencies of included packages).
    /// - `include_tests`: whether test imports count as edges.
    /// - `backprop`: if true, a package that transitively depends on an
    ///   unreachable internal package is itself reported unreachable, rather
    ///   than silently reporting a partial external set.
    /// - `ignore`: import-path prefixes pruned before traversal.
    /// - `is_stdlib`: predicate stripping standard-library paths from the
    ///   external set.
    pub fn to_reach_map(
        &self,
        include_main: bool,
        include_tests: bool,
        backprop: bool,
        ignore: &IgnoreSet,
        is_stdlib: impl Fn(&str) -> bool,
    ) -> ReachMap {
        let mut memo: HashMap<String, ReachEntry> = HashMap::new();
        let mut in_progress: HashSet<String> = HashSet::new();

        for import_path in self.packages.keys() {
            if ignore.contains(import_path) {
                continue;
            }
            resolve(
                self,
                import_path,
                include_tests,
                backprop,
                ignore,
                &is_stdlib,
                &mut memo,
                &mut in_progress,
            );
        }

        let mut map = BTreeMap::new();
        for (path, pkg) in &self.packages {
            if ignore.contains(path) {
                continue;
            }
            if !include_main {
                if let PackageOrErr::Package(p) = pkg {
                    if p.name == "main" {
                        continue;
                    }
                }
            }
            if let Some(entry) = memo.get(path) {
                map.insert(path.clone(), entry.clone());
            }
        }
        ReachMap(map)
    }
}

fn resolve(
    tree: &PackageTree,
    import_path: &str,
    include_tests: bool,
    backprop: bool,
    ignore: &IgnoreSet,
    is_stdlib: &impl Fn(&str) -> bool,
    memo: &mut HashMap<String, ReachEntry>,
    in_progress: &mut HashSet<String>,
) -> ReachEntry {
    if let Some(cached) = memo.get(import_path) {
        return cached.clone();
    }
    if in_progress.contains(import_path) {
        // Import cycle: treat as an empty contribution rather than looping.
        return ReachEntry::External(BTreeSet::new());
    }

    let pkg = match tree.packages.get(import_path) {
        Some(PackageOrErr::Package(p)) => p,
        Some(PackageOrErr::Error(_)) | None => {
            let entry = ReachEntry::Unreachable;
            memo.insert(import_path.to_string(), entry.clone());
            return entry;
        }
    };

    in_progress.insert(import_path.to_string());

    let mut all_imports: Vec<&String> = pkg.imports.iter().collect();
    if include_tests {
        all_imports.extend(pkg.test_imports.iter());
    }

    let mut external = BTreeSet::new();
    let mut unreachable = false;

    for imp in all_imports {
        if ignore.contains(imp) {
            continue;
        }
        let is_internal = imp == &tree.import_root || imp.starts_with(&format!("{}/", tree.import_root));
        if !is_internal {
            if !is_stdlib(imp) {
                external.insert(imp.clone());
            }
            continue;
        }
        let child = resolve(tree, imp, include_tests, backprop, ignore, is_stdlib, memo, in_progress);
        match child {
            ReachEntry::External(set) => external.extend(set),
            ReachEntry::Unreachable => {
                if backprop {
                    unreachable = true;
                }
            }
        }
    }

    in_progress.remove(import_path);

    let entry = if unreachable {
        ReachEntry::Unreachable
    } else {
        ReachEntry::External(external)
    };
    memo.insert(import_path.to_string(), entry.clone());
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkgtree::walk::Package;

    fn tree_with(packages: Vec<(&str, PackageOrErr)>) -> PackageTree {
        let mut map = BTreeMap::new();
        for (k, v) in packages {
            map.insert(k.to_string(), v);
        }
        PackageTree {
            import_root: "example.com/app".into(),
            packages: map,
        }
    }

    fn pkg(import_path: &str, imports: &[&str]) -> PackageOrErr {
        PackageOrErr::Package(Package {
            import_path: import_path.into(),
            name: import_path.rsplit('/').next().unwrap().into(),
            doc_file: None,
            imports: imports.iter().map(|s| s.to_string()).collect(),
            test_imports: vec![],
        })
    }

    #[test]
    fn external_imports_are_collected() {
        let tree = tree_with(vec![(
            "example.com/app",
            pkg("example.com/app", &["example.com/dep/lib"]),
        )]);
        let reach = tree.to_reach_map(true, false, true, &IgnoreSet::default(), |_| false);
        match reach.0.get("example.com/app").unwrap() {
            ReachEntry::External(set) => assert!(set.contains("example.com/dep/lib")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stdlib_imports_are_stripped() {
        let tree = tree_with(vec![("example.com/app", pkg("example.com/app", &["std/io"]))]);
        let reach = tree.to_reach_map(true, false, true, &IgnoreSet::default(), |p| p.starts_with("std/"));
        match reach.0.get("example.com/app").unwrap() {
            ReachEntry::External(set) => assert!(set.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn backprop_propagates_errors_upward() {
        let tree = tree_with(vec![
            ("example.com/app", pkg("example.com/app", &["example.com/app/broken"])),
            (
                "example.com/app/broken",
                PackageOrErr::Error(super::super::walk::WalkError::MultiplePackages(vec![
                    "a".into(),
                    "b".into(),
                ])),
            ),
        ]);
        let reach = tree.to_reach_map(true, false, true, &IgnoreSet::default(), |_| false);
        assert_eq!(reach.0.get("example.com/app"), Some(&ReachEntry::Unreachable));
    }

    #[test]
    fn without_backprop_error_does_not_propagate() {
        let tree = tree_with(vec![
            ("example.com/app", pkg("example.com/app", &["example.com/app/broken"])),
            (
                "example.com/app/broken",
                PackageOrErr::Error(super::super::walk::WalkError::MultiplePackages(vec![
                    "a".into(),
                    "b".into(),
                ])),
            ),
        ]);
        let reach = tree.to_reach_map(true, false, false, &IgnoreSet::default(), |_| false);
        match reach.0.get("example.com/app").unwrap() {
            ReachEntry::External(set) => assert!(set.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wildcard_ignore_prunes_before_traversal() {
        let tree = tree_with(vec![(
            "example.com/app",
            pkg("example.com/app", &["example.com/internal/secret", "example.com/dep"]),
        )]);
        let ignore = IgnoreSet::new(["example.com/internal/*".to_string()]);
        let reach = tree.to_reach_map(true, false, true, &ignore, |_| false);
        match reach.0.get("example.com/app").unwrap() {
            ReachEntry::External(set) => {
                assert!(!set.contains("example.com/internal/secret"));
                assert!(set.contains("example.com/dep"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
