//! DPLL-style backtracking version solver with conflict-directed
//! backjumping (§4.8).

mod backtrack;
mod failure;
mod select;

pub use backtrack::{IneffectualConstraint, ProjectProvider, SolveError, SolveParams, Solution, Solver};
pub use failure::{Failure, RejectedCandidate};

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use depman_schemas::{Manifest, ProjectProperties};

    use super::*;
    use crate::pkgtree::{IgnoreSet, ReachMap};
    use crate::version::{PairedVersion, Revision, UnpairedVersion};

    struct FakeProvider {
        versions: BTreeMap<String, Vec<PairedVersion>>,
        manifests: BTreeMap<(String, String), Manifest>,
    }

    impl ProjectProvider for FakeProvider {
        fn list_versions(&self, project_root: &str) -> anyhow::Result<Vec<PairedVersion>> {
            Ok(self.versions.get(project_root).cloned().unwrap_or_default())
        }

        fn manifest_for(&self, project_root: &str, revision: &Revision) -> anyhow::Result<Manifest> {
            Ok(self
                .manifests
                .get(&(project_root.to_string(), revision.0.clone()))
                .cloned()
                .unwrap_or_default())
        }

        fn project_root_for_import(&self, import_path: &str) -> anyhow::Result<String> {
            Ok(import_path.to_string())
        }
    }

    fn sv(rev: &str, version: &str) -> PairedVersion {
        PairedVersion::new(UnpairedVersion::Semver(version.parse().unwrap()), Revision(rev.into()))
    }

    fn reach_with(root: &str, imports: &[&str]) -> ReachMap {
        use crate::pkgtree::{Package, PackageOrErr, PackageTree};
        let mut tree = PackageTree {
            import_root: root.to_string(),
            packages: BTreeMap::new(),
        };
        tree.packages.insert(
            root.to_string(),
            PackageOrErr::Package(Package {
                import_path: root.to_string(),
                name: "app".into(),
                doc_file: None,
                imports: imports.iter().map(|s| s.to_string()).collect(),
                test_imports: Vec::new(),
            }),
        );
        tree.to_reach_map(true, false, true, &IgnoreSet::default(), |_| false)
    }

    fn params(root: &str, reach: ReachMap, manifest: Manifest) -> SolveParams {
        SolveParams {
            root_project_root: root.to_string(),
            root_reach: reach,
            ignored: BTreeSet::new(),
            required: BTreeSet::new(),
            manifest,
            lock: None,
            update_list: BTreeSet::new(),
            downgrade: false,
            input_hash: "deadbeef".into(),
        }
    }

    #[test]
    fn trivial_solve_picks_highest_semver_by_default() {
        let provider = FakeProvider {
            versions: BTreeMap::from([(
                "github.com/a/b".to_string(),
                vec![sv("rev1", "1.0.0"), sv("rev2", "1.1.0")],
            )]),
            manifests: BTreeMap::new(),
        };
        let solver = Solver::new(provider, "test-analyzer", "1");
        let reach = reach_with("github.com/a/root", &["github.com/a/b"]);
        let solution = solver.solve(params("github.com/a/root", reach, Manifest::default())).unwrap();
        assert_eq!(solution.projects.len(), 1);
        assert_eq!(solution.projects[0].revision, "rev2");
    }

    #[test]
    fn downgrade_mode_picks_lowest_semver() {
        let provider = FakeProvider {
            versions: BTreeMap::from([(
                "github.com/a/b".to_string(),
                vec![sv("rev1", "1.0.0"), sv("rev2", "1.1.0")],
            )]),
            manifests: BTreeMap::new(),
        };
        let solver = Solver::new(provider, "test-analyzer", "1");
        let reach = reach_with("github.com/a/root", &["github.com/a/b"]);
        let mut p = params("github.com/a/root", reach, Manifest::default());
        p.downgrade = true;
        let solution = solver.solve(p).unwrap();
        assert_eq!(solution.projects[0].revision, "rev1");
    }

    #[test]
    fn conflict_backjumps_to_the_contributing_selection() {
        let mut manifests = BTreeMap::new();
        manifests.insert(
            ("github.com/a".to_string(), "a-rev-1.0.0".to_string()),
            manifest_requiring("github.com/b", "^2.0.0"),
        );
        manifests.insert(
            ("github.com/a".to_string(), "a-rev-1.1.0".to_string()),
            manifest_requiring("github.com/b", "^3.0.0"),
        );

        let provider = FakeProvider {
            versions: BTreeMap::from([
                (
                    "github.com/a".to_string(),
                    vec![sv("a-rev-1.0.0", "1.0.0"), sv("a-rev-1.1.0", "1.1.0")],
                ),
                ("github.com/b".to_string(), vec![sv("b-rev-2.0.0", "2.0.0")]),
            ]),
            manifests,
        };
        let solver = Solver::new(provider, "test-analyzer", "1");
        let reach = reach_with("github.com/root", &["github.com/a"]);
        let mut manifest = Manifest::default();
        manifest.dependencies.insert(
            "github.com/a".to_string(),
            ProjectProperties {
                source: None,
                constraint: Some("^1.0.0".to_string()),
            },
        );
        let solution = solver.solve(params("github.com/root", reach, manifest)).unwrap();

        let a = solution.projects.iter().find(|p| p.name == "github.com/a").unwrap();
        let b = solution.projects.iter().find(|p| p.name == "github.com/b").unwrap();
        assert_eq!(a.revision, "a-rev-1.0.0");
        assert_eq!(b.revision, "b-rev-2.0.0");
        assert_eq!(solution.attempt_count, 2);
    }

    fn manifest_requiring(root: &str, constraint: &str) -> Manifest {
        let mut m = Manifest::default();
        m.dependencies.insert(
            root.to_string(),
            ProjectProperties {
                source: None,
                constraint: Some(constraint.to_string()),
            },
        );
        m
    }
}
