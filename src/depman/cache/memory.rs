use std::collections::{HashMap, HashSet};

use depman_schemas::{Lock, Manifest};

use crate::pkgtree::PackageTree;
use crate::version::{PairedVersion, Revision, UnpairedVersion};

use super::{AnalyzerId, SourceCache};

/// Plain in-process mappings (§4.4). All operations are O(1) or O(log n);
/// there is no freshness concept to enforce since the cache never outlives
/// the process that populated it.
#[derive(Default)]
pub struct MemoryCache {
    manifest_lock: HashMap<(String, String, String), (Manifest, Lock)>,
    package_trees: HashMap<String, PackageTree>,
    versions: Vec<PairedVersion>,
    revision_to_unpaired: HashMap<String, Vec<UnpairedVersion>>,
    unpaired_to_revision: HashMap<String, Revision>,
    known_revisions: HashSet<String>,
}

fn unpaired_key(u: &UnpairedVersion) -> String {
    u.as_str_repr()
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache::default()
    }
}

impl SourceCache for MemoryCache {
    fn set_manifest_and_lock(&mut self, rev: &Revision, analyzer: AnalyzerId<'_>, manifest: &Manifest, lock: &Lock) {
        self.manifest_lock.insert(
            (rev.0.clone(), analyzer.0.to_string(), analyzer.1.to_string()),
            (manifest.clone(), lock.clone()),
        );
    }

    fn get_manifest_and_lock(&self, rev: &Revision, analyzer: AnalyzerId<'_>) -> Option<(Manifest, Lock)> {
        self.manifest_lock
            .get(&(rev.0.clone(), analyzer.0.to_string(), analyzer.1.to_string()))
            .cloned()
    }

    fn set_package_tree(&mut self, rev: &Revision, tree: &PackageTree) {
        self.package_trees.insert(rev.0.clone(), tree.clone());
    }

    fn get_package_tree(&self, rev: &Revision) -> Option<PackageTree> {
        self.package_trees.get(&rev.0).cloned()
    }

    fn set_version_map(&mut self, versions: &[PairedVersion]) {
        self.versions = versions.to_vec();
        self.revision_to_unpaired.clear();
        self.unpaired_to_revision.clear();
        for v in versions {
            self.revision_to_unpaired
                .entry(v.revision().0.clone())
                .or_default()
                .push(v.unpaired().clone());
            self.unpaired_to_revision
                .insert(unpaired_key(v.unpaired()), v.revision().clone());
        }
    }

    fn get_all_versions(&self) -> Vec<PairedVersion> {
        self.versions.clone()
    }

    fn get_versions_for(&self, rev: &Revision) -> Option<Vec<UnpairedVersion>> {
        self.revision_to_unpaired.get(&rev.0).cloned()
    }

    fn get_revision_for(&self, uv: &UnpairedVersion) -> Option<Revision> {
        self.unpaired_to_revision.get(&unpaired_key(uv)).cloned()
    }

    fn mark_revision_exists(&mut self, rev: &Revision) {
        self.known_revisions.insert(rev.0.clone());
    }

    fn revision_exists(&self, rev: &Revision) -> bool {
        self.known_revisions.contains(&rev.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version as SemverVersion;

    #[test]
    fn version_map_round_trips_both_directions() {
        let mut cache = MemoryCache::new();
        let uv = UnpairedVersion::Semver(SemverVersion::parse("1.2.3").unwrap());
        let rev = Revision("deadbeef".into());
        cache.set_version_map(&[PairedVersion::new(uv.clone(), rev.clone())]);
        assert_eq!(cache.get_revision_for(&uv), Some(rev.clone()));
        assert_eq!(cache.get_versions_for(&rev), Some(vec![uv]));
    }

    #[test]
    fn manifest_cache_keys_on_analyzer_identity() {
        let mut cache = MemoryCache::new();
        let rev = Revision("abc".into());
        cache.set_manifest_and_lock(
            &rev,
            ("depman-analyzer", "1"),
            &Manifest::default(),
            &Lock::default(),
        );
        assert!(cache.get_manifest_and_lock(&rev, ("depman-analyzer", "1")).is_some());
        assert!(cache.get_manifest_and_lock(&rev, ("depman-analyzer", "2")).is_none());
    }
}
