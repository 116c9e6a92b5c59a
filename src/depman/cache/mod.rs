//! Per-source on-disk key-value cache of manifests, locks, package trees,
//! and version↔revision maps, timestamped against an epoch for freshness
//! (§4.4). Two back-ends share the [`SourceCache`] interface.

mod memory;
mod persistent;

pub use memory::MemoryCache;
pub use persistent::PersistentCache;

use depman_schemas::{Lock, Manifest};

use crate::pkgtree::PackageTree;
use crate::version::{PairedVersion, Revision, UnpairedVersion, Version};

/// Identifies which analyzer produced a cached manifest/lock pair; a cache
/// entry is reusable only if this matches exactly (§6).
pub type AnalyzerId<'a> = (&'a str, &'a str);

/// The operations both cache back-ends implement (§4.4). `&mut self` on the
/// write paths mirrors the fact that a single source's mutating cache
/// writes are already serialized by its gateway (§4.5); the trait itself
/// does not need interior mutability.
pub trait SourceCache: Send {
    fn set_manifest_and_lock(&mut self, rev: &Revision, analyzer: AnalyzerId<'_>, manifest: &Manifest, lock: &Lock);
    fn get_manifest_and_lock(&self, rev: &Revision, analyzer: AnalyzerId<'_>) -> Option<(Manifest, Lock)>;

    fn set_package_tree(&mut self, rev: &Revision, tree: &PackageTree);
    fn get_package_tree(&self, rev: &Revision) -> Option<PackageTree>;

    /// Atomically replace the version map and update each revision's
    /// reverse index.
    fn set_version_map(&mut self, versions: &[PairedVersion]);
    fn get_all_versions(&self) -> Vec<PairedVersion>;
    fn get_versions_for(&self, rev: &Revision) -> Option<Vec<UnpairedVersion>>;
    fn get_revision_for(&self, uv: &UnpairedVersion) -> Option<Revision>;

    fn mark_revision_exists(&mut self, rev: &Revision);
    fn revision_exists(&self, rev: &Revision) -> bool;

    fn to_revision(&self, v: &Version) -> Option<Revision> {
        match v {
            Version::Revision(r) => Some(r.clone()),
            Version::Paired(p) => Some(p.revision().clone()),
            Version::Unpaired(u) => self.get_revision_for(u),
        }
    }

    fn to_unpaired(&self, v: &Version) -> Option<UnpairedVersion> {
        match v {
            Version::Unpaired(u) => Some(u.clone()),
            Version::Paired(p) => Some(p.unpaired().clone()),
            Version::Revision(r) => self
                .get_versions_for(r)
                .and_then(|vs| vs.into_iter().next()),
        }
    }
}
