//! Owns the cache directory's exclusive lock, the deduction coordinator, and
//! the lazily-populated project-root → gateway map. This is the single
//! entry point both the solver and a front-end talk to (§4.7).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depman_platform::PlatformTable;
use depman_schemas::{Lock, Manifest};
use jiff::Timestamp;

use crate::analyzer::Analyzer;
use crate::cache::PersistentCache;
use crate::gateway::{Gateway, GatewayError};
use crate::path_deduce::{Candidate, DeductionError, PathDeducer, VcsKind};
use crate::pkgtree::PackageTree;
use crate::solver::ProjectProvider;
use crate::supervisor::Supervisor;
use crate::vcs;
use crate::version::{Constraint, PairedVersion, Revision, UnpairedVersion, Version};

/// A project root together with an optional explicit source override, the
/// unit the solver and front-end address a gateway by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentifier {
    pub project_root: String,
    pub source: Option<String>,
}

impl ProjectIdentifier {
    pub fn new(project_root: impl Into<String>) -> ProjectIdentifier {
        ProjectIdentifier {
            project_root: project_root.into(),
            source: None,
        }
    }

    pub fn with_source(project_root: impl Into<String>, source: impl Into<String>) -> ProjectIdentifier {
        ProjectIdentifier {
            project_root: project_root.into(),
            source: Some(source.into()),
        }
    }

    fn gateway_key(&self) -> String {
        match &self.source {
            Some(s) => format!("{}\0{s}", self.project_root),
            None => self.project_root.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceManagerError {
    #[error("cache directory `{0}` is already in use by another source manager")]
    CacheInUse(String),
    #[error("no VCS driver available for `{0}`")]
    NoDriver(String),
    #[error("version `{0}` is not known to this source")]
    UnknownVersion(String),
    #[error(transparent)]
    Deduction(#[from] DeductionError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Cache(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Owns the cache directory lock, the deduction coordinator, the per-source
/// gateway map, and the top-level supervisor (§4.7, §5's shared-resources
/// list). `Release` tears all of this down; `Drop` is a last-resort
/// safety net that only clears the lock file, since it cannot block on the
/// supervisor's graceful shutdown grace period.
pub struct SourceManager {
    cache_dir: PathBuf,
    lock_file: Mutex<Option<File>>,
    deducer: PathDeducer,
    gateways: Mutex<HashMap<String, Arc<Gateway>>>,
    supervisor: Arc<Supervisor>,
    analyzer: Arc<dyn Analyzer>,
    platforms: PlatformTable,
    read_epoch: Timestamp,
}

impl SourceManager {
    pub fn new(cache_dir: impl Into<PathBuf>, analyzer: Arc<dyn Analyzer>) -> Result<SourceManager, SourceManagerError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        fs::create_dir_all(cache_dir.join("sources"))?;

        let lock_path = cache_dir.join("sm.lock");
        let lock_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|_| SourceManagerError::CacheInUse(cache_dir.display().to_string()))?;

        Ok(SourceManager {
            cache_dir,
            lock_file: Mutex::new(Some(lock_file)),
            deducer: PathDeducer::new(),
            gateways: Mutex::new(HashMap::new()),
            supervisor: Arc::new(Supervisor::default()),
            analyzer,
            platforms: PlatformTable::default(),
            read_epoch: Timestamp::now(),
        })
    }

    pub fn deduce_project_root(&self, path: &str) -> Result<String, SourceManagerError> {
        Ok(self.deducer.deduce(path)?.project_root)
    }

    pub fn source_urls_for_path(&self, path: &str) -> Result<Vec<String>, SourceManagerError> {
        Ok(self.deducer.deduce(path)?.candidates.into_iter().map(|c| c.url).collect())
    }

    pub fn list_versions(&self, id: &ProjectIdentifier) -> Result<Vec<PairedVersion>, SourceManagerError> {
        Ok(self.gateway_for(id)?.list_versions()?)
    }

    pub fn revision_present_in(&self, id: &ProjectIdentifier, rev: &Revision) -> Result<bool, SourceManagerError> {
        Ok(self.gateway_for(id)?.revision_present(rev)?)
    }

    pub fn list_packages(&self, id: &ProjectIdentifier, v: &Version) -> Result<PackageTree, SourceManagerError> {
        let gateway = self.gateway_for(id)?;
        let rev = self.resolve_revision(&gateway, v)?;
        Ok(gateway.package_tree(&rev, &self.platforms)?)
    }

    pub fn get_manifest_and_lock(&self, id: &ProjectIdentifier, v: &Version) -> Result<(Manifest, Lock), SourceManagerError> {
        let gateway = self.gateway_for(id)?;
        let rev = self.resolve_revision(&gateway, v)?;
        Ok(gateway.manifest_and_lock(&rev, self.analyzer.as_ref())?)
    }

    pub fn export_project(&self, id: &ProjectIdentifier, v: &Version, dest: &Path) -> Result<(), SourceManagerError> {
        let gateway = self.gateway_for(id)?;
        let rev = self.resolve_revision(&gateway, v)?;
        Ok(gateway.export(&rev, dest, true)?)
    }

    /// Classify a user-typed constraint string, refining the context-free
    /// guess in [`Constraint::from_str`] against this project's actually
    /// available versions: a bare string that matches a known branch or
    /// plain tag name is tagged accordingly, and one that matches (a prefix
    /// of) a known revision becomes a revision constraint.
    pub fn infer_constraint(&self, raw: &str, id: &ProjectIdentifier) -> Result<Constraint, SourceManagerError> {
        let context_free = raw.parse::<Constraint>().unwrap_or_else(|_| Constraint::Plain(raw.to_string()));
        if !matches!(context_free, Constraint::Plain(_)) {
            return Ok(context_free);
        }

        for v in self.list_versions(id)? {
            match v.unpaired() {
                UnpairedVersion::Branch { name, .. } if name == raw => return Ok(Constraint::Branch(raw.to_string())),
                UnpairedVersion::Plain(s) if s == raw => return Ok(Constraint::Plain(raw.to_string())),
                _ => {}
            }
            if v.revision().0 == raw || (raw.len() >= 7 && v.revision().0.starts_with(raw)) {
                return Ok(Constraint::Revision(v.revision().clone()));
            }
        }
        Ok(context_free)
    }

    /// Cancel the supervisor, drop every open gateway, and release the
    /// cache directory's exclusive lock.
    pub fn release(&self) {
        let _ = self.supervisor.shutdown(Duration::from_secs(60));
        self.gateways.lock().unwrap().clear();
        if let Some(lock_file) = self.lock_file.lock().unwrap().take() {
            drop(lock_file);
            let _ = fs::remove_file(self.cache_dir.join("sm.lock"));
        }
    }

    fn gateway_for(&self, id: &ProjectIdentifier) -> Result<Arc<Gateway>, SourceManagerError> {
        let key = id.gateway_key();
        if let Some(g) = self.gateways.lock().unwrap().get(&key) {
            return Ok(g.clone());
        }

        let deduction = self.deducer.deduce(&id.project_root)?;
        let candidates: Vec<Candidate> = match &id.source {
            Some(url) => {
                if let Some(registry_base) = url.strip_prefix("registry+") {
                    vec![Candidate {
                        vcs: VcsKind::Registry,
                        url: format!("{registry_base}#{}", id.project_root),
                    }]
                } else {
                    vec![Candidate {
                        vcs: deduction
                            .candidates
                            .iter()
                            .find(|c| &c.url == url)
                            .map(|c| c.vcs)
                            .unwrap_or(VcsKind::Git),
                        url: url.clone(),
                    }]
                }
            }
            None => deduction.candidates,
        };

        let vcs_kind = candidates.first().map(|c| c.vcs).unwrap_or(VcsKind::Git);
        let driver = vcs::driver_for(vcs_kind).ok_or_else(|| SourceManagerError::NoDriver(id.project_root.clone()))?;

        let url_hash = depman_util::hash::sha256_bytes(id.project_root.as_bytes());
        let local_path = self.cache_dir.join("sources").join(&url_hash[..16]).join(&id.project_root);

        let cache_db = self.cache_dir.join("bolt.db");
        let cache = PersistentCache::open(&cache_db, &id.project_root, self.read_epoch)?;

        let gateway = Arc::new(Gateway::new(
            id.project_root.clone(),
            candidates,
            driver,
            self.supervisor.clone(),
            local_path,
            Box::new(cache),
        ));

        self.gateways.lock().unwrap().insert(key, gateway.clone());
        Ok(gateway)
    }

    fn resolve_revision(&self, gateway: &Gateway, v: &Version) -> Result<Revision, SourceManagerError> {
        match v {
            Version::Revision(r) => Ok(r.clone()),
            Version::Paired(p) => Ok(p.revision().clone()),
            Version::Unpaired(u) => gateway
                .list_versions()?
                .into_iter()
                .find(|p| p.unpaired() == u)
                .map(|p| p.revision().clone())
                .ok_or_else(|| SourceManagerError::UnknownVersion(u.to_string())),
        }
    }
}

impl Drop for SourceManager {
    fn drop(&mut self) {
        if let Some(lock_file) = self.lock_file.lock().unwrap().take() {
            drop(lock_file);
            let _ = fs::remove_file(self.cache_dir.join("sm.lock"));
        }
    }
}

impl ProjectProvider for SourceManager {
    fn list_versions(&self, project_root: &str) -> anyhow::Result<Vec<PairedVersion>> {
        Ok(SourceManager::list_versions(self, &ProjectIdentifier::new(project_root))?)
    }

    fn manifest_for(&self, project_root: &str, revision: &Revision) -> anyhow::Result<Manifest> {
        let gateway = self.gateway_for(&ProjectIdentifier::new(project_root))?;
        let (manifest, _lock) = gateway.manifest_and_lock(revision, self.analyzer.as_ref())?;
        Ok(manifest)
    }

    fn project_root_for_import(&self, import_path: &str) -> anyhow::Result<String> {
        Ok(SourceManager::deduce_project_root(self, import_path)?)
    }
}

/// A front-end typically holds its `SourceManager` by shared reference
/// (it outlives any one solve to also drive materialization and digest
/// verification), so the solver seam is implemented for the reference too.
impl ProjectProvider for &SourceManager {
    fn list_versions(&self, project_root: &str) -> anyhow::Result<Vec<PairedVersion>> {
        ProjectProvider::list_versions(*self, project_root)
    }

    fn manifest_for(&self, project_root: &str, revision: &Revision) -> anyhow::Result<Manifest> {
        ProjectProvider::manifest_for(*self, project_root, revision)
    }

    fn project_root_for_import(&self, import_path: &str) -> anyhow::Result<String> {
        ProjectProvider::project_root_for_import(*self, import_path)
    }
}
