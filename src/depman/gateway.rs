//! Per-source finite state machine coordinating deduction → local init →
//! upstream fetch → version listing → manifest derivation → export,
//! serializing mutating operations (§4.5).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::analyzer::{Analyzer, AnalyzerError};
use crate::cache::SourceCache;
use crate::path_deduce::Candidate;
use crate::pkgtree::{walk_package_tree, PackageTree};
use crate::supervisor::{Supervisor, WorkKind};
use crate::vcs::VcsDriver;
use crate::version::{PairedVersion, Revision, UnpairedVersion};
use depman_schemas::{Lock, Manifest};
use depman_platform::PlatformTable;

pub mod state {
    pub const DEDUCED_URL: u8 = 1 << 0;
    pub const SET_UP: u8 = 1 << 1;
    pub const EXISTS_UPSTREAM: u8 = 1 << 2;
    pub const EXISTS_LOCALLY: u8 = 1 << 3;
    pub const HAS_LATEST_VERSION_LIST: u8 = 1 << 4;
    pub const HAS_LATEST_LOCALLY: u8 = 1 << 5;
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Vcs(#[from] crate::vcs::VcsError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::SupervisorError),
    #[error("no candidate source URL worked for `{0}`")]
    NoWorkingCandidate(String),
    #[error("revision `{0}` not found for this source")]
    UnknownRevision(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct Inner {
    state: u8,
    chosen_candidate: Option<usize>,
    local_path: PathBuf,
    cache: Box<dyn SourceCache>,
}

/// One source's gateway: the project root it serves, its ordered candidate
/// locations, a driver for whichever VCS the chosen candidate speaks, and
/// the mutable state machine plus cache behind a single mutex. Mutating
/// transitions take this mutex for their whole duration, which is a
/// straightforward (if coarser than a promise-based design) way to satisfy
/// §4.5's "concurrent callers await the result" requirement.
pub struct Gateway {
    project_root: String,
    candidates: Vec<Candidate>,
    driver: Box<dyn VcsDriver>,
    supervisor: std::sync::Arc<Supervisor>,
    inner: Mutex<Inner>,
}

impl Gateway {
    pub fn new(
        project_root: String,
        candidates: Vec<Candidate>,
        driver: Box<dyn VcsDriver>,
        supervisor: std::sync::Arc<Supervisor>,
        local_path: PathBuf,
        cache: Box<dyn SourceCache>,
    ) -> Gateway {
        let state = if candidates.is_empty() { 0 } else { state::DEDUCED_URL };
        Gateway {
            project_root,
            candidates,
            driver,
            supervisor,
            inner: Mutex::new(Inner {
                state,
                chosen_candidate: None,
                local_path,
                cache,
            }),
        }
    }

    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    /// Drive the gateway's state forward to at least `required`, trying
    /// candidates in order until one succeeds.
    fn ensure_state(&self, required: u8) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.state & required == required {
            return Ok(());
        }

        if required & state::SET_UP != 0 && inner.state & state::SET_UP == 0 {
            let mut last_err = None;
            for (idx, candidate) in self.candidates.iter().enumerate() {
                let path = inner.local_path.clone();
                let url = candidate.url.clone();
                let result = self
                    .supervisor
                    .run(&format!("get {url}"), WorkKind::VcsClone, || self.driver.get(&url, &path));
                match result {
                    Ok(Ok(())) => {
                        inner.chosen_candidate = Some(idx);
                        inner.state |= state::SET_UP | state::EXISTS_UPSTREAM | state::EXISTS_LOCALLY;
                        last_err = None;
                        break;
                    }
                    Ok(Err(e)) => last_err = Some(GatewayError::Vcs(e)),
                    Err(e) => last_err = Some(GatewayError::Supervisor(e)),
                }
            }
            if let Some(e) = last_err {
                return Err(e);
            }
            if inner.state & state::SET_UP == 0 {
                return Err(GatewayError::NoWorkingCandidate(self.project_root.clone()));
            }
        }

        if required & state::HAS_LATEST_VERSION_LIST != 0 && inner.state & state::HAS_LATEST_VERSION_LIST == 0 {
            let path = inner.local_path.clone();
            self.supervisor
                .run(&format!("fetch {}", self.project_root), WorkKind::VcsFetch, || self.driver.fetch(&path))??;
            let raw = self.driver.list_versions(&path)?;
            let versions: Vec<PairedVersion> = raw
                .into_iter()
                .map(|(name, rev)| {
                    inner.cache.mark_revision_exists(&rev);
                    PairedVersion::new(classify_version_name(&name), rev)
                })
                .collect();
            inner.cache.set_version_map(&versions);
            inner.state |= state::HAS_LATEST_VERSION_LIST;
        }

        Ok(())
    }

    /// List every version this source currently reports, sorted per the
    /// upgrade policy.
    pub fn list_versions(&self) -> Result<Vec<PairedVersion>, GatewayError> {
        self.ensure_state(state::SET_UP | state::HAS_LATEST_VERSION_LIST)?;
        let inner = self.inner.lock().unwrap();
        let mut versions = inner.cache.get_all_versions();
        crate::version::sort_for_upgrade(&mut versions, false);
        Ok(versions)
    }

    /// Derive (or fetch from cache) the manifest and lock for `rev`.
    pub fn manifest_and_lock(&self, rev: &Revision, analyzer: &dyn Analyzer) -> Result<(Manifest, Lock), GatewayError> {
        self.ensure_state(state::SET_UP)?;
        {
            let inner = self.inner.lock().unwrap();
            if let Some(hit) = inner.cache.get_manifest_and_lock(rev, (analyzer.name(), analyzer.version())) {
                return Ok(hit);
            }
        }

        let export_dir = tempfile::tempdir()?;
        self.export_revision(rev, export_dir.path())?;
        let (manifest, lock) = analyzer.derive_manifest_and_lock(export_dir.path(), &self.project_root)?;

        let mut inner = self.inner.lock().unwrap();
        inner
            .cache
            .set_manifest_and_lock(rev, (analyzer.name(), analyzer.version()), &manifest, &lock);
        Ok((manifest, lock))
    }

    /// Fetch (or compute from cache) the package tree at `rev`.
    pub fn package_tree(&self, rev: &Revision, platforms: &PlatformTable) -> Result<PackageTree, GatewayError> {
        self.ensure_state(state::SET_UP)?;
        {
            let inner = self.inner.lock().unwrap();
            if let Some(hit) = inner.cache.get_package_tree(rev) {
                return Ok(hit);
            }
        }

        let export_dir = tempfile::tempdir()?;
        self.export_revision(rev, export_dir.path())?;
        let tree = walk_package_tree(export_dir.path(), &self.project_root, platforms);

        let mut inner = self.inner.lock().unwrap();
        inner.cache.set_package_tree(rev, &tree);
        Ok(tree)
    }

    /// Whether `rev` is a revision this source has ever reported, whether
    /// through a tag/branch or a raw resolved commit.
    pub fn revision_present(&self, rev: &Revision) -> Result<bool, GatewayError> {
        self.ensure_state(state::SET_UP | state::HAS_LATEST_VERSION_LIST)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.cache.revision_exists(rev))
    }

    /// Export `rev` into `dest`, requiring the source be locally set up
    /// first. Nested `vendor/` directories are stripped per policy.
    pub fn export(&self, rev: &Revision, dest: &Path, strip_nested_vendor: bool) -> Result<(), GatewayError> {
        self.ensure_state(state::SET_UP | state::EXISTS_LOCALLY)?;
        self.export_revision(rev, dest)?;
        if strip_nested_vendor {
            strip_nested_vendor_dirs(dest)?;
        }
        Ok(())
    }

    fn export_revision(&self, rev: &Revision, dest: &Path) -> Result<(), GatewayError> {
        let inner = self.inner.lock().unwrap();
        let path = inner.local_path.clone();
        drop(inner);
        self.supervisor
            .run(&format!("export {} @ {}", self.project_root, rev), WorkKind::VcsExport, || {
                self.driver.export(&path, &rev.0, dest)
            })??;
        Ok(())
    }
}

/// A name reported by `list_versions` carries no tag distinguishing a
/// branch from a tag; treat anything parseable as semver (with an optional
/// `v` prefix) as a semver version and fall back to a plain tag otherwise.
/// This errs toward `Plain`, which the solver only matches by exact string
/// equality — the safe default when a name's kind is ambiguous.
fn classify_version_name(name: &str) -> UnpairedVersion {
    let trimmed = name.strip_prefix('v').unwrap_or(name);
    match semver::Version::parse(trimmed) {
        Ok(v) => UnpairedVersion::Semver(v),
        Err(_) => UnpairedVersion::Plain(name.to_string()),
    }
}

fn strip_nested_vendor_dirs(root: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_dir() && entry.file_name() == "vendor" {
            depman_util::paths::remove_dir_all(entry.path()).ok();
        }
    }
    Ok(())
}
