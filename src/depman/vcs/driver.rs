use std::path::Path;

use crate::version::Revision;

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("no progress from `{0}`")]
    NoProgress(String),
    #[error("VCS command `{command}` failed: {detail}")]
    Failed { command: String, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One entry of a source's commit history, as reported by `commitInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub revision: Revision,
    pub author: String,
    pub message: String,
}

/// `get`/`fetch`/`updateVersion`/`export`/`commitInfo` (§4.2), implemented by
/// shelling out to one VCS binary under a monitored command.
pub trait VcsDriver: Send + Sync {
    /// Clone `url` into `path` for the first time.
    fn get(&self, url: &str, path: &Path) -> Result<(), VcsError>;

    /// Update an existing local clone at `path` with upstream refs.
    fn fetch(&self, path: &Path) -> Result<(), VcsError>;

    /// Check out `reference` (branch, tag, or revision) in the working tree
    /// at `path`.
    fn update_version(&self, path: &Path, reference: &str) -> Result<(), VcsError>;

    /// Export `reference`'s tree (no VCS metadata) into `dest`.
    fn export(&self, path: &Path, reference: &str, dest: &Path) -> Result<(), VcsError>;

    /// List every tag/branch at `path` paired with the revision it resolves to.
    fn list_versions(&self, path: &Path) -> Result<Vec<(String, Revision)>, VcsError>;

    /// Resolve `reference` to a concrete revision without checking it out.
    fn resolve_revision(&self, path: &Path, reference: &str) -> Result<Revision, VcsError>;
}
