//! The analyzer interface (§6): derives a manifest and lock from a checked
//! out project tree. depman ships no analyzer of its own — a front-end
//! supplies one appropriate to whatever manifest syntax its projects use —
//! but the identity it reports is load-bearing: a cache entry is reusable
//! only if the analyzer identity matches exactly.

use std::path::Path;

use depman_schemas::{Lock, Manifest};

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("failed to derive manifest/lock from `{dir}`: {reason}")]
    Derivation { dir: String, reason: String },
}

/// `DeriveManifestAndLock(dir, root) -> (Manifest, Lock)` plus an identity.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    fn derive_manifest_and_lock(&self, dir: &Path, project_root: &str) -> Result<(Manifest, Lock), AnalyzerError>;
}

/// An analyzer that always reports an empty manifest and lock: a
/// reasonable default for projects that declare no constraints of their
/// own, and useful in tests that only care about the solver's behavior
/// given externally-supplied constraints.
pub struct NullAnalyzer;

impl Analyzer for NullAnalyzer {
    fn name(&self) -> &str {
        "depman-null-analyzer"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn derive_manifest_and_lock(&self, _dir: &Path, _project_root: &str) -> Result<(Manifest, Lock), AnalyzerError> {
        Ok((Manifest::default(), Lock::default()))
    }
}
