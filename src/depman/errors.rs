//! Error-kind taxonomy (§7). Each kind carries enough structure for a
//! caller to decide whether to retry, surface to the user, or demote to a
//! cache miss; the propagation policy documented on each variant is
//! enforced by the modules that raise it, not by this type itself.

use std::path::PathBuf;

use crate::solver::Failure;
use crate::version::Constraint;

#[derive(Debug, thiserror::Error)]
pub enum DepmanError {
    /// Rejected before a solve even begins: malformed inputs to `Prepare`.
    /// Fail fast, never retryable.
    #[error("invalid solver input: {0}")]
    Input(String),

    /// An import path could not be classified, or its vanity fetch
    /// contradicted itself. Fatal for the project it names.
    #[error("could not deduce source location for `{path}`: {reason}")]
    Deduction { path: String, reason: String },

    /// A VCS clone/fetch/checkout/export failed. Carries the captured
    /// activity buffer for diagnostics. Potentially retryable against the
    /// next candidate source URL.
    #[error("VCS operation `{operation}` failed for `{source}`: {detail}")]
    Vcs {
        source: String,
        operation: String,
        detail: String,
    },

    /// A monitored command produced no output for longer than its idle
    /// timeout. Retryable.
    #[error("no progress from `{0}` within the idle timeout")]
    NoProgress(String),

    /// The top-level cancellation handle fired. Not retryable.
    #[error("operation cancelled")]
    Cancellation,

    /// The persistent cache failed to open, read, or write. Logged and
    /// demoted to a cache miss wherever the caller can recompute.
    #[error("cache error: {0}")]
    Cache(String),

    /// The solver exhausted every backtracking option. Not a retry
    /// candidate; surfaced to the user verbatim.
    #[error("no solution satisfies the given constraints")]
    SolverConflict(Failure),

    /// One or more projects failed to export/prune during materialization.
    /// Per-project failures are collected into this single composite.
    #[error("failed to materialize {} project(s) into {vendor_root}", failures.len())]
    Materialization {
        vendor_root: PathBuf,
        failures: Vec<(String, String)>,
    },

    /// Advisory: the on-disk vendor tree disagrees with the lock. Never
    /// fatal at the library layer; the caller decides what to do with it.
    #[error("vendor tree digest mismatch for `{project_root}`")]
    DigestMismatch { project_root: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single rejected-candidate record, surfaced as part of a
/// [`DepmanError::SolverConflict`].
#[derive(Debug, Clone)]
pub struct RejectedVersion {
    pub version: String,
    pub rejected_by: Constraint,
}

impl std::fmt::Display for RejectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} rejected by {}", self.version, self.rejected_by)
    }
}

pub type Result<T> = std::result::Result<T, DepmanError>;
