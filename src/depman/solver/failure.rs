//! The structured failure a solve reports when backtracking exhausts every
//! candidate for some root-level project (§4.8, §7).

use std::collections::BTreeMap;
use std::fmt;

use crate::version::Constraint;

/// One candidate version that was tried and rejected for a project, with
/// the constraint that rejected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub version: String,
    pub rejected_by: Constraint,
}

impl fmt::Display for RejectedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rejected by {})", self.version, self.rejected_by)
    }
}

/// Every project touched by a failed solve, paired with whichever versions
/// were attempted and why each was rejected. Carried verbatim out to the
/// caller as the payload of [`crate::errors::DepmanError::SolverConflict`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failure {
    pub rejected: BTreeMap<String, Vec<RejectedCandidate>>,
}

impl Failure {
    pub fn record(&mut self, project_root: &str, version: String, rejected_by: Constraint) {
        self.rejected
            .entry(project_root.to_string())
            .or_default()
            .push(RejectedCandidate { version, rejected_by });
    }

    pub fn attempt_count(&self) -> usize {
        self.rejected.values().map(Vec::len).sum()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "no solution satisfies the given constraints:")?;
        for (project, rejections) in &self.rejected {
            writeln!(f, "  {project}:")?;
            for r in rejections {
                writeln!(f, "    {r}")?;
            }
        }
        Ok(())
    }
}
