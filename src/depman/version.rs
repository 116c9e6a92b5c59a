//! The version and constraint algebra the solver operates over (§3).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{Version as SemverVersion, VersionReq};
use serde::{Deserialize, Serialize};

/// An immutable, opaque identifier of a single snapshot in a source (a
/// commit hash, typically). Terminal: a revision never resolves to anything
/// else.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Revision {
        Revision(s.to_string())
    }
}

/// A human-facing version with no resolved revision attached yet: a branch,
/// a semver tag, or a plain (non-semver) tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnpairedVersion {
    Branch { name: String, is_default: bool },
    Semver(SemverVersion),
    Plain(String),
}

impl UnpairedVersion {
    pub fn branch(name: impl Into<String>) -> UnpairedVersion {
        UnpairedVersion::Branch {
            name: name.into(),
            is_default: false,
        }
    }

    pub fn as_str_repr(&self) -> String {
        match self {
            UnpairedVersion::Branch { name, .. } => name.clone(),
            UnpairedVersion::Semver(v) => format!("v{v}"),
            UnpairedVersion::Plain(s) => s.clone(),
        }
    }
}

impl fmt::Display for UnpairedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str_repr())
    }
}

/// An [`UnpairedVersion`] together with the revision it currently resolves
/// to at its source. Produced only by resolving a branch/tag against a live
/// source; unpairing it recovers the original [`UnpairedVersion`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairedVersion {
    unpaired: UnpairedVersion,
    revision: Revision,
}

impl PairedVersion {
    pub fn new(unpaired: UnpairedVersion, revision: Revision) -> PairedVersion {
        PairedVersion { unpaired, revision }
    }

    pub fn unpaired(&self) -> &UnpairedVersion {
        &self.unpaired
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }
}

impl fmt::Display for PairedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.unpaired, self.revision)
    }
}

/// The full version sum type (§3): a bare revision, an unpaired human
/// version, or a paired one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    Revision(Revision),
    Unpaired(UnpairedVersion),
    Paired(PairedVersion),
}

impl Version {
    pub fn revision(&self) -> Option<&Revision> {
        match self {
            Version::Revision(r) => Some(r),
            Version::Unpaired(_) => None,
            Version::Paired(p) => Some(p.revision()),
        }
    }

    pub fn unpaired(&self) -> Option<&UnpairedVersion> {
        match self {
            Version::Revision(_) => None,
            Version::Unpaired(u) => Some(u),
            Version::Paired(p) => Some(p.unpaired()),
        }
    }
}

impl From<PairedVersion> for Version {
    fn from(p: PairedVersion) -> Version {
        Version::Paired(p)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Revision(r) => r.fmt(f),
            Version::Unpaired(u) => u.fmt(f),
            Version::Paired(p) => p.fmt(f),
        }
    }
}

/// A predicate over versions (§3). Forms a commutative, associative,
/// idempotent semilattice under [`Constraint::intersect`] with [`Constraint::Any`]
/// as identity and [`Constraint::None`] as the absorbing element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint {
    Any,
    None,
    Revision(Revision),
    Branch(String),
    Plain(String),
    Semver(VersionReq),
}

impl Constraint {
    pub fn matches(&self, v: &Version) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::None => false,
            Constraint::Revision(want) => v.revision() == Some(want),
            Constraint::Branch(name) => matches!(
                v.unpaired(),
                Some(UnpairedVersion::Branch { name: n, .. }) if n == name
            ),
            Constraint::Plain(name) => matches!(
                v.unpaired(),
                Some(UnpairedVersion::Plain(n)) if n == name
            ),
            Constraint::Semver(req) => matches!(
                v.unpaired(),
                Some(UnpairedVersion::Semver(sv)) if req.matches(sv)
            ),
        }
    }

    /// Intersect two constraints, producing the constraint that matches
    /// exactly the versions both would match. Non-semver constraints only
    /// intersect productively with themselves or `Any`/`None`; anything
    /// else collapses to `None` since e.g. a specific branch and a specific
    /// revision cannot both hold of one version in this model.
    pub fn intersect(&self, other: &Constraint) -> Constraint {
        match (self, other) {
            (Constraint::Any, c) | (c, Constraint::Any) => c.clone(),
            (Constraint::None, _) | (_, Constraint::None) => Constraint::None,
            (Constraint::Semver(a), Constraint::Semver(b)) => {
                if a == b {
                    Constraint::Semver(a.clone())
                } else {
                    // `VersionReq::matches` requires every comparator in the
                    // req to hold, so concatenating both reqs' comparators
                    // into one yields exactly their conjunction: a version
                    // matches iff it satisfied both original requirements.
                    let mut comparators = a.comparators.clone();
                    comparators.extend(b.comparators.iter().cloned());
                    Constraint::Semver(VersionReq { comparators })
                }
            }
            (a, b) if a == b => a.clone(),
            _ => Constraint::None,
        }
    }

    /// True if the two constraints admit at least one common version,
    /// without actually constructing the intersection.
    pub fn matches_any(&self, other: &Constraint) -> bool {
        !matches!(self.intersect(other), Constraint::None)
    }

    pub fn identical(&self, other: &Constraint) -> bool {
        self == other
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Any => write!(f, "*"),
            Constraint::None => write!(f, "<none>"),
            Constraint::Revision(r) => write!(f, "{r}"),
            Constraint::Branch(b) => write!(f, "branch {b}"),
            Constraint::Plain(p) => write!(f, "{p}"),
            Constraint::Semver(req) => write!(f, "{req}"),
        }
    }
}

/// Classify a user-typed constraint string. This is a context-free best
/// effort; [`crate::source_manager::SourceManager::infer_constraint`] refines
/// it against a project's actually available versions.
impl FromStr for Constraint {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Constraint, semver::Error> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Constraint::Any);
        }
        if let Some(rest) = s.strip_prefix("branch:") {
            return Ok(Constraint::Branch(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("rev:") {
            return Ok(Constraint::Revision(Revision(rest.to_string())));
        }
        match VersionReq::parse(s) {
            Ok(req) => Ok(Constraint::Semver(req)),
            Err(_) => Ok(Constraint::Plain(s.to_string())),
        }
    }
}

/// Sort a version list the way the solver's version queue wants to see it:
/// newest semver first, then plain tags lexicographically, then branches
/// (default branch last, as the least specific fallback). `downgrade`
/// reverses the semver ordering only.
pub fn sort_for_upgrade(versions: &mut [PairedVersion], downgrade: bool) {
    versions.sort_by(|a, b| compare_for_upgrade(a, b, downgrade));
}

fn rank(v: &PairedVersion) -> u8 {
    match v.unpaired() {
        UnpairedVersion::Semver(_) => 0,
        UnpairedVersion::Plain(_) => 1,
        UnpairedVersion::Branch { is_default, .. } => {
            if *is_default {
                3
            } else {
                2
            }
        }
    }
}

fn compare_for_upgrade(a: &PairedVersion, b: &PairedVersion, downgrade: bool) -> Ordering {
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a.unpaired(), b.unpaired()) {
        (UnpairedVersion::Semver(x), UnpairedVersion::Semver(y)) => {
            let ord = y.cmp(x); // descending: newest first
            if downgrade {
                ord.reverse()
            } else {
                ord
            }
        }
        (UnpairedVersion::Plain(x), UnpairedVersion::Plain(y)) => x.cmp(y),
        (UnpairedVersion::Branch { name: x, .. }, UnpairedVersion::Branch { name: y, .. }) => {
            x.cmp(y)
        }
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(s: &str) -> PairedVersion {
        PairedVersion::new(
            UnpairedVersion::Semver(SemverVersion::parse(s).unwrap()),
            Revision(format!("rev-{s}")),
        )
    }

    #[test]
    fn intersect_is_commutative_and_has_identities() {
        let c = Constraint::Semver(VersionReq::parse("^1.0.0").unwrap());
        assert_eq!(c.intersect(&Constraint::Any), c);
        assert_eq!(Constraint::Any.intersect(&c), c);
        assert_eq!(c.intersect(&Constraint::None), Constraint::None);
        assert_eq!(c.intersect(&c), c.intersect(&c.clone()));
    }

    #[test]
    fn upgrade_sort_prefers_highest_semver() {
        let mut versions = vec![sv("1.0.0"), sv("1.1.0"), sv("1.0.5")];
        sort_for_upgrade(&mut versions, false);
        assert_eq!(versions[0].unpaired().as_str_repr(), "v1.1.0");
    }

    #[test]
    fn downgrade_sort_prefers_lowest_semver() {
        let mut versions = vec![sv("1.0.0"), sv("1.1.0"), sv("1.0.5")];
        sort_for_upgrade(&mut versions, true);
        assert_eq!(versions[0].unpaired().as_str_repr(), "v1.0.0");
    }

    #[test]
    fn intersect_of_overlapping_distinct_semver_ranges_keeps_shared_versions() {
        let a = Constraint::Semver(VersionReq::parse("^1.0.0").unwrap());
        let b = Constraint::Semver(VersionReq::parse(">=1.2.0").unwrap());
        let merged = a.intersect(&b);

        assert!(merged.matches(&Version::Paired(sv("1.2.0"))));
        assert!(merged.matches(&Version::Paired(sv("1.9.0"))));
        assert!(!merged.matches(&Version::Paired(sv("1.1.0"))));
        assert!(!merged.matches(&Version::Paired(sv("2.0.0"))));
        assert!(a.matches_any(&b));
    }

    #[test]
    fn revision_constraint_matches_paired_version_with_that_revision() {
        let c = Constraint::Revision(Revision("abc123".into()));
        let v = Version::Paired(sv("2.0.0"));
        assert!(!c.matches(&v));
        let v2 = Version::Revision(Revision("abc123".into()));
        assert!(c.matches(&v2));
    }
}
