use serde::{Deserialize, Serialize};

/// The solved dependency graph, as durably recorded after a successful
/// solve. `input_hash` lets a front-end cheaply detect that the manifest
/// changed since the lock was written and a re-solve is needed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lock {
    pub input_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<LockedProject>,
}

/// One resolved project: the import path root it was selected for, the
/// source location it was fetched from (when not the default derived one),
/// the paired version it resolved to, and the subset of its packages that
/// are actually reachable from the importing project's tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedProject {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub revision: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,

    /// Hex-encoded tree digest (§4.10) recorded for this project's checkout
    /// at solve time, if one was computed. `None` is distinct from an
    /// empty/zero digest: the latter means a digest was computed and is
    /// recorded as empty, the former that no digest step ran at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl LockedProject {
    pub fn new(name: impl Into<String>, revision: impl Into<String>) -> LockedProject {
        LockedProject {
            name: name.into(),
            source: None,
            branch: None,
            version: None,
            revision: revision.into(),
            packages: Vec::new(),
            digest: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_project_omits_absent_fields() {
        let p = LockedProject::new("github.com/pkg/errors", "645ef00459ed84a119197bfb8d8205042c6df63");
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("source").is_none());
        assert!(json.get("branch").is_none());
        assert!(json.get("version").is_none());
        assert_eq!(json["name"], "github.com/pkg/errors");
    }

    #[test]
    fn lock_round_trips() {
        let mut lock = Lock {
            input_hash: "deadbeef".into(),
            projects: Vec::new(),
        };
        let mut p = LockedProject::new("golang.org/x/text", "f21a4dfb5e38f5895301dc265a8def02365cc3d0");
        p.version = Some("v0.14.0".into());
        p.packages = vec!["encoding".into(), "unicode/norm".into()];
        lock.projects.push(p);

        let json = serde_json::to_string(&lock).unwrap();
        let back: Lock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lock);
    }
}
