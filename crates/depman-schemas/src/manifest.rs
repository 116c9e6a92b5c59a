use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The abstract shape of a project manifest: what a front-end parses its
/// on-disk manifest syntax into before handing it to the solver. depman
/// itself is agnostic to manifest file syntax (TOML, JSON, whatever a
/// front-end chooses) and only deals in this structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Direct dependency constraints, keyed by import path root.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, ProjectProperties>,

    /// Constraints that override whatever the dependency graph would
    /// otherwise select for a given project root, regardless of depth.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, ProjectProperties>,

    /// Import path globs the package tree walker should not descend into.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<String>,

    /// Import paths to treat as reachable even if no source file imports
    /// them (e.g. a package only used via reflection or cgo-style linkage).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// The solver-facing view of one entry under `dependencies` or `overrides`:
/// an optional explicit source location plus an optional version constraint.
/// Both are optional independently: a bare override can redirect a source
/// without touching the constraint, or vice versa.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl ProjectProperties {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.constraint.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manifest_round_trips() {
        let m = Manifest::default();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "{}");
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn dependency_with_override_round_trips() {
        let mut m = Manifest::default();
        m.dependencies.insert(
            "github.com/pkg/errors".into(),
            ProjectProperties {
                source: None,
                constraint: Some("^0.9.0".into()),
            },
        );
        m.overrides.insert(
            "github.com/pkg/errors".into(),
            ProjectProperties {
                source: Some("github.com/myfork/errors".into()),
                constraint: None,
            },
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
