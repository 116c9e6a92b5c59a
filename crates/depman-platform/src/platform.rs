use std::fmt;
use std::str::FromStr;

use crate::cfg::{Cfg, CfgExpr};
use crate::error::ParseError;

/// A parsed build-constraint for a single source file: either a literal
/// platform name (`linux`, `windows_amd64`) or a `cfg(...)` expression.
///
/// This mirrors the shape of a target-platform specifier, generalized to the
/// build-tag language used by the package tree walker (see
/// [`PlatformTable::any_satisfies`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Name(String),
    Cfg(CfgExpr),
}

impl Platform {
    /// Check whether this constraint holds for one concrete platform.
    pub fn matches(&self, name: &str, cfgs: &[Cfg]) -> bool {
        match self {
            Platform::Name(p) => p == name,
            Platform::Cfg(p) => p.matches(cfgs),
        }
    }
}

impl FromStr for Platform {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Platform, ParseError> {
        if s.starts_with("cfg(") && s.ends_with(')') {
            let s = &s[4..s.len() - 1];
            s.parse().map(Platform::Cfg)
        } else {
            Ok(Platform::Name(s.to_string()))
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Name(s) => s.fmt(f),
            Platform::Cfg(s) => write!(f, "cfg({s})"),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Platform {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Platform {
    fn deserialize<D>(d: D) -> Result<Platform, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry of the fixed table of platforms the walker checks build
/// constraints against, e.g. `linux/amd64` or `darwin/arm64`.
#[derive(Debug, Clone)]
pub struct KnownPlatform {
    pub triple: &'static str,
    cfgs: Vec<Cfg>,
}

impl KnownPlatform {
    fn new(triple: &'static str, os: &'static str, arch: &'static str, family: &'static str) -> Self {
        let mut cfgs = vec![
            Cfg::KeyPair("target_os".into(), os.into()),
            Cfg::KeyPair("target_arch".into(), arch.into()),
            Cfg::KeyPair("target_family".into(), family.into()),
        ];
        if family == "unix" {
            cfgs.push(Cfg::Name("unix".into()));
        }
        if family == "windows" {
            cfgs.push(Cfg::Name("windows".into()));
        }
        KnownPlatform { triple, cfgs }
    }
}

/// The fixed set of platforms a build constraint is tested against: if it is
/// satisfiable by none of them, the file carrying it is unreachable on any
/// real platform and the walker skips it.
#[derive(Debug, Clone)]
pub struct PlatformTable {
    platforms: Vec<KnownPlatform>,
}

impl Default for PlatformTable {
    fn default() -> Self {
        PlatformTable {
            platforms: vec![
                KnownPlatform::new("x86_64-linux", "linux", "amd64", "unix"),
                KnownPlatform::new("aarch64-linux", "linux", "arm64", "unix"),
                KnownPlatform::new("x86_64-darwin", "darwin", "amd64", "unix"),
                KnownPlatform::new("aarch64-darwin", "darwin", "arm64", "unix"),
                KnownPlatform::new("x86_64-windows", "windows", "amd64", "windows"),
                KnownPlatform::new("aarch64-windows", "windows", "arm64", "windows"),
                KnownPlatform::new("x86_64-freebsd", "freebsd", "amd64", "unix"),
                KnownPlatform::new("wasm-js", "js", "wasm", "js"),
            ],
        }
    }
}

impl PlatformTable {
    pub fn new(platforms: Vec<KnownPlatform>) -> Self {
        PlatformTable { platforms }
    }

    /// True if `platform` is satisfiable by at least one row of this table.
    pub fn any_satisfies(&self, platform: &Platform) -> bool {
        self.platforms
            .iter()
            .any(|p| platform.matches(p.triple, &p.cfgs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_name_roundtrip() {
        let p: Platform = "x86_64-linux".parse().unwrap();
        assert_eq!(p.to_string(), "x86_64-linux");
    }

    #[test]
    fn cfg_expr_roundtrip() {
        let p: Platform = "cfg(unix)".parse().unwrap();
        assert!(matches!(p, Platform::Cfg(_)));
    }

    #[test]
    fn unsatisfiable_constraint_excluded() {
        let table = PlatformTable::default();
        let p: Platform = "cfg(target_os = \"plan9\")".parse().unwrap();
        assert!(!table.any_satisfies(&p));
    }

    #[test]
    fn satisfiable_on_darwin_only() {
        let table = PlatformTable::default();
        let p: Platform = "cfg(target_os = \"darwin\")".parse().unwrap();
        assert!(table.any_satisfies(&p));
    }

    #[test]
    fn negated_windows_is_satisfiable() {
        let table = PlatformTable::default();
        let p: Platform = "cfg(not(windows))".parse().unwrap();
        assert!(table.any_satisfies(&p));
    }
}
