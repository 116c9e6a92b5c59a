//! Maps an import path to a project root and an ordered list of candidate
//! source locations (§4.1).

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;
use url::Url;

/// The VCS kind a candidate source speaks. `Registry` is not a VCS at all
/// but shares the same candidate shape — a kind plus a location string —
/// since it is reached through an explicit source override rather than
/// host-pattern deduction (§6, "Registry source (optional back-end)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsKind {
    Git,
    Hg,
    Bzr,
    Svn,
    Registry,
}

impl VcsKind {
    fn from_extension(ext: &str) -> Option<VcsKind> {
        match ext {
            "git" => Some(VcsKind::Git),
            "hg" => Some(VcsKind::Hg),
            "bzr" => Some(VcsKind::Bzr),
            "svn" => Some(VcsKind::Svn),
            _ => None,
        }
    }
}

/// One candidate source location for a project root: the VCS it speaks and
/// the URL to reach it at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub vcs: VcsKind,
    pub url: String,
}

/// The result of deducing an import path: the prefix all sibling imports
/// share, and the ordered list of places that prefix might live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduction {
    pub project_root: String,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeductionError {
    #[error("`{0}` does not look like an import path with a recognizable host")]
    UnrecognizedHost(String),
    #[error("vanity import metadata for `{path}` declared prefix `{declared}`, which is not a prefix of the input")]
    VanityMismatch { path: String, declared: String },
    #[error("no vanity import metadata found for `{0}`")]
    NoVanityMeta(String),
    #[error(transparent)]
    Http(#[from] anyhow::Error),
}

struct HostRule {
    /// Matches `(project_root, sub_package)`; group 1 is always the root.
    pattern: Regex,
    vcs: &'static [VcsKind],
    make_urls: fn(&regex::Captures<'_>) -> Vec<(VcsKind, String)>,
}

/// The schemes a given VCS kind can be reached over, in the order a
/// generic forge rule should offer them (§4.1: "ordered candidate list").
fn ordered_schemes(vcs: VcsKind) -> &'static [&'static str] {
    match vcs {
        VcsKind::Git => &["https", "ssh", "git", "http"],
        VcsKind::Bzr => &["https", "bzr+ssh", "http"],
        VcsKind::Hg => &["https", "ssh", "http"],
        VcsKind::Svn => &["https", "http"],
        VcsKind::Registry => &["https"],
    }
}

fn github_style_urls(root: &str, vcs: VcsKind) -> Vec<(VcsKind, String)> {
    ordered_schemes(vcs)
        .iter()
        .map(|scheme| (vcs, format!("{scheme}://{root}")))
        .collect()
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

fn rules() -> Vec<HostRule> {
    vec![
        // github.com/user/repo[/sub...]
        HostRule {
            pattern: Regex::new(r"^(?P<root>github\.com/[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)(/.*)?$")
                .unwrap(),
            vcs: &[VcsKind::Git],
            make_urls: |caps| github_style_urls(&caps["root"], VcsKind::Git),
        },
        // bitbucket.org can serve either git or hg.
        HostRule {
            pattern: Regex::new(
                r"^(?P<root>bitbucket\.org/[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)(/.*)?$",
            )
            .unwrap(),
            vcs: &[VcsKind::Git, VcsKind::Hg],
            make_urls: |caps| {
                let root = &caps["root"];
                vec![
                    (VcsKind::Git, format!("https://{root}")),
                    (VcsKind::Hg, format!("https://{root}")),
                ]
            },
        },
        // launchpad.net/project, bzr-hosted.
        HostRule {
            pattern: Regex::new(r"^(?P<root>launchpad\.net/[A-Za-z0-9_.\-]+)(/.*)?$").unwrap(),
            vcs: &[VcsKind::Bzr],
            make_urls: |caps| github_style_urls(&caps["root"], VcsKind::Bzr),
        },
        // gopkg-style major-version-in-path alias: gopkg.in/pkg.v2 -> github.com/go-pkg/pkg, major 2.
        HostRule {
            pattern: Regex::new(
                r"^(?P<root>gopkg\.in/(?:(?P<user>[A-Za-z0-9_\-]+)/)?(?P<pkg>[A-Za-z0-9_\-]+)\.v(?P<major>[0-9]+))(/.*)?$",
            )
            .unwrap(),
            vcs: &[VcsKind::Git],
            make_urls: |caps| {
                let user = caps.name("user").map(|m| m.as_str()).unwrap_or("go-pkg");
                let pkg = &caps["pkg"];
                vec![(VcsKind::Git, format!("https://github.com/{user}/{pkg}"))]
            },
        },
    ]
}

/// A VCS-extension-terminated path component declares its own kind, e.g.
/// `example.com/group/repo.git/sub/pkg`.
fn extension_terminated(path: &str) -> Option<Deduction> {
    for component_end in path.match_indices('/').map(|(i, _)| i).chain([path.len()]) {
        let candidate = &path[..component_end];
        if let Some(dot) = candidate.rfind('.') {
            let ext = &candidate[dot + 1..];
            if let Some(vcs) = VcsKind::from_extension(ext) {
                let root = candidate.to_string();
                return Some(Deduction {
                    project_root: root.clone(),
                    candidates: vec![Candidate {
                        vcs,
                        url: format!("https://{root}"),
                    }],
                });
            }
        }
    }
    None
}

/// Table-driven, memoizing import-path deducer (§4.1).
pub struct PathDeducer {
    cache: Mutex<HashMap<String, Deduction>>,
}

impl Default for PathDeducer {
    fn default() -> PathDeducer {
        PathDeducer::new()
    }
}

impl PathDeducer {
    pub fn new() -> PathDeducer {
        PathDeducer {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Deduce the project root and candidate source URLs for `import_path`.
    /// Repeat calls for the same input are served from an in-process cache.
    pub fn deduce(&self, import_path: &str) -> Result<Deduction, DeductionError> {
        if let Some(hit) = self.cache.lock().unwrap().get(import_path) {
            return Ok(hit.clone());
        }

        let (scheme, rest) = split_explicit_scheme(import_path);

        let mut deduction = if let Some(d) = extension_terminated(rest) {
            d
        } else {
            let mut found = None;
            for rule in rules() {
                if let Some(caps) = rule.pattern.captures(rest) {
                    let urls = (rule.make_urls)(&caps);
                    found = Some(Deduction {
                        project_root: caps["root"].to_string(),
                        candidates: urls
                            .into_iter()
                            .map(|(vcs, url)| Candidate { vcs, url })
                            .collect(),
                    });
                    break;
                }
            }
            match found {
                Some(d) => d,
                None => self.vanity_fetch(rest)?,
            }
        };

        if let Some(scheme) = scheme {
            let mut narrowed = Vec::new();
            let mut seen_vcs = std::collections::HashSet::new();
            for c in &deduction.candidates {
                if scheme_supports(scheme, c.vcs) && seen_vcs.insert(c.vcs) {
                    narrowed.push(Candidate {
                        vcs: c.vcs,
                        url: format!("{scheme}://{}", strip_scheme(&c.url)),
                    });
                }
            }
            if narrowed.is_empty() {
                return Err(DeductionError::UnrecognizedHost(format!(
                    "scheme `{scheme}` is not supported by any candidate VCS for `{import_path}`"
                )));
            }
            deduction.candidates = narrowed;
        }

        self.cache
            .lock()
            .unwrap()
            .insert(import_path.to_string(), deduction.clone());
        Ok(deduction)
    }

    /// HTTP GET the path with `?depman-get=1` and parse a `depman-import`
    /// meta declaration of `(importprefix, vcs-kind, repo-url)`, the way an
    /// unrecognized host is expected to advertise itself.
    fn vanity_fetch(&self, path: &str) -> Result<Deduction, DeductionError> {
        let url = format!("https://{path}?depman-get=1");
        let body = http_get(&url).map_err(DeductionError::Http)?;
        let (prefix, vcs, repo_url) =
            parse_vanity_meta(&body).ok_or_else(|| DeductionError::NoVanityMeta(path.to_string()))?;
        if !path.starts_with(&prefix) {
            return Err(DeductionError::VanityMismatch {
                path: path.to_string(),
                declared: prefix,
            });
        }
        Ok(Deduction {
            project_root: prefix,
            candidates: vec![Candidate { vcs, url: repo_url }],
        })
    }
}

fn scheme_supports(scheme: &str, vcs: VcsKind) -> bool {
    match scheme {
        "git" | "ssh" => vcs == VcsKind::Git,
        "bzr" | "bzr+ssh" => vcs == VcsKind::Bzr,
        "http" | "https" => true,
        _ => false,
    }
}

fn split_explicit_scheme(import_path: &str) -> (Option<&str>, &str) {
    if let Some((scheme, rest)) = import_path.split_once("://") {
        (Some(scheme), rest)
    } else {
        (None, import_path)
    }
}

fn http_get(url: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(url)?;
    let mut handle = curl::easy::Easy::new();
    handle.url(parsed.as_str())?;
    handle.useragent("depman")?;
    let mut body = Vec::new();
    {
        let mut transfer = handle.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Parse a minimal `<meta name="depman-import" content="prefix vcs url">` tag.
fn parse_vanity_meta(html: &str) -> Option<(String, VcsKind, String)> {
    let re = Regex::new(
        r#"<meta\s+name=["']depman-import["']\s+content=["']([^\s"']+)\s+(\w+)\s+([^"']+)["']"#,
    )
    .unwrap();
    let caps = re.captures(html)?;
    let vcs = match &caps[2] {
        "git" => VcsKind::Git,
        "hg" => VcsKind::Hg,
        "bzr" => VcsKind::Bzr,
        "svn" => VcsKind::Svn,
        _ => return None,
    };
    Some((caps[1].to_string(), vcs, caps[3].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_github_forge() {
        let deducer = PathDeducer::new();
        let d = deducer.deduce("github.com/alice/tool/sub/pkg").unwrap();
        assert_eq!(d.project_root, "github.com/alice/tool");
        assert_eq!(
            d.candidates,
            vec![
                Candidate { vcs: VcsKind::Git, url: "https://github.com/alice/tool".into() },
                Candidate { vcs: VcsKind::Git, url: "ssh://github.com/alice/tool".into() },
                Candidate { vcs: VcsKind::Git, url: "git://github.com/alice/tool".into() },
                Candidate { vcs: VcsKind::Git, url: "http://github.com/alice/tool".into() },
            ]
        );
    }

    #[test]
    fn version_aliased_gopkg_forge() {
        let deducer = PathDeducer::new();
        let d = deducer.deduce("gopkg.in/owner/proj.v2").unwrap();
        assert_eq!(d.project_root, "gopkg.in/owner/proj.v2");
        assert_eq!(d.candidates[0].url, "https://github.com/owner/proj");
    }

    #[test]
    fn extension_terminated_path_declares_its_own_kind() {
        let deducer = PathDeducer::new();
        let d = deducer.deduce("example.com/group/repo.hg/sub/pkg").unwrap();
        assert_eq!(d.project_root, "example.com/group/repo.hg");
        assert_eq!(d.candidates[0].vcs, VcsKind::Hg);
    }

    #[test]
    fn repeat_queries_hit_cache() {
        let deducer = PathDeducer::new();
        let first = deducer.deduce("github.com/a/b").unwrap();
        let second = deducer.deduce("github.com/a/b").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn explicit_scheme_narrows_candidates() {
        let deducer = PathDeducer::new();
        let d = deducer.deduce("git://bitbucket.org/alice/tool").unwrap();
        assert!(d.candidates.iter().all(|c| c.vcs == VcsKind::Git));
    }
}
