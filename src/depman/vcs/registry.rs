use std::fs;
use std::path::Path;

use depman_registry::{RegistryClient, VersionInfo};
use url::Url;

use crate::version::Revision;

use super::driver::{VcsDriver, VcsError};

/// `get`'s `url` argument is a composite of the registry's base URL and the
/// project path it serves, joined on `#` (e.g.
/// `https://registry.example.com#github.com/alice/tool`) — the registry has
/// no per-project remote location otherwise, unlike a VCS repo URL. The
/// composite is persisted to a marker file in the local path so later
/// calls, which only receive `path`, can reconstruct it.
const URL_MARKER: &str = ".depman-registry-url";
const VERSIONS_CACHE: &str = "versions.json";

fn split_composite(url: &str) -> (&str, &str) {
    url.split_once('#').unwrap_or((url, ""))
}

fn client_and_path(path: &Path) -> Result<(RegistryClient, String), VcsError> {
    let marker = fs::read_to_string(path.join(URL_MARKER)).map_err(VcsError::Io)?;
    let (base, project_path) = split_composite(marker.trim());
    let parsed = Url::parse(base).map_err(|e| VcsError::Failed {
        command: "parse registry base url".into(),
        detail: e.to_string(),
    })?;
    Ok((RegistryClient::new(parsed), project_path.to_string()))
}

fn read_cached_versions(path: &Path) -> Result<Vec<VersionInfo>, VcsError> {
    let text = fs::read_to_string(path.join(VERSIONS_CACHE)).map_err(VcsError::Io)?;
    serde_json::from_str(&text).map_err(|e| VcsError::Failed {
        command: "parse cached version list".into(),
        detail: e.to_string(),
    })
}

/// Adapts [`RegistryClient`]'s HTTP calls to the [`VcsDriver`] seam so the
/// source gateway can drive a registry-backed project through the same
/// get/fetch/export state machine as a VCS one. There is no persistent
/// working tree: `get` only records where the registry lives, `fetch`
/// refreshes the cached version list, and `export` downloads and unpacks
/// the one revision asked for, each time it's called.
pub struct RegistryDriver;

impl VcsDriver for RegistryDriver {
    fn get(&self, url: &str, path: &Path) -> Result<(), VcsError> {
        depman_util::paths::create_dir_all(path).map_err(VcsError::Io)?;
        fs::write(path.join(URL_MARKER), url).map_err(VcsError::Io)?;
        Ok(())
    }

    fn fetch(&self, path: &Path) -> Result<(), VcsError> {
        let (client, project_path) = client_and_path(path)?;
        let versions = client.list_versions(&project_path).map_err(|e| VcsError::Failed {
            command: format!("list_versions {project_path}"),
            detail: e.to_string(),
        })?;
        let json = serde_json::to_string(&versions).map_err(|e| VcsError::Failed {
            command: "encode cached version list".into(),
            detail: e.to_string(),
        })?;
        fs::write(path.join(VERSIONS_CACHE), json).map_err(VcsError::Io)?;
        Ok(())
    }

    fn update_version(&self, _path: &Path, _reference: &str) -> Result<(), VcsError> {
        // No local working tree to move; every read fetches the exact
        // revision it needs directly from the registry.
        Ok(())
    }

    fn export(&self, path: &Path, reference: &str, dest: &Path) -> Result<(), VcsError> {
        let (client, project_path) = client_and_path(path)?;
        let body = client.fetch_revision(&project_path, reference).map_err(|e| VcsError::Failed {
            command: format!("fetch_revision {project_path}@{reference}"),
            detail: e.to_string(),
        })?;

        depman_util::paths::create_dir_all(dest).map_err(VcsError::Io)?;
        let decoder = flate2::read::GzDecoder::new(body.as_slice());
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(dest).map_err(|e| VcsError::Failed {
            command: "unpack registry archive".into(),
            detail: e.to_string(),
        })?;
        Ok(())
    }

    fn list_versions(&self, path: &Path) -> Result<Vec<(String, Revision)>, VcsError> {
        let versions = read_cached_versions(path)?;
        Ok(versions
            .into_iter()
            .filter(|v| !v.yanked)
            .map(|v| (v.num, Revision(v.rev)))
            .collect())
    }

    /// Per §9's resolution of Open Question (b): confirm the reference
    /// against the cached version list rather than assuming it's already a
    /// valid revision the registry will accept.
    fn resolve_revision(&self, path: &Path, reference: &str) -> Result<Revision, VcsError> {
        let versions = read_cached_versions(path)?;
        versions
            .into_iter()
            .find(|v| v.num == reference || v.rev == reference)
            .map(|v| Revision(v.rev))
            .ok_or_else(|| VcsError::Failed {
                command: "resolve_revision".into(),
                detail: format!("`{reference}` is not a known version or revision for this registry project"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_url_splits_on_hash() {
        assert_eq!(
            split_composite("https://registry.example.com#github.com/alice/tool"),
            ("https://registry.example.com", "github.com/alice/tool")
        );
        assert_eq!(split_composite("https://registry.example.com"), ("https://registry.example.com", ""));
    }

    #[test]
    fn get_persists_the_composite_url_for_later_calls() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RegistryDriver;
        driver.get("https://registry.example.com#github.com/alice/tool", dir.path()).unwrap();
        let (_, project_path) = client_and_path(dir.path()).unwrap();
        assert_eq!(project_path, "github.com/alice/tool");
    }

    #[test]
    fn list_versions_skips_yanked_entries() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RegistryDriver;
        driver.get("https://registry.example.com#github.com/alice/tool", dir.path()).unwrap();
        fs::write(
            dir.path().join(VERSIONS_CACHE),
            r#"[{"num":"v1.0.0","rev":"a1","yanked":false},{"num":"v1.1.0","rev":"b2","yanked":true}]"#,
        )
        .unwrap();

        let versions = driver.list_versions(dir.path()).unwrap();
        assert_eq!(versions, vec![("v1.0.0".to_string(), Revision("a1".into()))]);
    }

    #[test]
    fn resolve_revision_confirms_against_the_cached_list() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RegistryDriver;
        driver.get("https://registry.example.com#github.com/alice/tool", dir.path()).unwrap();
        fs::write(
            dir.path().join(VERSIONS_CACHE),
            r#"[{"num":"v1.0.0","rev":"a1","yanked":false}]"#,
        )
        .unwrap();

        assert_eq!(driver.resolve_revision(dir.path(), "v1.0.0").unwrap(), Revision("a1".into()));
        assert!(driver.resolve_revision(dir.path(), "v9.9.9").is_err());
    }
}
