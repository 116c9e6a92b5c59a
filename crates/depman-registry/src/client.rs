use curl::easy::{Easy, List};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RegistryError;

/// One entry of a project's version list, as reported by
/// `GET /api/v1/versions/<path>`. Also reused as the on-disk cache format a
/// [`crate::RegistryClient`] consumer persists between `fetch` and
/// `list_versions` calls, hence `Serialize` alongside `Deserialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    /// The human-facing version string, e.g. `v1.4.2`.
    pub num: String,
    /// The immutable revision this version is pinned to.
    pub rev: String,
    #[serde(default)]
    pub yanked: bool,
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    versions: Vec<VersionInfo>,
}

/// A thin HTTP client for depman's optional registry source backend: a
/// centralized alternative to deducing a VCS location from an import path,
/// speaking a small JSON + gzip-tar protocol over HTTP.
pub struct RegistryClient {
    base_url: Url,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(base_url: Url) -> RegistryClient {
        RegistryClient {
            base_url,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> RegistryClient {
        self.token = Some(token.into());
        self
    }

    /// `GET /api/v1/versions/<path>`
    pub fn list_versions(&self, project_path: &str) -> Result<Vec<VersionInfo>, RegistryError> {
        let url = self.base_url.join(&format!(
            "api/v1/versions/{}",
            encode_path(project_path)
        ))?;
        let body = self.get(&url)?;
        let parsed: VersionsResponse = serde_json::from_slice(&body)?;
        Ok(parsed.versions)
    }

    /// `GET /api/v1/projects/<path>/<revision>`, returning the gzip-tar body
    /// after verifying it against the `X-Checksum-Sha256` response header.
    pub fn fetch_revision(&self, project_path: &str, revision: &str) -> Result<Vec<u8>, RegistryError> {
        let url = self.base_url.join(&format!(
            "api/v1/projects/{}/{}",
            encode_path(project_path),
            encode_path(revision),
        ))?;
        let (body, checksum) = self.get_with_checksum(&url)?;
        let actual = depman_util::hash::sha256_bytes(&body);
        if actual != checksum.to_lowercase() {
            return Err(RegistryError::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }
        Ok(body)
    }

    fn get(&self, url: &Url) -> Result<Vec<u8>, RegistryError> {
        self.get_with_headers(url, &mut |_| {}).map(|(body, _)| body)
    }

    fn get_with_checksum(&self, url: &Url) -> Result<(Vec<u8>, String), RegistryError> {
        let mut checksum = None;
        let (body, _) = self.get_with_headers(url, &mut |line: &str| {
            if let Some(value) = header_value(line, "x-checksum-sha256") {
                checksum = Some(value.to_string());
            }
        })?;
        let checksum = checksum.ok_or(RegistryError::MissingHeader("X-Checksum-Sha256"))?;
        Ok((body, checksum))
    }

    fn get_with_headers(
        &self,
        url: &Url,
        on_header: &mut dyn FnMut(&str),
    ) -> Result<(Vec<u8>, u32), RegistryError> {
        let mut handle = Easy::new();
        handle.url(url.as_str())?;
        handle.useragent("depman")?;
        handle.follow_location(true)?;

        if let Some(token) = &self.token {
            let mut headers = List::new();
            headers.append(&format!("Authorization: Bearer {token}"))?;
            handle.http_headers(headers)?;
        }

        let mut body = Vec::new();
        {
            let mut transfer = handle.transfer();
            transfer.write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.header_function(|line| {
                if let Ok(line) = std::str::from_utf8(line) {
                    on_header(line.trim_end());
                }
                true
            })?;
            transfer.perform()?;
        }

        let status = handle.response_code()?;
        if !(200..300).contains(&status) {
            return Err(RegistryError::HttpStatus(status));
        }
        Ok((body, status))
    }
}

fn encode_path(segment: &str) -> String {
    segment
        .split('/')
        .map(|part| utf8_percent_encode(part, NON_ALPHANUMERIC).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_path_segments_independently() {
        assert_eq!(encode_path("github.com/pkg/errors"), "github.com/pkg/errors");
        assert_eq!(encode_path("weird name/pkg"), "weird%20name/pkg");
    }

    #[test]
    fn header_value_is_case_insensitive() {
        assert_eq!(
            header_value("X-Checksum-Sha256: abc123", "x-checksum-sha256"),
            Some("abc123")
        );
        assert_eq!(header_value("Content-Type: application/json", "x-checksum-sha256"), None);
    }

    #[test]
    fn versions_response_parses() {
        let json = r#"{"versions":[{"num":"v1.0.0","rev":"abc","yanked":false}]}"#;
        let parsed: VersionsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.versions.len(), 1);
        assert_eq!(parsed.versions[0].num, "v1.0.0");
    }
}
