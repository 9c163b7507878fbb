//! Remote repositories reached over HTTP.
//!
//! Existence is a `HEAD {url}/{artifact}` answered with 200, freshness is that
//! response's `Last-Modified` header, and downloads are plain `GET`s with a
//! throwaway query parameter so that intermediate caches never serve an old
//! artifact.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::blocking::Client;
use reqwest::header::LAST_MODIFIED;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::{LocalRepository, RemoteArtifact, RemoteRepository, RepositoryError};
use crate::plugin::PluginVersion;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A repository served over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpRepository {
    id: String,
    base_url: String,
    client: Client,
}

impl HttpRepository {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, RepositoryError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("rpbuild/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepositoryError::Http {
                url: base_url.clone(),
                message: format!("http client: {e}"),
            })?;
        Ok(Self { id: id.into(), base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of an artifact in this repository.
    pub fn artifact_url(&self, plugin: &PluginVersion) -> String {
        format!("{}/{}", self.base_url, plugin.artifact_path())
    }
}

impl RemoteRepository for HttpRepository {
    fn id(&self) -> &str {
        &self.id
    }

    fn lookup(&self, plugin: &PluginVersion) -> Result<Option<RemoteArtifact>, RepositoryError> {
        let url = self.artifact_url(plugin);
        let response = self
            .client
            .head(&url)
            .send()
            .map_err(|e| RepositoryError::Http { url: url.clone(), message: e.to_string() })?;

        let status = response.status();
        debug!(repository = %self.id, url = %url, status = status.as_u16(), "looked up artifact");

        match status {
            StatusCode::OK => {
                let last_modified = response
                    .headers()
                    .get(LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_http_date);
                Ok(Some(RemoteArtifact { last_modified }))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            other => Err(RepositoryError::Status { url, status: other.as_u16() }),
        }
    }

    fn download_to(
        &self,
        plugin: &PluginVersion,
        local: &LocalRepository,
    ) -> Result<PathBuf, RepositoryError> {
        let url = self.artifact_url(plugin);
        let mut response = self
            .client
            .get(&url)
            .query(&[("random", cache_buster())])
            .send()
            .map_err(|e| RepositoryError::Http { url: url.clone(), message: e.to_string() })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(RepositoryError::Status { url, status: status.as_u16() });
        }

        info!(repository = %self.id, plugin = %plugin, url = %url, "downloading plugin");
        local.save(plugin, &mut response)
    }
}

/// Parse an HTTP date such as `Wed, 21 Oct 2015 07:28:00 GMT`.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc2822(value.trim()).ok().map(SystemTime::from)
}

fn cache_buster() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_default()
}
