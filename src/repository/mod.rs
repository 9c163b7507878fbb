//! Plugin repositories and the resolution chain.
//!
//! # Overview
//!
//! Plugins are looked up in three places, cheapest first:
//! - **Registry**: bundled plugins and anything already resolved
//! - **Local cache**: a directory of downloaded artifacts, refreshed when stale
//! - **Remotes**: HTTP repositories, tried in declaration order
//!
//! Artifacts use the same relative layout everywhere: `{name}.jar` for an
//! unversioned requirement and `{name}/{version}/{name}.jar` for a versioned
//! one.

pub mod http;
pub mod local;
pub mod resolver;

pub use http::*;
pub use local::*;
pub use resolver::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::plugin::PluginVersion;

/// Errors talking to a repository.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl RepositoryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source: Arc::new(source) }
    }
}

/// What a remote knows about one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteArtifact {
    /// Parsed `Last-Modified`, if the server sent one.
    pub last_modified: Option<SystemTime>,
}

/// A read-only source of plugin artifacts.
pub trait RemoteRepository: Send + Sync {
    /// Identifier used in logs and error reports.
    fn id(&self) -> &str;

    /// Look the artifact up. `Ok(None)` means the repository does not have it.
    fn lookup(&self, plugin: &PluginVersion) -> Result<Option<RemoteArtifact>, RepositoryError>;

    /// Fetch the artifact into the local cache, returning its cached path.
    fn download_to(
        &self,
        plugin: &PluginVersion,
        local: &LocalRepository,
    ) -> Result<PathBuf, RepositoryError>;

    fn has_plugin(&self, plugin: &PluginVersion) -> Result<bool, RepositoryError> {
        Ok(self.lookup(plugin)?.is_some())
    }

    fn last_modified(&self, plugin: &PluginVersion) -> Result<Option<SystemTime>, RepositoryError> {
        Ok(self.lookup(plugin)?.and_then(|a| a.last_modified))
    }
}
