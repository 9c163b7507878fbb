//! Resolves required plugins into the registry.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{LocalRepository, RemoteRepository, RepositoryError};
use crate::plugin::external::PluginLoader;
use crate::plugin::{PluginError, PluginRegistry, PluginVersion};

/// What happened when one remote was asked for a plugin.
#[derive(Debug, Clone)]
pub struct RepositoryAttempt {
    pub repository: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    NotFound,
    LookupFailed(RepositoryError),
    DownloadFailed(RepositoryError),
}

impl fmt::Display for RepositoryAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::NotFound => write!(f, "{}: not found", self.repository),
            AttemptOutcome::LookupFailed(e) => {
                write!(f, "{}: lookup failed ({e})", self.repository)
            }
            AttemptOutcome::DownloadFailed(e) => {
                write!(f, "{}: download failed ({e})", self.repository)
            }
        }
    }
}

fn format_attempts(attempts: &[RepositoryAttempt]) -> String {
    if attempts.is_empty() {
        return String::from("no repositories configured");
    }
    attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Fatal resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("plugin {plugin} not found in any repository ({})", format_attempts(.attempts))]
    Unresolvable { plugin: PluginVersion, attempts: Vec<RepositoryAttempt> },

    #[error("failed to load plugin {plugin} from {}: {source}", .path.display())]
    Load {
        plugin: PluginVersion,
        path: PathBuf,
        #[source]
        source: PluginError,
    },
}

/// Where each required plugin ended up coming from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Already in the registry (bundled or resolved earlier)
    pub registered: usize,
    /// Loaded from the local cache without a download
    pub cached: usize,
    /// Fetched from a remote, fresh or as a stale-cache refresh
    pub downloaded: usize,
}

/// Walks the registry, the local cache and the remotes for each requirement.
pub struct Resolver<'a> {
    local: &'a LocalRepository,
    remotes: &'a [Box<dyn RemoteRepository>],
    loader: &'a dyn PluginLoader,
    offline: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        local: &'a LocalRepository,
        remotes: &'a [Box<dyn RemoteRepository>],
        loader: &'a dyn PluginLoader,
    ) -> Self {
        Self { local, remotes, loader, offline: false }
    }

    /// Never contact remotes: stale copies are used as they are and uncached
    /// plugins are unresolvable.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    fn remotes(&self) -> &[Box<dyn RemoteRepository>] {
        if self.offline {
            &[]
        } else {
            self.remotes
        }
    }

    /// Resolve every requirement, stopping at the first one that cannot be
    /// satisfied.
    pub fn resolve(
        &self,
        required: &[PluginVersion],
        registry: &mut PluginRegistry,
    ) -> Result<ResolveReport, ResolveError> {
        let mut report = ResolveReport::default();
        for plugin in required {
            self.resolve_one(plugin, registry, &mut report)?;
        }
        info!(
            registered = report.registered,
            cached = report.cached,
            downloaded = report.downloaded,
            "plugins resolved"
        );
        Ok(report)
    }

    fn resolve_one(
        &self,
        plugin: &PluginVersion,
        registry: &mut PluginRegistry,
        report: &mut ResolveReport,
    ) -> Result<(), ResolveError> {
        if registry.contains(plugin) {
            debug!(plugin = %plugin, "plugin already registered");
            report.registered += 1;
            return Ok(());
        }

        if self.local.has_plugin(plugin) {
            if self.local.should_update(plugin) && self.refresh(plugin) {
                report.downloaded += 1;
            } else {
                report.cached += 1;
            }
            return self.load(plugin, registry);
        }

        let mut attempts = Vec::new();
        for remote in self.remotes() {
            let outcome = match remote.lookup(plugin) {
                Ok(Some(_)) => match remote.download_to(plugin, self.local) {
                    Ok(path) => {
                        info!(
                            plugin = %plugin,
                            repository = remote.id(),
                            path = %path.display(),
                            "plugin downloaded"
                        );
                        report.downloaded += 1;
                        return self.load(plugin, registry);
                    }
                    Err(e) => AttemptOutcome::DownloadFailed(e),
                },
                Ok(None) => AttemptOutcome::NotFound,
                Err(e) => AttemptOutcome::LookupFailed(e),
            };
            match &outcome {
                AttemptOutcome::NotFound => {
                    debug!(plugin = %plugin, repository = remote.id(), "not in repository")
                }
                AttemptOutcome::LookupFailed(e) | AttemptOutcome::DownloadFailed(e) => {
                    warn!(plugin = %plugin, repository = remote.id(), error = %e, "lookup failed")
                }
            }
            attempts.push(RepositoryAttempt { repository: remote.id().to_string(), outcome });
        }

        Err(ResolveError::Unresolvable { plugin: plugin.clone(), attempts })
    }

    /// Try to replace a stale cached artifact with a strictly newer remote
    /// copy. Returns whether a download happened. Every failure here is soft:
    /// the stale copy stays usable.
    fn refresh(&self, plugin: &PluginVersion) -> bool {
        let local_modified = match self.local.last_modified(plugin) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(plugin = %plugin, error = %e, "cannot read cached artifact time");
                return false;
            }
        };

        for remote in self.remotes() {
            let remote_modified = match remote.lookup(plugin) {
                Ok(Some(artifact)) => artifact.last_modified,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        plugin = %plugin,
                        repository = remote.id(),
                        error = %e,
                        "update check failed"
                    );
                    continue;
                }
            };
            let Some(remote_modified) = remote_modified else {
                debug!(plugin = %plugin, repository = remote.id(), "no Last-Modified, skipping");
                continue;
            };
            if remote_modified <= local_modified {
                continue;
            }
            match remote.download_to(plugin, self.local) {
                Ok(_) => {
                    info!(plugin = %plugin, repository = remote.id(), "updated stale plugin");
                    return true;
                }
                Err(e) => {
                    warn!(
                        plugin = %plugin,
                        repository = remote.id(),
                        error = %e,
                        "update download failed"
                    );
                }
            }
        }

        debug!(plugin = %plugin, "no newer artifact found, using cached copy");
        false
    }

    fn load(
        &self,
        plugin: &PluginVersion,
        registry: &mut PluginRegistry,
    ) -> Result<(), ResolveError> {
        self.local.load(plugin, self.loader, registry).map(|_| ()).map_err(|source| {
            ResolveError::Load {
                plugin: plugin.clone(),
                path: self.local.artifact_path(plugin),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolvable_message_lists_attempts() {
        let err = ResolveError::Unresolvable {
            plugin: PluginVersion::exact("foo", "1.0"),
            attempts: vec![
                RepositoryAttempt { repository: "a".into(), outcome: AttemptOutcome::NotFound },
                RepositoryAttempt {
                    repository: "b".into(),
                    outcome: AttemptOutcome::LookupFailed(RepositoryError::Status {
                        url: "http://b/foo/1.0/foo.jar".into(),
                        status: 500,
                    }),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("plugin foo:1.0 not found in any repository"));
        assert!(message.contains("a: not found"));
        assert!(message.contains("b: lookup failed"));
    }

    #[test]
    fn test_no_repositories_message() {
        let err = ResolveError::Unresolvable { plugin: PluginVersion::any("x"), attempts: vec![] };
        assert!(err.to_string().contains("no repositories configured"));
    }
}
