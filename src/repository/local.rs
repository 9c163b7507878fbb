//! Filesystem cache of downloaded plugin artifacts.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::RepositoryError;
use crate::plugin::external::PluginLoader;
use crate::plugin::{LoadedPlugin, PluginError, PluginRegistry, PluginVersion};

/// Time after which a cached artifact is checked against the remotes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The local plugin cache.
///
/// A cached artifact's modification time records when it was last fetched,
/// and is the only staleness signal.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
    ttl: Duration,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ttl: DEFAULT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// `~/.rpbuild/repository`, if a home directory is known.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".rpbuild").join("repository"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn artifact_path(&self, plugin: &PluginVersion) -> PathBuf {
        self.root.join(plugin.artifact_path())
    }

    pub fn has_plugin(&self, plugin: &PluginVersion) -> bool {
        self.artifact_path(plugin).is_file()
    }

    pub fn last_modified(&self, plugin: &PluginVersion) -> Result<SystemTime, RepositoryError> {
        let path = self.artifact_path(plugin);
        fs::metadata(&path).and_then(|m| m.modified()).map_err(|e| RepositoryError::io(path, e))
    }

    /// Whether the cached copy is older than the TTL. Unreadable or missing
    /// artifacts are always due for an update; a TTL too large to represent
    /// never expires.
    pub fn should_update(&self, plugin: &PluginVersion) -> bool {
        match self.last_modified(plugin) {
            Ok(modified) => modified
                .checked_add(self.ttl)
                .is_some_and(|expires| expires < SystemTime::now()),
            Err(_) => true,
        }
    }

    /// Write an artifact into the cache atomically and make it executable.
    pub fn save(
        &self,
        plugin: &PluginVersion,
        content: &mut dyn Read,
    ) -> Result<PathBuf, RepositoryError> {
        let path = self.artifact_path(plugin);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| RepositoryError::io(&parent, e))?;

        let mut staged =
            NamedTempFile::new_in(&parent).map_err(|e| RepositoryError::io(&parent, e))?;
        let bytes = io::copy(content, &mut staged).map_err(|e| RepositoryError::io(&path, e))?;
        make_executable(staged.path()).map_err(|e| RepositoryError::io(&path, e))?;
        staged.persist(&path).map_err(|e| RepositoryError::io(&path, e.error))?;

        debug!(plugin = %plugin, path = %path.display(), bytes, "saved plugin artifact");
        Ok(path)
    }

    /// Load a cached artifact and register it.
    pub fn load(
        &self,
        plugin: &PluginVersion,
        loader: &dyn PluginLoader,
        registry: &mut PluginRegistry,
    ) -> Result<Arc<LoadedPlugin>, PluginError> {
        let path = self.artifact_path(plugin);
        let instance = loader.load(&path)?;
        let descriptor = instance.descriptor();
        if !plugin.satisfied_by(descriptor) {
            return Err(PluginError::InvalidOutput {
                name: plugin.to_string(),
                message: format!("artifact provides {descriptor}"),
            });
        }
        info!(plugin = %descriptor, path = %path.display(), "loaded plugin from cache");
        Ok(registry.register(LoadedPlugin::from_artifact(instance, &path)))
    }

    /// Remove every cached artifact. Returns whether anything was removed.
    pub fn clear(&self) -> Result<bool, RepositoryError> {
        if !self.root.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.root).map_err(|e| RepositoryError::io(&self.root, e))?;
        Ok(true)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
