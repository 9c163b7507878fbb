//! Build context containing configuration and state for a build.

use crate::config::RpConfig;
use crate::plugin::ErrorPolicy;
use crate::repository::LocalRepository;
use crate::section::GIT_EXCLUDES;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::parallel::default_jobs;

/// Build context containing configuration and paths for a build operation.
///
/// Constructed once per build and passed by reference to every stage; there
/// is no process-wide build state.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The loaded configuration
    config: RpConfig,
    /// Project root directory (where rpbuild.toml is located)
    project_root: PathBuf,
    /// Whether every plugin failure is reported in full
    verbose: bool,
}

impl BuildContext {
    /// Create a new build context.
    ///
    /// # Arguments
    /// - `config` - The loaded configuration
    /// - `project_root` - The project root directory
    pub fn new(config: RpConfig, project_root: PathBuf) -> Self {
        Self { config, project_root, verbose: false }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RpConfig {
        &self.config
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn project_name(&self) -> &str {
        &self.config.project.name
    }

    /// Get the source directory (resolved to absolute path).
    pub fn source_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.source)
    }

    /// Get the archive path (resolved to absolute path).
    pub fn target_path(&self) -> PathBuf {
        self.resolve_path(&self.config.project.target)
    }

    /// Local plugin cache: the configured directory or `~/.rpbuild/repository`.
    pub fn local_repository(&self) -> LocalRepository {
        let root = match &self.config.cache.dir {
            Some(dir) => self.resolve_path(dir),
            None => LocalRepository::default_root()
                .unwrap_or_else(|| self.project_root.join(".rpbuild").join("repository")),
        };
        let ttl = Duration::from_secs(self.config.cache.ttl_hours.saturating_mul(3600));
        LocalRepository::new(root).with_ttl(ttl)
    }

    /// Whether verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Number of transform workers.
    pub fn jobs(&self) -> usize {
        self.config.runtime.jobs.unwrap_or_else(default_jobs).max(1)
    }

    pub fn is_offline(&self) -> bool {
        self.config.runtime.offline
    }

    /// Whether the build runs on a staging copy of the sources.
    pub fn is_staged(&self) -> bool {
        self.config.runtime.stage
    }

    pub fn compression_level(&self) -> u32 {
        self.config.compress.level
    }

    pub fn plugin_timeout_secs(&self) -> u64 {
        self.config.runtime.plugin_timeout_secs
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy { log_limit: self.config.runtime.error_log_limit, verbose: self.verbose }
    }

    /// Excludes applied to the whole section tree before any declared ones.
    pub fn global_excludes(&self) -> Vec<String> {
        if self.config.git.ignore_git_folders {
            GIT_EXCLUDES.iter().map(|s| s.to_string()).collect()
        } else {
            Vec::new()
        }
    }

    /// Resolve a path relative to the project root.
    ///
    /// If the path is absolute, returns it unchanged.
    /// If relative, joins it with the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}
