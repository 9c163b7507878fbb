//! Configuration loading and discovery for `rpbuild.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::{
    CacheConfig, CompressConfig, GitConfig, ProjectConfig, RpConfig, RuntimeConfig,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched for when no explicit config path is given.
pub const CONFIG_FILE_NAME: &str = "rpbuild.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// No config file was found
    #[error("No rpbuild.toml found in {} or any parent directory", .0.display())]
    NotFound(PathBuf),
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse rpbuild.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
    /// A build section is malformed
    #[error("Invalid build section '{section}': {message}")]
    InvalidSection { section: String, message: String },
    /// An exclude glob does not compile
    #[error("Invalid exclude pattern '{pattern}' in section '{section}': {source}")]
    InvalidGlob {
        section: String,
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    /// A plugin binding is malformed
    #[error("Invalid plugin '{key}' in section '{section}': {message}")]
    InvalidPlugin { section: String, key: String, message: String },
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Number of transform workers
    pub jobs: Option<usize>,
    /// Override the local cache directory
    pub cache_dir: Option<PathBuf>,
    /// Skip remote repositories
    pub offline: Option<bool>,
    /// Build from a staging copy (false means in place)
    pub stage: Option<bool>,
}

/// Find rpbuild.toml by walking up from the current working directory.
///
/// # Returns
/// - `Some(path)` if an rpbuild.toml file is found
/// - `None` if no config file is found
pub fn find_config() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_config_from)
}

/// Find rpbuild.toml by walking up from a specific directory.
///
/// This is the internal implementation that allows specifying the start directory,
/// useful for testing.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        // Move to parent directory
        if !current.pop() {
            // Reached root, no config found
            return None;
        }
    }
}

/// Load configuration from an rpbuild.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. Unlike most tools a missing config is an error:
/// a build needs at least a source and a target.
///
/// # Example
/// ```ignore
/// // Load from discovered config
/// let config = load_config(None)?;
///
/// // Load from specific path
/// let config = load_config(Some(Path::new("my-pack/rpbuild.toml")))?;
/// ```
pub fn load_config(path: Option<&Path>) -> Result<RpConfig, ConfigError> {
    match path {
        Some(p) => load_config_file(p),
        None => {
            let found = find_config().ok_or_else(|| {
                ConfigError::NotFound(env::current_dir().unwrap_or_default())
            })?;
            load_config_file(&found)
        }
    }
}

/// Load configuration from a specific file path.
fn load_config_file(path: &Path) -> Result<RpConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration text.
pub fn parse_config(contents: &str) -> Result<RpConfig, ConfigError> {
    let config: RpConfig = toml::from_str(contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// A configuration with default settings, used by tests and tooling.
///
/// The project name is the current directory name; sources live in `src`
/// and the archive is written to `build/pack.zip`.
pub fn default_config() -> RpConfig {
    let project_name = env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unnamed".to_string());

    RpConfig {
        project: ProjectConfig {
            name: project_name,
            source: PathBuf::from("src"),
            target: PathBuf::from("build/pack.zip"),
        },
        compress: CompressConfig::default(),
        git: GitConfig::default(),
        cache: CacheConfig::default(),
        runtime: RuntimeConfig::default(),
        repositories: Vec::new(),
        build: toml::Table::new(),
    }
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut RpConfig, overrides: &CliOverrides) {
    if let Some(jobs) = overrides.jobs {
        config.runtime.jobs = Some(jobs.max(1));
    }

    if let Some(ref dir) = overrides.cache_dir {
        config.cache.dir = Some(dir.clone());
    }

    if let Some(offline) = overrides.offline {
        config.runtime.offline = offline;
    }

    if let Some(stage) = overrides.stage {
        config.runtime.stage = stage;
    }
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}
