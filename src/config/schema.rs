//! Configuration schema types for `rpbuild.toml`
//!
//! Defines the structure and validation rules for a resource pack project.

use std::fmt;
use std::path::PathBuf;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::plugin::external::DEFAULT_TIMEOUT_SECS;
use crate::plugin::DEFAULT_ERROR_LOG_LIMIT;

/// Root configuration structure for `rpbuild.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct RpConfig {
    /// Project metadata (required)
    pub project: ProjectConfig,
    /// Archive compression
    #[serde(default)]
    pub compress: CompressConfig,
    /// Git folder handling
    #[serde(default)]
    pub git: GitConfig,
    /// Local plugin cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Runtime behaviour of the build
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Remote plugin repositories, in priority order
    #[serde(default, deserialize_with = "ordered_repositories")]
    pub repositories: Vec<RepositoryConfig>,
    /// Root build section; nested tables are child sections
    #[serde(default)]
    pub build: toml::Table,
}

/// Project metadata section
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Human-readable project name
    #[serde(default = "default_name")]
    pub name: String,
    /// Source directory, relative to the config file
    #[serde(default)]
    pub source: PathBuf,
    /// Archive to produce, relative to the config file
    #[serde(default)]
    pub target: PathBuf,
}

/// Project name used when none is configured.
pub const DEFAULT_PROJECT_NAME: &str = "Resource Pack";

fn default_name() -> String {
    DEFAULT_PROJECT_NAME.to_string()
}

/// Archive compression settings
#[derive(Debug, Clone, Deserialize)]
pub struct CompressConfig {
    /// Deflate level, 0 (store) to 9 (best)
    #[serde(default = "default_level")]
    pub level: u32,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

fn default_level() -> u32 {
    9
}

/// Git folder handling
#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// Exclude `.git` folders everywhere and skip them when staging
    #[serde(default = "default_true")]
    pub ignore_git_folders: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self { ignore_git_folders: true }
    }
}

fn default_true() -> bool {
    true
}

/// Local plugin cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Cache root; defaults to `~/.rpbuild/repository`
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Hours before a cached artifact is checked against remotes
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { dir: None, ttl_hours: default_ttl_hours() }
    }
}

fn default_ttl_hours() -> u64 {
    24
}

/// Runtime behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for per-file transforms (defaults to available cores)
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Build from a scratch copy of the sources
    #[serde(default = "default_true")]
    pub stage: bool,
    /// Never contact remote repositories
    #[serde(default)]
    pub offline: bool,
    /// Per-call timeout for external plugins
    #[serde(default = "default_plugin_timeout")]
    pub plugin_timeout_secs: u64,
    /// Failures per plugin reported in full before shortening
    #[serde(default = "default_error_log_limit")]
    pub error_log_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            stage: true,
            offline: false,
            plugin_timeout_secs: default_plugin_timeout(),
            error_log_limit: default_error_log_limit(),
        }
    }
}

fn default_plugin_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_error_log_limit() -> usize {
    DEFAULT_ERROR_LOG_LIMIT
}

/// A remote plugin repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Table key, used in diagnostics
    pub id: String,
    /// Base URL; artifacts live at `{url}/{artifact path}`
    pub url: String,
}

#[derive(Deserialize)]
struct RepositoryEntry {
    url: String,
}

/// Keep `[repositories.*]` in document order, which is their priority.
fn ordered_repositories<'de, D>(deserializer: D) -> Result<Vec<RepositoryConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct RepositoriesVisitor;

    impl<'de> Visitor<'de> for RepositoriesVisitor {
        type Value = Vec<RepositoryConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a table of repositories keyed by id")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut repositories = Vec::new();
            while let Some((id, entry)) = map.next_entry::<String, RepositoryEntry>()? {
                repositories.push(RepositoryConfig { id, url: entry.url });
            }
            Ok(repositories)
        }
    }

    deserializer.deserialize_map(RepositoriesVisitor)
}

/// Validation error with context
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Field path (e.g., "compress.level")
    pub field: String,
    /// Error message
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl RpConfig {
    /// Validate the configuration and return any errors.
    ///
    /// Section-level problems (globs, plugin keys) are reported when the
    /// section tree is built.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.project.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "project.name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.project.source.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "project.source".to_string(),
                message: "is required".to_string(),
            });
        }
        if self.project.target.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "project.target".to_string(),
                message: "is required".to_string(),
            });
        }
        if self.compress.level > 9 {
            errors.push(ValidationError {
                field: "compress.level".to_string(),
                message: format!("must be between 0 and 9, got {}", self.compress.level),
            });
        }
        if self.runtime.jobs == Some(0) {
            errors.push(ValidationError {
                field: "runtime.jobs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for repo in &self.repositories {
            if !(repo.url.starts_with("http://") || repo.url.starts_with("https://")) {
                errors.push(ValidationError {
                    field: format!("repositories.{}.url", repo.id),
                    message: format!("must be an http(s) URL, got '{}'", repo.url),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> RpConfig {
        toml::from_str(src).expect("should parse config")
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse("[project]\nsource = \"src\"\ntarget = \"out.zip\"");
        assert_eq!(config.project.name, DEFAULT_PROJECT_NAME);
        assert_eq!(config.compress.level, 9);
        assert!(config.git.ignore_git_folders);
        assert_eq!(config.cache.ttl_hours, 24);
        assert!(config.runtime.stage);
        assert_eq!(config.runtime.error_log_limit, 10);
        assert!(config.repositories.is_empty());
        assert!(config.build.is_empty());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_repositories_keep_document_order() {
        let config = parse(
            r#"
[project]
source = "src"
target = "out.zip"

[repositories.zulu]
url = "https://z.example.com"

[repositories.alpha]
url = "https://a.example.com"
"#,
        );
        let ids: Vec<_> = config.repositories.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["zulu", "alpha"]);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = parse(
            r#"
[project]
name = " "

[compress]
level = 12

[repositories.local]
url = "ftp://example.com"
"#,
        );
        let fields: Vec<_> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "project.name",
                "project.source",
                "project.target",
                "compress.level",
                "repositories.local.url"
            ]
        );
    }

    #[test]
    fn test_build_table_is_raw() {
        let config = parse(
            r#"
[project]
source = "src"
target = "out.zip"

[build]
exclude = ["**/*.psd"]

[build.textures.plugins."rpbuild-jsonminify-plugin"]
"#,
        );
        assert!(config.build.contains_key("exclude"));
        assert!(config.build.contains_key("textures"));
    }
}
