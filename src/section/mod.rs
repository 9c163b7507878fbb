//! Hierarchical build sections.
//!
//! # Overview
//!
//! A build section maps one configuration node onto one source directory.
//! Each section carries:
//! - **Excludes**: glob filters, inherited by every descendant and accumulated
//!   on the way down. A child can add excludes but never lift one.
//! - **Bindings**: the plugins to run in this directory, in declaration order.
//! - **Children**: nested sections, processed before their parent.
//!
//! Excludes are matched against paths relative to the source root; plugin
//! globs are matched against paths relative to the section directory.
//!
//! ```toml
//! [build]
//! exclude = ["**/*.psd"]
//!
//! [build.plugins."rpbuild-packmcmeta-plugin"]
//! description = "My pack"
//!
//! [build.textures]
//! exclude = ["**/raw/**"]
//!
//! [build.textures.plugins."rpbuild-jsonminify-plugin:1.0"]
//! ```

pub mod glob_filter;

pub use glob_filter::*;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use toml::{Table, Value};

use crate::config::ConfigError;
use crate::plugin::{PluginConfig, PluginVersion};

/// Name given to the root section in diagnostics.
pub const ROOT_SECTION: &str = "#global#";

/// Reserved key listing a section's exclude globs.
pub const EXCLUDE_KEY: &str = "exclude";

/// Reserved key holding a section's plugin bindings.
pub const PLUGINS_KEY: &str = "plugins";

/// Excludes added to the root when git folders are ignored.
pub const GIT_EXCLUDES: [&str; 2] = ["**/.git", "**/.git/**"];

/// A plugin bound to a section, with its per-binding configuration.
#[derive(Debug, Clone)]
pub struct PluginBinding {
    pub plugin: PluginVersion,
    pub config: Arc<PluginConfig>,
    pub disabled: bool,
}

impl PluginBinding {
    pub fn new(plugin: PluginVersion, config: PluginConfig) -> Self {
        let disabled = config.is_disabled();
        Self { plugin, config: Arc::new(config), disabled }
    }
}

/// One node of the section tree.
#[derive(Debug, Clone)]
pub struct BuildSection {
    name: String,
    relative: PathBuf,
    path: PathBuf,
    excludes: Vec<GlobFilter>,
    effective_excludes: Vec<GlobFilter>,
    bindings: Vec<PluginBinding>,
    children: Vec<BuildSection>,
}

impl BuildSection {
    /// Build the section tree from the `[build]` table.
    ///
    /// `root_excludes` are prepended to the root section's own excludes and are
    /// therefore inherited by the whole tree. Any malformed glob, plugin key or
    /// non-table child is reported before anything touches the filesystem.
    pub fn from_table(
        table: &Table,
        source_root: &Path,
        root_excludes: &[String],
    ) -> Result<Self, ConfigError> {
        let mut root = parse_section(ROOT_SECTION, PathBuf::new(), table, root_excludes)?;
        root.finish(source_root, &[]);
        Ok(root)
    }

    /// Section name; nested sections use their table key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory relative to the source root (empty for the root).
    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    /// Absolute directory of this section.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.relative.as_os_str().is_empty()
    }

    /// Excludes declared on this section only.
    pub fn excludes(&self) -> &[GlobFilter] {
        &self.excludes
    }

    /// Own excludes plus every ancestor's, ancestors first.
    pub fn effective_excludes(&self) -> &[GlobFilter] {
        &self.effective_excludes
    }

    pub fn bindings(&self) -> &[PluginBinding] {
        &self.bindings
    }

    pub fn children(&self) -> &[BuildSection] {
        &self.children
    }

    /// Point the tree at a new source root, for example a staging copy.
    pub fn relocate(&mut self, source_root: &Path) {
        self.path = source_root.join(&self.relative);
        for child in &mut self.children {
            child.relocate(source_root);
        }
    }

    /// Every plugin required anywhere in the tree, disabled ones included,
    /// in first-declared order without duplicates.
    pub fn required_plugins(&self) -> Vec<PluginVersion> {
        let mut seen = HashSet::new();
        let mut required = Vec::new();
        self.collect_plugins(&mut seen, &mut required);
        required
    }

    /// Deepest section whose directory contains `relative`.
    pub fn deepest_for(&self, relative: &Path) -> &BuildSection {
        for child in &self.children {
            if relative.starts_with(&child.relative) {
                return child.deepest_for(relative);
            }
        }
        self
    }

    /// Depth-first iterator over the tree, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &BuildSection> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    fn collect_plugins(&self, seen: &mut HashSet<PluginVersion>, out: &mut Vec<PluginVersion>) {
        for binding in &self.bindings {
            if seen.insert(binding.plugin.clone()) {
                out.push(binding.plugin.clone());
            }
        }
        for child in &self.children {
            child.collect_plugins(seen, out);
        }
    }

    /// Compute absolute paths and cache effective excludes top-down.
    fn finish(&mut self, source_root: &Path, inherited: &[GlobFilter]) {
        self.path = source_root.join(&self.relative);
        self.effective_excludes = inherited.iter().chain(&self.excludes).cloned().collect();
        let inherited = self.effective_excludes.clone();
        for child in &mut self.children {
            child.finish(source_root, &inherited);
        }
    }
}

fn parse_section(
    name: &str,
    relative: PathBuf,
    table: &Table,
    extra_excludes: &[String],
) -> Result<BuildSection, ConfigError> {
    let mut patterns: Vec<String> = extra_excludes.to_vec();
    let mut bindings = Vec::new();
    let mut children = Vec::new();

    for (key, value) in table {
        match key.as_str() {
            EXCLUDE_KEY => patterns.extend(parse_excludes(name, value)?),
            PLUGINS_KEY => bindings = parse_bindings(name, value)?,
            child => {
                let Value::Table(child_table) = value else {
                    return Err(ConfigError::InvalidSection {
                        section: name.to_string(),
                        message: format!("'{child}' must be a table of section settings"),
                    });
                };
                let child_relative = relative.join(section_dir(child));
                children.push(parse_section(child, child_relative, child_table, &[])?);
            }
        }
    }

    let excludes = patterns
        .iter()
        .map(|p| {
            GlobFilter::new(p).map_err(|source| ConfigError::InvalidGlob {
                section: name.to_string(),
                pattern: p.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BuildSection {
        name: name.to_string(),
        relative,
        path: PathBuf::new(),
        excludes,
        effective_excludes: Vec::new(),
        bindings,
        children,
    })
}

/// `a.b` is shorthand for the nested directory `a/b`.
fn section_dir(name: &str) -> PathBuf {
    name.split('.').filter(|s| !s.is_empty()).collect()
}

fn parse_excludes(section: &str, value: &Value) -> Result<Vec<String>, ConfigError> {
    let invalid = || ConfigError::InvalidSection {
        section: section.to_string(),
        message: String::from("'exclude' must be a list of glob strings"),
    };
    let Value::Array(items) = value else {
        return Err(invalid());
    };
    items.iter().map(|v| v.as_str().map(str::to_string).ok_or_else(invalid)).collect()
}

fn parse_bindings(section: &str, value: &Value) -> Result<Vec<PluginBinding>, ConfigError> {
    let Value::Table(plugins) = value else {
        return Err(ConfigError::InvalidSection {
            section: section.to_string(),
            message: String::from("'plugins' must be a table keyed by plugin name"),
        });
    };

    plugins
        .iter()
        .map(|(key, config)| {
            let plugin = key.parse::<PluginVersion>().map_err(|e| ConfigError::InvalidPlugin {
                section: section.to_string(),
                key: key.clone(),
                message: e.to_string(),
            })?;
            let Value::Table(config) = config else {
                return Err(ConfigError::InvalidPlugin {
                    section: section.to_string(),
                    key: key.clone(),
                    message: String::from("plugin configuration must be a table"),
                });
            };
            Ok(PluginBinding::new(plugin, PluginConfig::new(config.clone())))
        })
        .collect()
}
