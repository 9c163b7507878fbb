//! Plugin contract and registry.
//!
//! # Overview
//!
//! A plugin declares exactly one of four capabilities:
//! - **GenerateBeforeList**: emit files before the section directory is listed
//! - **GenerateAfterList**: emit files after listing, seeing the listed files
//! - **TransformFiles**: rewrite one file at a time (run across the worker pool)
//! - **TransformAllFiles**: rewrite all matching files in one batch call
//!
//! Plugins are shared across the whole build. Transform capabilities may be
//! invoked from several threads at once and must not rely on `&mut self`.
//!
//! Plugins come from two places. Bundled plugins are compiled into the
//! binary (see [`bundled`]). Everything else is an artifact fetched from a
//! repository and driven over the process protocol in [`external`].

pub mod bundled;
pub mod config;
pub mod error;
pub mod external;
pub mod file;
pub mod protocol;
pub mod registry;
pub mod version;

pub use config::*;
pub use error::*;
pub use file::*;
pub use registry::*;
pub use version::*;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default glob: every file is a candidate.
pub const MATCH_ALL: &str = "**";

/// The capability a plugin declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    GenerateBeforeList,
    GenerateAfterList,
    TransformFiles,
    TransformAllFiles,
}

impl PluginKind {
    /// Whether the plugin's glob pattern applies to this kind.
    pub fn uses_glob(self) -> bool {
        matches!(self, PluginKind::TransformFiles | PluginKind::TransformAllFiles)
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginKind::GenerateBeforeList => "GENERATE_BEFORE_LIST",
            PluginKind::GenerateAfterList => "GENERATE_AFTER_LIST",
            PluginKind::TransformFiles => "TRANSFORM_FILES",
            PluginKind::TransformAllFiles => "TRANSFORM_ALL_FILES",
        };
        f.write_str(label)
    }
}

/// Identity of a loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub author: String,
    pub version: String,
    pub kind: PluginKind,
}

impl PluginDescriptor {
    pub fn new(
        name: impl Into<String>,
        author: impl Into<String>,
        version: impl Into<String>,
        kind: PluginKind,
    ) -> Self {
        Self { name: name.into(), author: author.into(), version: version.into(), kind }
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} by {}", self.name, self.version, self.author)
    }
}

/// What a plugin can see about the section it runs in.
#[derive(Debug, Clone)]
pub struct PluginContext {
    project_name: String,
    source_root: PathBuf,
    section_dir: PathBuf,
}

impl PluginContext {
    pub fn new(
        project_name: impl Into<String>,
        source_root: impl Into<PathBuf>,
        section_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            source_root: source_root.into(),
            section_dir: section_dir.into(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Absolute directory of the section being processed.
    pub fn section_dir(&self) -> &Path {
        &self.section_dir
    }
}

/// Produces files before the section directory is listed.
pub trait GenerateBeforeList: Send + Sync {
    fn generate(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
    ) -> Result<Vec<OpenedFile>, PluginError>;
}

/// Produces files after listing; `files` holds the absolute listed paths.
pub trait GenerateAfterList: Send + Sync {
    fn generate_after(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
        files: &[PathBuf],
    ) -> Result<Vec<OpenedFile>, PluginError>;
}

/// Rewrites a single file. Called concurrently for different files.
pub trait TransformFiles: Send + Sync {
    fn transform(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
        file: &mut OpenedFile,
    ) -> Result<(), PluginError>;
}

/// Rewrites every matching file in a single call.
///
/// The plugin is free to fan the work out on its own threads. Returning an
/// error discards the whole batch.
pub trait TransformAllFiles: Send + Sync {
    fn transform_all(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
        files: &mut [OpenedFile],
    ) -> Result<(), PluginError>;
}

/// The one capability a plugin exposes, borrowed from the plugin itself.
#[derive(Clone, Copy)]
pub enum Capability<'a> {
    GenerateBeforeList(&'a dyn GenerateBeforeList),
    GenerateAfterList(&'a dyn GenerateAfterList),
    TransformFiles(&'a dyn TransformFiles),
    TransformAllFiles(&'a dyn TransformAllFiles),
}

impl Capability<'_> {
    pub fn kind(&self) -> PluginKind {
        match self {
            Capability::GenerateBeforeList(_) => PluginKind::GenerateBeforeList,
            Capability::GenerateAfterList(_) => PluginKind::GenerateAfterList,
            Capability::TransformFiles(_) => PluginKind::TransformFiles,
            Capability::TransformAllFiles(_) => PluginKind::TransformAllFiles,
        }
    }
}

/// A build plugin.
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    /// Glob selecting candidate files for the transform capabilities,
    /// matched against paths relative to the section directory.
    fn glob_pattern(&self) -> &str {
        MATCH_ALL
    }

    /// One-time setup. The registry guarantees this runs at most once per
    /// build; an error disables the plugin for the rest of the build.
    fn initialize(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn capability(&self) -> Capability<'_>;
}
