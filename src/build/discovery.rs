//! Source file discovery for the build system.
//!
//! Lists the files of a section directory and collects the final file set
//! handed to the archiver. Both apply exclude globs against paths relative to
//! the source root.

use crate::section::{any_matches, BuildSection, GlobFilter};
use glob::{glob, Pattern};
use std::path::{Path, PathBuf};

/// Error during source discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    InvalidPattern(String, glob::PatternError),
    /// IO error during file enumeration
    Io { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::InvalidPattern(pattern, err) => {
                write!(f, "Invalid glob pattern '{}': {}", pattern, err)
            }
            DiscoveryError::Io { path, source } => {
                write!(f, "IO error while listing {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::InvalidPattern(_, err) => Some(err),
            DiscoveryError::Io { source, .. } => Some(source),
        }
    }
}

/// Every regular file below `dir`, recursively, sorted.
///
/// Any entry that cannot be read fails the whole listing.
pub fn walk_files(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let pattern = format!("{}/**/*", Pattern::escape(&dir.to_string_lossy()));
    let paths = glob(&pattern).map_err(|e| DiscoveryError::InvalidPattern(pattern.clone(), e))?;

    let mut files = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| DiscoveryError::Io {
            path: e.path().to_path_buf(),
            source: e.into_error(),
        })?;
        if path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// List a section directory, dropping everything its effective excludes match.
///
/// # Arguments
/// - `dir` - Section directory to list
/// - `source_root` - Root the exclude globs are anchored at
/// - `excludes` - The section's effective excludes
pub fn list_section_files(
    dir: &Path,
    source_root: &Path,
    excludes: &[GlobFilter],
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut files = walk_files(dir)?;
    files.retain(|path| !is_excluded(path, source_root, excludes));
    Ok(files)
}

/// Final file set for the archive.
///
/// Each file is checked against the effective excludes of the deepest section
/// containing it. `skip` lists paths that never belong in the archive, such as
/// the archive itself when it lives inside the source tree.
pub fn collect_archive_files(
    root: &BuildSection,
    source_root: &Path,
    skip: &[PathBuf],
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut files = walk_files(source_root)?;
    files.retain(|path| {
        if skip.iter().any(|s| s == path) {
            return false;
        }
        let Ok(relative) = path.strip_prefix(source_root) else {
            return false;
        };
        let section = root.deepest_for(relative);
        !any_matches(section.effective_excludes(), relative)
    });
    Ok(files)
}

fn is_excluded(path: &Path, source_root: &Path, excludes: &[GlobFilter]) -> bool {
    match path.strip_prefix(source_root) {
        Ok(relative) => any_matches(excludes, relative),
        Err(_) => false,
    }
}
