//! Scratch copy of the source tree.
//!
//! Plugins rewrite files in place. Building from a staged copy keeps the
//! project's sources untouched; `--in-place` skips this step.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

const GIT_DIR: &str = ".git";

/// A staged source tree, removed when dropped.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
    files: usize,
}

impl Staging {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Number of files copied.
    pub fn file_count(&self) -> usize {
        self.files
    }
}

/// Copy `source` into a fresh temporary directory.
///
/// `.git` directories are left behind when `skip_git` is set.
pub fn stage_sources(source: &Path, skip_git: bool) -> io::Result<Staging> {
    let dir = tempfile::Builder::new().prefix("rpbuild-stage-").tempdir()?;
    let files = copy_tree(source, dir.path(), skip_git)?;
    debug!(source = %source.display(), staging = %dir.path().display(), files, "sources staged");
    Ok(Staging { dir, files })
}

fn copy_tree(from: &Path, to: &Path, skip_git: bool) -> io::Result<usize> {
    fs::create_dir_all(to)?;
    let mut copied = 0;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let target = to.join(&name);

        if file_type.is_dir() {
            if skip_git && name == GIT_DIR {
                continue;
            }
            copied += copy_tree(&entry.path(), &target, skip_git)?;
        } else {
            // fs::copy follows symlinks, so linked files are staged by content
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
