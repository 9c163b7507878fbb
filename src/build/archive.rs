//! Archive sink for the assembled pack.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::section::slash_path;

/// Archives above this size still work but are worth a warning.
pub const LARGE_ARCHIVE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error("{} is not inside {}", file.display(), base.display())]
    OutsideBase { file: PathBuf, base: PathBuf },
}

impl ArchiveError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// What was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// Packs a final file list into the build output.
pub trait Archiver: Send + Sync {
    /// Write `files` (absolute paths below `base`) to `target`.
    ///
    /// `level` is 0 for no compression up to 9 for the smallest output.
    fn archive(
        &self,
        files: &[PathBuf],
        base: &Path,
        target: &Path,
        level: u32,
    ) -> Result<ArchiveSummary, ArchiveError>;
}

/// Writes a zip with entries named relative to `base`.
///
/// Entries are sorted and carry fixed timestamps and permissions, so the same
/// inputs always give byte-identical archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiver;

impl ZipArchiver {
    fn options(level: u32) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);
        if level == 0 {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(level.min(9))))
        }
    }
}

impl Archiver for ZipArchiver {
    fn archive(
        &self,
        files: &[PathBuf],
        base: &Path,
        target: &Path,
        level: u32,
    ) -> Result<ArchiveSummary, ArchiveError> {
        let mut entries = files
            .iter()
            .map(|file| {
                let relative = file.strip_prefix(base).map_err(|_| ArchiveError::OutsideBase {
                    file: file.clone(),
                    base: base.to_path_buf(),
                })?;
                Ok((slash_path(relative), file))
            })
            .collect::<Result<Vec<_>, ArchiveError>>()?;
        entries.sort();

        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| ArchiveError::io(&parent, e))?;
        let staged = NamedTempFile::new_in(&parent).map_err(|e| ArchiveError::io(&parent, e))?;

        let options = Self::options(level);
        let mut zip = ZipWriter::new(staged);
        for (name, path) in &entries {
            zip.start_file(name.as_str(), options)?;
            let mut input = File::open(path).map_err(|e| ArchiveError::io(path.as_path(), e))?;
            io::copy(&mut input, &mut zip).map_err(|e| ArchiveError::io(path.as_path(), e))?;
        }
        let mut staged = zip.finish()?;
        staged.flush().map_err(|e| ArchiveError::io(target, e))?;
        staged.persist(target).map_err(|e| ArchiveError::io(target, e.error))?;

        let bytes = fs::metadata(target).map_err(|e| ArchiveError::io(target, e))?.len();
        if bytes > LARGE_ARCHIVE_BYTES {
            warn!(
                path = %target.display(),
                bytes,
                "archive is larger than 50 MB and may be slow to load"
            );
        }
        info!(path = %target.display(), entries = entries.len(), bytes, "archive written");
        Ok(ArchiveSummary { entries: entries.len(), bytes })
    }
}
