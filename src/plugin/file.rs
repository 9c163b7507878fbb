//! In-memory handle on a file passing through the pipeline.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::PluginError;

/// A file as seen by a plugin.
///
/// Content is loaded from disk on first access and dropped after write-back.
/// The dirty flag is raised only by [`OpenedFile::set_content`]; reading never
/// marks a file dirty, so a plugin that inspects but does not change a file
/// causes no write.
#[derive(Debug, Clone, Default)]
pub struct OpenedFile {
    name: String,
    path: Option<PathBuf>,
    content: Option<Vec<u8>>,
    dirty: bool,
    failure: Option<PluginError>,
}

impl OpenedFile {
    /// Wrap an existing file. Content is read lazily.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            content: None,
            dirty: false,
            failure: None,
        }
    }

    /// A file produced by a generator, named relative to its section directory.
    ///
    /// Generated files start dirty so that they are always written.
    pub fn generated(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            path: None,
            content: Some(content.into()),
            dirty: true,
            failure: None,
        }
    }

    /// Section-relative name using `/` separators.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    /// Anchor a generated file under `dir`.
    pub fn resolve_in(&mut self, dir: &Path) -> &Path {
        let path = self.path.get_or_insert_with(|| dir.join(&self.name));
        path.as_path()
    }

    /// Borrow the content, reading it from disk on first use.
    pub fn content(&mut self) -> io::Result<&[u8]> {
        if self.content.is_none() {
            let path = self.require_path()?;
            self.content = Some(fs::read(path)?);
        }
        Ok(self.content.as_deref().unwrap_or_default())
    }

    /// Replace the content and mark the file dirty.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = Some(content.into());
        self.dirty = true;
    }

    /// Record that a batch plugin could not process this file.
    ///
    /// Pending changes are dropped so the file on disk stays as it was. The
    /// orchestrator counts the failure against the plugin.
    pub fn fail(&mut self, err: PluginError) {
        self.content = None;
        self.dirty = false;
        self.failure = Some(err);
    }

    pub fn take_failure(&mut self) -> Option<PluginError> {
        self.failure.take()
    }

    /// Persist dirty content, then release it.
    ///
    /// Returns `Ok(true)` if a write happened. Clean files are left alone.
    pub fn write_back(&mut self) -> io::Result<bool> {
        if !self.dirty {
            self.content = None;
            return Ok(false);
        }
        let path = self.require_path()?.to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.content.as_deref().unwrap_or_default())?;
        self.content = None;
        self.dirty = false;
        Ok(true)
    }

    fn require_path(&self) -> io::Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file '{}' has no location on disk", self.name),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lazy_load_does_not_mark_dirty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let mut file = OpenedFile::open("a.txt", &path);
        assert!(!file.is_loaded());
        assert_eq!(file.content().unwrap(), b"hello");
        assert!(file.is_loaded());
        assert!(!file.is_dirty());
    }

    #[test]
    fn test_clean_file_is_not_written() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        let before = fs::metadata(&path).unwrap().modified().unwrap();

        let mut file = OpenedFile::open("a.txt", &path);
        file.content().unwrap();
        assert!(!file.write_back().unwrap());
        assert!(!file.is_loaded());
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn test_dirty_file_is_written_and_released() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let mut file = OpenedFile::open("a.txt", &path);
        file.set_content("bye");
        assert!(file.is_dirty());
        assert!(file.write_back().unwrap());
        assert!(!file.is_loaded());
        assert!(!file.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "bye");
    }

    #[test]
    fn test_failed_file_drops_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.png");
        fs::write(&path, "raw").unwrap();

        let mut file = OpenedFile::open("a.png", &path);
        file.set_content("half done");
        file.fail(PluginError::failed("decode error"));

        assert!(!file.is_dirty());
        assert!(!file.write_back().unwrap());
        assert!(file.take_failure().is_some());
        assert!(file.take_failure().is_none());
        assert_eq!(fs::read_to_string(&path).unwrap(), "raw");
    }

    #[test]
    fn test_generated_file_resolves_under_dir() {
        let temp = TempDir::new().unwrap();
        let mut file = OpenedFile::generated("sub/pack.mcmeta", "{}");
        assert!(file.is_dirty());
        assert!(file.write_back().is_err());

        let resolved = file.resolve_in(temp.path()).to_path_buf();
        assert_eq!(resolved, temp.path().join("sub/pack.mcmeta"));
        assert!(file.write_back().unwrap());
        assert_eq!(fs::read_to_string(resolved).unwrap(), "{}");
    }
}
