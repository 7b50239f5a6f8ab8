//! File-backed text that is re-read only after the file changes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    fingerprint: Fingerprint,
    text: Arc<str>,
}

/// Cached accessor for a text file such as a system prompt.
///
/// Every [`CachedText::get`] stats the file; the contents are read again only
/// when the modification time or length differs from the cached copy.
#[derive(Debug)]
pub struct CachedText {
    path: PathBuf,
    entry: Mutex<Option<Entry>>,
    reads: Mutex<usize>,
}

impl CachedText {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entry: Mutex::new(None),
            reads: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> io::Result<Arc<str>> {
        let fingerprint = Fingerprint::of(&fs::metadata(&self.path)?);

        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = entry.as_ref()
            && cached.fingerprint == fingerprint
        {
            return Ok(Arc::clone(&cached.text));
        }

        let text: Arc<str> = fs::read_to_string(&self.path)?.into();
        *self.reads.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        tracing::debug!(path = %self.path.display(), "Loaded text file");

        *entry = Some(Entry {
            fingerprint,
            text: Arc::clone(&text),
        });
        Ok(text)
    }

    /// Number of times the file contents were actually read.
    #[must_use]
    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_file_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.md");
        fs::write(&path, "You manage a website.").unwrap();
        let cached = CachedText::new(&path);

        assert_eq!(&*cached.get().unwrap(), "You manage a website.");
        assert_eq!(&*cached.get().unwrap(), "You manage a website.");
        assert_eq!(cached.reads(), 1);
    }

    #[test]
    fn changed_length_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.md");
        fs::write(&path, "v1").unwrap();
        let cached = CachedText::new(&path);
        cached.get().unwrap();

        fs::write(&path, "version two").unwrap();

        assert_eq!(&*cached.get().unwrap(), "version two");
        assert_eq!(cached.reads(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cached = CachedText::new(dir.path().join("absent.md"));

        let err = cached.get().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
