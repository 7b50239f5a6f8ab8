//! Atomic file write helpers.
//!
//! Session snapshots are written to a temp file in the destination directory and
//! renamed over the target, so readers observe either the old or the new file.
//! When the rename over an existing file fails (Windows), the old file is moved
//! to `.bak` first and restored if the second rename fails too.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicWriteOptions {
    /// `fsync` the temp file before it is renamed into place.
    pub sync_file: bool,
    /// Best-effort `fsync` of the parent directory after the rename.
    pub sync_parent_dir: bool,
    /// Restrict the file to owner read/write (0o600). Ignored off Unix.
    pub owner_only: bool,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            sync_file: true,
            sync_parent_dir: false,
            owner_only: true,
        }
    }
}

/// Restore `path` from `path.bak` left behind by an interrupted write.
///
/// Returns `true` when a backup was moved back into place.
pub fn recover_bak_file(path: &Path) -> bool {
    let backup = path.with_extension("bak");
    if path.exists() || !backup.exists() {
        return false;
    }
    match fs::rename(&backup, path) {
        Ok(()) => {
            tracing::warn!(
                path = %path.display(),
                "Recovered .bak file from interrupted atomic write"
            );
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to recover .bak file: {e}");
            false
        }
    }
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with_options(path, bytes, AtomicWriteOptions::default())
}

pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    restrict_permissions(tmp.path(), options)?;
    tmp.write_all(bytes)?;
    if options.sync_file {
        tmp.as_file().sync_all()?;
    }

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup_path = path.with_extension("bak");
        let _ = fs::remove_file(&backup_path);
        fs::rename(path, &backup_path)?;

        if let Err(rename_err) = err.file.persist(path) {
            let _ = fs::rename(&backup_path, path);
            return Err(rename_err.error);
        }
        if let Err(e) = fs::remove_file(&backup_path) {
            tracing::warn!(
                path = %backup_path.display(),
                "Failed to remove .bak after atomic write: {e}"
            );
        }
    }

    restrict_permissions(path, options)?;

    if options.sync_parent_dir
        && let Err(e) = File::open(parent).and_then(|dir| dir.sync_all())
    {
        debug!(path = %parent.display(), "Parent directory sync_all failed (best-effort): {e}");
    }

    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, options: AtomicWriteOptions) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if options.owner_only {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _options: AtomicWriteOptions) -> io::Result<()> {
    Ok(())
}
