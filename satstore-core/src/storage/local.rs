/*!
Local filesystem helpers: directory creation, atomic replacement and
scratch-file allocation.
*/

use crate::{Result, SatStoreError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile, TempPath};
use tracing::{debug, warn};

/// Ensure the parent directory of `path` exists, creating it if necessary
///
/// Idempotent; an already existing directory is not an error.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                SatStoreError::write(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Replace `target` with `data` in one step
///
/// The bytes go to a sibling temporary file first and are renamed onto the
/// target once complete, so readers never observe a partial file.
pub fn persist_atomically(target: &Path, data: &[u8]) -> Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = NamedTempFile::new_in(dir).map_err(|e| {
        SatStoreError::write(format!(
            "Failed to stage file in {}: {}",
            dir.display(),
            e
        ))
    })?;
    staged
        .write_all(data)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| {
            SatStoreError::write(format!("Failed to write {}: {}", target.display(), e))
        })?;

    staged.persist(target).map_err(|e| {
        SatStoreError::write(format!(
            "Failed to move staged file onto {}: {}",
            target.display(),
            e.error
        ))
    })?;
    Ok(())
}

/// A write target that only exists for the duration of one destination write
///
/// The file is removed by [`ScratchFile::close`], or on drop if the scope is
/// left by unwinding.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
}

impl ScratchFile {
    /// Allocate an empty scratch file carrying `extension`
    pub fn allocate(scratch_dir: Option<&Path>, extension: Option<&str>) -> Result<Self> {
        let suffix = extension.map(|ext| format!(".{ext}")).unwrap_or_default();
        let mut builder = Builder::new();
        builder.prefix("satstore-").suffix(&suffix);

        let file = match scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| SatStoreError::write(format!("Failed to allocate scratch file: {e}")))?;

        let path = file.into_temp_path();
        debug!(path = %path.display(), "Allocated scratch file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file, logging rather than failing if it cannot be removed
    pub fn close(self) -> PathBuf {
        let location = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => debug!(path = %location.display(), "Cleaned up scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %location.display(),
                error = %e,
                "Failed to remove scratch file"
            ),
        }
        location
    }
}
