//! All-or-nothing file writes.
//!
//! Content is written to `<path>.tmp`, flushed to disk, and renamed over
//! the destination. Readers therefore see either the previous file or the
//! complete new one, never a torn write. A `.tmp` left behind by an
//! interrupted run is simply overwritten by the next attempt.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::StoreError;

/// Temporary sibling used while writing `path`.
#[must_use]
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes `bytes` to `path` atomically, creating parent directories.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if any filesystem step fails; the
/// destination is left untouched in that case.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    write_with_hook(path, bytes, |_| Ok(()))
}

/// Serializes `value` as pretty JSON and writes it atomically.
///
/// # Errors
///
/// Returns [`StoreError::Json`] if serialization fails, or
/// [`StoreError::Io`] if the write fails.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes(path, &bytes)
}

/// Whether a committed file exists at `path`. Leftover `.tmp` files do not
/// count.
#[must_use]
pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Same as [`write_bytes`], running `before_commit` between the flushed
/// temp write and the rename.
pub(crate) fn write_with_hook(
    path: &Path,
    bytes: &[u8],
    before_commit: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    }

    before_commit(&tmp).map_err(|e| StoreError::io(&tmp, e))?;

    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
