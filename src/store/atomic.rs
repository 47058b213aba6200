// src/store/atomic.rs

//! Crash-safe file replacement

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Replace `path` with `data` so readers only ever see the old or new content
///
/// The data goes to a temp file in the same directory, is synced, and is
/// then renamed over the target. The target's permissions are carried over.
pub fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let write_err = |reason: String| Error::Write {
        path: path.display().to_string(),
        reason,
    };

    let existing = fs::metadata(path).ok();
    if let Some(meta) = &existing {
        if meta.permissions().readonly() {
            return Err(write_err("target is read-only".to_string()));
        }
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|e| write_err(format!("cannot create temp file in {}: {}", dir.display(), e)))?;

    temp.write_all(data).map_err(|e| write_err(e.to_string()))?;

    if let Some(meta) = existing {
        temp.as_file()
            .set_permissions(meta.permissions())
            .map_err(|e| write_err(e.to_string()))?;
    }

    temp.as_file()
        .sync_all()
        .map_err(|e| write_err(e.to_string()))?;

    temp.persist(path).map_err(|e| write_err(e.error.to_string()))?;

    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
