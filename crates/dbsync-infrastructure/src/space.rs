//! Free-space checks on this machine.

use dbsync_core::error::TransferError;
use dbsync_core::{Result, SyncError};
use std::path::Path;

/// Bytes available to unprivileged users on the filesystem holding `path`.
///
/// Walks up to the nearest existing ancestor so that directories created
/// later can be checked up front.
pub fn local_available_space(path: &Path) -> Result<u64> {
    let existing = path
        .ancestors()
        .find(|p| p.exists())
        .ok_or_else(|| SyncError::io(format!("no existing ancestor for {}", path.display())))?;
    Ok(fs2::available_space(existing)?)
}

/// Fails with `InsufficientSpace` when fewer than `required` bytes are free.
pub fn ensure_local_space(path: &Path, required: u64) -> Result<()> {
    let available = local_available_space(path)?;
    if available < required {
        return Err(TransferError::InsufficientSpace {
            location: path.display().to_string(),
            required,
            available,
        }
        .into());
    }
    Ok(())
}
