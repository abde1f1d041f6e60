//! Filesystem helpers shared by the build and promotion steps.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{AppError, Result};

/// Add the executable bits for user, group and other. Failures are ignored.
#[cfg(unix)]
pub fn ensure_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt as _;

    let Ok(metadata) = fs::metadata(path) else {
        return;
    };
    let mode = metadata.permissions().mode() | 0o111;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        log::debug!("Failed to mark {:?} executable: {}", path, e);
    }
}

#[cfg(not(unix))]
pub fn ensure_executable(_path: &Path) {}

/// Restrict a private key to owner read/write. Failures are ignored.
#[cfg(unix)]
pub fn restrict_private_key(path: &Path) {
    use std::os::unix::fs::PermissionsExt as _;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        log::debug!("Failed to restrict permissions on {:?}: {}", path, e);
    }
}

#[cfg(not(unix))]
pub fn restrict_private_key(_path: &Path) {}

/// Remove a directory tree, logging instead of failing.
pub fn remove_dir_best_effort(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(path) {
        log::warn!("Failed to remove {:?}: {}", path, e);
    }
}

/// Find the shallowest directory literally named `name` below `root`.
pub fn find_dir_named(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir() && entry.file_name() == name)
        .min_by_key(|entry| entry.depth())
        .map(|entry| entry.into_path())
}

/// Recursively copy `src` into `dst`, merging with anything already there.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .map_err(|e| AppError::io(format!("failed to create directory {dst:?}: {e}")))?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::io(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| {
                AppError::io(format!("failed to create directory {target:?}: {e}"))
            })?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                AppError::io(format!(
                    "failed to copy {:?} to {target:?}: {e}",
                    entry.path()
                ))
            })?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link_target = fs::read_link(src).map_err(|e| AppError::io(e.to_string()))?;
    if dst.symlink_metadata().is_ok() {
        let _ = fs::remove_file(dst);
    }
    std::os::unix::fs::symlink(&link_target, dst)
        .map_err(|e| AppError::io(format!("failed to create symlink at {dst:?}: {e}")))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| AppError::io(format!("failed to copy {src:?} to {dst:?}: {e}")))
}

/// Renames `src` to `dst`.
pub type RenameFn = fn(&Path, &Path) -> io::Result<()>;

/// Move a directory with `rename`, falling back to a recursive copy when it
/// fails (for example across devices). The source is left for the caller to
/// clean up.
pub fn move_dir_with(src: &Path, dst: &Path, rename: RenameFn) -> Result<()> {
    match rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::info!("rename {:?} -> {:?} failed ({}), copying instead", src, dst, e);
            copy_dir_recursive(src, dst)
        }
    }
}
