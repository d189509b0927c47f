//! Blocking filesystem helpers. Callers run them on the blocking pool.

use std::path::Path;
use walkdir::WalkDir;

use ti_core::{Error, Result};

/// Recursively copy `source` to `target`, creating `target` if needed.
///
/// With `executable` set, every copied file gets the execute bits on Unix.
pub(crate) fn copy_tree(source: &Path, target: &Path, executable: bool) -> Result<u64> {
    let mut copied = 0;
    std::fs::create_dir_all(target)
        .map_err(|e| Error::sandbox_io("create directory", target, e))?;

    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            Error::sandbox_io("read directory", &path, e.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)
                .map_err(|e| Error::sandbox_io("create directory", &destination, e))?;
        } else {
            std::fs::copy(entry.path(), &destination)
                .map_err(|e| Error::sandbox_io("copy file to", &destination, e))?;
            if executable {
                mark_executable(&destination)?;
            }
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)
        .map_err(|e| Error::sandbox_io("read permissions of", path, e))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    std::fs::set_permissions(path, permissions)
        .map_err(|e| Error::sandbox_io("mark executable", path, e))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Remove a file or directory at `path` if present.
pub(crate) fn remove_existing(path: &Path) -> Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Err(_) => return Ok(()),
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
    };
    result.map_err(|e| Error::sandbox_io("delete", path, e))
}
