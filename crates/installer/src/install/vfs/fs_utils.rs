//! Directory creation and cleanup helpers shared by install and uninstall

use std::io::ErrorKind;
use std::path::Path;

use walkdir::WalkDir;

use crate::install::error::{FileOperation, InstallError, Result};

/// Ensure every ancestor directory of `file_path` exists. Existing directories are fine.
pub fn ensure_parent_dir(file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, FileOperation::CreateDir, e))?;
    }
    Ok(())
}

/// Copy `source` over `target`, replacing any existing file
pub fn copy_file(source: &Path, target: &Path) -> Result<u64> {
    std::fs::copy(source, target).map_err(|e| InstallError::io(target, FileOperation::Copy, e))
}

pub fn delete_file(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|e| InstallError::io(path, FileOperation::Delete, e))
}

/// Try to remove a directory. Returns `Ok(false)` when it still has entries.
pub fn remove_dir_if_empty(dir: &Path) -> Result<bool> {
    match std::fs::remove_dir(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => Ok(false),
        Err(e) => Err(InstallError::io(dir, FileOperation::RemoveDir, e)),
    }
}

/// Recursively remove `dir` and return how many entries (including `dir`)
/// were removed. A directory that does not exist removes nothing.
///
/// Removal keeps going past entries it cannot delete; the first error is
/// returned once everything removable is gone.
pub fn remove_dir_all_counted(dir: &Path) -> (u64, Result<()>) {
    if !dir.exists() {
        return (0, Ok(()));
    }

    let mut removed = 0u64;
    let mut first_error: Option<InstallError> = None;

    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                let source = e.into_io_error().unwrap_or_else(|| std::io::Error::other("file system loop"));
                first_error.get_or_insert(InstallError::io(path, FileOperation::Read, source));
                continue;
            }
        };

        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path()).map_err(|e| InstallError::io(entry.path(), FileOperation::RemoveDir, e))
        } else {
            delete_file(entry.path())
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    (removed, first_error.map_or(Ok(()), Err))
}
