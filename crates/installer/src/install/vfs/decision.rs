//! Overwrite rules for files that already exist at their real location
//!
//! Versioned files beat unversioned ones, higher versions beat lower ones,
//! and an unversioned file the user has touched is left alone.

use std::path::Path;

use tracing::debug;

use crate::install::error::{FileOperation, InstallError, Result};
use crate::install::vfs::version::{FileVersion, is_file_modified};

/// What is already sitting at the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingTarget {
    Versioned(u64),
    Unversioned { modified: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyReason {
    TargetMissing,
    VersionedOverUnversioned,
    UnmodifiedUnversioned,
    NewerVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Unversioned target changed after it was written
    UserModified,
    /// Target version is equal to or higher than the source version
    TargetVersionNotLower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDecision {
    Copy(CopyReason),
    Skip(SkipReason),
}

impl CopyDecision {
    pub fn is_copy(&self) -> bool {
        matches!(self, CopyDecision::Copy(_))
    }
}

/// Apply the overwrite rules to an already-inspected target
pub fn decide(target: Option<ExistingTarget>, source: FileVersion) -> CopyDecision {
    let Some(target) = target else {
        return CopyDecision::Copy(CopyReason::TargetMissing);
    };

    match target {
        ExistingTarget::Unversioned { .. } if !source.is_unversioned() => {
            CopyDecision::Copy(CopyReason::VersionedOverUnversioned)
        }
        ExistingTarget::Unversioned { modified: false } => CopyDecision::Copy(CopyReason::UnmodifiedUnversioned),
        ExistingTarget::Unversioned { modified: true } => CopyDecision::Skip(SkipReason::UserModified),
        ExistingTarget::Versioned(target_version) if target_version < source.encoded() => {
            CopyDecision::Copy(CopyReason::NewerVersion)
        }
        ExistingTarget::Versioned(_) => CopyDecision::Skip(SkipReason::TargetVersionNotLower),
    }
}

/// Inspect `target` and `source` on disk and decide whether to copy
pub fn need_to_copy(source: &Path, target: &Path, modification_threshold: u32) -> Result<CopyDecision> {
    let exists = target
        .try_exists()
        .map_err(|e| InstallError::io(target, FileOperation::Metadata, e))?;
    if !exists {
        debug!(target_path = %target.display(), "Need to copy file because target doesn't exist");
        return Ok(decide(None, FileVersion::Unversioned));
    }

    let target_version = FileVersion::read(target)?;
    let existing = match target_version {
        FileVersion::Versioned(v) => ExistingTarget::Versioned(v),
        FileVersion::Unversioned => ExistingTarget::Unversioned {
            modified: is_file_modified(target, modification_threshold)?,
        },
    };
    let source_version = FileVersion::read(source)?;

    debug!(
        target_path = %target.display(),
        target_version = %target_version,
        target_unversioned = target_version.is_unversioned(),
        target_modified = matches!(existing, ExistingTarget::Unversioned { modified: true }),
        source_path = %source.display(),
        source_version = %source_version,
        source_unversioned = source_version.is_unversioned(),
        "Target exists, file versioning information"
    );

    Ok(decide(Some(existing), source_version))
}
