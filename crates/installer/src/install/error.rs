//! Installation error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while synchronizing VFS files
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("File operation failed on '{path}' while {operation}")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    #[error("No VFS mapping found for '{name}'")]
    MappingNotFound { name: String },

    #[error("Invalid virtual path '{name}': {reason}")]
    InvalidVirtualPath { name: String, reason: String },

    #[error("Failed to enumerate package files under '{path}': {reason}")]
    PackageEnumeration { path: PathBuf, reason: String },

    #[error("Failed to read block map '{path}': {reason}")]
    BlockMap { path: PathBuf, reason: String },

    #[error("Could not determine whether '{package}' is installed for another user: {reason}")]
    InstalledElsewhereCheck { package: String, reason: String },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },
}

/// Types of file operations for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
    Metadata,
    Copy,
    Delete,
    CreateDir,
    RemoveDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Metadata => write!(f, "reading metadata"),
            FileOperation::Copy => write!(f, "copying"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::CreateDir => write!(f, "creating directory"),
            FileOperation::RemoveDir => write!(f, "removing directory"),
        }
    }
}

/// How far an error reaches: a single file, or the whole pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected outcome reported through the error path ("already exists", "not empty")
    Benign,
    /// Logged and skipped; the pass moves on to the next file
    Soft,
    /// Returned as the status of the whole request
    Fatal,
}

pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, operation: FileOperation, source: std::io::Error) -> Self {
        InstallError::FileSystem {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            InstallError::FileSystem { .. } => "file_system",
            InstallError::MappingNotFound { .. } => "mapping_not_found",
            InstallError::InvalidVirtualPath { .. } => "invalid_virtual_path",
            InstallError::PackageEnumeration { .. } => "package_enumeration",
            InstallError::BlockMap { .. } => "block_map",
            InstallError::InstalledElsewhereCheck { .. } => "installed_elsewhere_check",
            InstallError::Configuration { .. } => "configuration",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            InstallError::FileSystem { operation, source, .. } => match (operation, source.kind()) {
                (FileOperation::CreateDir, std::io::ErrorKind::AlreadyExists) => ErrorSeverity::Benign,
                (FileOperation::RemoveDir, std::io::ErrorKind::DirectoryNotEmpty) => ErrorSeverity::Benign,
                _ => ErrorSeverity::Soft,
            },
            InstallError::MappingNotFound { .. } => ErrorSeverity::Soft,
            InstallError::InvalidVirtualPath { .. } => ErrorSeverity::Soft,
            InstallError::PackageEnumeration { .. } => ErrorSeverity::Fatal,
            InstallError::BlockMap { .. } => ErrorSeverity::Fatal,
            InstallError::InstalledElsewhereCheck { .. } => ErrorSeverity::Fatal,
            InstallError::Configuration { .. } => ErrorSeverity::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_expected_directory_errors_are_benign() {
        let exists = InstallError::io("C:/x", FileOperation::CreateDir, io::Error::from(io::ErrorKind::AlreadyExists));
        assert_eq!(exists.severity(), ErrorSeverity::Benign);

        let not_empty = InstallError::io("C:/x", FileOperation::RemoveDir, io::Error::from(io::ErrorKind::DirectoryNotEmpty));
        assert_eq!(not_empty.severity(), ErrorSeverity::Benign);

        let denied = InstallError::io("C:/x", FileOperation::RemoveDir, io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.severity(), ErrorSeverity::Soft);
    }

    #[test]
    fn test_pass_level_errors_are_fatal() {
        let err = InstallError::BlockMap {
            path: PathBuf::from("AppxBlockMap.xml"),
            reason: "missing".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Fatal);
        assert_eq!(err.category(), "block_map");
        assert!(ErrorSeverity::Fatal > ErrorSeverity::Soft);
    }
}
