//! Package-side collaborators of the reconciler
//!
//! The reconciler only needs a few things from a package: its identity, the
//! names of its payload files, and a way to let go of the manifest before the
//! package directory is deleted. Each of those is a trait here, with a
//! directory-backed implementation for packages that are already extracted.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::install::error::{FileOperation, InstallError, Result};
use crate::install::vfs::resolver::checked_segments;

/// Identity and location of the package being installed or removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageContext {
    /// Package full name, e.g. `Contoso.App_1.0.0.0_x64__8wekyb3d8bbwe`
    pub full_name: String,
    /// Private directory the package was extracted into
    pub directory: PathBuf,
}

impl PackageContext {
    pub fn new(full_name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            full_name: full_name.into(),
            directory: directory.into(),
        }
    }

    /// On-disk location of a package-relative file name. Names that would
    /// leave the package directory are `InvalidVirtualPath`.
    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        let mut path = self.directory.clone();
        path.extend(checked_segments(name)?);
        Ok(path)
    }
}

/// Enumerates the payload of a package
pub trait PackageReader {
    /// Package-relative payload names, `\`-separated
    fn payload_files(&self) -> Result<Vec<String>>;
}

/// Something holding the package manifest open
pub trait ManifestHandle {
    /// Drop any hold on the manifest file so it can be deleted
    fn release_manifest(&mut self);
}

/// A package whose payload has already been extracted to its directory
#[derive(Debug, Clone)]
pub struct ExtractedPackage {
    directory: PathBuf,
}

impl ExtractedPackage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

}

impl PackageReader for ExtractedPackage {
    fn payload_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.directory).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| InstallError::PackageEnumeration {
                path: self.directory.clone(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.directory)
                .map_err(|e| InstallError::PackageEnumeration {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                })?;
            let name: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            names.push(name.join("\\"));
        }

        debug!(directory = %self.directory.display(), count = names.len(), "Enumerated payload files");
        Ok(names)
    }
}

/// The package manifest, held open for the lifetime of the install state
#[derive(Debug)]
pub struct ManifestFile {
    path: PathBuf,
    file: Option<File>,
}

impl ManifestFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| InstallError::io(&path, FileOperation::Read, e))?;
        Ok(Self { path, file: Some(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl ManifestHandle for ManifestFile {
    fn release_manifest(&mut self) {
        if self.file.take().is_some() {
            debug!(manifest = %self.path.display(), "Released manifest");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_files_are_relative_and_backslash_separated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("VFS").join("ProgramFilesX86").join("App")).unwrap();
        std::fs::write(dir.path().join("AppxManifest.xml"), b"<Package/>").unwrap();
        std::fs::write(dir.path().join("VFS").join("ProgramFilesX86").join("App").join("app.dll"), b"MZ").unwrap();

        let package = ExtractedPackage::new(dir.path());
        let names = package.payload_files().unwrap();

        assert_eq!(names, vec!["AppxManifest.xml".to_string(), "VFS\\ProgramFilesX86\\App\\app.dll".to_string()]);
    }

    #[test]
    fn test_missing_package_directory_fails_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let package = ExtractedPackage::new(dir.path().join("missing"));

        assert!(matches!(package.payload_files(), Err(InstallError::PackageEnumeration { .. })));
    }

    #[test]
    fn test_file_path_joins_virtual_segments() {
        let context = PackageContext::new("App_1.0.0.0_x64__abc", "/packages/App");
        assert_eq!(
            context.file_path("VFS\\Windows\\app.ini").unwrap(),
            Path::new("/packages/App").join("VFS").join("Windows").join("app.ini")
        );
    }

    #[test]
    fn test_file_path_rejects_escaping_names() {
        let context = PackageContext::new("App_1.0.0.0_x64__abc", "/packages/App");
        for name in ["..\\other\\x.dll", "VFS\\C:\\x.dll", "VFS\\.\\x.dll"] {
            assert!(
                matches!(context.file_path(name), Err(InstallError::InvalidVirtualPath { .. })),
                "expected invalid for {:?}",
                name
            );
        }
    }

    #[test]
    fn test_release_manifest_closes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AppxManifest.xml");
        std::fs::write(&path, b"<Package/>").unwrap();

        let mut manifest = ManifestFile::open(&path).unwrap();
        assert!(manifest.is_held());
        manifest.release_manifest();
        assert!(!manifest.is_held());
        manifest.release_manifest();
        assert_eq!(manifest.path(), path.as_path());
    }
}
