//! VFS installer library
//!
//! This library copies the virtualized files of an extracted package
//! (`VFS\ProgramFilesX86\...`, `VFS\SystemX64\...`) to the real folders an
//! application expects, following the usual installer overwrite rules, and
//! removes them again on uninstall when no other user still needs them.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vfs_installer::{
//!     ExtractedPackage, JsonInstallDatabase, ManifestFile, PackageContext,
//!     PathMappings, VfsReconciler,
//! };
//!
//! # fn example() -> vfs_installer::Result<()> {
//! // Build the mapping table once and share it
//! let mappings = PathMappings::new()
//!     .with_mapping("ProgramFilesX86", r"C:\Program Files (x86)")?
//!     .with_mapping("Windows", r"C:\Windows")?;
//! let reconciler = VfsReconciler::new(&mappings);
//!
//! let package = PackageContext::new(
//!     "Contoso.App_1.0.0.0_x86__8wekyb3d8bbwe",
//!     r"C:\Program Files\MsixCoreApps\Contoso.App_1.0.0.0_x86__8wekyb3d8bbwe",
//! );
//!
//! // Install: copy VFS files where the overwrite rules allow it
//! let report = reconciler.execute_add(&package, &ExtractedPackage::new(&package.directory))?;
//! println!("copied {}, kept {}", report.copied(), report.skipped());
//!
//! // Uninstall: undo VFS files unless another user still has the package
//! let mut manifest = ManifestFile::open(package.directory.join("AppxManifest.xml"))?;
//! let database = JsonInstallDatabase::new(r"C:\ProgramData\installs.json", "alice");
//! reconciler.execute_remove(&package, &mut manifest, &database)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Overwrite rules
//!
//! - A missing target is always copied.
//! - A versioned file replaces an unversioned one.
//! - An unversioned target is replaced only if it was not modified after it
//!   was created.
//! - A versioned target is replaced only by a strictly higher version.

pub mod install;

// Re-export commonly used types for convenience
pub use install::{
    BlockMap, ErrorSeverity, ExtractedPackage, FileOperation, InstallDatabase, InstallError,
    JsonInstallDatabase, ManifestFile, ManifestHandle, PackageContext, PackageReader,
    ReconcilerConfig, Result, SyncConfig,
};
pub use install::vfs::{
    CopyDecision, FileOutcome, FileVersion, PathMappings, RemoveReport, SharedFiles, SyncReport,
    VfsPathResolver, VfsReconciler,
};
