//! Copies VFS files to their real locations on install and removes them on uninstall
//!
//! Every file is handled on its own: a file that cannot be resolved, inspected,
//! copied or deleted is logged and recorded in the report, and the pass moves
//! on. Only problems that make the whole request meaningless (no file list, no
//! answer from the install database) are returned as errors.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::install::block_map::BlockMap;
use crate::install::config::ReconcilerConfig;
use crate::install::database::InstallDatabase;
use crate::install::error::{ErrorSeverity, InstallError, Result};
use crate::install::package::{ManifestHandle, PackageContext, PackageReader};
use crate::install::vfs::decision::{CopyDecision, CopyReason, SkipReason, need_to_copy};
use crate::install::vfs::fs_utils::{copy_file, delete_file, ensure_parent_dir, remove_dir_all_counted, remove_dir_if_empty};
use crate::install::vfs::mapping::PathMappings;
use crate::install::vfs::resolver::{VfsPathResolver, is_under_root};

/// What happened to one virtual file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Copied(CopyReason),
    Skipped(SkipReason),
    Removed,
    /// No mapping for the name; nothing was touched
    Unresolved,
    Failed { category: &'static str, message: String },
}

impl FileOutcome {
    fn failed(error: &InstallError) -> Self {
        FileOutcome::Failed {
            category: error.category(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Package-relative virtual name
    pub name: String,
    /// Real location, when the name resolved
    pub target: Option<PathBuf>,
    pub outcome: FileOutcome,
}

/// Per-file results of a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files: Vec<FileRecord>,
}

impl SyncReport {
    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }

    pub fn copied(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Copied(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped(_)))
    }

    pub fn removed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Removed))
    }

    pub fn unresolved(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Unresolved))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    pub fn record(&self, name: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Why VFS files were or were not deleted on uninstall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedFiles {
    Removed,
    /// Another principal still has the package installed
    RetainedInstalledElsewhere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveReport {
    pub shared_files: SharedFiles,
    /// Delete results for VFS files; empty when they were retained
    pub files: SyncReport,
    /// Entries removed with the package directory, the directory itself included
    pub package_entries_removed: u64,
}

pub struct VfsReconciler<'a> {
    resolver: VfsPathResolver<'a>,
    config: ReconcilerConfig,
}

impl<'a> VfsReconciler<'a> {
    pub fn new(mappings: &'a PathMappings) -> Self {
        Self::with_config(mappings, ReconcilerConfig::default())
    }

    pub fn with_config(mappings: &'a PathMappings, config: ReconcilerConfig) -> Self {
        Self {
            resolver: VfsPathResolver::new(mappings),
            config,
        }
    }

    /// Copy every VFS payload file of `package` to its real location where
    /// the overwrite rules allow it
    pub fn execute_add(&self, package: &PackageContext, reader: &dyn PackageReader) -> Result<SyncReport> {
        let names = reader.payload_files()?;
        let mut report = SyncReport::default();

        for name in names.iter().filter(|n| is_under_root(n, &self.config.vfs_root)) {
            report.files.push(self.copy_vfs_file_to_local(package, name));
        }

        info!(
            package = %package.full_name,
            copied = report.copied(),
            skipped = report.skipped(),
            unresolved = report.unresolved(),
            failed = report.failed(),
            "Synchronized VFS files"
        );
        Ok(report)
    }

    /// Resolve one VFS file and copy it from the package directory if needed
    pub fn copy_vfs_file_to_local(&self, package: &PackageContext, name: &str) -> FileRecord {
        debug!(file_name = name, "CopyVfsFileToLocal");

        let target = match self.resolver.resolve(name) {
            Ok(target) => target,
            Err(e) => {
                debug!(file_name = name, error = %e, "Skipping unresolvable VFS file");
                return FileRecord {
                    name: name.to_string(),
                    target: None,
                    outcome: FileOutcome::Unresolved,
                };
            }
        };

        let outcome = match package.file_path(name) {
            Ok(source) => self.copy_if_necessary(&source, &target),
            Err(e) => FileOutcome::failed(&e),
        };
        FileRecord {
            name: name.to_string(),
            target: Some(target),
            outcome,
        }
    }

    /// Copy `source` over `target` when the overwrite rules say so, creating
    /// missing parent directories first
    pub fn copy_if_necessary(&self, source: &Path, target: &Path) -> FileOutcome {
        debug!(source_path = %source.display(), target_path = %target.display(), "CopyVfsFile");

        let decision = match need_to_copy(source, target, self.config.modification_threshold_ticks) {
            Ok(decision) => decision,
            Err(e) => {
                log_file_error(target, &e, "Unable to determine whether file needs copying");
                return FileOutcome::failed(&e);
            }
        };

        let reason = match decision {
            CopyDecision::Skip(reason) => {
                debug!(target_path = %target.display(), ?reason, "Keeping existing file");
                return FileOutcome::Skipped(reason);
            }
            CopyDecision::Copy(reason) => reason,
        };

        if let Err(e) = ensure_parent_dir(target) {
            log_file_error(target, &e, "Unable to create directory for copying file");
        }

        match copy_file(source, target) {
            Ok(bytes) => {
                debug!(target_path = %target.display(), bytes, ?reason, "Copied file");
                FileOutcome::Copied(reason)
            }
            Err(e) => {
                log_file_error(target, &e, "Unable to copy file");
                FileOutcome::failed(&e)
            }
        }
    }

    /// Undo a package's VFS files and remove its private directory.
    ///
    /// VFS files are only deleted when no other principal has the package
    /// installed. The manifest is released and the package directory removed
    /// in every case; errors that stopped file removal are returned afterwards.
    pub fn execute_remove(
        &self,
        package: &PackageContext,
        manifest: &mut dyn ManifestHandle,
        database: &dyn InstallDatabase,
    ) -> Result<RemoveReport> {
        // A failed check keeps the files; the error is returned after cleanup
        let outcome = match database.is_installed_for_other_user(&package.full_name) {
            Ok(false) => self
                .remove_vfs_files(package)
                .map(|files| (SharedFiles::Removed, files))
                .inspect_err(|e| warn!(package = %package.full_name, error = %e, "Unable to remove VFS files")),
            Ok(true) => {
                warn!(package = %package.full_name, "Not removing the package's files; another user has it installed");
                Ok((SharedFiles::RetainedInstalledElsewhere, SyncReport::default()))
            }
            Err(e) => {
                warn!(
                    package = %package.full_name,
                    error = %e,
                    "Not removing the package's files; could not determine whether another user has it installed"
                );
                Err(e)
            }
        };

        manifest.release_manifest();

        let (removed, result) = remove_dir_all_counted(&package.directory);
        match result {
            Ok(()) => info!(
                package_directory = %package.directory.display(),
                num_removed = removed,
                "Removed directory"
            ),
            Err(e) => warn!(
                package_directory = %package.directory.display(),
                num_removed = removed,
                error = %e,
                "Unable to fully remove package directory"
            ),
        }

        let (shared_files, files) = outcome?;
        Ok(RemoveReport {
            shared_files,
            files,
            package_entries_removed: removed,
        })
    }

    /// Delete every VFS file listed in the package's block map
    fn remove_vfs_files(&self, package: &PackageContext) -> Result<SyncReport> {
        let block_map = BlockMap::load(&package.file_path(&self.config.block_map_file)?)?;
        let mut report = SyncReport::default();

        for name in block_map.file_names().filter(|n| is_under_root(n, &self.config.vfs_root)) {
            report.files.push(self.remove_vfs_file(name));
        }

        info!(
            package = %package.full_name,
            removed = report.removed(),
            unresolved = report.unresolved(),
            failed = report.failed(),
            "Removed VFS files"
        );
        Ok(report)
    }

    /// Delete the real copy of one VFS file, then its directory if that is now empty
    pub fn remove_vfs_file(&self, name: &str) -> FileRecord {
        debug!(file_name = name, "RemoveVfsFile");

        let full_path = match self.resolver.resolve(name) {
            Ok(path) => path,
            Err(_) => {
                return FileRecord {
                    name: name.to_string(),
                    target: None,
                    outcome: FileOutcome::Unresolved,
                };
            }
        };

        let outcome = match delete_file(&full_path) {
            Ok(()) => FileOutcome::Removed,
            Err(e) => {
                log_file_error(&full_path, &e, "Unable to delete file");
                FileOutcome::failed(&e)
            }
        };

        // Not checking for emptiness first; a non-empty directory just refuses
        if let Some(parent) = full_path.parent() {
            match remove_dir_if_empty(parent) {
                Ok(true) => debug!(directory = %parent.display(), "Removed empty directory"),
                Ok(false) => {}
                Err(e) => log_file_error(parent, &e, "Unable to delete directory"),
            }
        }

        FileRecord {
            name: name.to_string(),
            target: Some(full_path),
            outcome,
        }
    }
}

/// Per-file errors go to warn; outcomes that only travel the error path stay at debug
fn log_file_error(full_path: &Path, error: &InstallError, message: &str) {
    match error.severity() {
        ErrorSeverity::Benign => debug!(full_path = %full_path.display(), error = %error, "{}", message),
        ErrorSeverity::Soft | ErrorSeverity::Fatal => {
            warn!(full_path = %full_path.display(), error = %error, category = error.category(), "{}", message)
        }
    }
}
