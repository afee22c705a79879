//! Installation module
//!
//! This module synchronizes a package's virtualized files with the real file
//! system on install and undoes that on uninstall.

pub mod block_map;
pub mod config;
pub mod database;
pub mod error;
pub mod package;
pub mod vfs;


// Re-export commonly used types
pub use block_map::{BlockMap, BlockMapFile};
pub use config::{MappingEntry, ReconcilerConfig, SyncConfig};
pub use database::{InstallDatabase, JsonInstallDatabase};
pub use error::{ErrorSeverity, FileOperation, InstallError, Result};
pub use package::{ExtractedPackage, ManifestFile, ManifestHandle, PackageContext, PackageReader};
