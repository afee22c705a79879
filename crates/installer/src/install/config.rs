//! Configuration types for VFS synchronization

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::install::error::{InstallError, Result};
use crate::install::vfs::PathMappings;

/// Two seconds in FILETIME (100 ns) increments
pub const DEFAULT_MODIFICATION_THRESHOLD_TICKS: u32 = 20_000_000;

/// Configuration for a reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Name of the package directory holding virtualized files
    pub vfs_root: String,
    /// Block map file name, relative to the package directory
    pub block_map_file: String,
    /// Manifest file name, relative to the package directory
    pub manifest_file: String,
    /// An unversioned file whose last write is more than this many ticks after
    /// its creation is treated as modified by the user
    pub modification_threshold_ticks: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            vfs_root: "VFS".to_string(),
            block_map_file: "AppxBlockMap.xml".to_string(),
            manifest_file: "AppxManifest.xml".to_string(),
            modification_threshold_ticks: DEFAULT_MODIFICATION_THRESHOLD_TICKS,
        }
    }
}

/// One row of the path-mapping table as written in a config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub token: String,
    pub path: PathBuf,
}

/// On-disk configuration: the mapping table plus reconciler settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Mapping rows in registration order
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| InstallError::Configuration {
            message: format!("malformed config: {}", e),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| InstallError::Configuration {
            message: format!("cannot read '{}': {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Build the mapping table, keeping the order of the config file
    pub fn path_mappings(&self) -> Result<PathMappings> {
        let mut mappings = PathMappings::new();
        for entry in &self.mappings {
            mappings.insert(&entry.token, &entry.path)?;
        }
        Ok(mappings)
    }
}
