//! Installed-package bookkeeping consulted before shared files are removed

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::install::error::{FileOperation, InstallError, Result};

/// Answers whether a package is still installed by anyone else
pub trait InstallDatabase {
    /// `Ok(true)` when a principal other than the current one has the package
    /// installed. An `Err` means the answer is unknown.
    fn is_installed_for_other_user(&self, package_full_name: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct DatabaseContents {
    /// Package full name -> principals that have it installed
    #[serde(default)]
    packages: BTreeMap<String, Vec<String>>,
}

/// Install database kept as a JSON file shared by all principals on the machine
#[derive(Debug, Clone)]
pub struct JsonInstallDatabase {
    path: PathBuf,
    current_user: String,
}

impl JsonInstallDatabase {
    pub fn new(path: impl Into<PathBuf>, current_user: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            current_user: current_user.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the current principal as having `package_full_name` installed
    pub fn register(&self, package_full_name: &str) -> Result<()> {
        let mut contents = self.read()?;
        let users = contents.packages.entry(package_full_name.to_string()).or_default();
        if !users.iter().any(|u| u == &self.current_user) {
            users.push(self.current_user.clone());
        }
        self.write(&contents)
    }

    /// Remove the current principal's record of `package_full_name`
    pub fn unregister(&self, package_full_name: &str) -> Result<()> {
        let mut contents = self.read()?;
        if let Some(users) = contents.packages.get_mut(package_full_name) {
            users.retain(|u| u != &self.current_user);
            if users.is_empty() {
                contents.packages.remove(package_full_name);
            }
        }
        self.write(&contents)
    }

    fn read(&self) -> Result<DatabaseContents> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(database = %self.path.display(), "Install database not found, treating as empty");
                return Ok(DatabaseContents::default());
            }
            Err(e) => return Err(InstallError::io(&self.path, FileOperation::Read, e)),
        };
        serde_json::from_str(&json).map_err(|e| InstallError::Configuration {
            message: format!("malformed install database '{}': {}", self.path.display(), e),
        })
    }

    fn write(&self, contents: &DatabaseContents) -> Result<()> {
        let json = serde_json::to_string_pretty(contents).map_err(|e| InstallError::Configuration {
            message: format!("cannot serialize install database: {}", e),
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, FileOperation::CreateDir, e))?;
        }
        std::fs::write(&self.path, json).map_err(|e| InstallError::io(&self.path, FileOperation::Write, e))
    }
}

impl InstallDatabase for JsonInstallDatabase {
    fn is_installed_for_other_user(&self, package_full_name: &str) -> Result<bool> {
        let contents = self.read().map_err(|e| InstallError::InstalledElsewhereCheck {
            package: package_full_name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(contents
            .packages
            .get(package_full_name)
            .is_some_and(|users| users.iter().any(|u| u != &self.current_user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGE: &str = "Contoso.App_1.0.0.0_x64__8wekyb3d8bbwe";

    #[test]
    fn test_missing_database_means_not_installed_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonInstallDatabase::new(dir.path().join("installs.json"), "alice");

        assert!(!db.is_installed_for_other_user(PACKAGE).unwrap());
    }

    #[test]
    fn test_other_principal_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installs.json");
        let alice = JsonInstallDatabase::new(&path, "alice");
        let bob = JsonInstallDatabase::new(&path, "bob");

        alice.register(PACKAGE).unwrap();
        assert!(!alice.is_installed_for_other_user(PACKAGE).unwrap());
        assert!(bob.is_installed_for_other_user(PACKAGE).unwrap());

        bob.register(PACKAGE).unwrap();
        alice.unregister(PACKAGE).unwrap();
        assert!(alice.is_installed_for_other_user(PACKAGE).unwrap());
        assert!(!bob.is_installed_for_other_user(PACKAGE).unwrap());

        bob.unregister(PACKAGE).unwrap();
        assert!(!alice.is_installed_for_other_user(PACKAGE).unwrap());
    }

    #[test]
    fn test_register_twice_keeps_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("installs.json");
        let alice = JsonInstallDatabase::new(&path, "alice");

        alice.register(PACKAGE).unwrap();
        alice.register(PACKAGE).unwrap();
        alice.unregister(PACKAGE).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(!json.contains(PACKAGE));
    }

    #[test]
    fn test_malformed_database_is_a_check_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installs.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let db = JsonInstallDatabase::new(&path, "alice");

        let err = db.is_installed_for_other_user(PACKAGE).unwrap_err();
        match err {
            InstallError::InstalledElsewhereCheck { package, .. } => assert_eq!(package, PACKAGE),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
