//! Virtual directory token to real-world root table
//!
//! The table is built once, explicitly, and handed by reference to the
//! resolver and the reconciler. Rows keep their registration order, which is
//! the tie-breaker when several tokens could match the same path.

use std::path::{Path, PathBuf};

use crate::install::error::{InstallError, Result};
use crate::install::vfs::resolver::split_virtual_path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathMappings {
    entries: Vec<(String, PathBuf)>,
}

impl PathMappings {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register a token. `VFS\ProgramFilesX86` and `ProgramFilesX86` name the
    /// same row; registering a token twice is a configuration error.
    pub fn insert(&mut self, token: &str, root: impl AsRef<Path>) -> Result<()> {
        let token = normalize_token(token);
        if token.is_empty() {
            return Err(InstallError::Configuration {
                message: "mapping token must not be empty".to_string(),
            });
        }
        if self.get(&token).is_some() {
            return Err(InstallError::Configuration {
                message: format!("mapping token '{}' registered twice", token),
            });
        }
        self.entries.push((token, root.as_ref().to_path_buf()));
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with_mapping(mut self, token: &str, root: impl AsRef<Path>) -> Result<Self> {
        self.insert(token, root)?;
        Ok(self)
    }

    /// Case-insensitive lookup of a single token
    pub fn get(&self, token: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(token))
            .map(|(_, root)| root.as_path())
    }

    /// Rows in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(t, root)| (t.as_str(), root.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Standard Windows known-folder table, read from the process environment.
    /// Folders whose variable is unset are left out.
    pub fn from_known_folders() -> Self {
        Self::from_env_lookup(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut mappings = Self::new();
        let windows = lookup("windir").or_else(|| lookup("SystemRoot")).map(PathBuf::from);
        let program_files_x86 = lookup("ProgramFiles(x86)").map(PathBuf::from);
        let is_64_bit = program_files_x86.is_some();

        let mut rows: Vec<(&str, Option<PathBuf>)> = Vec::new();
        if let Some(windows) = &windows {
            let system32 = windows.join("System32");
            if is_64_bit {
                rows.push(("SystemX86", Some(windows.join("SysWOW64"))));
                rows.push(("SystemX64", Some(system32.clone())));
            } else {
                rows.push(("SystemX86", Some(system32.clone())));
            }
            rows.push(("System", Some(system32)));
            rows.push(("Fonts", Some(windows.join("Fonts"))));
            rows.push(("Windows", Some(windows.clone())));
        }

        if is_64_bit {
            rows.push(("ProgramFilesX86", program_files_x86));
            rows.push(("ProgramFilesCommonX86", lookup("CommonProgramFiles(x86)").map(PathBuf::from)));
            rows.push(("ProgramFilesX64", lookup("ProgramFiles").map(PathBuf::from)));
            rows.push(("ProgramFilesCommonX64", lookup("CommonProgramFiles").map(PathBuf::from)));
        } else {
            rows.push(("ProgramFilesX86", lookup("ProgramFiles").map(PathBuf::from)));
            rows.push(("ProgramFilesCommonX86", lookup("CommonProgramFiles").map(PathBuf::from)));
        }

        rows.push(("Common AppData", lookup("ProgramData").map(PathBuf::from)));
        rows.push(("LocalAppData", lookup("LOCALAPPDATA").map(PathBuf::from)));
        rows.push(("AppData", lookup("APPDATA").map(PathBuf::from)));

        for (token, root) in rows {
            if let Some(root) = root {
                // Tokens above are distinct literals
                let _ = mappings.insert(token, root);
            }
        }
        mappings
    }
}

/// Drop a leading `VFS` segment so both spellings of a token share a row
fn normalize_token(token: &str) -> String {
    let segments = split_virtual_path(token);
    match segments.split_first() {
        Some((first, rest)) if first.eq_ignore_ascii_case("VFS") && !rest.is_empty() => rest.join("\\"),
        _ => segments.join("\\"),
    }
}
