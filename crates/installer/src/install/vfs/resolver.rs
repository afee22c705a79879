//! Virtual file name to real path resolution
//!
//! `VFS\ProgramFilesX86\App\app.dll` resolves to `<root of ProgramFilesX86>\App\app.dll`.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::install::error::{InstallError, Result};
use crate::install::vfs::mapping::PathMappings;

/// Split a package-relative name on either separator, dropping empty segments
pub(crate) fn split_virtual_path(name: &str) -> Vec<&str> {
    name.split(['\\', '/']).filter(|s| !s.is_empty()).collect()
}

/// Split a package-relative name and check that every segment is a plain file
/// name that cannot climb out of, or replace, the directory it is joined onto
pub(crate) fn checked_segments(name: &str) -> Result<Vec<&str>> {
    let segments = split_virtual_path(name);
    if let Some(bad) = segments.iter().find(|s| !is_plain_segment(s)) {
        return Err(InstallError::InvalidVirtualPath {
            name: name.to_string(),
            reason: format!("segment '{}' is not a plain file name", bad),
        });
    }
    Ok(segments)
}

fn is_plain_segment(segment: &str) -> bool {
    // Drive prefixes such as `C:` only parse as prefixes on Windows
    !segment.contains(':')
        && matches!(
            Path::new(segment).components().collect::<Vec<_>>()[..],
            [Component::Normal(_)]
        )
}

/// Whether `name` lives under the package's `root` directory (e.g. `VFS`)
pub fn is_under_root(name: &str, root: &str) -> bool {
    split_virtual_path(name)
        .first()
        .is_some_and(|first| first.eq_ignore_ascii_case(root))
}

/// Resolves virtual names against an injected [`PathMappings`] table
#[derive(Debug, Clone, Copy)]
pub struct VfsPathResolver<'a> {
    mappings: &'a PathMappings,
}

impl<'a> VfsPathResolver<'a> {
    pub fn new(mappings: &'a PathMappings) -> Self {
        Self { mappings }
    }

    /// Resolve a package-relative virtual name to its real location.
    ///
    /// The outermost segment (the VFS root) is stripped, then a mapping row is
    /// chosen: a token equal to the next segment wins, otherwise the
    /// first-registered token found anywhere in the remaining path. Both
    /// comparisons ignore ASCII case. The segment after the VFS root is then
    /// dropped and the rest joined onto the row's root.
    ///
    /// Every segment must be a plain file name; `.`, `..`, roots and drive
    /// prefixes are `InvalidVirtualPath`.
    pub fn resolve(&self, virtual_name: &str) -> Result<PathBuf> {
        let segments = checked_segments(virtual_name)?;

        let remaining = segments.get(1..).unwrap_or_default();
        let Some(root) = self.find_root(remaining) else {
            warn!(file_name = virtual_name, "Could not find VFS mapping");
            return Err(InstallError::MappingNotFound {
                name: virtual_name.to_string(),
            });
        };

        let relative = &remaining[1..];
        if relative.is_empty() {
            return Err(InstallError::InvalidVirtualPath {
                name: virtual_name.to_string(),
                reason: "names a mapped root, not a file beneath it".to_string(),
            });
        }

        let mut full_path = root.to_path_buf();
        full_path.extend(relative);
        Ok(full_path)
    }

    fn find_root(&self, remaining: &[&str]) -> Option<&'a std::path::Path> {
        let first = remaining.first()?;
        if let Some(root) = self.mappings.get(first) {
            return Some(root);
        }

        let remaining_path = remaining.join("\\").to_ascii_lowercase();
        self.mappings
            .iter()
            .find(|(token, _)| remaining_path.contains(&token.to_ascii_lowercase()))
            .map(|(_, root)| root)
    }
}
