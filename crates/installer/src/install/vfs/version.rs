//! File version and modification metadata used by the copy decision

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::install::error::{FileOperation, InstallError, Result};

/// `VS_FIXEDFILEINFO.dwSignature`
const FIXED_FILE_INFO_SIGNATURE: u32 = 0xFEEF_04BD;
/// `VS_FIXEDFILEINFO` is 13 dwords
const FIXED_FILE_INFO_LEN: usize = 52;
/// `wLength`, `wValueLength`, `wType`, `L"VS_VERSION_INFO\0"`, padded to a dword
const VERSION_INFO_HEADER_LEN: usize = 40;
const VERSION_INFO_KEY: &str = "VS_VERSION_INFO";
const RT_VERSION: u32 = 16;
/// Index of the resource table in the optional header's data directories
const RESOURCE_DIRECTORY_INDEX: usize = 2;
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const SECTION_HEADER_LEN: usize = 40;
const RESOURCE_SUBDIRECTORY: u32 = 0x8000_0000;
/// Upper bound on entries read from one resource directory
const MAX_RESOURCE_ENTRIES: usize = 4096;
/// FILETIME of 1970-01-01, in 100 ns ticks since 1601-01-01
const UNIX_EPOCH_AS_FILETIME: u64 = 116_444_736_000_000_000;

/// Binary version of a file, as carried in its version resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVersion {
    Unversioned,
    /// `dwFileVersionMS << 32 | dwFileVersionLS`
    Versioned(u64),
}

impl FileVersion {
    pub fn from_parts(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        FileVersion::Versioned(
            (major as u64) << 48 | (minor as u64) << 32 | (build as u64) << 16 | revision as u64,
        )
    }

    /// Packed version, 0 when unversioned
    pub fn encoded(&self) -> u64 {
        match self {
            FileVersion::Unversioned => 0,
            FileVersion::Versioned(v) => *v,
        }
    }

    pub fn is_unversioned(&self) -> bool {
        matches!(self, FileVersion::Unversioned)
    }

    /// Read the `RT_VERSION` resource of a PE image.
    ///
    /// Follows the PE headers to the resource table and reads only the
    /// structures on that path. Anything that is not a well-formed image with
    /// a version resource is unversioned; only I/O failures are errors.
    pub fn from_image<R: Read + Seek>(image: &mut R) -> io::Result<Self> {
        match fixed_file_version(image) {
            Ok(Some(version)) => Ok(FileVersion::Versioned(version)),
            Ok(None) => Ok(FileVersion::Unversioned),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(FileVersion::Unversioned),
            Err(e) => Err(e),
        }
    }

    /// Read the version resource of a file on disk
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| InstallError::io(path, FileOperation::Read, e))?;
        Self::from_image(&mut BufReader::new(file)).map_err(|e| InstallError::io(path, FileOperation::Read, e))
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.encoded();
        write!(
            f,
            "{}.{}.{}.{}",
            (v >> 48) & 0xFFFF,
            (v >> 32) & 0xFFFF,
            (v >> 16) & 0xFFFF,
            v & 0xFFFF
        )
    }
}

struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_offset: u32,
}

fn fixed_file_version<R: Read + Seek>(image: &mut R) -> io::Result<Option<u64>> {
    let dos = read_at(image, 0, 64)?;
    if &dos[..2] != b"MZ" {
        return Ok(None);
    }

    let pe_offset = u64::from(le_u32(&dos, 0x3C));
    let coff = read_at(image, pe_offset, 24)?;
    if &coff[..4] != b"PE\0\0" {
        return Ok(None);
    }
    let section_count = usize::from(le_u16(&coff, 6));
    let optional_len = usize::from(le_u16(&coff, 20));

    let optional = read_at(image, pe_offset + 24, optional_len)?;
    let directories_at = match optional.get(..2).map(|magic| le_u16(magic, 0)) {
        Some(PE32_MAGIC) => 96,
        Some(PE32_PLUS_MAGIC) => 112,
        _ => return Ok(None),
    };
    let Some(directory_count) = optional.get(directories_at - 4..directories_at).map(|n| le_u32(n, 0)) else {
        return Ok(None);
    };
    if (directory_count as usize) <= RESOURCE_DIRECTORY_INDEX {
        return Ok(None);
    }
    let entry_at = directories_at + RESOURCE_DIRECTORY_INDEX * 8;
    let Some(resource_rva) = optional.get(entry_at..entry_at + 8).map(|d| le_u32(d, 0)) else {
        return Ok(None);
    };
    if resource_rva == 0 {
        return Ok(None);
    }

    let table = read_at(image, pe_offset + 24 + optional_len as u64, section_count * SECTION_HEADER_LEN)?;
    let sections: Vec<Section> = table
        .chunks_exact(SECTION_HEADER_LEN)
        .map(|s| Section {
            virtual_size: le_u32(s, 8),
            virtual_address: le_u32(s, 12),
            raw_size: le_u32(s, 16),
            raw_offset: le_u32(s, 20),
        })
        .collect();
    let Some(root) = rva_to_offset(&sections, resource_rva) else {
        return Ok(None);
    };

    // Type -> name -> language; the first name and language are taken
    let Some(type_dir) = subdirectory(root, directory_entry(image, root, Some(RT_VERSION))?) else {
        return Ok(None);
    };
    let Some(name_dir) = subdirectory(root, directory_entry(image, type_dir, None)?) else {
        return Ok(None);
    };
    let data_entry = match directory_entry(image, name_dir, None)? {
        Some(offset) if offset & RESOURCE_SUBDIRECTORY == 0 => root + u64::from(offset),
        _ => return Ok(None),
    };

    let data = read_at(image, data_entry, 8)?;
    let (data_rva, data_len) = (le_u32(&data, 0), le_u32(&data, 4) as usize);
    if data_len < VERSION_INFO_HEADER_LEN + FIXED_FILE_INFO_LEN {
        return Ok(None);
    }
    let Some(info_offset) = rva_to_offset(&sections, data_rva) else {
        return Ok(None);
    };

    let info = read_at(image, info_offset, VERSION_INFO_HEADER_LEN + FIXED_FILE_INFO_LEN)?;
    let key: Vec<u8> = VERSION_INFO_KEY
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect();
    if info[6..6 + key.len()] != key[..] || usize::from(le_u16(&info, 2)) < FIXED_FILE_INFO_LEN {
        return Ok(None);
    }

    let fixed = &info[VERSION_INFO_HEADER_LEN..];
    if le_u32(fixed, 0) != FIXED_FILE_INFO_SIGNATURE {
        return Ok(None);
    }
    Ok(Some(u64::from(le_u32(fixed, 8)) << 32 | u64::from(le_u32(fixed, 12))))
}

/// `OffsetToData` of the entry with `id`, or of the first entry when `id` is `None`
fn directory_entry<R: Read + Seek>(image: &mut R, directory: u64, id: Option<u32>) -> io::Result<Option<u32>> {
    let header = read_at(image, directory, 16)?;
    let count = (usize::from(le_u16(&header, 12)) + usize::from(le_u16(&header, 14))).min(MAX_RESOURCE_ENTRIES);
    let entries = read_at(image, directory + 16, count * 8)?;
    Ok(entries
        .chunks_exact(8)
        .find(|entry| id.is_none_or(|id| le_u32(entry, 0) == id))
        .map(|entry| le_u32(entry, 4)))
}

fn subdirectory(root: u64, entry: Option<u32>) -> Option<u64> {
    entry
        .filter(|offset| offset & RESOURCE_SUBDIRECTORY != 0)
        .map(|offset| root + u64::from(offset & !RESOURCE_SUBDIRECTORY))
}

fn rva_to_offset(sections: &[Section], rva: u32) -> Option<u64> {
    sections
        .iter()
        .find(|s| rva >= s.virtual_address && rva - s.virtual_address < s.virtual_size.max(s.raw_size))
        .map(|s| u64::from(s.raw_offset) + u64::from(rva - s.virtual_address))
}

fn read_at<R: Read + Seek>(image: &mut R, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    image.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    image.read_exact(&mut buf)?;
    Ok(buf)
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Creation and last-write timestamps in FILETIME ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub creation: u64,
    pub last_write: u64,
}

impl FileTimes {
    /// Read timestamps from disk. `None` when the platform or file system does
    /// not record a creation time.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let metadata = std::fs::metadata(path).map_err(|e| InstallError::io(path, FileOperation::Metadata, e))?;
        let last_write = metadata
            .modified()
            .map_err(|e| InstallError::io(path, FileOperation::Metadata, e))?;
        let creation = match metadata.created() {
            Ok(created) => created,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Creation time unavailable");
                return Ok(None);
            }
        };

        Ok(Some(Self {
            creation: filetime_ticks(creation),
            last_write: filetime_ticks(last_write),
        }))
    }

    /// Whether the last write is more than `threshold` ticks after creation.
    ///
    /// Compares high and low 32-bit halves separately: any increase of the high
    /// half counts as modified even when the real delta is below the threshold.
    /// Installers that honour the same rule depend on this.
    pub fn is_modified(&self, threshold: u32) -> bool {
        let (write_high, write_low) = split(self.last_write);
        let (create_high, create_low) = split(self.creation);

        if write_high > create_high {
            return true;
        }
        write_high == create_high && write_low > create_low && write_low - create_low > threshold
    }
}

fn split(ticks: u64) -> (u32, u32) {
    ((ticks >> 32) as u32, ticks as u32)
}

fn filetime_ticks(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => UNIX_EPOCH_AS_FILETIME.saturating_add((after.as_nanos() / 100) as u64),
        Err(before) => UNIX_EPOCH_AS_FILETIME.saturating_sub((before.duration().as_nanos() / 100) as u64),
    }
}

/// Whether an unversioned file on disk has been modified since it was created.
/// A file without a recorded creation time is treated as modified.
pub fn is_file_modified(path: &Path, threshold: u32) -> Result<bool> {
    Ok(match FileTimes::read(path)? {
        Some(times) => times.is_modified(threshold),
        None => true,
    })
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    const TWO_SECONDS: u32 = 20_000_000;
    const RESOURCE_RVA: u32 = 0x1000;
    const RESOURCE_FILE_OFFSET: usize = 0x200;

    fn put_u16(bytes: &mut [u8], at: usize, value: u16) {
        bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
        bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// PE32+ image with one `.rsrc` section holding `resources`, laid out at RVA 0x1000
    fn pe_image(resources: &[u8], filler: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; RESOURCE_FILE_OFFSET];
        image[..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3C, 0x40);

        image[0x40..0x44].copy_from_slice(b"PE\0\0");
        put_u16(&mut image, 0x44, 0x8664);
        put_u16(&mut image, 0x46, 1);
        put_u16(&mut image, 0x54, 240);

        let optional = 0x58;
        put_u16(&mut image, optional, PE32_PLUS_MAGIC);
        put_u32(&mut image, optional + 108, 16);
        if !resources.is_empty() {
            put_u32(&mut image, optional + 112 + 16, RESOURCE_RVA);
            put_u32(&mut image, optional + 112 + 20, resources.len() as u32);
        }

        let section = optional + 240;
        image[section..section + 5].copy_from_slice(b".rsrc");
        put_u32(&mut image, section + 8, resources.len() as u32);
        put_u32(&mut image, section + 12, RESOURCE_RVA);
        put_u32(&mut image, section + 16, resources.len() as u32);
        put_u32(&mut image, section + 20, RESOURCE_FILE_OFFSET as u32);

        image.extend_from_slice(resources);
        image.extend_from_slice(filler);
        image
    }

    /// Resource tree `RT_VERSION -> 1 -> 0x409` pointing at `version_info`
    fn version_resources(version_info: &[u8]) -> Vec<u8> {
        let mut tree = vec![0u8; 88];
        // Root directory with one id entry
        put_u16(&mut tree, 14, 1);
        put_u32(&mut tree, 16, RT_VERSION);
        put_u32(&mut tree, 20, RESOURCE_SUBDIRECTORY | 24);
        // Name directory
        put_u16(&mut tree, 24 + 14, 1);
        put_u32(&mut tree, 40, 1);
        put_u32(&mut tree, 44, RESOURCE_SUBDIRECTORY | 48);
        // Language directory, pointing at a data entry
        put_u16(&mut tree, 48 + 14, 1);
        put_u32(&mut tree, 64, 0x409);
        put_u32(&mut tree, 68, 72);
        // Data entry
        put_u32(&mut tree, 72, RESOURCE_RVA + 88);
        put_u32(&mut tree, 76, version_info.len() as u32);

        tree.extend_from_slice(version_info);
        tree
    }

    fn version_info(ms: u32, ls: u32) -> Vec<u8> {
        let len = VERSION_INFO_HEADER_LEN + FIXED_FILE_INFO_LEN;
        let mut info = vec![0u8; len];
        put_u16(&mut info, 0, len as u16);
        put_u16(&mut info, 2, FIXED_FILE_INFO_LEN as u16);
        for (i, unit) in VERSION_INFO_KEY.encode_utf16().enumerate() {
            put_u16(&mut info, 6 + i * 2, unit);
        }
        put_u32(&mut info, VERSION_INFO_HEADER_LEN, FIXED_FILE_INFO_SIGNATURE);
        put_u32(&mut info, VERSION_INFO_HEADER_LEN + 4, 0x0001_0000);
        put_u32(&mut info, VERSION_INFO_HEADER_LEN + 8, ms);
        put_u32(&mut info, VERSION_INFO_HEADER_LEN + 12, ls);
        info
    }

    /// Minimal PE image whose version resource is `major.minor.build.revision`
    pub(crate) fn versioned_image(major: u16, minor: u16, build: u16, revision: u16, filler: &[u8]) -> Vec<u8> {
        let info = version_info(
            (u32::from(major) << 16) | u32::from(minor),
            (u32::from(build) << 16) | u32::from(revision),
        );
        pe_image(&version_resources(&info), filler)
    }

    fn version_of(bytes: &[u8]) -> FileVersion {
        FileVersion::from_image(&mut Cursor::new(bytes)).unwrap()
    }

    fn times(creation: u64, last_write: u64) -> FileTimes {
        FileTimes { creation, last_write }
    }

    #[test]
    fn test_version_is_read_from_version_resource() {
        let image = versioned_image(1, 2, 3, 4, b"padding");
        let version = version_of(&image);

        assert_eq!(version, FileVersion::from_parts(1, 2, 3, 4));
        assert_eq!(version.to_string(), "1.2.3.4");
        assert!(!version.is_unversioned());
    }

    #[test]
    fn test_text_file_is_unversioned() {
        let version = version_of(b"plain settings file");
        assert_eq!(version, FileVersion::Unversioned);
        assert_eq!(version.encoded(), 0);
        assert_eq!(version.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_signature_outside_version_resource_is_ignored() {
        let mut stray = FIXED_FILE_INFO_SIGNATURE.to_le_bytes().to_vec();
        stray.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        stray.extend_from_slice(&[0xFF; 8]);

        // A bare MZ stub with the pattern at offset 128
        let mut stub = b"MZ".to_vec();
        stub.resize(128, 0);
        stub.extend_from_slice(&stray);
        stub.resize(512, 0);
        assert_eq!(version_of(&stub), FileVersion::Unversioned);

        // A valid image without any resource table
        assert_eq!(version_of(&pe_image(&[], &stray)), FileVersion::Unversioned);
    }

    #[test]
    fn test_resource_table_without_version_entry_is_unversioned() {
        let mut resources = version_resources(&version_info(0x0005_0000, 0));
        // RT_ICON instead of RT_VERSION
        put_u32(&mut resources, 16, 3);
        assert_eq!(version_of(&pe_image(&resources, &[])), FileVersion::Unversioned);
    }

    #[test]
    fn test_wrong_version_info_key_is_unversioned() {
        let mut info = version_info(0x0005_0000, 0);
        put_u16(&mut info, 6, u16::from(b'X'));
        assert_eq!(version_of(&pe_image(&version_resources(&info), &[])), FileVersion::Unversioned);
    }

    #[test]
    fn test_truncated_image_is_unversioned() {
        let image = versioned_image(1, 0, 0, 0, &[]);
        assert_eq!(version_of(&image[..image.len() - 20]), FileVersion::Unversioned);
        assert_eq!(version_of(&image[..0x50]), FileVersion::Unversioned);
    }

    #[test]
    fn test_version_ordering_follows_packing() {
        assert!(FileVersion::from_parts(1, 0, 0, 0).encoded() < FileVersion::from_parts(1, 0, 0, 1).encoded());
        assert!(FileVersion::from_parts(1, 9, 9, 9).encoded() < FileVersion::from_parts(2, 0, 0, 0).encoded());
    }

    #[test]
    fn test_write_within_threshold_is_unmodified() {
        let base = 0x01D0_0000_0000_0000;
        assert!(!times(base, base).is_modified(TWO_SECONDS));
        assert!(!times(base, base + TWO_SECONDS as u64).is_modified(TWO_SECONDS));
        // Written before it was created
        assert!(!times(base + 5, base).is_modified(TWO_SECONDS));
    }

    #[test]
    fn test_write_past_threshold_is_modified() {
        let base = 0x01D0_0000_0000_0000;
        assert!(times(base, base + TWO_SECONDS as u64 + 1).is_modified(TWO_SECONDS));
    }

    #[test]
    fn test_high_word_rollover_counts_as_modified() {
        // One tick apart, but the write crosses into the next high word
        let creation = (5u64 << 32) | 0xFFFF_FFFF;
        let last_write = 6u64 << 32;
        assert_eq!(last_write - creation, 1);
        assert!(times(creation, last_write).is_modified(TWO_SECONDS));
    }

    #[test]
    fn test_filetime_ticks_of_unix_epoch() {
        assert_eq!(filetime_ticks(UNIX_EPOCH), UNIX_EPOCH_AS_FILETIME);
        let one_second_later = UNIX_EPOCH + std::time::Duration::from_secs(1);
        assert_eq!(filetime_ticks(one_second_later), UNIX_EPOCH_AS_FILETIME + 10_000_000);
    }

    #[test]
    fn test_read_versioned_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.dll");
        std::fs::write(&path, versioned_image(10, 0, 19041, 1, &[])).unwrap();

        assert_eq!(FileVersion::read(&path).unwrap(), FileVersion::from_parts(10, 0, 19041, 1));
    }

    #[test]
    fn test_read_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileVersion::read(&dir.path().join("absent.dll")).unwrap_err();
        assert!(matches!(err, InstallError::FileSystem { operation: FileOperation::Read, .. }));
    }
}
