//! Block map reader
//!
//! `AppxBlockMap.xml` lists every payload file of a package. Uninstall uses it
//! as the authoritative list of what was laid down, so a file the user added
//! under the package directory is never mistaken for a package file.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::install::error::{InstallError, Result};

/// One `<File>` element of the block map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMapFile {
    /// Package-relative name, e.g. `VFS\ProgramFilesX86\App\app.dll`
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    files: Vec<BlockMapFile>,
}

impl BlockMap {
    pub fn load(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path).map_err(|e| InstallError::BlockMap {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&xml).map_err(|reason| InstallError::BlockMap {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse block map XML. Errors are returned as plain messages; [`load`](Self::load)
    /// attaches the file path.
    pub fn parse(xml: &str) -> std::result::Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        let mut files = Vec::new();
        let mut saw_root = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"BlockMap" => saw_root = true,
                    b"File" => files.push(parse_file(&e)?),
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(format!("malformed XML at byte {}: {}", reader.buffer_position(), e));
                }
            }
        }

        if !saw_root {
            return Err("missing BlockMap element".to_string());
        }
        Ok(Self { files })
    }

    pub fn files(&self) -> &[BlockMapFile] {
        &self.files
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.name.as_str())
    }
}

fn parse_file(element: &BytesStart<'_>) -> std::result::Result<BlockMapFile, String> {
    let mut name = None;
    let mut size = None;

    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| format!("bad File attribute: {}", e))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| format!("bad File attribute value: {}", e))?;
        match attribute.key.local_name().as_ref() {
            b"Name" => name = Some(value.into_owned()),
            b"Size" => {
                size = Some(
                    value
                        .parse::<u64>()
                        .map_err(|e| format!("bad File size '{}': {}", value, e))?,
                )
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| "File element without Name".to_string())?;
    Ok(BlockMapFile { name, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_MAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<BlockMap xmlns="http://schemas.microsoft.com/appx/2010/blockmap" HashMethod="http://www.w3.org/2001/04/xmlenc#sha256">
  <File Name="VFS\ProgramFilesX86\App\app.dll" Size="4096" LfhSize="62">
    <Block Hash="AAAA" Size="2048"/>
  </File>
  <File Name="Assets\logo &amp; icon.png" Size="10" LfhSize="50"/>
  <File Name="AppxManifest.xml" Size="900" LfhSize="46"/>
</BlockMap>"#;

    #[test]
    fn test_parse_lists_file_names() {
        let block_map = BlockMap::parse(BLOCK_MAP).unwrap();
        let names: Vec<&str> = block_map.file_names().collect();

        assert_eq!(
            names,
            vec!["VFS\\ProgramFilesX86\\App\\app.dll", "Assets\\logo & icon.png", "AppxManifest.xml"]
        );
        assert_eq!(block_map.files()[0].size, Some(4096));
    }

    #[test]
    fn test_missing_root_is_rejected() {
        assert!(BlockMap::parse("<Package/>").is_err());
    }

    #[test]
    fn test_file_without_name_is_rejected() {
        assert!(BlockMap::parse(r#"<BlockMap><File Size="1"/></BlockMap>"#).is_err());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AppxBlockMap.xml");

        match BlockMap::load(&path) {
            Err(InstallError::BlockMap { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected block map error, got {:?}", other),
        }
    }
}
