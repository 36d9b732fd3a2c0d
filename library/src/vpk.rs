// Reads single files out of Valve VPK packages.
//
// Only the directory tree is parsed. A `<name>_dir.vpk` holds a header, the
// tree, and optionally data for some entries; other entries live in sibling
// `<name>_NNN.vpk` archives. Older builds keep their version file in one of
// these packages instead of loose in the tree.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::bail;

use crate::file_errors::{FileOperation, IoResultExt};
use crate::updater::UpdateError;

const SIGNATURE: u32 = 0x55aa_1234;
const ENTRY_TERMINATOR: u16 = 0xffff;
/// Archive index meaning "stored in the directory file after the tree".
const DIR_ARCHIVE: u16 = 0x7fff;
/// Tree strings use a single space for "no directory" and "no extension".
const EMPTY_PART: &str = " ";

#[derive(Debug, Clone, PartialEq, Eq)]
struct VpkEntry {
    preload: Vec<u8>,
    archive_index: u16,
    offset: u32,
    length: u32,
}

/// The directory tree of a `_dir.vpk` package.
#[derive(Debug)]
pub struct VpkDirectory {
    path: PathBuf,
    /// Where data stored in the directory file itself starts.
    data_start: u64,
    entries: HashMap<String, VpkEntry>,
}

impl VpkDirectory {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_file_context(FileOperation::ReadFile, path)?;
        let (data_start, entries) = parse_tree(&bytes).map_err(|reason| {
            UpdateError::InvalidState(format!("{} is not a valid VPK: {}", path.display(), reason))
        })?;
        tree_debug!("{} lists {} files", path.display(), entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            data_start,
            entries,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns the contents of `name` (a `/` separated path inside the
    /// package), or None if the package doesn't list it.
    pub fn read_file(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(entry) = self.entries.get(name) else {
            return Ok(None);
        };
        let mut contents = entry.preload.clone();
        if entry.length > 0 {
            let (archive, start) = if entry.archive_index == DIR_ARCHIVE {
                (self.path.clone(), self.data_start + u64::from(entry.offset))
            } else {
                (self.archive_path(entry.archive_index)?, u64::from(entry.offset))
            };
            let bytes = fs::read(&archive).with_file_context(FileOperation::ReadFile, &archive)?;
            let end = start + u64::from(entry.length);
            let data = usize::try_from(start)
                .ok()
                .zip(usize::try_from(end).ok())
                .and_then(|(start, end)| bytes.get(start..end));
            match data {
                Some(data) => contents.extend_from_slice(data),
                None => bail!(UpdateError::InvalidState(format!(
                    "{} is too short for {} in {}",
                    archive.display(),
                    name,
                    self.path.display()
                ))),
            }
        }
        Ok(Some(contents))
    }

    /// `pf2_misc_dir.vpk` keeps archive 3 in `pf2_misc_003.vpk`.
    fn archive_path(&self, index: u16) -> anyhow::Result<PathBuf> {
        let stem = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix("_dir.vpk"));
        match stem {
            Some(stem) => Ok(self.path.with_file_name(format!("{}_{:03}.vpk", stem, index))),
            None => bail!(UpdateError::InvalidArgument(
                "vpk".to_string(),
                self.path.display().to_string()
            )),
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let taken = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(taken)
            }
            None => Err(format!("truncated at byte {}", self.pos)),
        }
    }

    fn u16(&mut self) -> Result<u16, String> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<&'a str, String> {
        let rest = self.bytes.get(self.pos..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| format!("unterminated string at byte {}", self.pos))?;
        let start = self.pos;
        let raw = self.take(len)?;
        self.pos += 1;
        std::str::from_utf8(raw).map_err(|_| format!("string at byte {} is not utf-8", start))
    }
}

fn parse_tree(bytes: &[u8]) -> Result<(u64, HashMap<String, VpkEntry>), String> {
    let mut cursor = Cursor { bytes, pos: 0 };
    if cursor.u32()? != SIGNATURE {
        return Err("bad signature".to_string());
    }
    let header_len = match cursor.u32()? {
        1 => 12,
        // Four more section sizes, none needed to read files.
        2 => 28,
        version => return Err(format!("unsupported version {}", version)),
    };
    let tree_len = cursor.u32()? as usize;
    cursor.pos = header_len;
    let tree_end = header_len + tree_len;
    if tree_end > bytes.len() {
        return Err("tree extends past the end of the file".to_string());
    }

    let mut entries = HashMap::new();
    loop {
        let extension = cursor.string()?;
        if extension.is_empty() {
            break;
        }
        loop {
            let dir = cursor.string()?;
            if dir.is_empty() {
                break;
            }
            loop {
                let name = cursor.string()?;
                if name.is_empty() {
                    break;
                }
                let _crc = cursor.u32()?;
                let preload_len = cursor.u16()?;
                let archive_index = cursor.u16()?;
                let offset = cursor.u32()?;
                let length = cursor.u32()?;
                if cursor.u16()? != ENTRY_TERMINATOR {
                    return Err(format!("bad entry terminator for {}", name));
                }
                let preload = cursor.take(usize::from(preload_len))?.to_vec();
                entries.insert(
                    entry_name(dir, name, extension),
                    VpkEntry {
                        preload,
                        archive_index,
                        offset,
                        length,
                    },
                );
            }
        }
    }
    if cursor.pos > tree_end {
        return Err("tree is longer than its header says".to_string());
    }
    Ok((tree_end as u64, entries))
}

fn entry_name(dir: &str, name: &str, extension: &str) -> String {
    let file = if extension == EMPTY_PART {
        name.to_string()
    } else {
        format!("{}.{}", name, extension)
    };
    if dir == EMPTY_PART {
        file
    } else {
        format!("{}/{}", dir, file)
    }
}
