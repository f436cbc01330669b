//! AAR archives: a 16-byte header followed by an uncompressed index of
//! variable-length records.
//!
//! ```text
//! 0x00  "AAR\0"
//! 0x04  version (0)
//! 0x08  entry count
//! 0x0c  offset of the first entry's data
//! ```
//!
//! Each record is `offset: u32, size: u32, type: i32, name: NUL-terminated
//! Shift_JIS`. The first record starts at 0x0c, so its `offset` field is the
//! header's "first entry" field.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::{Entry, NamedAsset, check_range, decode_sjis};
use crate::error::{Error, Result};
use crate::io::SharedReader;

const MAGIC_AAR: u32 = 0x0052_4141; // "AAR\0"
const HEADER_SIZE: u64 = 16;
const INDEX_START: u64 = 12;
const RECORD_FIXED_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AarEntry {
    pub entry: Entry,
    /// Storage type recorded in the index (compressed, plain, symlink ...).
    pub kind: i32,
}

pub struct Aar {
    source: SharedReader,
    entries: Vec<AarEntry>,
    by_name: HashMap<String, usize>,
}

impl Aar {
    pub async fn open(source: SharedReader) -> Result<Self> {
        let header = source.read_range(0, HEADER_SIZE).await?;
        if header.len() < HEADER_SIZE as usize {
            return Err(Error::malformed("not an AAR file: header too short"));
        }
        if LittleEndian::read_u32(&header[0..4]) != MAGIC_AAR {
            return Err(Error::malformed("not an AAR file"));
        }
        let version = LittleEndian::read_u32(&header[4..8]);
        if version != 0 {
            return Err(Error::unsupported(format!("AAR version {version}")));
        }
        let count = LittleEndian::read_u32(&header[8..12]);
        let first_entry = LittleEndian::read_u32(&header[12..16]) as u64;
        if first_entry < HEADER_SIZE {
            return Err(Error::malformed("invalid AAR index"));
        }
        check_range("AAR index", INDEX_START, first_entry - INDEX_START, source.size())?;

        let index = source.read_range(INDEX_START, first_entry - INDEX_START).await?;
        let entries = Self::parse_index(&index, count, source.size())?;

        let by_name = entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| Some((e.entry.name.as_ref()?.to_lowercase(), i)))
            .collect();
        debug!("AAR: {} entries", entries.len());

        Ok(Self {
            source,
            entries,
            by_name,
        })
    }

    fn parse_index(index: &[u8], count: u32, source_size: u64) -> Result<Vec<AarEntry>> {
        let mut entries = Vec::with_capacity(count.min(0x10000) as usize);
        let mut pos = 0usize;
        for i in 0..count {
            if pos + RECORD_FIXED_SIZE > index.len() {
                return Err(Error::malformed(format!("invalid AAR index: record {i} truncated")));
            }
            let offset = LittleEndian::read_u32(&index[pos..]) as u64;
            let size = LittleEndian::read_u32(&index[pos + 4..]) as u64;
            let kind = LittleEndian::read_i32(&index[pos + 8..]);
            pos += RECORD_FIXED_SIZE;

            let name_len = index[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::malformed(format!("invalid AAR index: name {i} unterminated")))?;
            let name = decode_sjis(&index[pos..pos + name_len]);
            pos += name_len + 1;

            check_range(&format!("AAR entry {name}"), offset, size, source_size)?;
            entries.push(AarEntry {
                entry: Entry {
                    offset,
                    size,
                    name: Some(name),
                    id: None,
                },
                kind,
            });
        }
        Ok(entries)
    }

    pub fn entries(&self) -> impl Iterator<Item = &AarEntry> {
        self.entries.iter()
    }

    fn find(&self, name: &str) -> Option<&AarEntry> {
        let i = *self.by_name.get(&name.to_lowercase())?;
        self.entries.get(i)
    }

    pub fn exists_by_name(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Storage type of the entry called `name`.
    pub fn kind_by_name(&self, name: &str) -> Option<i32> {
        self.find(name).map(|e| e.kind)
    }

    pub async fn load_by_name(&self, name: &str) -> Result<Option<NamedAsset>> {
        let Some(found) = self.find(name) else {
            return Ok(None);
        };
        let data = found.entry.read(self.source.as_ref()).await?;
        Ok(Some(NamedAsset { data, id: None }))
    }
}
