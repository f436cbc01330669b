//! AFA ("AliceArch") archives used by System 4 titles.
//!
//! ```text
//! 0x00  "AFAH"
//! 0x08  "AlicArch"
//! 0x10  version (1 or 2)
//! 0x18  data start
//! 0x1c  "INFO"
//! 0x20  INFO section size (16-byte section header + compressed index)
//! 0x28  entry count
//! 0x2c  zlib-compressed index
//! ```

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::debug;

use super::{Entry, NamedAsset, archive_basename, check_range, decode_sjis};
use crate::error::{Error, Result};
use crate::inflate::Inflater;
use crate::io::SharedReader;

const HEADER_SIZE: u64 = 44;
const INFO_HEADER_SIZE: u32 = 16;

const MAGIC_AFAH: u32 = 0x4841_4641; // "AFAH"
const MAGIC_ALIC: u32 = 0x6369_6c41; // "Alic"
const MAGIC_ARCH: u32 = 0x6863_7241; // "Arch"
const MAGIC_INFO: u32 = 0x4f46_4e49; // "INFO"

pub struct Afa {
    source: SharedReader,
    version: u32,
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
}

fn truncated(_: std::io::Error) -> Error {
    Error::malformed("invalid AFA index: truncated record")
}

impl Afa {
    pub async fn open(source: SharedReader) -> Result<Self> {
        let header = source.read_range(0, HEADER_SIZE).await?;
        if header.len() < HEADER_SIZE as usize {
            return Err(Error::malformed("not an AFA file: header too short"));
        }
        let field = |at: usize| LittleEndian::read_u32(&header[at..at + 4]);

        if field(0x00) != MAGIC_AFAH {
            return Err(Error::malformed("not an AFA file"));
        }
        if field(0x08) != MAGIC_ALIC || field(0x0c) != MAGIC_ARCH {
            return Err(Error::malformed("not an AlicArch file"));
        }
        let version = field(0x10);
        if version != 1 && version != 2 {
            return Err(Error::unsupported(format!("AFA version {version}")));
        }
        let data_start = field(0x18) as u64;
        if field(0x1c) != MAGIC_INFO {
            return Err(Error::malformed("cannot find AFA INFO section"));
        }
        let compressed_size = field(0x20)
            .checked_sub(INFO_HEADER_SIZE)
            .ok_or_else(|| Error::malformed("invalid AFA INFO section size"))?
            as u64;
        let file_count = field(0x28);
        check_range("AFA index", HEADER_SIZE, compressed_size, source.size())?;

        let compressed = source.read_range(HEADER_SIZE, compressed_size).await?;
        let index = Inflater::zlib().inflate_all(&compressed)?;

        let entries = Self::parse_index(&index, version, data_start, file_count, source.size())?;

        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_id = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if let Some(name) = &entry.name {
                by_name.insert(archive_basename(name), i);
            }
            if let Some(id) = entry.id {
                by_id.insert(id, i);
            }
        }
        debug!("AFA v{version}: {} entries, data at {data_start:#x}", entries.len());

        Ok(Self {
            source,
            version,
            entries,
            by_name,
            by_id,
        })
    }

    /// Walk the decompressed index. Every record must be complete and the
    /// walk must end exactly at the end of the index.
    fn parse_index(
        index: &[u8],
        version: u32,
        data_start: u64,
        file_count: u32,
        source_size: u64,
    ) -> Result<Vec<Entry>> {
        let mut cursor = Cursor::new(index);
        let mut entries = Vec::with_capacity(file_count.min(0x10000) as usize);

        for i in 0..file_count {
            let name_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;
            let padded_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;
            let name_start = cursor.position();
            let name_end = name_start + name_len;
            if name_len > padded_len || name_start + padded_len > index.len() as u64 {
                return Err(Error::malformed(format!("invalid AFA index: bad name in record {i}")));
            }
            let name = decode_sjis(&index[name_start as usize..name_end as usize]);
            cursor.set_position(name_start + padded_len);

            let mut id = i;
            if version == 1 {
                // Stored ids are 1-based; 0 after adjustment keeps the running index.
                let stored = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
                if let Some(n) = stored.checked_sub(1).filter(|&n| n != 0) {
                    id = n;
                }
            }

            let mut timestamp = [0u8; 8];
            cursor.read_exact(&mut timestamp).map_err(truncated)?;
            let offset = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64 + data_start;
            let size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;
            check_range(&format!("AFA entry {name}"), offset, size, source_size)?;

            entries.push(Entry {
                offset,
                size,
                name: Some(name),
                id: Some(id),
            });
        }

        if cursor.position() != index.len() as u64 {
            return Err(Error::malformed(format!(
                "invalid AFA index: {} trailing bytes",
                index.len() as u64 - cursor.position()
            )));
        }
        Ok(entries)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn exists(&self, no: u32) -> bool {
        self.by_id.contains_key(&no)
    }

    pub fn exists_by_name(&self, name: &str) -> bool {
        self.by_name.contains_key(&archive_basename(name))
    }

    /// Numeric id of the entry called `name`.
    pub fn id_by_name(&self, name: &str) -> Option<u32> {
        let i = *self.by_name.get(&archive_basename(name))?;
        self.entries[i].id
    }

    pub async fn load(&self, no: u32) -> Result<Option<Vec<u8>>> {
        let Some(&i) = self.by_id.get(&no) else {
            return Ok(None);
        };
        self.entries[i].read(self.source.as_ref()).await.map(Some)
    }

    pub async fn load_by_name(&self, name: &str) -> Result<Option<NamedAsset>> {
        let Some(&i) = self.by_name.get(&archive_basename(name)) else {
            return Ok(None);
        };
        let entry = &self.entries[i];
        let data = entry.read(self.source.as_ref()).await?;
        Ok(Some(NamedAsset { data, id: entry.id }))
    }
}
