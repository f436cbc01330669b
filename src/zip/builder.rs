use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

use crate::crc::Crc32;
use crate::error::{Error, Result};

use super::structures::*;

/// "Version made by": Unix host, APPNOTE version 2.0.
const VERSION_MADE_BY: u16 = ((HOST_UNIX as u16) << 8) | 20;
const VERSION_NEEDED: u16 = 20;

/// External attributes: `drwxr-xr-x` plus the MS-DOS directory bit.
const DIR_ATTRS: u32 = (0o040755 << 16) | 0x10;
/// External attributes: `-rw-r--r--`.
const FILE_ATTRS: u32 = 0o100644 << 16;

struct PendingEntry {
    name: String,
    data: Vec<u8>,
    method: CompressionMethod,
    crc32: u32,
    uncompressed_size: usize,
    modified: ZipDateTime,
    external_attrs: u32,
}

/// Assembles a ZIP archive in memory.
///
/// Entries are written in the order they were added, uncompressed. Names are
/// marked as UTF-8, so any string round-trips through
/// [`ZipIndex`](super::ZipIndex).
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<PendingEntry>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory entry. A trailing `/` is appended if missing.
    pub fn add_directory(&mut self, name: &str, modified: ZipDateTime) -> &mut Self {
        let mut name = name.to_string();
        if !name.ends_with('/') {
            name.push('/');
        }
        self.entries.push(PendingEntry {
            name,
            data: Vec::new(),
            method: CompressionMethod::Stored,
            crc32: 0,
            uncompressed_size: 0,
            modified,
            external_attrs: DIR_ATTRS,
        });
        self
    }

    /// Add a file entry, stored without compression.
    pub fn add_file(&mut self, name: &str, data: Vec<u8>, modified: ZipDateTime) -> &mut Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            crc32: Crc32::checksum(&data),
            uncompressed_size: data.len(),
            data,
            method: CompressionMethod::Stored,
            modified,
            external_attrs: FILE_ATTRS,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emit the archive: local headers with data, the central directory, then
    /// the end record.
    ///
    /// Fails if the archive would need ZIP64 extensions (more than 65535
    /// entries, or sizes and offsets beyond 4 GiB).
    pub fn build(self) -> Result<Vec<u8>> {
        if self.entries.len() > u16::MAX as usize {
            return Err(Error::unsupported("more than 65535 ZIP entries"));
        }

        let mut out = Vec::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            offsets.push(fit_u32(out.len(), "archive offset")?);
            write_local_header(&mut out, entry)?;
            out.write_all(&entry.data)?;
        }

        let cd_offset = fit_u32(out.len(), "central directory offset")?;
        for (entry, &lfh_offset) in self.entries.iter().zip(&offsets) {
            write_central_header(&mut out, entry, lfh_offset)?;
        }
        let cd_size = fit_u32(out.len() - cd_offset as usize, "central directory size")?;

        let count = self.entries.len() as u16;
        out.write_all(EndOfCentralDirectory::SIGNATURE)?;
        out.write_u16::<LittleEndian>(0)?; // disk number
        out.write_u16::<LittleEndian>(0)?; // disk with central directory
        out.write_u16::<LittleEndian>(count)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u32::<LittleEndian>(cd_size)?;
        out.write_u32::<LittleEndian>(cd_offset)?;
        out.write_u16::<LittleEndian>(0)?; // comment length
        Ok(out)
    }
}

fn fit_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::unsupported(format!("{what} needs ZIP64")))
}

fn fit_u16(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::unsupported(format!("{what} too long")))
}

/// Fields shared by the local and the central header, from "version needed"
/// through the extra field length.
fn write_common_fields(out: &mut Vec<u8>, entry: &PendingEntry) -> Result<()> {
    out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    out.write_u16::<LittleEndian>(FLAG_UTF8)?;
    out.write_u16::<LittleEndian>(entry.method.as_u16())?;
    out.write_u16::<LittleEndian>(entry.modified.time)?;
    out.write_u16::<LittleEndian>(entry.modified.date)?;
    out.write_u32::<LittleEndian>(entry.crc32)?;
    out.write_u32::<LittleEndian>(fit_u32(entry.data.len(), "entry size")?)?;
    out.write_u32::<LittleEndian>(fit_u32(entry.uncompressed_size, "entry size")?)?;
    out.write_u16::<LittleEndian>(fit_u16(entry.name.len(), "entry name")?)?;
    out.write_u16::<LittleEndian>(0)?; // extra field length
    Ok(())
}

fn write_local_header(out: &mut Vec<u8>, entry: &PendingEntry) -> Result<()> {
    out.write_all(LFH_SIGNATURE)?;
    write_common_fields(out, entry)?;
    out.write_all(entry.name.as_bytes())?;
    Ok(())
}

fn write_central_header(out: &mut Vec<u8>, entry: &PendingEntry, lfh_offset: u32) -> Result<()> {
    out.write_all(CDFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
    write_common_fields(out, entry)?;
    out.write_u16::<LittleEndian>(0)?; // comment length
    out.write_u16::<LittleEndian>(0)?; // disk number start
    out.write_u16::<LittleEndian>(0)?; // internal attributes
    out.write_u32::<LittleEndian>(entry.external_attrs)?;
    out.write_u32::<LittleEndian>(lfh_offset)?;
    out.write_all(entry.name.as_bytes())?;
    Ok(())
}

#[cfg(test)]
impl ZipBuilder {
    /// Add a deflate-compressed file, optionally recording a wrong CRC.
    pub(crate) fn add_deflated(&mut self, name: &str, data: &[u8], crc_override: Option<u32>) -> &mut Self {
        use flate2::Compression;
        use flate2::write::DeflateEncoder;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        self.entries.push(PendingEntry {
            name: name.to_string(),
            data: encoder.finish().unwrap(),
            method: CompressionMethod::Deflate,
            crc32: crc_override.unwrap_or_else(|| Crc32::checksum(data)),
            uncompressed_size: data.len(),
            modified: ZipDateTime::now(),
            external_attrs: FILE_ATTRS,
        });
        self
    }
}
