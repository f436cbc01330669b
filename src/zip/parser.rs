//! Central directory parsing.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. Read the Central Directory to get metadata for all files
//! 3. For extraction, read each file's Local File Header and data
//!    (see [`ZipExtractor`](super::ZipExtractor))

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use std::io::{Cursor, Read};

use crate::error::{Error, Result};
use crate::io::{ReadAt, SharedReader};

use super::extractor::ZipExtractor;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Bytes at the end of the file that may contain the EOCD record.
const EOCD_SEARCH_WINDOW: u64 = MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64 + 1;

/// The parsed central directory of a ZIP archive.
///
/// Built once per archive; entries keep central-directory order.
pub struct ZipIndex {
    reader: SharedReader,
    entries: Vec<ZipFileEntry>,
}

impl ZipIndex {
    /// Parse the central directory of the archive behind `reader`.
    pub async fn load(reader: SharedReader) -> Result<Self> {
        let (eocd, eocd_offset) = find_eocd(reader.as_ref()).await?;

        let cd_offset = eocd.cd_offset as u64;
        let cd_size = eocd.cd_size as u64;
        if cd_offset + cd_size > eocd_offset {
            return Err(Error::malformed(format!(
                "central directory {cd_offset:#x}+{cd_size:#x} overlaps the end record at {eocd_offset:#x}"
            )));
        }

        // Read the entire Central Directory in one request
        let cd_data = reader.read_range(cd_offset, cd_size).await?;
        if (cd_data.len() as u64) < cd_size {
            return Err(Error::malformed("truncated central directory"));
        }

        let mut entries = Vec::with_capacity(eocd.total_entries as usize);
        let mut pos = 0;
        while pos < cd_data.len() {
            let (entry, len) = parse_cdfh(&cd_data[pos..])?;
            entries.push(entry);
            pos += len;
        }
        if entries.len() != eocd.total_entries as usize {
            debug!(
                "central directory holds {} entries, end record claims {}",
                entries.len(),
                eocd.total_entries
            );
        }

        Ok(Self { reader, entries })
    }

    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ZipFileEntry> {
        self.entries
    }

    /// Entry with exactly this name.
    pub fn find(&self, name: &str) -> Option<&ZipFileEntry> {
        self.entries.iter().find(|e| e.file_name == name)
    }

    pub fn reader(&self) -> &SharedReader {
        &self.reader
    }

    /// Extractor over the same source.
    pub fn extractor(&self) -> ZipExtractor {
        ZipExtractor::new(self.reader.clone())
    }

    /// Sum of the uncompressed sizes of all entries.
    pub fn total_uncompressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.uncompressed_size as u64).sum()
    }
}

/// Find and parse the End of Central Directory record.
///
/// Handles both the simple case (no comment) and archives with comments by
/// searching backwards for the signature.
///
/// Returns the record and its offset in the file.
async fn find_eocd(reader: &dyn ReadAt) -> Result<(EndOfCentralDirectory, u64)> {
    let size = reader.size();
    let eocd_size = EndOfCentralDirectory::SIZE as u64;
    if size < eocd_size {
        return Err(Error::malformed("not a ZIP file"));
    }

    // First try the simple case where there's no comment.
    let offset = size - eocd_size;
    let buf = reader.read_range(offset, eocd_size).await?;
    if buf.len() == EndOfCentralDirectory::SIZE
        && &buf[0..4] == EndOfCentralDirectory::SIGNATURE
        && buf[20..22] == [0, 0]
    {
        return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
    }

    // The EOCD could be earlier if there's a ZIP comment.
    let search_size = EOCD_SEARCH_WINDOW.min(size);
    let search_start = size - search_size;
    let buf = reader.read_range(search_start, search_size).await?;
    if buf.len() < EndOfCentralDirectory::SIZE {
        return Err(Error::malformed("not a ZIP file"));
    }

    for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
        if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
            let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
            return Ok((eocd, search_start + i as u64));
        }
    }

    Err(Error::malformed("not a ZIP file"))
}

/// Parse one Central Directory File Header at the start of `record`.
///
/// Returns the entry and the number of bytes the header occupies, including
/// its name, extra field and comment.
fn parse_cdfh(record: &[u8]) -> Result<(ZipFileEntry, usize)> {
    if record.len() < CDFH_MIN_SIZE {
        return Err(Error::malformed("truncated central directory entry"));
    }
    let mut cursor = Cursor::new(record);

    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if &sig[..] != CDFH_SIGNATURE {
        return Err(Error::malformed("invalid central directory entry"));
    }

    // Read fixed-size header fields
    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let version_needed = cursor.read_u16::<LittleEndian>()?;
    if version_needed > MAX_VERSION_NEEDED {
        return Err(Error::unsupported(format!("ZIP version {version_needed} needed to extract")));
    }
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;
    let file_comment_length = cursor.read_u16::<LittleEndian>()? as usize;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let lfh_offset = cursor.read_u32::<LittleEndian>()?;

    let len = CDFH_MIN_SIZE + file_name_length + extra_field_length + file_comment_length;
    if len > record.len() {
        return Err(Error::malformed("central directory entry runs past the directory"));
    }

    let name_encoding = NameEncoding::guess(flags, version_made_by);
    let file_name = name_encoding.decode(&record[CDFH_MIN_SIZE..CDFH_MIN_SIZE + file_name_length])?;

    let entry = ZipFileEntry {
        file_name,
        name_encoding,
        compression_method: CompressionMethod::from_u16(compression_method),
        flags,
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_modified: ZipDateTime::from_dos(last_mod_date, last_mod_time),
    };
    Ok((entry, len))
}
