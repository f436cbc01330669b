use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::ops::Range;
use std::sync::Arc;

use crate::crc::Crc32;
use crate::error::{Error, Result};
use crate::inflate::Inflater;
use crate::io::{SharedReader, SliceReader};

use super::parser::ZipIndex;
use super::structures::{CompressionMethod, LFH_SIGNATURE, LFH_SIZE, ZipFileEntry};

/// ZIP file extractor
pub struct ZipExtractor {
    reader: SharedReader,
}

impl ZipExtractor {
    pub fn new(reader: SharedReader) -> Self {
        Self { reader }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        Ok(ZipIndex::load(self.reader.clone()).await?.into_entries())
    }

    /// Byte range of the entry's compressed data.
    ///
    /// The Local File Header has variable-length fields (filename, extra
    /// field) that may differ from the Central Directory entry, so their
    /// lengths are read from the local header itself.
    pub async fn compressed_range(&self, entry: &ZipFileEntry) -> Result<Range<u64>> {
        let lfh_offset = entry.lfh_offset as u64;
        let lfh_buf = self.reader.read_range(lfh_offset, LFH_SIZE as u64).await?;

        // Verify LFH signature (PK\x03\x04)
        if lfh_buf.len() < LFH_SIZE || &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::malformed(format!(
                "invalid local file header for {}",
                entry.file_name
            )));
        }

        // Read the variable field lengths from fixed positions in LFH
        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26); // Offset to filename length field

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        // Data starts after: LFH (30 bytes) + filename + extra field
        let start = lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length;
        let end = start + entry.compressed_size as u64;
        if end > self.reader.size() {
            return Err(Error::malformed(format!(
                "data of {} runs past the end of the archive",
                entry.file_name
            )));
        }
        Ok(start..end)
    }

    /// The compressed data as a lazily read source, e.g. for the install pipeline.
    pub async fn compressed_source(&self, entry: &ZipFileEntry) -> Result<SharedReader> {
        let range = self.compressed_range(entry).await?;
        Ok(Arc::new(SliceReader::new(
            self.reader.clone(),
            range.start,
            range.end - range.start,
        )))
    }

    /// Extract file data to memory
    pub async fn extract(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            return Err(Error::unsupported("encrypted ZIP entries"));
        }
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(Error::unsupported(format!("compression method {method}")));
        }

        let range = self.compressed_range(entry).await?;
        let compressed = self.reader.read_range(range.start, range.end - range.start).await?;
        if (compressed.len() as u64) < range.end - range.start {
            return Err(Error::malformed(format!("data of {} is truncated", entry.file_name)));
        }

        match entry.compression_method {
            CompressionMethod::Stored => Ok(compressed),
            _ => {
                let data = Inflater::raw().inflate_all(&compressed)?;
                let actual = Crc32::checksum(&data);
                if actual != entry.crc32 {
                    return Err(Error::CrcMismatch {
                        expected: entry.crc32,
                        actual,
                    });
                }
                Ok(data)
            }
        }
    }
}
