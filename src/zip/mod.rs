//! ZIP archive reading and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Central directory parsing into a [`ZipIndex`]
//! - [`extractor`]: Locating and decompressing entry data
//! - [`builder`]: Writing new archives with stored entries
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is read first (from the end of the file), then the Central
//! Directory, so listing files never touches entry data.
//!
//! ## Supported Features
//!
//! - STORED (no compression) and DEFLATE methods, CRC-checked on extraction
//! - UTF-8 names, and Shift_JIS names from Japanese Windows archivers
//!
//! ## Limitations
//!
//! - No ZIP64, encryption or multi-disk archives
//! - No BZIP2, LZMA, or other compression methods

mod builder;
mod extractor;
mod parser;
mod structures;

pub use builder::ZipBuilder;
pub use extractor::ZipExtractor;
pub use parser::ZipIndex;
pub use structures::*;

use crate::error::Result;
use crate::io::SharedReader;

/// Parse the central directory of the archive behind `reader` and list its entries.
pub async fn load(reader: SharedReader) -> Result<Vec<ZipFileEntry>> {
    Ok(ZipIndex::load(reader).await?.into_entries())
}
