//! Readers for the legacy asset containers used by AliceSoft titles.
//!
//! - [`Ald`]: multi-volume indexed archive (`*A.ALD` .. `*Z.ALD`), optionally
//!   with an obfuscated header.
//! - [`Afa`]: single-file archive with a deflate-compressed index (`AFAH`).
//! - [`Dlf`]: fixed table of 300 numbered slots (`DLF\0`).
//! - [`Aar`]: single-file archive with named entries (`AAR\0`).
//!
//! All indices are built eagerly when an archive is opened, and every offset is
//! checked against the size of its source at that point. After construction
//! an archive is immutable; lookups only issue range reads on the source.

mod aar;
mod afa;
mod ald;
mod dlf;
mod registry;

pub use aar::{Aar, AarEntry};
pub use afa::Afa;
pub use ald::{Ald, AldSlot, MAX_VOLUMES};
pub use dlf::{DLF_SLOTS, Dlf};
pub use registry::{ArchiveHandle, AssetRegistry};

use crate::error::{Error, Result};
use crate::io::{ReadAt, SharedReader};

/// One asset inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub offset: u64,
    pub size: u64,
    pub name: Option<String>,
    pub id: Option<u32>,
}

impl Entry {
    async fn read(&self, source: &dyn ReadAt) -> Result<Vec<u8>> {
        let data = source.read_range(self.offset, self.size).await?;
        if (data.len() as u64) < self.size {
            return Err(Error::malformed(format!(
                "entry at {:#x} is truncated ({} of {} bytes)",
                self.offset,
                data.len(),
                self.size
            )));
        }
        Ok(data)
    }
}

/// Result of a lookup by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAsset {
    pub data: Vec<u8>,
    /// Numeric id of the entry, if the format has one.
    pub id: Option<u32>,
}

/// Container formats that can be recognised from their leading magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Afa,
    Aar,
    Dlf,
}

impl ArchiveFormat {
    /// Sniff the format of a single-file archive.
    ///
    /// ALD volumes carry no magic and are never detected.
    pub async fn detect(source: &dyn ReadAt) -> Result<Option<Self>> {
        let magic = source.read_range(0, 4).await?;
        Ok(match magic.as_slice() {
            b"AFAH" => Some(ArchiveFormat::Afa),
            b"AAR\0" => Some(ArchiveFormat::Aar),
            b"DLF\0" => Some(ArchiveFormat::Dlf),
            _ => None,
        })
    }
}

/// An opened archive of any supported format.
pub enum Archive {
    Ald(Ald),
    Afa(Afa),
    Dlf(Dlf),
    Aar(Aar),
}

impl Archive {
    /// Open a single-file archive of a known format.
    pub async fn open(format: ArchiveFormat, source: SharedReader) -> Result<Self> {
        Ok(match format {
            ArchiveFormat::Afa => Archive::Afa(Afa::open(source).await?),
            ArchiveFormat::Aar => Archive::Aar(Aar::open(source).await?),
            ArchiveFormat::Dlf => Archive::Dlf(Dlf::open(source).await?),
        })
    }

    /// Open a single-file archive, detecting its format.
    pub async fn open_detect(source: SharedReader) -> Result<Self> {
        match ArchiveFormat::detect(source.as_ref()).await? {
            Some(format) => Self::open(format, source).await,
            None => Err(Error::malformed("unrecognised archive format")),
        }
    }

    pub fn exists(&self, no: u32) -> Result<bool> {
        match self {
            Archive::Ald(ald) => Ok(ald.exists(no)),
            Archive::Afa(afa) => Ok(afa.exists(no)),
            Archive::Dlf(dlf) => Ok(dlf.exists(no)),
            Archive::Aar(_) => Err(Error::unsupported("AAR entries have no numbers")),
        }
    }

    pub fn exists_by_name(&self, name: &str) -> Result<bool> {
        match self {
            Archive::Afa(afa) => Ok(afa.exists_by_name(name)),
            Archive::Aar(aar) => Ok(aar.exists_by_name(name)),
            Archive::Ald(_) => Err(Error::unsupported("ALD entries have no names")),
            Archive::Dlf(_) => Err(Error::unsupported("DLF entries have no names")),
        }
    }

    pub async fn load(&self, no: u32) -> Result<Option<Vec<u8>>> {
        match self {
            Archive::Ald(ald) => ald.load(no).await,
            Archive::Afa(afa) => afa.load(no).await,
            Archive::Dlf(dlf) => dlf.load(no).await,
            Archive::Aar(_) => Err(Error::unsupported("AAR entries have no numbers")),
        }
    }

    pub async fn load_by_name(&self, name: &str) -> Result<Option<NamedAsset>> {
        match self {
            Archive::Afa(afa) => afa.load_by_name(name).await,
            Archive::Aar(aar) => aar.load_by_name(name).await,
            Archive::Ald(_) => Err(Error::unsupported("ALD entries have no names")),
            Archive::Dlf(_) => Err(Error::unsupported("DLF entries have no names")),
        }
    }

    /// Index entries in on-disk order (ALD: by entry number). ALD entries
    /// report a size of 0; their size is in each entry's sub-header.
    pub fn entries(&self) -> Vec<Entry> {
        match self {
            Archive::Ald(ald) => ald
                .entries()
                .map(|(no, slot)| Entry {
                    offset: slot.offset,
                    size: 0,
                    name: None,
                    id: Some(no),
                })
                .collect(),
            Archive::Afa(afa) => afa.entries().to_vec(),
            Archive::Dlf(dlf) => dlf.entries().cloned().collect(),
            Archive::Aar(aar) => aar.entries().map(|e| e.entry.clone()).collect(),
        }
    }
}

/// Normalise an asset path for name lookups: drop the extension, lower-case,
/// and use `\` as the only separator.
pub fn archive_basename(path: &str) -> String {
    let stem = match path.rfind('.') {
        Some(i) => &path[..i],
        None => path,
    };
    stem.to_lowercase().replace('/', "\\")
}

/// Reject a range that does not fit inside a source of `source_size` bytes.
fn check_range(what: &str, offset: u64, size: u64, source_size: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= source_size => Ok(()),
        _ => Err(Error::malformed(format!(
            "{what}: range {offset:#x}+{size:#x} exceeds file size {source_size:#x}"
        ))),
    }
}

/// Decode a legacy Shift_JIS name; undecodable bytes become U+FFFD.
fn decode_sjis(bytes: &[u8]) -> String {
    let (name, _) = encoding_rs::SHIFT_JIS.decode_without_bom_handling(bytes);
    name.into_owned()
}
