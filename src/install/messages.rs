use std::path::PathBuf;

use crate::error::Result;
use crate::io::SharedReader;

/// Compression applied to the source bytes of a [`WriteRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Deflate with a zlib header and trailer.
    Zlib,
    /// Raw deflate, as found in ZIP entries.
    DeflateRaw,
}

/// One file for the pipeline to produce.
#[derive(Clone)]
pub struct WriteRequest {
    /// Destination file. Parent directories are created as needed.
    pub path: PathBuf,
    /// Source bytes, read in chunks.
    pub data: SharedReader,
    pub compression: Option<Compression>,
    /// Expected CRC-32 of the bytes written.
    pub crc32: Option<u32>,
}

impl WriteRequest {
    pub fn new(path: impl Into<PathBuf>, data: SharedReader) -> Self {
        Self {
            path: path.into(),
            data,
            compression: None,
            crc32: None,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_crc32(mut self, crc32: u32) -> Self {
        self.crc32 = Some(crc32);
        self
    }
}

/// Commands accepted by the install worker.
pub enum WorkerRequest {
    Write(WriteRequest),
}

/// Messages sent back by the install worker.
///
/// Every `Write` request yields zero or more `Progress` messages followed by
/// exactly one `Write` response for the same path.
#[derive(Debug)]
pub enum WorkerResponse {
    /// Bytes written by one chunk (not a running total).
    Progress { path: PathBuf, value: u64 },
    Write { path: PathBuf, result: Result<()> },
}
