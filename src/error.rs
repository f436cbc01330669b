//! Error types shared by the archive readers, the ZIP code and the install pipeline.

use thiserror::Error;

/// A Result type alias over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while reading archives or installing files.
///
/// A missing entry is not an error: lookups return `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad magic, bad index layout or an offset that points past the data.
    /// Retrying cannot help.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Encryption, an unknown compression method or an unsupported format version.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The checksum of the produced bytes did not match the recorded one.
    #[error("CRC32 mismatch (expected {expected:#010x}, computed {actual:#010x})")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Reading the source or writing the destination failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A registry handle that was never opened or is already closed.
    #[error("invalid archive handle {0}")]
    InvalidHandle(u32),

    #[error("install worker stopped before answering")]
    WorkerStopped,
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Whether re-running the whole transfer may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::CrcMismatch { .. })
    }
}
