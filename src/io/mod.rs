mod local;
mod memory;
mod slice;

pub use local::LocalFileReader;
pub use memory::MemoryReader;
pub use slice::SliceReader;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// May return fewer bytes than requested; zero means end of source.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Read `len` bytes starting at `offset`.
    ///
    /// The result is shorter than `len` only when the range runs past the end
    /// of the source.
    async fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let end = offset.saturating_add(len).min(self.size());
        if offset >= end {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; (end - offset) as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Readers are shared between archives, descriptors and pipeline tasks.
pub type SharedReader = Arc<dyn ReadAt>;
