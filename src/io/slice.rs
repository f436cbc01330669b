use super::{ReadAt, SharedReader};
use async_trait::async_trait;
use std::io;

/// A window `[start, start + len)` over another reader.
///
/// Nothing is read until the window itself is read from.
pub struct SliceReader {
    inner: SharedReader,
    start: u64,
    len: u64,
}

impl SliceReader {
    /// The window is clamped to the end of `inner`.
    pub fn new(inner: SharedReader, start: u64, len: u64) -> Self {
        let start = start.min(inner.size());
        let len = len.min(inner.size() - start);
        Self { inner, start, len }
    }
}

#[async_trait]
impl ReadAt for SliceReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(self.len - offset) as usize;
        self.inner.read_at(self.start + offset, &mut buf[..n]).await
    }

    fn size(&self) -> u64 {
        self.len
    }
}
