//! Incremental CRC-32 (IEEE 802.3, as used by ZIP).

/// Running CRC-32 over an arbitrary sequence of byte chunks.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another chunk into the checksum.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// The checksum of everything folded in so far.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// One-shot checksum of `data`.
    pub fn checksum(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}
