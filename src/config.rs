/// Default size of a chunk pulled from the source blob.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default number of chunks the reader may run ahead of the writer.
pub const DEFAULT_READ_AHEAD: usize = 2;

/// Default number of attempts per file before an install gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunables of the install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bytes read from the source per chunk.
    pub chunk_size: usize,
    /// Chunks buffered ahead of the writer; bounds memory use on large entries.
    pub read_ahead: usize,
    /// Attempts per file, counting the first one.
    pub max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_ahead: DEFAULT_READ_AHEAD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PipelineConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}
