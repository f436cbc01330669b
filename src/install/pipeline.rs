//! Chunked source → (inflate) → file transfer with CRC verification.

use async_trait::async_trait;
use log::{debug, trace};
use std::fmt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::messages::{Compression, WriteRequest};
use crate::config::PipelineConfig;
use crate::crc::Crc32;
use crate::error::{Error, Result};
use crate::inflate::Inflater;
use crate::io::SharedReader;

/// Where a transfer is, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Reading,
    Decompressing,
    Writing,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Reading => "reading",
            Stage::Decompressing => "decompressing",
            Stage::Writing => "writing",
            Stage::Verifying => "verifying",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Receives the number of bytes written after each piece of a transfer.
///
/// The transfer waits for `progress` to return before it writes more, so a
/// sink that forwards into a bounded channel holds the writer back.
#[async_trait]
pub trait ProgressSink: Send {
    async fn progress(&mut self, written: u64);
}

#[async_trait]
impl<F> ProgressSink for F
where
    F: FnMut(u64) + Send,
{
    async fn progress(&mut self, written: u64) {
        (self)(written)
    }
}

/// Produce `request.path` from `request.data`.
///
/// The source is pulled in `config.chunk_size` pieces by a separate task that
/// runs at most `config.read_ahead` chunks ahead of the writer. Compressed
/// chunks are inflated in pieces of at most [`OUTPUT_STEP`](crate::inflate::OUTPUT_STEP)
/// bytes. `on_progress` receives the number of bytes written for each piece.
///
/// Returns the number of bytes written. On error the destination may be left
/// partially written, and on a CRC mismatch it is complete; deleting it is up
/// to the caller.
pub async fn write_file<F>(request: &WriteRequest, config: &PipelineConfig, mut on_progress: F) -> Result<u64>
where
    F: FnMut(u64) + Send,
{
    write_file_to(request, config, &mut on_progress).await
}

/// [`write_file`] with progress going to any [`ProgressSink`].
pub async fn write_file_to(
    request: &WriteRequest,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> Result<u64> {
    let mut stage = Stage::Pending;
    let result = transfer(request, config, progress, &mut stage).await;
    match &result {
        Ok(written) => debug!("wrote {} ({written} bytes)", request.path.display()),
        Err(e) => {
            debug!("writing {} failed while {stage}: {e}", request.path.display());
            stage = Stage::Failed;
        }
    }
    trace!("{}: {stage}", request.path.display());
    result
}

async fn transfer(
    request: &WriteRequest,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
    stage: &mut Stage,
) -> Result<u64> {
    if let Some(parent) = request.path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&request.path)
        .await?;

    let mut inflater = request.compression.map(|c| match c {
        Compression::Zlib => Inflater::zlib(),
        Compression::DeflateRaw => Inflater::raw(),
    });
    let mut crc = Crc32::new();
    let mut written = 0u64;
    let mut chunks = spawn_chunk_reader(request.data.clone(), config.chunk_size, config.read_ahead);

    loop {
        *stage = Stage::Reading;
        let Some(chunk) = chunks.recv().await else {
            break;
        };
        let chunk = chunk?;
        trace!("{}: read {} bytes", request.path.display(), chunk.len());

        let Some(inflater) = inflater.as_mut() else {
            *stage = Stage::Writing;
            written += append(&mut file, &mut crc, &chunk, progress).await?;
            continue;
        };
        let mut input = &chunk[..];
        loop {
            *stage = Stage::Decompressing;
            let piece = inflater.step(&mut input)?;
            if piece.is_empty() {
                break;
            }
            *stage = Stage::Writing;
            written += append(&mut file, &mut crc, &piece, progress).await?;
        }
    }

    if let Some(inflater) = inflater.as_mut() {
        loop {
            *stage = Stage::Decompressing;
            let piece = inflater.drain()?;
            if piece.is_empty() {
                break;
            }
            *stage = Stage::Writing;
            written += append(&mut file, &mut crc, &piece, progress).await?;
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    *stage = Stage::Verifying;
    if let Some(expected) = request.crc32 {
        let actual = crc.value();
        if actual != expected {
            return Err(Error::CrcMismatch { expected, actual });
        }
    }
    *stage = Stage::Done;
    Ok(written)
}

async fn append(
    file: &mut fs::File,
    crc: &mut Crc32,
    bytes: &[u8],
    progress: &mut dyn ProgressSink,
) -> Result<u64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    file.write_all(bytes).await?;
    crc.update(bytes);
    progress.progress(bytes.len() as u64).await;
    Ok(bytes.len() as u64)
}

/// Read `source` front to back on a separate task.
///
/// The channel holds at most `read_ahead` chunks, so the reader waits while the
/// writer is behind. Dropping the receiver stops the reader. A source that
/// ends before its reported size is `Malformed`.
fn spawn_chunk_reader(source: SharedReader, chunk_size: usize, read_ahead: usize) -> mpsc::Receiver<Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel(read_ahead.max(1));
    let chunk_size = chunk_size.max(1) as u64;

    tokio::spawn(async move {
        let size = source.size();
        let mut offset = 0u64;
        while offset < size {
            let len = chunk_size.min(size - offset);
            let chunk = match source.read_range(offset, len).await {
                Ok(chunk) if chunk.len() as u64 == len => Ok(chunk),
                Ok(chunk) => Err(Error::malformed(format!(
                    "source ended at {} of {size} bytes",
                    offset + chunk.len() as u64
                ))),
                Err(e) => Err(Error::Io(e)),
            };
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
            offset += len;
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflate::OUTPUT_STEP;
    use crate::io::{MemoryReader, ReadAt};
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use std::io::{self, Write};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CHUNK: usize = 4096;

    fn config() -> PipelineConfig {
        PipelineConfig::default().with_chunk_size(CHUNK)
    }

    fn blob(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    fn source(bytes: Vec<u8>) -> SharedReader {
        Arc::new(MemoryReader::new(bytes))
    }

    #[tokio::test]
    async fn progress_sums_to_size() {
        let dir = tempfile::tempdir().unwrap();
        let data = blob(3 * CHUNK + 17);
        let request = WriteRequest::new(dir.path().join("nested/dir/out.bin"), source(data.clone()))
            .with_crc32(Crc32::checksum(&data));

        let mut events = Vec::new();
        let written = write_file(&request, &config(), |n| events.push(n)).await.unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(events, vec![CHUNK as u64, CHUNK as u64, CHUNK as u64, 17]);
        assert_eq!(std::fs::read(&request.path).unwrap(), data);
    }

    #[tokio::test]
    async fn wrong_crc_after_full_write() {
        let dir = tempfile::tempdir().unwrap();
        let data = blob(3 * CHUNK + 17);
        let expected = Crc32::checksum(&data) ^ 1;
        let request = WriteRequest::new(dir.path().join("out.bin"), source(data.clone())).with_crc32(expected);

        let err = write_file(&request, &config(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::CrcMismatch { expected: e, .. } if e == expected));
        assert!(err.is_retryable());
        assert_eq!(std::fs::metadata(&request.path).unwrap().len(), data.len() as u64);
    }

    #[tokio::test]
    async fn inflates_raw_and_zlib_sources() {
        let dir = tempfile::tempdir().unwrap();
        let data = blob(10 * CHUNK + 5);

        let mut raw = DeflateEncoder::new(Vec::new(), flate2::Compression::fast());
        raw.write_all(&data).unwrap();
        let mut zlib = ZlibEncoder::new(Vec::new(), flate2::Compression::best());
        zlib.write_all(&data).unwrap();

        for (name, compressed, compression) in [
            ("raw.bin", raw.finish().unwrap(), Compression::DeflateRaw),
            ("zlib.bin", zlib.finish().unwrap(), Compression::Zlib),
        ] {
            let request = WriteRequest::new(dir.path().join(name), source(compressed))
                .with_compression(compression)
                .with_crc32(Crc32::checksum(&data));
            let mut total = 0;
            write_file(&request, &config(), |n| total += n).await.unwrap();
            assert_eq!(total, data.len() as u64);
            assert_eq!(std::fs::read(&request.path).unwrap(), data);
        }
    }

    #[tokio::test]
    async fn truncated_compressed_source_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        raw.write_all(&blob(50_000)).unwrap();
        let mut compressed = raw.finish().unwrap();
        compressed.truncate(compressed.len() / 2);

        let request = WriteRequest::new(dir.path().join("out.bin"), source(compressed))
            .with_compression(Compression::DeflateRaw);
        let err = write_file(&request, &config(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn high_ratio_chunks_are_written_in_bounded_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![0u8; 16 * 1024 * 1024];
        let mut raw = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        raw.write_all(&data).unwrap();
        let compressed = raw.finish().unwrap();

        let request = WriteRequest::new(dir.path().join("zeros.bin"), source(compressed))
            .with_compression(Compression::DeflateRaw)
            .with_crc32(Crc32::checksum(&data));
        let mut events = Vec::new();
        let written = write_file(&request, &config(), |n| events.push(n)).await.unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(events.iter().sum::<u64>(), data.len() as u64);
        assert!(events.iter().all(|&n| n <= OUTPUT_STEP as u64));
        assert_eq!(std::fs::metadata(&request.path).unwrap().len(), data.len() as u64);
    }

    #[tokio::test]
    async fn progress_sink_sees_every_piece() {
        struct Tally(Vec<u64>);

        #[async_trait]
        impl ProgressSink for Tally {
            async fn progress(&mut self, written: u64) {
                tokio::task::yield_now().await;
                self.0.push(written);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let data = blob(2 * CHUNK + 1);
        let request = WriteRequest::new(dir.path().join("out.bin"), source(data));
        let mut tally = Tally(Vec::new());
        write_file_to(&request, &config(), &mut tally).await.unwrap();
        assert_eq!(tally.0, vec![CHUNK as u64, CHUNK as u64, 1]);
    }

    /// Source whose reported size is larger than what it can deliver.
    struct ShortReader {
        inner: MemoryReader,
        claimed: u64,
    }

    #[async_trait]
    impl ReadAt for ShortReader {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read_at(offset, buf).await
        }

        fn size(&self) -> u64 {
            self.claimed
        }
    }

    #[tokio::test]
    async fn source_ending_early_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let short = ShortReader {
            inner: MemoryReader::new(blob(CHUNK + 10)),
            claimed: 3 * CHUNK as u64,
        };
        let request = WriteRequest::new(dir.path().join("out.bin"), Arc::new(short));
        let err = write_file(&request, &config(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Decompressing.to_string(), "decompressing");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn rewrites_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![0xffu8; 10_000]).unwrap();

        let request = WriteRequest::new(&path, source(b"short".to_vec()));
        write_file(&request, &config(), |_| {}).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    /// Source that records how far ahead of the writer it has been asked to read.
    struct CountingReader {
        inner: MemoryReader,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl ReadAt for CountingReader {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_at(offset, buf).await
        }

        fn size(&self) -> u64 {
            self.inner.size()
        }
    }

    #[tokio::test]
    async fn reader_stays_a_bounded_distance_ahead() {
        let reader = Arc::new(CountingReader {
            inner: MemoryReader::new(blob(20 * CHUNK)),
            reads: AtomicUsize::new(0),
        });
        let mut chunks = spawn_chunk_reader(reader.clone(), CHUNK, 2);

        let first = chunks.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), CHUNK);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // one chunk taken, two buffered, one waiting to be sent
        assert!(reader.reads.load(Ordering::SeqCst) <= 4);

        let mut total = first.len();
        while let Some(chunk) = chunks.recv().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 20 * CHUNK);
    }
}
