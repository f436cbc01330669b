//! Chunk-in/chunk-out inflate that notices truncated streams.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{Error, Result};

/// Upper bound on the output of a single [`Inflater::step`] or [`Inflater::drain`].
pub const OUTPUT_STEP: usize = 64 * 1024;

/// Streaming decompressor for raw deflate or zlib-wrapped data.
pub struct Inflater {
    inner: Decompress,
    finished: bool,
}

impl Inflater {
    /// Raw deflate, as stored in ZIP entries.
    pub fn raw() -> Self {
        Self {
            inner: Decompress::new(false),
            finished: false,
        }
    }

    /// Deflate with a zlib header and trailer.
    pub fn zlib() -> Self {
        Self {
            inner: Decompress::new(true),
            finished: false,
        }
    }

    /// Whether the end of the deflate stream has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decompress at most [`OUTPUT_STEP`] bytes from `input`, advancing it past
    /// what was consumed.
    ///
    /// An empty result means `input` needs no further steps: it is used up, or
    /// the stream has ended and the rest is ignored.
    pub fn step(&mut self, input: &mut &[u8]) -> Result<Vec<u8>> {
        self.fill(input, FlushDecompress::None)
    }

    /// Flush at most [`OUTPUT_STEP`] bytes of remaining output once all input
    /// has been stepped through. Call until it returns an empty piece.
    ///
    /// Fails if the stream ended early.
    pub fn drain(&mut self) -> Result<Vec<u8>> {
        let mut empty: &[u8] = &[];
        let out = self.fill(&mut empty, FlushDecompress::Finish)?;
        if out.is_empty() && !self.finished {
            return Err(Error::malformed("truncated deflate stream"));
        }
        Ok(out)
    }

    /// Feed a chunk of compressed input and collect all the output it produced.
    pub fn push(&mut self, mut input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let piece = self.step(&mut input)?;
            if piece.is_empty() {
                return Ok(out);
            }
            out.extend(piece);
        }
    }

    /// Collect the remaining output. Fails if the stream ended early.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let piece = self.drain()?;
            if piece.is_empty() {
                return Ok(out);
            }
            out.extend(piece);
        }
    }

    /// Decompress a complete stream held in memory.
    pub fn inflate_all(mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.push(input)?;
        out.extend(self.finish()?);
        Ok(out)
    }

    fn fill(&mut self, input: &mut &[u8], flush: FlushDecompress) -> Result<Vec<u8>> {
        let mut out = vec![0u8; OUTPUT_STEP];
        let mut filled = 0;
        while !self.finished && filled < out.len() {
            let in_before = self.inner.total_in();
            let out_before = self.inner.total_out();
            let status = self
                .inner
                .decompress(input, &mut out[filled..], flush)
                .map_err(|e| Error::malformed(format!("corrupt deflate stream: {e}")))?;
            let consumed = (self.inner.total_in() - in_before) as usize;
            let produced = (self.inner.total_out() - out_before) as usize;
            *input = &input[consumed..];
            filled += produced;

            match status {
                Status::StreamEnd => self.finished = true,
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        break;
                    }
                }
            }
        }
        out.truncate(filled);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use std::io::Write;

    fn sample() -> Vec<u8> {
        (0..300_000u32).map(|i| (i % 97) as u8 ^ (i / 1000) as u8).collect()
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn chunked_raw_stream() {
        let data = sample();
        let compressed = deflate(&data);
        let mut inflater = Inflater::raw();
        let mut out = Vec::new();
        for chunk in compressed.chunks(1000) {
            out.extend(inflater.push(chunk).unwrap());
        }
        out.extend(inflater.finish().unwrap());
        assert!(inflater.is_finished());
        assert_eq!(out, data);
    }

    #[test]
    fn steps_are_bounded_for_high_ratio_input() {
        let data = vec![0u8; 8 * 1024 * 1024];
        let compressed = deflate(&data);
        assert!(compressed.len() < 64 * 1024);

        let mut inflater = Inflater::raw();
        let mut input = &compressed[..];
        let mut total = 0;
        let mut steps = 0;
        loop {
            let piece = inflater.step(&mut input).unwrap();
            if piece.is_empty() {
                break;
            }
            assert!(piece.len() <= OUTPUT_STEP);
            assert!(piece.iter().all(|&b| b == 0));
            total += piece.len();
            steps += 1;
        }
        loop {
            let piece = inflater.drain().unwrap();
            if piece.is_empty() {
                break;
            }
            assert!(piece.len() <= OUTPUT_STEP);
            total += piece.len();
        }
        assert_eq!(total, data.len());
        assert!(steps >= data.len() / OUTPUT_STEP);
        assert!(inflater.is_finished());
    }

    #[test]
    fn zlib_stream() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
        enc.write_all(b"hello hello hello").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(Inflater::zlib().inflate_all(&compressed).unwrap(), b"hello hello hello");
    }

    #[test]
    fn truncated_stream_is_malformed() {
        let compressed = deflate(&sample());
        let cut = &compressed[..compressed.len() / 2];
        assert!(matches!(Inflater::raw().inflate_all(cut), Err(Error::Malformed(_))));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Inflater::zlib().inflate_all(b"definitely not zlib"),
            Err(Error::Malformed(_))
        ));
    }
}
