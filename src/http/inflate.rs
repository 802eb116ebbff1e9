//! Content-Encoding decompression filter
//!
//! A stateful push/pull pair sitting between the raw body reader and the
//! caller: compressed bytes go in as they arrive off the socket, plain
//! bytes come out under the normal `read` contract. The filter is not
//! re-entrant; one instance serves exactly one response body.

use std::io::Write;

use flate2::write::{GzDecoder, ZlibDecoder};

use crate::error::HttpError;

/// How many raw bytes to pull from the connection per refill
pub const INPUT_CHUNK: usize = 256 * 1024;

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
}

/// Streaming inflate filter for one response body
pub struct Inflate {
    decoder: Decoder,
    finished: bool,
}

impl Inflate {
    /// Pick a decoder for a `Content-Encoding` value
    ///
    /// Returns `None` for `identity` and anything we cannot inflate.
    #[must_use]
    pub fn for_encoding(encoding: &str) -> Option<Self> {
        let encoding = encoding.trim();
        let decoder = if encoding.eq_ignore_ascii_case("gzip")
            || encoding.eq_ignore_ascii_case("x-gzip")
        {
            Decoder::Gzip(GzDecoder::new(Vec::new()))
        } else if encoding.eq_ignore_ascii_case("deflate") {
            Decoder::Zlib(ZlibDecoder::new(Vec::new()))
        } else {
            if !encoding.eq_ignore_ascii_case("identity") {
                tracing::warn!("unsupported Content-Encoding: {encoding}");
            }
            return None;
        };
        Some(Self {
            decoder,
            finished: false,
        })
    }

    /// Feed raw compressed bytes into the filter
    ///
    /// # Errors
    ///
    /// Returns `ContentDecoding` when the compressed stream is corrupt.
    pub fn push(&mut self, raw: &[u8]) -> Result<(), HttpError> {
        let result = match &mut self.decoder {
            Decoder::Gzip(d) => d.write_all(raw),
            Decoder::Zlib(d) => d.write_all(raw),
        };
        result.map_err(|e| HttpError::ContentDecoding(e.to_string()))
    }

    /// Signal that the raw stream is exhausted, flushing trailing output
    ///
    /// # Errors
    ///
    /// Returns `ContentDecoding` when the stream was truncated.
    pub fn finish(&mut self) -> Result<(), HttpError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let result = match &mut self.decoder {
            Decoder::Gzip(d) => d.try_finish(),
            Decoder::Zlib(d) => d.try_finish(),
        };
        result.map_err(|e| HttpError::ContentDecoding(e.to_string()))
    }

    /// Move decompressed bytes out into `buf`, returning the count
    pub fn pop(&mut self, buf: &mut [u8]) -> usize {
        let out = match &mut self.decoder {
            Decoder::Gzip(d) => d.get_mut(),
            Decoder::Zlib(d) => d.get_mut(),
        };
        let n = buf.len().min(out.len());
        buf[..n].copy_from_slice(&out[..n]);
        out.drain(..n);
        n
    }

    /// True once `finish` ran and all output was popped
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let out = match &self.decoder {
            Decoder::Gzip(d) => d.get_ref(),
            Decoder::Zlib(d) => d.get_ref(),
        };
        self.finished && out.is_empty()
    }
}
