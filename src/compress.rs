/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of CFS.
 *
 * CFS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * CFS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * CFS. If not, see <https://www.gnu.org/licenses/>.
 */

//! Sub-block compression over reusable buffers.
//!
//! One context holds a pair of scratch buffers which grow lazily to fit the
//! largest sub-block seen and are then reused for every call. A slice returned
//! by [`CompressionContext::compress`] or [`CompressionContext::decompress`] is
//! only valid until the next call on the same context; callers that need to
//! retain bytes must copy them out first.

use snap::raw::{Decoder, Encoder, decompress_len, max_compress_len};
use std::io;

/// Upper bound accepted for an inflated sub-block.
///
/// Sub-blocks are a few MiB by construction; anything claiming to inflate past
/// this bound is not a plausible frame.
const MAX_INFLATED_LEN: usize = 256 * 1024 * 1024;

/// Result of a decompression call.
pub enum Decompressed<'a> {
    /// The input was a valid snappy block; the slice points into the context's
    /// scratch buffer.
    Inflated(&'a [u8]),
    /// The input was not valid snappy and is returned verbatim. Sub-blocks
    /// written before compression was introduced take this path.
    Verbatim(&'a [u8]),
}

impl<'a> Decompressed<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        match *self {
            Decompressed::Inflated(b) | Decompressed::Verbatim(b) => b,
        }
    }

    pub fn is_verbatim(&self) -> bool {
        matches!(self, Decompressed::Verbatim(_))
    }
}

/// Reusable compression state. Not safe to share without external locking.
pub struct CompressionContext {
    encoder: Encoder,
    decoder: Decoder,
    compressed: Vec<u8>,
    uncompressed: Vec<u8>,
}

impl CompressionContext {
    pub fn new() -> Self {
        Self {
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            compressed: Vec::new(),
            uncompressed: Vec::new(),
        }
    }

    /// Compresses `input` into the shared buffer and returns the written slice.
    pub fn compress(&mut self, input: &[u8]) -> io::Result<&[u8]> {
        if input.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot compress an empty payload",
            ));
        }
        let max = max_compress_len(input.len());
        if max == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload too large to compress",
            ));
        }
        if self.compressed.len() < max {
            self.compressed.resize(max, 0);
        }
        let written = self
            .encoder
            .compress(input, &mut self.compressed)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(&self.compressed[..written])
    }

    /// Inflates `input` through the shared buffer.
    ///
    /// Input that is not a valid snappy block is returned verbatim.
    pub fn decompress<'a>(&'a mut self, input: &'a [u8]) -> Decompressed<'a> {
        let Ok(len) = decompress_len(input) else {
            return Decompressed::Verbatim(input);
        };
        if len == 0 || len > MAX_INFLATED_LEN {
            return Decompressed::Verbatim(input);
        }
        if self.uncompressed.len() < len {
            self.uncompressed.resize(len, 0);
        }
        match self.decoder.decompress(input, &mut self.uncompressed) {
            Ok(n) => Decompressed::Inflated(&self.uncompressed[..n]),
            Err(_) => Decompressed::Verbatim(input),
        }
    }
}

impl Default for CompressionContext {
    fn default() -> Self {
        Self::new()
    }
}
