//! Readers over sub-block and block contents.
//!
//! A [`SubBlockReader`] owns the decompressed bytes of one sub-block, or the
//! memory mapping of a local replica extent when the stored bytes were never
//! compressed. Mappings are released when the reader is dropped, never later.

use crate::compress::{CompressionContext, Decompressed};
use crate::inode::Block;
use crate::rpc::SubBlockSource;
use crate::store::Store;
use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::io::Read;

/// A positioned reader over the uncompressed bytes of one sub-block.
#[derive(Debug)]
pub struct SubBlockReader {
    source: Source,
    pos: usize,
}

#[derive(Debug)]
enum Source {
    /// Decompressed bytes, or a remote payload stored uncompressed.
    Owned(Vec<u8>),
    /// Mapping of a local on-disk extent holding uncompressed bytes.
    Mapped(Mmap),
}

impl SubBlockReader {
    /// Opens a reader over `source`, inflating through the store's shared
    /// compression buffers, positioned `byte_offset` bytes in.
    ///
    /// The buffer lock is released before this returns; inflated bytes are
    /// copied out of the shared context. A verbatim local extent is read
    /// straight from the mapping instead, without copying.
    pub(crate) fn open(
        source: SubBlockSource,
        compression: &Mutex<CompressionContext>,
        byte_offset: u64,
    ) -> io::Result<Self> {
        match source {
            SubBlockSource::Remote(payload) => {
                log::debug!("reading sub-block from remote payload ({} bytes)", payload.len());
                let inflated = {
                    let mut ctx = compression.lock();
                    match ctx.decompress(&payload) {
                        Decompressed::Inflated(bytes) => Some(bytes.to_vec()),
                        Decompressed::Verbatim(_) => None,
                    }
                };
                Self::owned(inflated.unwrap_or(payload), byte_offset)
            }
            SubBlockSource::Local {
                path,
                offset,
                length,
            } => {
                log::debug!(
                    "reading sub-block from local replica {} (offset {offset}, {length} bytes)",
                    path.display()
                );
                let file = File::open(&path).map_err(|e| {
                    log::error!("local block file {} cannot be opened: {e}", path.display());
                    io::Error::new(
                        e.kind(),
                        format!(
                            "local block file {} referenced by a replica is missing: {e}",
                            path.display()
                        ),
                    )
                })?;
                let map = unsafe {
                    MmapOptions::new()
                        .offset(offset)
                        .len(length as usize)
                        .map(&file)?
                };
                let inflated = {
                    let mut ctx = compression.lock();
                    match ctx.decompress(&map) {
                        Decompressed::Inflated(bytes) => Some(bytes.to_vec()),
                        Decompressed::Verbatim(_) => None,
                    }
                };
                match inflated {
                    Some(bytes) => Self::owned(bytes, byte_offset),
                    None => Self::mapped(map, byte_offset),
                }
            }
        }
    }

    fn owned(bytes: Vec<u8>, byte_offset: u64) -> io::Result<Self> {
        Self::positioned(Source::Owned(bytes), byte_offset)
    }

    fn mapped(map: Mmap, byte_offset: u64) -> io::Result<Self> {
        Self::positioned(Source::Mapped(map), byte_offset)
    }

    fn positioned(source: Source, byte_offset: u64) -> io::Result<Self> {
        let len = match &source {
            Source::Owned(bytes) => bytes.len(),
            Source::Mapped(map) => map.len(),
        };
        if byte_offset > len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {byte_offset} is beyond the sub-block end ({len} bytes)"),
            ));
        }
        Ok(Self {
            source,
            pos: byte_offset as usize,
        })
    }

    fn bytes(&self) -> &[u8] {
        match &self.source {
            Source::Owned(bytes) => bytes,
            Source::Mapped(map) => map,
        }
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.bytes().len() - self.pos
    }
}

impl Read for SubBlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let avail = &SubBlockReader::bytes(self)[self.pos..];
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// A reader over a whole block, chaining its sub-blocks in offset order.
///
/// Sub-blocks are fetched lazily, one RPC (or mapping) at a time, as the
/// reader advances.
#[derive(Debug)]
pub struct BlockReader<'a> {
    store: &'a Store,
    block: Block,
    next: usize,
    current: Option<SubBlockReader>,
}

impl<'a> BlockReader<'a> {
    pub(crate) fn new(store: &'a Store, block: &Block, offset: u64) -> io::Result<Self> {
        if offset > block.length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "offset {offset} is beyond the block end ({} bytes)",
                    block.length
                ),
            ));
        }
        let mut next = block.sub_blocks.len();
        let mut current = None;
        for (i, sub) in block.sub_blocks.iter().enumerate() {
            if offset < sub.end() {
                current = Some(store.retrieve_sub_block(block, sub, offset - sub.offset)?);
                next = i + 1;
                break;
            }
        }
        Ok(Self {
            store,
            block: block.clone(),
            next,
            current,
        })
    }

    /// Number of bytes left to read, counting sub-blocks not fetched yet.
    pub fn remaining(&self) -> u64 {
        let tail: u64 = self.block.sub_blocks[self.next..]
            .iter()
            .map(|sub| sub.length)
            .sum();
        let head = self.current.as_ref().map(|c| c.remaining() as u64).unwrap_or(0);
        head + tail
    }
}

impl Read for BlockReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(current) = &mut self.current {
                let n = current.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                self.current = None;
            }
            if self.next >= self.block.sub_blocks.len() {
                return Ok(0);
            }
            let sub = self.block.sub_blocks[self.next].clone();
            self.current = Some(self.store.retrieve_sub_block(&self.block, &sub, 0)?);
            self.next += 1;
        }
    }
}
