//! File and directory metadata records and their binary encoding.
//!
//! An inode names its path's owner and the ordered list of blocks holding the
//! file bytes. The record is stored as one column value; the encoding is
//! big-endian and starts with a version byte.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use std::io::{Read, Write};
use uuid::Uuid;

/// Current version of the serialized inode format.
const INODE_VERSION: u8 = 1;

/// What an inode describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    File = 0,
    Directory = 1,
}

impl FileKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::File),
            1 => Some(Self::Directory),
            _ => None,
        }
    }
}

/// The physical write unit: one column value of compressed bytes.
///
/// `offset` is relative to the beginning of the parent block; `length` is the
/// uncompressed size. Offsets within a block are contiguous and strictly
/// monotonic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubBlock {
    pub id: Uuid,
    pub offset: u64,
    pub length: u64,
}

impl SubBlock {
    /// Offset of the first byte past this sub-block, within the parent block.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A logical file segment, composed of one or more sub-blocks.
///
/// `offset` is the block's position within the file; consecutive blocks are
/// contiguous: the next block starts where this one ends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pub id: Uuid,
    pub offset: u64,
    pub length: u64,
    pub sub_blocks: Vec<SubBlock>,
}

impl Block {
    /// Offset of the first byte past this block, within the file.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Metadata record for a file or directory. Identity is the path, which is
/// stored beside the record, not inside it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct INode {
    pub user: String,
    pub group: String,
    pub perms: u16,
    pub kind: FileKind,
    pub replication: u8,
    /// Target sub-block size in bytes.
    pub block_size: u64,
    /// Last access time, millis since epoch. Not persisted; set to `mtime`
    /// when a record is read back.
    pub atime: i64,
    /// Last modification time, millis since epoch.
    pub mtime: i64,
    /// Ordered by offset; empty for directories and zero-length files.
    pub blocks: Vec<Block>,
    /// Write time of the column the record was read from; zero for a record
    /// that has not been stored yet.
    pub timestamp: i64,
}

impl INode {
    /// Total file length in bytes.
    pub fn size(&self) -> u64 {
        self.blocks.last().map(Block::end).unwrap_or(0)
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Encodes the record into its stored form.
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64 + self.blocks.len() * 64);
        out.write_u8(INODE_VERSION)?;
        write_string(&mut out, &self.user)?;
        write_string(&mut out, &self.group)?;
        out.write_u16::<BigEndian>(self.perms)?;
        out.write_u8(self.kind as u8)?;
        out.write_u8(self.replication)?;
        out.write_u64::<BigEndian>(self.block_size)?;
        out.write_i64::<BigEndian>(self.mtime)?;
        out.write_u32::<BigEndian>(count(self.blocks.len())?)?;
        for block in &self.blocks {
            out.write_all(block.id.as_bytes())?;
            out.write_u64::<BigEndian>(block.offset)?;
            out.write_u64::<BigEndian>(block.length)?;
            out.write_u32::<BigEndian>(count(block.sub_blocks.len())?)?;
            for sub in &block.sub_blocks {
                out.write_all(sub.id.as_bytes())?;
                out.write_u64::<BigEndian>(sub.offset)?;
                out.write_u64::<BigEndian>(sub.length)?;
            }
        }
        Ok(out)
    }

    /// Decodes a stored record.
    ///
    /// Fails on an unknown version byte and on truncated input.
    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut r = data;
        let version = r.read_u8()?;
        if version != INODE_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported inode version {version}"),
            ));
        }
        let user = read_string(&mut r)?;
        let group = read_string(&mut r)?;
        let perms = r.read_u16::<BigEndian>()?;
        let kind = FileKind::from_u8(r.read_u8()?).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unknown inode kind")
        })?;
        let replication = r.read_u8()?;
        let block_size = r.read_u64::<BigEndian>()?;
        let mtime = r.read_i64::<BigEndian>()?;
        let block_count = r.read_u32::<BigEndian>()? as usize;
        let mut blocks = Vec::with_capacity(block_count.min(4096));
        for _ in 0..block_count {
            let id = read_uuid(&mut r)?;
            let offset = r.read_u64::<BigEndian>()?;
            let length = r.read_u64::<BigEndian>()?;
            let sub_count = r.read_u32::<BigEndian>()? as usize;
            let mut sub_blocks = Vec::with_capacity(sub_count.min(4096));
            for _ in 0..sub_count {
                let id = read_uuid(&mut r)?;
                let offset = r.read_u64::<BigEndian>()?;
                let length = r.read_u64::<BigEndian>()?;
                sub_blocks.push(SubBlock { id, offset, length });
            }
            blocks.push(Block {
                id,
                offset,
                length,
                sub_blocks,
            });
        }
        Ok(Self {
            user,
            group,
            perms,
            kind,
            replication,
            block_size,
            atime: mtime,
            mtime,
            blocks,
            timestamp: 0,
        })
    }
}

fn count(len: usize) -> io::Result<u32> {
    u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many blocks for one inode"))
}

fn write_string(out: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string field too long"))?;
    out.write_u16::<BigEndian>(len)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string(r: &mut &[u8]) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn read_uuid(r: &mut &[u8]) -> io::Result<Uuid> {
    let mut bytes = [0u8; 16];
    r.read_exact(&mut bytes)?;
    Ok(Uuid::from_bytes(bytes))
}
