//! Row-key encoding and identifier generation.
//!
//! The database orders row keys by raw byte value and tooling expects printable
//! keys, so both inode and block row keys are lowercase hexadecimal: inodes use
//! a fixed-width hash of the path, blocks use the big-endian bytes of their
//! UUID.

use crate::util;
use md5::{Digest, Md5};
use uuid::{Context, Timestamp, Uuid};

/// The `parent_path` column value for the filesystem root.
pub const ROOT_PARENT: &str = "null";

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Encodes `data` as lowercase hexadecimal bytes.
fn to_hex(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for b in data {
        out.push(HEX_DIGITS[(b >> 4) as usize]);
        out.push(HEX_DIGITS[(b & 0xf) as usize]);
    }
    out
}

/// Returns the inode row key for `path`.
///
/// The key is the hex form of a deterministic 128 bit hash of the UTF-8 path,
/// which spreads keys evenly across the ring. Equal paths map to equal keys.
pub fn path_key(path: &str) -> Vec<u8> {
    to_hex(&Md5::digest(path.as_bytes()))
}

/// Returns the row key for the given block or sub-block id.
pub fn uuid_key(id: Uuid) -> Vec<u8> {
    to_hex(id.as_bytes())
}

/// Canonicalizes a path: leading `/`, no duplicate or trailing separators.
pub fn canonical(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        out.push('/');
    }
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Returns the canonical parent of `path`, or [`ROOT_PARENT`] for the root.
pub fn parent(path: &str) -> String {
    let path = canonical(path);
    if path == "/" {
        return ROOT_PARENT.to_string();
    }
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => path[..i].to_string(),
        // Canonical paths always start with a separator
        None => "/".to_string(),
    }
}

/// Returns `path` with its last character replaced by the next code point.
///
/// Used as the exclusive upper bound of deep-listing range scans: every
/// descendant of `path` sorts below the successor.
pub fn successor(path: &str) -> String {
    let mut out: String = path.to_string();
    let Some(last) = out.pop() else {
        return out;
    };
    let mut code = last as u32 + 1;
    // Skip the surrogate gap
    if code == 0xd800 {
        code = 0xe000;
    }
    match char::from_u32(code) {
        Some(c) => out.push(c),
        None => {
            out.push(last);
            out.push('\u{10ffff}');
        }
    }
    out
}

/// Generator for version-1 time-based block and sub-block ids.
///
/// Each store instance owns one generator; the node id is random with the
/// multicast bit set so it can never collide with a hardware address.
pub struct BlockIdGenerator {
    context: Context,
    node: [u8; 6],
}

impl BlockIdGenerator {
    pub fn new() -> Self {
        let mut node = [0u8; 6];
        util::get_random(&mut node);
        node[0] |= 0x01;
        let mut seq = [0u8; 2];
        util::get_random(&mut seq);
        Self {
            context: Context::new(u16::from_be_bytes(seq)),
            node,
        }
    }

    /// Returns a fresh id. Ids generated in sequence sort in write order.
    pub fn next(&self) -> Uuid {
        Uuid::new_v1(Timestamp::now(&self.context), &self.node)
    }
}

impl Default for BlockIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_key_fixed_width_and_deterministic() {
        let a = path_key("/tmp/file");
        let b = path_key("/tmp/file");
        let c = path_key("/tmp/other");
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn uuid_key_hex() {
        let id = Uuid::from_bytes([
            0x00, 0x01, 0x0a, 0xff, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90, 0xa0,
            0xb0, 0xc0,
        ]);
        assert_eq!(uuid_key(id), b"00010aff102030405060708090a0b0c0".to_vec());
    }

    #[test]
    fn canonical_paths() {
        assert_eq!(canonical("/"), "/");
        assert_eq!(canonical(""), "/");
        assert_eq!(canonical("/a/b/"), "/a/b");
        assert_eq!(canonical("//a//b"), "/a/b");
        assert_eq!(canonical("a/b"), "/a/b");
    }

    #[test]
    fn parent_paths() {
        assert_eq!(parent("/"), ROOT_PARENT);
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/a/b/c"), "/a/b");
        assert_eq!(parent("/a/b/"), "/a");
    }

    #[test]
    fn successor_bounds_descendants() {
        assert_eq!(successor("/p"), "/q");
        assert!("/p/x/y" < successor("/p").as_str());
        assert!("/p" < successor("/p").as_str());
    }

    #[test]
    fn block_ids_are_v1_and_ordered() {
        let ids = BlockIdGenerator::new();
        let a = ids.next();
        let b = ids.next();
        assert_eq!(a.get_version_num(), 1);
        assert_ne!(a, b);
    }
}
