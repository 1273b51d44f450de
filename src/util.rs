//! Small system helpers shared across the store.

use rand_core::{OsRng, RngCore};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the write timestamp for a column: milliseconds since the Unix
/// epoch.
///
/// Refuses to produce a timestamp when the system clock reads before the
/// epoch: last-writer-wins resolution breaks down once write times go
/// backwards that far.
pub fn timestamp_millis() -> io::Result<i64> {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Ok(elapsed.as_millis() as i64),
        Err(_) => Err(io::Error::other(
            "system clock reads before the Unix epoch; refusing to timestamp writes",
        )),
    }
}

/// Hostname of this node, passed to the data layer as the locality hint on
/// block reads.
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Fills the given buffer with random bytes.
pub fn get_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}
