//! Framing for tags appended after the attribute certificate entry.
//!
//! The region between the end of the (padded) WIN_CERTIFICATE and the end
//! of the file either matches `"Gact" || u32le(len) || body` exactly, or
//! there is no appended tag. MSI files never carry one.

use crate::error::{Error, Result};
use scroll::{Pread, Pwrite};

/// Leading magic of an appended tag.
pub const MAGIC: [u8; 4] = *b"Gact";
/// Magic plus the little-endian length word.
pub const HEADER_SIZEOF: usize = 8;

/// Interprets `region` (everything after the certificate entry) as an
/// appended tag. Returns the body on an exact match, `None` for anything
/// else: foreign trailing bytes are not an error, they are simply not a tag.
pub fn parse(region: &[u8]) -> Option<&[u8]> {
    if region.len() < HEADER_SIZEOF || region[..4] != MAGIC {
        return None;
    }
    let length: u32 = region.pread_with(4, scroll::LE).ok()?;
    let body = &region[HEADER_SIZEOF..];
    (length as usize == body.len()).then_some(body)
}

/// Emits `"Gact" || u32le(len) || body`.
pub fn build(body: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(body.len())
        .map_err(|_| Error::Unsupported("appended tag body does not fit in a u32".into()))?;
    let mut out = vec![0u8; HEADER_SIZEOF];
    out[..4].copy_from_slice(&MAGIC);
    out.pwrite_with(length, 4, scroll::LE)?;
    out.extend_from_slice(body);
    Ok(out)
}
