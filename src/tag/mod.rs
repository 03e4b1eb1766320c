//! Tag placement formats and the locator that re-finds a payload in a
//! produced file.
//!
//! Two placements exist. An *appended* tag trails the PKCS#7 blob inside
//! the PE attribute certificate table ([`appended`]). A *superfluous
//! certificate* tag rides inside the PKCS#7 itself, in a dummy certificate
//! whose extension value starts with a fixed, searchable marker
//! ([`certificate`]).

pub mod appended;
pub mod certificate;

use crate::error::{Error, Result};
use log::debug;

/// DER TLV of the private extension OID `1.3.6.1.4.1.11129.2.1.9999` that
/// announces a payload-carrying certificate.
pub const MARKER_OID: [u8; 13] = [
    0x06, 0x0b, 0x2b, 0x06, 0x01, 0x04, 0x01, 0xd6, 0x79, 0x02, 0x01, 0xce, 0x0f,
];

/// The full search pattern: the marker OID TLV followed by an OCTET STRING
/// header forced into two-byte length form. Payload bounds guarantee the
/// `0x82` so the pattern is constant-length.
pub const MARKER: [u8; 15] = [
    0x06, 0x0b, 0x2b, 0x06, 0x01, 0x04, 0x01, 0xd6, 0x79, 0x02, 0x01, 0xce, 0x0f, 0x04, 0x82,
];

/// Smallest payload whose OCTET STRING length encodes as exactly two bytes.
pub const MIN_PAYLOAD_LEN: usize = 256;
/// Largest payload that still fits a two-byte length.
pub const MAX_PAYLOAD_LEN: usize = 65535;

/// Byte offsets of every `needle` occurrence in `haystack`.
pub(crate) fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter_map(|(i, window)| (window == needle).then_some(i))
        .collect()
}

/// Scans `bytes` from `start` for the superfluous-cert payload and returns
/// `(payload_offset, payload_len)`.
///
/// The marker must occur exactly once; zero or multiple matches fail with
/// [`Error::MarkerNotFound`] so a caller can never confuse a payload with a
/// stray copy of the pattern.
pub fn find_tag(bytes: &[u8], start: usize) -> Result<(usize, usize)> {
    let haystack = bytes
        .get(start..)
        .ok_or_else(|| Error::Malformed(format!("search start {start:#x} is past the end")))?;
    let matches = find_all(haystack, &MARKER);
    debug!("marker matched {} time(s) from {start:#x}", matches.len());
    if matches.len() != 1 {
        return Err(Error::MarkerNotFound(matches.len()));
    }
    let length_offset = start + matches[0] + MARKER.len();
    let (hi, lo) = match bytes.get(length_offset..length_offset + 2) {
        Some(&[hi, lo]) => (hi, lo),
        _ => {
            return Err(Error::Malformed(
                "tag length field is past the end of the file".into(),
            ));
        }
    };
    let payload_len = usize::from(hi) << 8 | usize::from(lo);
    let payload_offset = length_offset + 2;
    if bytes.len() < payload_offset + payload_len {
        return Err(Error::Malformed(format!(
            "tag payload of {payload_len} bytes exceeds the file"
        )));
    }
    Ok((payload_offset, payload_len))
}
