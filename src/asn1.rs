//! Minimal ASN.1 DER reader and writer.
//!
//! PKCS#7 surgery only ever needs to walk TLV structure and re-emit the
//! handful of SEQUENCE/SET/context wrappers whose lengths change; every
//! substructure below those wrappers is copied verbatim. This module is
//! therefore deliberately tiny: definite-length traversal, an iterator over
//! the children of a constructed element, and canonical emission. BER
//! constructs (indefinite lengths) are rejected outright.

use crate::error::{Error, Result};

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_PRINTABLE_STRING: u8 = 0x13;
pub const TAG_UTC_TIME: u8 = 0x17;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
/// `[0]`, constructed. `certificates` in SignedData and `content` in
/// ContentInfo both carry this tag.
pub const TAG_CONTEXT_0: u8 = 0xa0;
/// `[1]`, constructed. `crls` in SignedData.
pub const TAG_CONTEXT_1: u8 = 0xa1;
/// `[3]`, constructed. `extensions` in TBSCertificate.
pub const TAG_CONTEXT_3: u8 = 0xa3;

/// Tag class from the two top bits of the identifier octet.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

/// A single parsed TLV element. `body` borrows the value octets, `raw` the
/// whole element including its header.
#[derive(Debug, Copy, Clone)]
pub struct Element<'a> {
    /// The raw identifier octet.
    pub tag: u8,
    pub class: Class,
    pub constructed: bool,
    /// Tag number from the low five bits. High-tag-number form is rejected.
    pub number: u8,
    pub header_len: usize,
    pub body: &'a [u8],
    pub raw: &'a [u8],
}

impl<'a> Element<'a> {
    /// Parses the element starting at `bytes[0]`. Trailing bytes after the
    /// element are ignored; use [`Element::total_len`] to find them.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let &tag = bytes
            .first()
            .ok_or_else(|| Error::MalformedPkcs7("empty DER element".into()))?;
        if tag & 0x1f == 0x1f {
            return Err(Error::MalformedPkcs7(format!(
                "high-tag-number form is not used by PKCS#7 (identifier {tag:#x})"
            )));
        }
        let &first = bytes
            .get(1)
            .ok_or_else(|| Error::MalformedPkcs7("missing DER length octet".into()))?;
        let (body_len, header_len) = match first {
            0x80 => {
                return Err(Error::MalformedPkcs7(
                    "indefinite lengths are BER, not DER".into(),
                ));
            }
            len if len < 0x80 => (len as usize, 2),
            long => {
                let count = (long & 0x7f) as usize;
                if count > core::mem::size_of::<usize>() {
                    return Err(Error::MalformedPkcs7(format!(
                        "DER length of {count} octets is too large"
                    )));
                }
                let octets = bytes.get(2..2 + count).ok_or_else(|| {
                    Error::MalformedPkcs7("truncated long-form DER length".into())
                })?;
                let mut len = 0usize;
                for &octet in octets {
                    len = (len << 8) | octet as usize;
                }
                (len, 2 + count)
            }
        };
        let end = header_len.checked_add(body_len).ok_or_else(|| {
            Error::MalformedPkcs7(format!("DER length {body_len:#x} overflows"))
        })?;
        let body = bytes.get(header_len..end).ok_or_else(|| {
            Error::MalformedPkcs7(format!(
                "DER element body of {body_len} bytes exceeds the buffer"
            ))
        })?;
        let class = match tag >> 6 {
            0 => Class::Universal,
            1 => Class::Application,
            2 => Class::Context,
            _ => Class::Private,
        };
        Ok(Element {
            tag,
            class,
            constructed: tag & 0x20 != 0,
            number: tag & 0x1f,
            header_len,
            body,
            raw: &bytes[..end],
        })
    }

    /// Parses an element and checks its identifier octet.
    pub fn expect(bytes: &'a [u8], tag: u8) -> Result<Self> {
        let element = Element::parse(bytes)?;
        if element.tag != tag {
            return Err(Error::MalformedPkcs7(format!(
                "expected DER tag {tag:#x}, found {:#x}",
                element.tag
            )));
        }
        Ok(element)
    }

    /// Header plus body length, i.e. how far the next sibling begins.
    pub fn total_len(&self) -> usize {
        self.header_len + self.body.len()
    }

    /// Iterates over the immediate children of a constructed element.
    pub fn children(&self) -> Children<'a> {
        Children { rest: self.body }
    }
}

/// Iterator over sibling elements of a constructed body.
pub struct Children<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<Element<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match Element::parse(self.rest) {
            Ok(element) => {
                self.rest = &self.rest[element.total_len()..];
                Some(Ok(element))
            }
            Err(err) => {
                // Stop after a parse error, the cursor cannot advance.
                self.rest = &[];
                Some(Err(err))
            }
        }
    }
}

/// Encodes `body_len` in canonical definite form: short form up to 127,
/// otherwise long form with the minimum number of octets.
pub fn encode_length(body_len: usize) -> Vec<u8> {
    if body_len < 0x80 {
        return vec![body_len as u8];
    }
    let octets = body_len.to_be_bytes();
    let skip = octets.iter().take_while(|&&b| b == 0).count();
    let mut out = Vec::with_capacity(1 + octets.len() - skip);
    out.push(0x80 | (octets.len() - skip) as u8);
    out.extend_from_slice(&octets[skip..]);
    out
}

/// Emits the header (identifier octet plus canonical length) for a body of
/// `body_len` bytes. Used when splicing an element out of borrowed parts.
pub fn header(tag: u8, body_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.push(tag);
    out.extend_from_slice(&encode_length(body_len));
    out
}

/// Emits a whole element with canonical length encoding.
pub fn emit(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = header(tag, body.len());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_form() {
        let bytes = [0x30, 0x03, 0x02, 0x01, 0x2a];
        let element = Element::parse(&bytes).unwrap();
        assert_eq!(element.tag, TAG_SEQUENCE);
        assert!(element.constructed);
        assert_eq!(element.class, Class::Universal);
        assert_eq!(element.header_len, 2);
        assert_eq!(element.body, &[0x02, 0x01, 0x2a]);
        let children: Vec<_> = element.children().collect::<Result<_>>().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].tag, TAG_INTEGER);
        assert_eq!(children[0].body, &[0x2a]);
    }

    #[test]
    fn parse_long_form() {
        let mut bytes = vec![0x04, 0x82, 0x01, 0x00];
        bytes.extend_from_slice(&[0xaa; 256]);
        let element = Element::parse(&bytes).unwrap();
        assert_eq!(element.header_len, 4);
        assert_eq!(element.body.len(), 256);
        assert!(!element.constructed);
    }

    #[test]
    fn parse_non_minimal_length_is_accepted_on_read() {
        // 0x81 0x05 where 0x05 would do; signers in the wild produce these.
        let bytes = [0x04, 0x81, 0x05, 1, 2, 3, 4, 5];
        let element = Element::parse(&bytes).unwrap();
        assert_eq!(element.body, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn reject_indefinite_length() {
        let bytes = [0x30, 0x80, 0x00, 0x00];
        assert!(matches!(
            Element::parse(&bytes),
            Err(Error::MalformedPkcs7(_))
        ));
    }

    #[test]
    fn reject_truncated_body() {
        let bytes = [0x04, 0x05, 1, 2];
        assert!(Element::parse(&bytes).is_err());
    }

    #[test]
    fn reject_high_tag_number() {
        let bytes = [0x1f, 0x81, 0x00, 0x00];
        assert!(Element::parse(&bytes).is_err());
    }

    #[test]
    fn emit_is_canonical() {
        assert_eq!(emit(TAG_OCTET_STRING, &[0u8; 127])[..2], [0x04, 0x7f]);
        assert_eq!(emit(TAG_OCTET_STRING, &[0u8; 128])[..3], [0x04, 0x81, 0x80]);
        assert_eq!(
            emit(TAG_OCTET_STRING, &[0u8; 256])[..4],
            [0x04, 0x82, 0x01, 0x00]
        );
    }

    #[test]
    fn emit_parse_round_trip() {
        let body = [0x13u8; 300];
        let encoded = emit(TAG_SEQUENCE, &body);
        let element = Element::parse(&encoded).unwrap();
        assert_eq!(element.body, &body[..]);
        assert_eq!(element.total_len(), encoded.len());
    }
}
