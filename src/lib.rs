//! # certtag
//!
//! Rewrites updater tags in Authenticode-signed Windows binaries without
//! invalidating their signatures. Works on PE32/PE32+ executables and MSI
//! installers (MS-CFB compound files).
//!
//! Two tag placements are supported:
//!
//! * **Appended tags** (PE only) sit after the PKCS#7 blob inside the
//!   attribute certificate table, framed as `"Gact" || u32le(len) || body`.
//! * **Superfluous certificate tags** travel inside the PKCS#7 itself, in
//!   a dummy certificate prepended to `SignedData.certificates`. Their
//!   payload is found again by scanning for a fixed marker, see
//!   [`tag::find_tag`].
//!
//! Neither placement is covered by the Authenticode hash, so the original
//! signature keeps verifying over the produced bytes.
//!
//! ```no_run
//! use certtag::Binary;
//!
//! # fn run() -> certtag::Result<()> {
//! let bytes = std::fs::read("setup.exe")?;
//! let binary = Binary::parse(&bytes)?;
//! let tagged = binary.set_superfluous_cert_tag(&[0x41; 256])?;
//! std::fs::write("setup-tagged.exe", &tagged)?;
//! # Ok(())
//! # }
//! ```
//!
//! Every operation is a pure function from the input buffer to a fresh
//! output buffer; nothing is written in place and no state is shared, so
//! disjoint buffers can be processed concurrently without coordination.

pub mod asn1;
pub mod error;
pub mod msi;
pub mod pe;
pub mod pkcs7;
pub mod tag;

pub use crate::error::{Error, Result};
pub use crate::tag::find_tag;

use log::debug;

/// The container family guessed from the leading magic.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Hint {
    Pe,
    Msi,
    Unknown,
}

/// Peeks the leading bytes: `MZ` means PE, `D0 CF 11 E0 A1 B1 1A E1`
/// means compound file.
pub fn peek_bytes(bytes: &[u8]) -> Hint {
    if bytes.len() >= 2 && bytes[..2] == [b'M', b'Z'] {
        Hint::Pe
    } else if bytes.len() >= 8 && bytes[..8] == msi::header::SIGNATURE {
        Hint::Msi
    } else {
        Hint::Unknown
    }
}

/// A parsed Authenticode-signed binary.
pub enum Binary<'a> {
    Pe(pe::PE<'a>),
    Msi(msi::Msi<'a>),
}

impl<'a> Binary<'a> {
    /// Parses `bytes` as whichever container its magic announces.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        match peek_bytes(bytes) {
            Hint::Pe => Ok(Binary::Pe(pe::PE::parse(bytes)?)),
            Hint::Msi => Ok(Binary::Msi(msi::Msi::parse(bytes)?)),
            Hint::Unknown => Err(Error::NotASupportedContainer),
        }
    }

    /// The PKCS#7 DER currently embedded in the binary.
    pub fn asn1_data(&self) -> Result<&[u8]> {
        match self {
            Binary::Pe(pe) => pe.asn1_data(),
            Binary::Msi(msi) => msi.asn1_data(),
        }
    }

    /// Absolute file offset of the PKCS#7 DER.
    pub fn certificate_offset(&self) -> Result<usize> {
        match self {
            Binary::Pe(pe) => pe.certificate_offset(),
            Binary::Msi(msi) => msi.certificate_offset(),
        }
    }

    /// The appended tag body, when present. MSI files never carry one.
    pub fn appended_tag(&self) -> Result<Option<&[u8]>> {
        match self {
            Binary::Pe(pe) => pe.appended_tag(),
            Binary::Msi(_) => Ok(None),
        }
    }

    /// Produces a copy of the binary carrying `body` as its appended tag.
    pub fn set_appended_tag(&self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Binary::Pe(pe) => pe.set_appended_tag(body),
            Binary::Msi(_) => Err(Error::Unsupported(
                "MSI files do not support appended tags".into(),
            )),
        }
    }

    /// Produces a copy of the binary with any appended tag stripped.
    pub fn remove_appended_tag(&self) -> Result<Vec<u8>> {
        match self {
            Binary::Pe(pe) => pe.remove_appended_tag(),
            Binary::Msi(_) => Err(Error::Unsupported(
                "MSI files do not support appended tags".into(),
            )),
        }
    }

    /// Produces a copy of the binary whose PKCS#7 carries `payload` in a
    /// superfluous certificate, replacing any earlier one. The payload
    /// must be 256 to 65535 bytes, and is verified to be locatable exactly
    /// once in the produced file.
    pub fn set_superfluous_cert_tag(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let cert = tag::certificate::build(payload)?;
        let rewritten = pkcs7::Pkcs7::parse(self.asn1_data()?)?.set_superfluous_cert(&cert)?;
        // Write-time uniqueness: the marker must be locatable exactly
        // once in the produced bytes. A compound file's stream may be
        // fragmented across sectors, so the MSI check runs over the
        // reassembled stream instead of the raw file.
        match self {
            Binary::Pe(pe) => {
                let out = pe.set_asn1_data(&rewritten)?;
                let (offset, length) = tag::find_tag(&out, 0)?;
                debug!("tag payload of {length} bytes now at {offset:#x}");
                Ok(out)
            }
            Binary::Msi(msi) => {
                let out = msi.set_asn1_data(&rewritten)?;
                let reparsed = msi::Msi::parse(&out)?;
                let (offset, length) = tag::find_tag(reparsed.asn1_data()?, 0)?;
                debug!("tag payload of {length} bytes at stream offset {offset:#x}");
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_discriminates() {
        assert_eq!(peek_bytes(b"MZ\x90\x00"), Hint::Pe);
        assert_eq!(
            peek_bytes(&[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1]),
            Hint::Msi
        );
        assert_eq!(peek_bytes(b"\x7fELF"), Hint::Unknown);
        assert_eq!(peek_bytes(b"M"), Hint::Unknown);
    }

    #[test]
    fn unknown_container_is_rejected() {
        assert!(matches!(
            Binary::parse(b"#!/bin/sh\n"),
            Err(Error::NotASupportedContainer)
        ));
    }
}
