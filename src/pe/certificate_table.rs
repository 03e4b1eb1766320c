//! WIN_CERTIFICATE entries of the attribute certificate table.
//!
//! Layout per the PE/COFF spec: an 8-byte header (dwLength, wRevision,
//! wCertificateType) followed by the certificate blob, each entry padded
//! with zeros to the next quadword. dwLength counts header, blob and
//! padding together.
//! <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#the-attribute-certificate-table-image-only>

use crate::error;
use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

use super::utils::{align_to, pad};

#[repr(u16)]
#[non_exhaustive]
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum AttributeCertificateRevision {
    /// WIN_CERT_REVISION_1_0
    Revision1_0 = 0x0100,
    /// WIN_CERT_REVISION_2_0
    Revision2_0 = 0x0200,
}

impl TryFrom<u16> for AttributeCertificateRevision {
    type Error = error::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0100 => Ok(AttributeCertificateRevision::Revision1_0),
            0x0200 => Ok(AttributeCertificateRevision::Revision2_0),
            other => Err(error::Error::Malformed(format!(
                "unknown WIN_CERTIFICATE revision {other:#06x}"
            ))),
        }
    }
}

#[repr(u16)]
#[non_exhaustive]
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum AttributeCertificateType {
    /// WIN_CERT_TYPE_X509
    X509 = 0x0001,
    /// WIN_CERT_TYPE_PKCS_SIGNED_DATA
    PkcsSignedData = 0x0002,
    /// WIN_CERT_TYPE_RESERVED_1
    Reserved1 = 0x0003,
    /// WIN_CERT_TYPE_TS_STACK_SIGNED
    TsStackSigned = 0x0004,
}

impl TryFrom<u16> for AttributeCertificateType {
    type Error = error::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(AttributeCertificateType::X509),
            0x0002 => Ok(AttributeCertificateType::PkcsSignedData),
            0x0003 => Ok(AttributeCertificateType::Reserved1),
            0x0004 => Ok(AttributeCertificateType::TsStackSigned),
            other => Err(error::Error::Malformed(format!(
                "unknown WIN_CERTIFICATE type {other:#06x}"
            ))),
        }
    }
}

/// WIN_CERTIFICATE header structure.
#[derive(Debug, Clone, Pread, Pwrite, SizeWith)]
pub struct AttributeCertificateHeader {
    /// dwLength
    pub length: u32,
    /// wRevision
    pub revision: u16,
    /// wCertificateType
    pub certificate_type: u16,
}

/// Static size of the [`AttributeCertificateHeader`] structure,
/// also known under the name WIN_CERTIFICATE header structure.
pub const ATTRIBUTE_CERTIFICATE_HEADER_SIZEOF: usize = 8;

/// One entry of the attribute certificate table, header inlined.
#[derive(Debug, Clone)]
pub struct AttributeCertificate<'a> {
    pub length: u32,
    pub revision: AttributeCertificateRevision,
    pub certificate_type: AttributeCertificateType,
    pub certificate: &'a [u8],
}

impl<'a> AttributeCertificate<'a> {
    /// Parses the entry at `*offset` and leaves the cursor on the next
    /// quadword boundary after it, where any following entry begins.
    pub fn parse(
        bytes: &'a [u8],
        offset: &mut usize,
    ) -> Result<AttributeCertificate<'a>, error::Error> {
        let entry_start = *offset;
        let header: AttributeCertificateHeader = bytes.gread_with(offset, scroll::LE)?;
        debug!("WIN_CERTIFICATE at {entry_start:#x}: {header:?}");
        let data_len = (header.length as usize)
            .checked_sub(ATTRIBUTE_CERTIFICATE_HEADER_SIZEOF)
            .ok_or_else(|| {
                error::Error::Malformed(format!(
                    "WIN_CERTIFICATE dwLength {} is smaller than its own header",
                    header.length
                ))
            })?;
        let certificate = bytes.get(*offset..*offset + data_len).ok_or_else(|| {
            error::Error::Malformed(format!(
                "WIN_CERTIFICATE blob of {data_len} bytes runs past the end of the file"
            ))
        })?;
        *offset = align_to(*offset + data_len, 8);
        Ok(AttributeCertificate {
            length: header.length,
            revision: header.revision.try_into()?,
            certificate_type: header.certificate_type.try_into()?,
            certificate,
        })
    }

    /// Emits an aligned entry around `der`: header, data, zero padding to
    /// the next quadword boundary. `dwLength` covers header and padding.
    pub fn write_entry(
        der: &[u8],
        revision: AttributeCertificateRevision,
    ) -> Result<Vec<u8>, error::Error> {
        let length: u32 = (align_to(der.len(), 8) + ATTRIBUTE_CERTIFICATE_HEADER_SIZEOF)
            .try_into()
            .map_err(|_| {
                error::Error::Malformed(
                    "certificate blob is too large for a WIN_CERTIFICATE".into(),
                )
            })?;
        let header = AttributeCertificateHeader {
            length,
            revision: revision as u16,
            certificate_type: AttributeCertificateType::PkcsSignedData as u16,
        };
        let mut entry = vec![0u8; ATTRIBUTE_CERTIFICATE_HEADER_SIZEOF];
        entry.pwrite_with(header, 0, scroll::LE)?;
        entry.extend_from_slice(der);
        if let Some(cert_padding) = pad(der.len(), Some(8)) {
            entry.extend_from_slice(&cert_padding);
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_entry_is_aligned_and_padded() {
        let der = [0xabu8; 13];
        let entry =
            AttributeCertificate::write_entry(&der, AttributeCertificateRevision::Revision2_0)
                .unwrap();
        assert_eq!(entry.len(), 8 + 16);
        assert_eq!(entry.len() % 8, 0);
        assert_eq!(&entry[8..21], &der[..]);
        assert_eq!(&entry[21..], &[0u8; 3]);

        let mut offset = 0;
        let parsed = AttributeCertificate::parse(&entry, &mut offset).unwrap();
        assert_eq!(parsed.length, 24);
        assert_eq!(parsed.revision, AttributeCertificateRevision::Revision2_0);
        assert_eq!(
            parsed.certificate_type,
            AttributeCertificateType::PkcsSignedData
        );
        // The parsed certificate slice includes the zero padding; dwLength
        // cannot distinguish data from pad, the DER length inside can.
        assert_eq!(&parsed.certificate[..13], &der[..]);
        assert_eq!(offset, entry.len());
    }

    #[test]
    fn parse_rejects_bad_revision() {
        let mut entry = AttributeCertificate::write_entry(
            &[0u8; 16],
            AttributeCertificateRevision::Revision2_0,
        )
        .unwrap();
        entry[4] = 0x42;
        let mut offset = 0;
        assert!(AttributeCertificate::parse(&entry, &mut offset).is_err());
    }

    #[test]
    fn parse_rejects_undersized_length() {
        // dwLength of 4 cannot even hold the 8-byte header.
        let entry = [0x04, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00];
        let mut offset = 0;
        assert!(AttributeCertificate::parse(&entry, &mut offset).is_err());
    }

    #[test]
    fn parse_rejects_truncated_entry() {
        let header_only = [0x20, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00];
        let mut offset = 0;
        assert!(AttributeCertificate::parse(&header_only, &mut offset).is_err());
    }
}
