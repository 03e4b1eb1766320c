//! A PE32/PE32+ attribute-certificate editor.
//!
//! Parses just enough of a portable executable to find the certificate
//! table, the single PKCS#7 `WIN_CERTIFICATE` entry inside it, and any
//! appended tag after it. Write operations splice a rebuilt entry or tag
//! region into a copy of the original buffer and repair the two header
//! fields that depend on it: the certificate-table directory entry and the
//! optional-header checksum.

pub mod authenticode;
pub mod certificate_table;
pub mod checksum;
pub mod data_directories;
pub mod header;
pub mod optional_header;
pub mod utils;

use core::ops::Range;
use log::debug;
use scroll::Pwrite;

use crate::asn1;
use crate::error::{self, Error};
use crate::tag::appended;
use authenticode::ExcludedSections;
use certificate_table::{
    AttributeCertificate, AttributeCertificateRevision, AttributeCertificateType,
};
use data_directories::DataDirectory;

/// An analyzed PE32/PE32+ binary.
#[derive(Debug)]
pub struct PE<'a> {
    pub bytes: &'a [u8],
    pub header: header::Header,
    pub optional_header: optional_header::OptionalHeader,
    /// Whether the binary is 64-bit (PE32+)
    pub is_64: bool,
    /// File offset of the optional-header checksum field.
    checksum_offset: usize,
    /// File offset of the certificate-table data directory entry.
    certtable_entry_offset: usize,
    excluded_sections: ExcludedSections,
    signature: Option<SignatureLayout>,
}

/// Byte layout of the signature machinery inside the file.
#[derive(Debug, Clone)]
struct SignatureLayout {
    /// The certificate table as the data directory declares it.
    table: Range<usize>,
    /// The PKCS#7 `WIN_CERTIFICATE` entry, header included, padding
    /// excluded.
    entry: Range<usize>,
    /// End of the entry rounded to the next quadword.
    entry_end_aligned: usize,
    /// The exact DER of the PKCS#7 blob.
    signed_data: Range<usize>,
    revision: AttributeCertificateRevision,
    /// Body of the appended tag, when one follows the entry.
    appended_tag: Option<Range<usize>>,
}

impl<'a> PE<'a> {
    /// Reads a PE binary from the underlying `bytes`.
    pub fn parse(bytes: &'a [u8]) -> error::Result<Self> {
        let header = header::Header::parse(bytes)?;
        debug!("{header:#?}");
        if header.coff_header.size_of_optional_header == 0 {
            return Err(Error::Malformed(
                "PE has no optional header, it cannot carry a certificate table".into(),
            ));
        }
        let opt_offset = header.optional_header_offset();
        let optional_header = optional_header::OptionalHeader::parse(bytes, opt_offset)?;
        let checksum_offset = opt_offset + optional_header::CHECKSUM_OFFSET;
        let certtable_entry_offset = opt_offset + optional_header.certificate_table_entry_offset();

        let signature = match *optional_header.data_directories.get_certificate_table() {
            Some(directory) => Some(Self::parse_certificate_table(
                bytes,
                directory.virtual_address as usize,
                directory.size as usize,
            )?),
            None => None,
        };
        let excluded_sections = ExcludedSections {
            checksum: checksum_offset..checksum_offset + 4,
            datadir_entry_certtable: certtable_entry_offset
                ..certtable_entry_offset + data_directories::SIZEOF_DATA_DIRECTORY,
            // The certificate table is the end of the signed data; the
            // Authenticode hash covers nothing at or after it.
            certtable: signature.as_ref().map(|sig| sig.table.start..bytes.len()),
        };

        Ok(PE {
            bytes,
            header,
            is_64: optional_header.is_64(),
            optional_header,
            checksum_offset,
            certtable_entry_offset,
            excluded_sections,
            signature,
        })
    }

    fn parse_certificate_table(
        bytes: &'a [u8],
        table_start: usize,
        table_size: usize,
    ) -> error::Result<SignatureLayout> {
        let eof = bytes.len();
        let table_end = table_start.saturating_add(table_size);
        if table_end > eof {
            return Err(Error::Malformed(
                "End of attribute certificates table is after the end of the PE binary".into(),
            ));
        }
        let mut current_offset = table_start;
        let mut pkcs: Option<SignatureLayout> = None;
        let mut appended_tag = None;

        // Guaranteed to terminate: either an entry parse fails, or the
        // cursor strictly increases towards table_end.
        while current_offset < table_end {
            // Appended-tag framing can only begin at an entry boundary, and
            // once it does, it runs to end-of-file.
            if let Some(body) = appended::parse(&bytes[current_offset..]) {
                let body_start = current_offset + appended::HEADER_SIZEOF;
                debug!("appended tag of {} bytes at {current_offset:#x}", body.len());
                appended_tag = Some(body_start..body_start + body.len());
                current_offset = eof;
                break;
            }
            let entry_start = current_offset;
            let attr = AttributeCertificate::parse(bytes, &mut current_offset)?;
            if attr.certificate_type == AttributeCertificateType::PkcsSignedData {
                if pkcs.is_some() {
                    return Err(Error::Malformed(
                        "more than one PKCS#7 entry in the certificate table".into(),
                    ));
                }
                // dwLength cannot distinguish data from alignment padding;
                // the DER's own length can.
                let element = asn1::Element::parse(attr.certificate)?;
                let der_start = entry_start + certificate_table::ATTRIBUTE_CERTIFICATE_HEADER_SIZEOF;
                pkcs = Some(SignatureLayout {
                    table: table_start..table_end,
                    entry: entry_start..entry_start + attr.length as usize,
                    // A file may end before the entry's quadword padding.
                    entry_end_aligned: current_offset.min(eof),
                    signed_data: der_start..der_start + element.total_len(),
                    revision: attr.revision,
                    appended_tag: None,
                });
            }
        }
        // Tags written before the directory size was widened sit past the
        // declared table end; look once more at the final cursor position.
        if appended_tag.is_none() && current_offset < eof {
            if let Some(body) = appended::parse(&bytes[current_offset..]) {
                let body_start = current_offset + appended::HEADER_SIZEOF;
                appended_tag = Some(body_start..body_start + body.len());
            }
        }

        let mut layout = pkcs.ok_or(Error::NoSignature)?;
        layout.appended_tag = appended_tag;
        Ok(layout)
    }

    fn signature(&self) -> error::Result<&SignatureLayout> {
        self.signature.as_ref().ok_or(Error::NoSignature)
    }

    /// The PKCS#7 DER carried in the certificate table.
    pub fn asn1_data(&self) -> error::Result<&'a [u8]> {
        let sig = self.signature()?;
        Ok(&self.bytes[sig.signed_data.clone()])
    }

    /// Absolute file offset of the PKCS#7 DER.
    pub fn certificate_offset(&self) -> error::Result<usize> {
        Ok(self.signature()?.signed_data.start)
    }

    /// The appended tag body, if one is present.
    pub fn appended_tag(&self) -> error::Result<Option<&'a [u8]>> {
        let sig = self.signature()?;
        Ok(sig
            .appended_tag
            .clone()
            .map(|range| &self.bytes[range]))
    }

    /// Patches the certificate-table directory entry and, when the input
    /// carried a checksum, recomputes it over the finished buffer.
    fn repair_headers(&self, out: &mut [u8], table_size: usize) -> error::Result<()> {
        let sig = self.signature()?;
        let directory = DataDirectory {
            virtual_address: sig.table.start as u32,
            size: u32::try_from(table_size).map_err(|_| {
                Error::Malformed("certificate table size does not fit in a u32".into())
            })?,
        };
        out.pwrite_with(directory, self.certtable_entry_offset, scroll::LE)?;
        if self.optional_header.check_sum != 0 {
            let value = checksum::checksum(out, self.checksum_offset);
            debug!("recomputed checksum {value:#x}");
            out.pwrite_with(value, self.checksum_offset, scroll::LE)?;
        }
        Ok(())
    }

    /// Replaces the PKCS#7 blob, rebuilding the `WIN_CERTIFICATE` entry
    /// around `der` and repairing the headers. Any appended tag and any
    /// other table entries are carried over unchanged.
    pub fn set_asn1_data(&self, der: &[u8]) -> error::Result<Vec<u8>> {
        let sig = self.signature()?;
        let entry = AttributeCertificate::write_entry(der, sig.revision)?;
        let old_span = sig.entry_end_aligned - sig.entry.start;
        let mut out =
            Vec::with_capacity(self.bytes.len() - old_span + entry.len());
        out.extend_from_slice(&self.bytes[..sig.entry.start]);
        out.extend_from_slice(&entry);
        out.extend_from_slice(&self.bytes[sig.entry_end_aligned..]);
        let table_size = sig.table.len() - old_span + entry.len();
        self.repair_headers(&mut out, table_size)?;
        Ok(out)
    }

    /// True when nothing but an appended tag (or nothing at all) follows
    /// the certificate entry. Appended-tag operations would clobber
    /// anything else back there.
    fn entry_is_last(&self, sig: &SignatureLayout) -> bool {
        match &sig.appended_tag {
            Some(range) => range.start - appended::HEADER_SIZEOF == sig.entry_end_aligned,
            None => sig.entry_end_aligned == self.bytes.len(),
        }
    }

    /// Replaces everything after the certificate entry with an appended
    /// tag framing `body`, widening the directory size so the table keeps
    /// covering the tag.
    pub fn set_appended_tag(&self, body: &[u8]) -> error::Result<Vec<u8>> {
        let sig = self.signature()?;
        if !self.entry_is_last(sig) {
            return Err(Error::Unsupported(
                "bytes after the certificate entry are not an appended tag".into(),
            ));
        }
        let tag = appended::build(body)?;
        let mut out = Vec::with_capacity(sig.entry_end_aligned + tag.len());
        out.extend_from_slice(&self.bytes[..sig.entry_end_aligned]);
        out.extend_from_slice(&tag);
        let table_size = sig.entry_end_aligned - sig.table.start + tag.len();
        self.repair_headers(&mut out, table_size)?;
        Ok(out)
    }

    /// Truncates the file at the certificate entry's padded end and
    /// restores the directory size.
    pub fn remove_appended_tag(&self) -> error::Result<Vec<u8>> {
        let sig = self.signature()?;
        if !self.entry_is_last(sig) {
            return Err(Error::Unsupported(
                "bytes after the certificate entry are not an appended tag".into(),
            ));
        }
        let mut out = self.bytes[..sig.entry_end_aligned].to_vec();
        let table_size = sig.entry_end_aligned - sig.table.start;
        self.repair_headers(&mut out, table_size)?;
        Ok(out)
    }
}
