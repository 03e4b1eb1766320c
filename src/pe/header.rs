use crate::error;
use scroll::{Pread, Pwrite, SizeWith};

/// `MZ`, little endian.
#[doc(alias("IMAGE_DOS_SIGNATURE"))]
pub const DOS_MAGIC: u16 = 0x5a4d;
/// `e_lfanew` always sits at 0x3c.
pub const PE_POINTER_OFFSET: usize = 0x3c;
/// `PE\0\0`, little endian.
pub const PE_MAGIC: u32 = 0x0000_4550;
pub const SIZEOF_PE_MAGIC: usize = 4;
pub const SIZEOF_COFF_HEADER: usize = 20;

/// The two DOS header fields the certificate machinery cares about. The
/// rest of the stub is opaque bytes that round-trip untouched.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
#[doc(alias("IMAGE_DOS_HEADER"))]
pub struct DosHeader {
    /// Magic number: `MZ`.
    #[doc(alias("e_magic"))]
    pub signature: u16,
    /// File offset of the PE header.
    #[doc(alias("e_lfanew"))]
    pub pe_pointer: u32,
}

impl DosHeader {
    pub fn parse(bytes: &[u8]) -> error::Result<Self> {
        let signature = bytes.pread_with(0, scroll::LE).map_err(|_| {
            error::Error::Malformed(format!("cannot parse DOS signature (offset {:#x})", 0))
        })?;
        if signature != DOS_MAGIC {
            return Err(error::Error::Malformed(format!(
                "DOS header is malformed (signature {signature:#x})"
            )));
        }
        let pe_pointer = bytes
            .pread_with(PE_POINTER_OFFSET, scroll::LE)
            .map_err(|_| {
                error::Error::Malformed(format!(
                    "cannot parse PE header pointer (offset {PE_POINTER_OFFSET:#x})"
                ))
            })?;
        Ok(DosHeader {
            signature,
            pe_pointer,
        })
    }
}

/// COFF Header
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct CoffHeader {
    /// The machine type
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbol_table: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    pub fn parse(bytes: &[u8], offset: &mut usize) -> error::Result<Self> {
        Ok(bytes.gread_with(offset, scroll::LE)?)
    }
}

#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct Header {
    pub dos_header: DosHeader,
    /// PE Magic: PE\0\0, little endian
    pub signature: u32,
    pub coff_header: CoffHeader,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> error::Result<Self> {
        let dos_header = DosHeader::parse(bytes)?;
        let mut offset = dos_header.pe_pointer as usize;
        let signature: u32 = bytes.gread_with(&mut offset, scroll::LE).map_err(|_| {
            error::Error::Malformed(format!("cannot parse PE signature (offset {offset:#x})"))
        })?;
        if signature != PE_MAGIC {
            return Err(error::Error::Malformed(format!(
                "PE header is malformed (signature {signature:#x})"
            )));
        }
        let coff_header = CoffHeader::parse(bytes, &mut offset)?;
        Ok(Header {
            dos_header,
            signature,
            coff_header,
        })
    }

    /// File offset of the optional header.
    pub fn optional_header_offset(&self) -> usize {
        self.dos_header.pe_pointer as usize + SIZEOF_PE_MAGIC + SIZEOF_COFF_HEADER
    }
}
