use crate::error;
use crate::pe::data_directories::{self, DataDirectories};
use scroll::Pread;

/// Standard fields magic number for 32-bit binary
pub const MAGIC_32: u16 = 0x10b;
/// Standard fields magic number for 64-bit binary
pub const MAGIC_64: u16 = 0x20b;

pub const SIZEOF_STANDARD_FIELDS_32: usize = 28;
pub const SIZEOF_STANDARD_FIELDS_64: usize = 24;
pub const SIZEOF_WINDOWS_FIELDS_32: usize = 68;
pub const SIZEOF_WINDOWS_FIELDS_64: usize = 88;

/// `CheckSum` sits at the same offset inside both the PE32 and the PE32+
/// layout; the fields before it are identical widths.
pub const CHECKSUM_OFFSET: usize = 64;

/// The optional-header fields the certificate machinery reads, plus enough
/// layout arithmetic to patch the checksum and the certificate-table
/// directory entry in place.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct OptionalHeader {
    /// 0x10b (PE32) or 0x20b (PE32+).
    pub magic: u16,
    pub check_sum: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directories: DataDirectories,
}

impl OptionalHeader {
    /// Parses the header at `offset` (which [`super::header::Header`]
    /// supplies from `e_lfanew`).
    pub fn parse(bytes: &[u8], offset: usize) -> error::Result<Self> {
        let magic = bytes.pread_with::<u16>(offset, scroll::LE).map_err(|_| {
            error::Error::Malformed(format!(
                "cannot parse optional header magic (offset {offset:#x})"
            ))
        })?;
        let (standard, windows) = match magic {
            MAGIC_32 => (SIZEOF_STANDARD_FIELDS_32, SIZEOF_WINDOWS_FIELDS_32),
            MAGIC_64 => (SIZEOF_STANDARD_FIELDS_64, SIZEOF_WINDOWS_FIELDS_64),
            magic => {
                return Err(error::Error::Malformed(format!(
                    "optional header magic {magic:#x} is neither PE32 nor PE32+"
                )));
            }
        };
        let check_sum = bytes.pread_with(offset + CHECKSUM_OFFSET, scroll::LE)?;
        // number_of_rva_and_sizes is the last windows field.
        let number_of_rva_and_sizes: u32 =
            bytes.pread_with(offset + standard + windows - 4, scroll::LE)?;
        let mut directories_offset = offset + standard + windows;
        let data_directories = DataDirectories::parse(
            bytes,
            number_of_rva_and_sizes as usize,
            &mut directories_offset,
        )?;
        Ok(OptionalHeader {
            magic,
            check_sum,
            number_of_rva_and_sizes,
            data_directories,
        })
    }

    pub fn is_64(&self) -> bool {
        self.magic == MAGIC_64
    }

    /// Offset of the data directory table relative to the optional header.
    pub fn data_directories_offset(&self) -> usize {
        if self.is_64() {
            SIZEOF_STANDARD_FIELDS_64 + SIZEOF_WINDOWS_FIELDS_64
        } else {
            SIZEOF_STANDARD_FIELDS_32 + SIZEOF_WINDOWS_FIELDS_32
        }
    }

    /// Offset of the certificate-table directory entry relative to the
    /// optional header.
    pub fn certificate_table_entry_offset(&self) -> usize {
        self.data_directories_offset()
            + data_directories::CERTIFICATE_TABLE * data_directories::SIZEOF_DATA_DIRECTORY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_arithmetic() {
        assert_eq!(SIZEOF_STANDARD_FIELDS_32 + SIZEOF_WINDOWS_FIELDS_32, 96);
        assert_eq!(SIZEOF_STANDARD_FIELDS_64 + SIZEOF_WINDOWS_FIELDS_64, 112);
    }

    #[test]
    fn parse_pe32_plus_fields() {
        let mut bytes = vec![0u8; 0x200];
        let offset = 0x58;
        bytes[offset] = 0x0b;
        bytes[offset + 1] = 0x02;
        bytes[offset + CHECKSUM_OFFSET] = 0xef;
        bytes[offset + CHECKSUM_OFFSET + 1] = 0xbe;
        bytes[offset + 108] = 16; // number_of_rva_and_sizes
        // certificate table entry: file offset 0x1000, size 0x200
        let entry = offset + 112 + 4 * 8;
        bytes[entry] = 0x00;
        bytes[entry + 1] = 0x10;
        bytes[entry + 4] = 0x00;
        bytes[entry + 5] = 0x02;
        let header = OptionalHeader::parse(&bytes, offset).unwrap();
        assert!(header.is_64());
        assert_eq!(header.check_sum, 0xbeef);
        let table = (*header.data_directories.get_certificate_table()).unwrap();
        assert_eq!(table.virtual_address, 0x1000);
        assert_eq!(table.size, 0x200);
        assert_eq!(header.certificate_table_entry_offset(), 112 + 32);
    }

    #[test]
    fn reject_unknown_magic() {
        let bytes = [0x07u8, 0x01, 0, 0];
        assert!(OptionalHeader::parse(&bytes, 0).is_err());
    }
}
