//! Compound-file directory entries, just deep enough to find the root
//! storage and the digital-signature stream.

use crate::error;
use scroll::Pread;

pub const SIZEOF_DIRECTORY_ENTRY: usize = 128;

pub const OBJECT_TYPE_UNALLOCATED: u8 = 0;
pub const OBJECT_TYPE_STORAGE: u8 = 1;
pub const OBJECT_TYPE_STREAM: u8 = 2;
pub const OBJECT_TYPE_ROOT: u8 = 5;

/// Entry field offsets patched during stream rewrites.
pub const START_SECTOR_OFFSET: usize = 116;
pub const STREAM_SIZE_OFFSET: usize = 120;

/// `\x05DigitalSignature` in UTF-16LE. The leading 0x0005 code unit marks
/// the stream as installer metadata.
pub const DIGITAL_SIGNATURE_NAME: [u8; 34] = [
    0x05, 0x00, b'D', 0x00, b'i', 0x00, b'g', 0x00, b'i', 0x00, b't', 0x00, b'a', 0x00, b'l',
    0x00, b'S', 0x00, b'i', 0x00, b'g', 0x00, b'n', 0x00, b'a', 0x00, b't', 0x00, b'u', 0x00,
    b'r', 0x00, b'e', 0x00,
];
/// Name length in bytes, terminating null code unit included.
pub const DIGITAL_SIGNATURE_NAME_LEN: u16 = 36;

/// One 128-byte directory entry, trimmed to the fields the signature
/// machinery reads. The red-black tree linkage is irrelevant here: the
/// directory stream is scanned linearly.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: [u8; 64],
    pub name_len: u16,
    pub object_type: u8,
    pub start_sector: u32,
    pub stream_size: u64,
}

impl DirectoryEntry {
    /// Parses the entry at `offset` and advances it by
    /// [`SIZEOF_DIRECTORY_ENTRY`].
    pub fn parse(bytes: &[u8], offset: &mut usize) -> error::Result<Self> {
        let base = *offset;
        let raw: &[u8] = bytes
            .get(base..base + SIZEOF_DIRECTORY_ENTRY)
            .ok_or_else(|| {
                error::Error::Malformed(format!(
                    "directory entry at {base:#x} is past the end of the file"
                ))
            })?;
        let mut name = [0u8; 64];
        name.copy_from_slice(&raw[..64]);
        let name_len = raw.pread_with(64, scroll::LE)?;
        let object_type = raw[66];
        let start_sector = raw.pread_with(START_SECTOR_OFFSET, scroll::LE)?;
        let stream_size = raw.pread_with(STREAM_SIZE_OFFSET, scroll::LE)?;
        *offset = base + SIZEOF_DIRECTORY_ENTRY;
        Ok(DirectoryEntry {
            name,
            name_len,
            object_type,
            start_sector,
            stream_size,
        })
    }

    pub fn is_root(&self) -> bool {
        self.object_type == OBJECT_TYPE_ROOT
    }

    pub fn is_digital_signature(&self) -> bool {
        self.object_type == OBJECT_TYPE_STREAM
            && self.name_len == DIGITAL_SIGNATURE_NAME_LEN
            && self.name[..DIGITAL_SIGNATURE_NAME.len()] == DIGITAL_SIGNATURE_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_entry(name: &[u8], name_len: u16, object_type: u8) -> Vec<u8> {
        let mut raw = vec![0u8; SIZEOF_DIRECTORY_ENTRY];
        raw[..name.len()].copy_from_slice(name);
        raw[64..66].copy_from_slice(&name_len.to_le_bytes());
        raw[66] = object_type;
        raw[START_SECTOR_OFFSET..START_SECTOR_OFFSET + 4].copy_from_slice(&7u32.to_le_bytes());
        raw[STREAM_SIZE_OFFSET..STREAM_SIZE_OFFSET + 8]
            .copy_from_slice(&4000u64.to_le_bytes());
        raw
    }

    #[test]
    fn recognizes_the_signature_stream() {
        let raw = raw_entry(
            &DIGITAL_SIGNATURE_NAME,
            DIGITAL_SIGNATURE_NAME_LEN,
            OBJECT_TYPE_STREAM,
        );
        let mut offset = 0;
        let entry = DirectoryEntry::parse(&raw, &mut offset).unwrap();
        assert!(entry.is_digital_signature());
        assert!(!entry.is_root());
        assert_eq!(entry.start_sector, 7);
        assert_eq!(entry.stream_size, 4000);
        assert_eq!(offset, SIZEOF_DIRECTORY_ENTRY);
    }

    #[test]
    fn storage_with_same_name_is_not_the_stream() {
        let raw = raw_entry(
            &DIGITAL_SIGNATURE_NAME,
            DIGITAL_SIGNATURE_NAME_LEN,
            OBJECT_TYPE_STORAGE,
        );
        let mut offset = 0;
        let entry = DirectoryEntry::parse(&raw, &mut offset).unwrap();
        assert!(!entry.is_digital_signature());
    }

    #[test]
    fn truncated_entry_fails() {
        let raw = [0u8; 100];
        let mut offset = 0;
        assert!(DirectoryEntry::parse(&raw, &mut offset).is_err());
    }
}
