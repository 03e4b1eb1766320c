//! The MS-CFB file header and sector constants.
//!
//! Reference:
//!   https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb

use crate::error;
use scroll::Pread;

/// `D0 CF 11 E0 A1 B1 1A E1`.
pub const SIGNATURE: [u8; 8] = [0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];
/// The header occupies 512 bytes regardless of the sector size.
pub const SIZEOF_HEADER: usize = 512;
/// Number of DIFAT entries carried inside the header.
pub const HEADER_DIFAT_ENTRIES: usize = 109;
/// File offset of the header's DIFAT array.
pub const HEADER_DIFAT_OFFSET: usize = 76;

/// Largest regular sector number.
pub const MAXREGSECT: u32 = 0xffff_fffa;
/// The sector holds DIFAT entries.
pub const DIFSECT: u32 = 0xffff_fffc;
/// The sector holds FAT entries.
pub const FATSECT: u32 = 0xffff_fffd;
/// End of a sector chain.
pub const ENDOFCHAIN: u32 = 0xffff_fffe;
/// Unallocated.
pub const FREESECT: u32 = 0xffff_ffff;

/// Header field offsets patched during stream rewrites.
pub const NUM_FAT_SECTORS_OFFSET: usize = 44;
pub const FIRST_MINIFAT_SECTOR_OFFSET: usize = 60;
pub const NUM_MINIFAT_SECTORS_OFFSET: usize = 64;
pub const FIRST_DIFAT_SECTOR_OFFSET: usize = 68;
pub const NUM_DIFAT_SECTORS_OFFSET: usize = 72;

#[derive(Debug, Clone)]
pub struct CfbHeader {
    pub minor_version: u16,
    /// 3 (512-byte sectors) or 4 (4096-byte sectors).
    pub major_version: u16,
    pub sector_shift: u16,
    pub mini_sector_shift: u16,
    pub num_dir_sectors: u32,
    pub num_fat_sectors: u32,
    pub first_dir_sector: u32,
    pub mini_stream_cutoff: u32,
    pub first_minifat_sector: u32,
    pub num_minifat_sectors: u32,
    pub first_difat_sector: u32,
    pub num_difat_sectors: u32,
    /// The in-header part of the DIFAT.
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

impl CfbHeader {
    pub fn parse(bytes: &[u8]) -> error::Result<Self> {
        if bytes.len() < SIZEOF_HEADER {
            return Err(error::Error::Malformed(
                "compound file is shorter than its 512-byte header".into(),
            ));
        }
        if bytes[..8] != SIGNATURE {
            return Err(error::Error::Malformed(
                "compound file signature mismatch".into(),
            ));
        }
        let minor_version = bytes.pread_with(24, scroll::LE)?;
        let major_version: u16 = bytes.pread_with(26, scroll::LE)?;
        let byte_order: u16 = bytes.pread_with(28, scroll::LE)?;
        if byte_order != 0xfffe {
            return Err(error::Error::Malformed(format!(
                "compound file byte order {byte_order:#x} is not little endian"
            )));
        }
        let sector_shift: u16 = bytes.pread_with(30, scroll::LE)?;
        if sector_shift != 9 && sector_shift != 12 {
            return Err(error::Error::Malformed(format!(
                "sector shift {sector_shift} is neither 512 nor 4096 bytes"
            )));
        }
        let mini_sector_shift: u16 = bytes.pread_with(32, scroll::LE)?;
        if mini_sector_shift != 6 {
            return Err(error::Error::Malformed(format!(
                "mini sector shift {mini_sector_shift} is not 64 bytes"
            )));
        }
        let num_dir_sectors = bytes.pread_with(40, scroll::LE)?;
        let num_fat_sectors = bytes.pread_with(44, scroll::LE)?;
        let first_dir_sector = bytes.pread_with(48, scroll::LE)?;
        let mini_stream_cutoff = bytes.pread_with(56, scroll::LE)?;
        let first_minifat_sector = bytes.pread_with(60, scroll::LE)?;
        let num_minifat_sectors = bytes.pread_with(64, scroll::LE)?;
        let first_difat_sector = bytes.pread_with(FIRST_DIFAT_SECTOR_OFFSET, scroll::LE)?;
        let num_difat_sectors = bytes.pread_with(NUM_DIFAT_SECTORS_OFFSET, scroll::LE)?;
        let mut difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        let mut offset = HEADER_DIFAT_OFFSET;
        for entry in difat.iter_mut() {
            *entry = bytes.gread_with(&mut offset, scroll::LE)?;
        }
        Ok(CfbHeader {
            minor_version,
            major_version,
            sector_shift,
            mini_sector_shift,
            num_dir_sectors,
            num_fat_sectors,
            first_dir_sector,
            mini_stream_cutoff,
            first_minifat_sector,
            num_minifat_sectors,
            first_difat_sector,
            num_difat_sectors,
            difat,
        })
    }

    pub fn sector_size(&self) -> usize {
        1 << self.sector_shift
    }

    pub fn mini_sector_size(&self) -> usize {
        1 << self.mini_sector_shift
    }

    /// FAT/DIFAT/mini-FAT entries that fit one sector.
    pub fn entries_per_sector(&self) -> usize {
        self.sector_size() / 4
    }

    /// File offset of regular sector `sector`. Sector 0 begins one full
    /// sector after offset 0, which works out for both the 512-byte v3
    /// header and the zero-extended v4 header.
    pub fn sector_offset(&self, sector: u32) -> usize {
        (sector as usize + 1) << self.sector_shift
    }
}
