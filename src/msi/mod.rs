//! An MSI (MS-CFB compound file) digital-signature editor.
//!
//! Interprets just enough of the compound file to find the
//! `\x05DigitalSignature` stream: DIFAT to FAT, FAT to the directory and
//! mini-FAT, mini-FAT through the root entry's mini stream. A rewrite
//! prefers overwriting the existing sector chain in place; when the new
//! blob does not fit, the old chain is freed and a fresh one is allocated
//! at end-of-file, growing the FAT, DIFAT, mini-FAT and mini stream as
//! needed. Every sector the rewrite does not own round-trips
//! byte-identical.

pub mod directory;
pub mod fat;
pub mod header;

use log::debug;
use scroll::Pwrite;

use crate::error::{self, Error};
use directory::{DirectoryEntry, SIZEOF_DIRECTORY_ENTRY, START_SECTOR_OFFSET, STREAM_SIZE_OFFSET};
use header::{
    CfbHeader, DIFSECT, ENDOFCHAIN, FATSECT, FIRST_DIFAT_SECTOR_OFFSET,
    FIRST_MINIFAT_SECTOR_OFFSET, FREESECT, HEADER_DIFAT_ENTRIES, HEADER_DIFAT_OFFSET, MAXREGSECT,
    NUM_DIFAT_SECTORS_OFFSET, NUM_FAT_SECTORS_OFFSET, NUM_MINIFAT_SECTORS_OFFSET,
};

/// An analyzed MSI installer file.
#[derive(Debug)]
pub struct Msi<'a> {
    pub bytes: &'a [u8],
    pub header: CfbHeader,
    /// DIFAT sectors, in chain order.
    difat_sectors: Vec<u32>,
    /// FAT sectors, i.e. the DIFAT's payload, in order.
    fat_sectors: Vec<u32>,
    fat: Vec<u32>,
    minifat_sectors: Vec<u32>,
    minifat: Vec<u32>,
    /// The root entry's sector chain holding the mini stream.
    mini_stream: Vec<u32>,
    root: DirectoryEntry,
    /// File offset of the root's 128-byte directory entry.
    root_entry_offset: usize,
    signature: Option<SignatureStream>,
}

/// The located digital-signature stream.
#[derive(Debug)]
struct SignatureStream {
    /// File offset of the stream's 128-byte directory entry.
    entry_offset: usize,
    /// The assembled PKCS#7 bytes; chains may be fragmented.
    data: Vec<u8>,
    /// File offset of the stream's first byte.
    offset: usize,
    /// The allocated chain: regular sector ids, or mini ids when `mini`.
    chain: Vec<u32>,
    mini: bool,
}

impl<'a> Msi<'a> {
    /// Reads a compound file from the underlying `bytes`.
    pub fn parse(bytes: &'a [u8]) -> error::Result<Self> {
        let header = CfbHeader::parse(bytes)?;
        debug!(
            "cfb v{}.{}, sector size {}, {} fat sectors",
            header.major_version,
            header.minor_version,
            header.sector_size(),
            header.num_fat_sectors
        );
        let epf = header.entries_per_sector();

        // DIFAT: 109 header entries, then the DIFAT sector chain whose
        // last entry per sector links onward.
        let mut fat_sectors: Vec<u32> = header
            .difat
            .iter()
            .copied()
            .filter(|&s| s <= MAXREGSECT)
            .collect();
        let mut difat_sectors = Vec::new();
        let sector_bound = bytes.len() / header.sector_size() + 1;
        let mut next_difat = header.first_difat_sector;
        while next_difat != ENDOFCHAIN && next_difat != FREESECT {
            if next_difat > MAXREGSECT {
                return Err(Error::Malformed(format!(
                    "special sector {next_difat:#x} in the DIFAT chain"
                )));
            }
            if difat_sectors.len() >= sector_bound {
                return Err(Error::Malformed("DIFAT chain does not terminate".into()));
            }
            let entries = fat::read_entries(bytes, &header, next_difat)?;
            difat_sectors.push(next_difat);
            for &entry in &entries[..epf - 1] {
                if entry <= MAXREGSECT {
                    fat_sectors.push(entry);
                }
            }
            next_difat = entries[epf - 1];
        }

        let mut fat = Vec::with_capacity(fat_sectors.len() * epf);
        for &sector in &fat_sectors {
            fat.extend(fat::read_entries(bytes, &header, sector)?);
        }

        let minifat_start = if header.num_minifat_sectors == 0 {
            ENDOFCHAIN
        } else {
            header.first_minifat_sector
        };
        let minifat_sectors = fat::chain(&fat, normalize_start(minifat_start))?;
        let mut minifat = Vec::with_capacity(minifat_sectors.len() * epf);
        for &sector in &minifat_sectors {
            minifat.extend(fat::read_entries(bytes, &header, sector)?);
        }

        let dir_sectors = fat::chain(&fat, header.first_dir_sector)?;
        if dir_sectors.is_empty() {
            return Err(Error::Malformed("compound file has no directory".into()));
        }
        let mut root = None;
        let mut sig_entry = None;
        for &sector in &dir_sectors {
            let mut offset = header.sector_offset(sector);
            for _ in 0..header.sector_size() / SIZEOF_DIRECTORY_ENTRY {
                let entry_offset = offset;
                let entry = DirectoryEntry::parse(bytes, &mut offset)?;
                if entry.is_root() && root.is_none() {
                    root = Some((entry, entry_offset));
                } else if entry.is_digital_signature() && sig_entry.is_none() {
                    sig_entry = Some((entry, entry_offset));
                }
            }
        }
        let (root, root_entry_offset) =
            root.ok_or_else(|| Error::Malformed("no root directory entry".into()))?;
        let mini_stream = fat::chain(&fat, normalize_start(root.start_sector))?;

        let signature = match sig_entry {
            None => None,
            Some((mut entry, entry_offset)) => {
                if header.major_version == 3 {
                    // v3 only defines the low half of the size field.
                    entry.stream_size &= 0xffff_ffff;
                }
                let size = usize::try_from(entry.stream_size).map_err(|_| {
                    Error::Malformed("signature stream size does not fit in usize".into())
                })?;
                let mini = entry.stream_size < u64::from(header.mini_stream_cutoff);
                debug!(
                    "digital signature stream: {size} bytes, {} regime",
                    if mini { "mini" } else { "fat" }
                );
                let (data, offset, chain) = if mini {
                    read_mini_stream(
                        bytes,
                        &header,
                        &minifat,
                        &mini_stream,
                        entry.start_sector,
                        size,
                    )?
                } else {
                    read_stream(bytes, &header, &fat, entry.start_sector, size)?
                };
                Some(SignatureStream {
                    entry_offset,
                    data,
                    offset,
                    chain,
                    mini,
                })
            }
        };

        Ok(Msi {
            bytes,
            header,
            difat_sectors,
            fat_sectors,
            fat,
            minifat_sectors,
            minifat,
            mini_stream,
            root,
            root_entry_offset,
            signature,
        })
    }

    fn signature(&self) -> error::Result<&SignatureStream> {
        self.signature.as_ref().ok_or(Error::NoSignature)
    }

    /// The PKCS#7 DER carried in the digital-signature stream.
    pub fn asn1_data(&self) -> error::Result<&[u8]> {
        Ok(&self.signature()?.data)
    }

    /// Absolute file offset of the stream's first byte.
    pub fn certificate_offset(&self) -> error::Result<usize> {
        Ok(self.signature()?.offset)
    }

    /// Replaces the digital-signature stream with `der`, in place when it
    /// fits the allocated chain, otherwise through fresh sectors at
    /// end-of-file.
    pub fn set_asn1_data(&self, der: &[u8]) -> error::Result<Vec<u8>> {
        let sig = self.signature()?;
        let new_mini = (der.len() as u64) < u64::from(self.header.mini_stream_cutoff);
        let unit = if sig.mini {
            self.header.mini_sector_size()
        } else {
            self.header.sector_size()
        };
        if new_mini == sig.mini && der.len() <= sig.chain.len() * unit {
            return self.overwrite_in_place(sig, der);
        }

        let mut rewriter = Rewriter::new(self);
        rewriter.free(&sig.chain, sig.mini)?;
        let (start, chain_is_mini) = if new_mini {
            (rewriter.alloc_mini(der)?, true)
        } else {
            (rewriter.alloc_regular(der)?, false)
        };
        debug!(
            "reallocated signature stream at {} sector {start}",
            if chain_is_mini { "mini" } else { "regular" }
        );
        rewriter.finish(sig.entry_offset, start, der.len() as u64)
    }

    /// Overwrites the existing chain without touching any allocation
    /// structure; only the directory entry's size changes.
    fn overwrite_in_place(&self, sig: &SignatureStream, der: &[u8]) -> error::Result<Vec<u8>> {
        debug!("rewriting the signature stream in place");
        let mut out = self.bytes.to_vec();
        // A cut-short final sector may need its full extent back.
        let sector_size = self.header.sector_size();
        let aligned = out.len().div_ceil(sector_size) * sector_size;
        out.resize(aligned.max(sector_size), 0);
        let unit = if sig.mini {
            self.header.mini_sector_size()
        } else {
            self.header.sector_size()
        };
        // Walk the whole allocated chain: copy the new bytes in and zero
        // every remaining byte, so no stale tail of the old blob (and no
        // old tag marker) survives inside the allocation.
        for (index, &sector) in sig.chain.iter().enumerate() {
            let offset = if sig.mini {
                mini_sector_file_offset(&self.header, &self.mini_stream, sector)?
            } else {
                self.header.sector_offset(sector)
            };
            if offset + unit > out.len() {
                return Err(Error::Malformed(format!(
                    "stream sector {sector} is past the end of the file"
                )));
            }
            let start = (index * unit).min(der.len());
            let have = der.len().saturating_sub(index * unit).min(unit);
            out[offset..offset + have].copy_from_slice(&der[start..start + have]);
            out[offset + have..offset + unit].fill(0);
        }
        out.as_mut_slice().pwrite_with(
            der.len() as u64,
            sig.entry_offset + STREAM_SIZE_OFFSET,
            scroll::LE,
        )?;
        Ok(out)
    }
}

fn normalize_start(sector: u32) -> u32 {
    // Writers disagree on how to spell "no chain".
    if sector == FREESECT { ENDOFCHAIN } else { sector }
}

fn read_stream(
    bytes: &[u8],
    header: &CfbHeader,
    fat: &[u32],
    start: u32,
    size: usize,
) -> error::Result<(Vec<u8>, usize, Vec<u32>)> {
    let chain = fat::chain(fat, normalize_start(start))?;
    let sector_size = header.sector_size();
    if chain.len() * sector_size < size {
        return Err(Error::Malformed(format!(
            "stream chain covers {} bytes but the entry declares {size}",
            chain.len() * sector_size
        )));
    }
    let mut data = Vec::with_capacity(size);
    for &sector in &chain {
        let offset = header.sector_offset(sector);
        if offset >= bytes.len() {
            return Err(Error::Malformed(format!(
                "stream sector {sector} is past the end of the file"
            )));
        }
        // The final sector of a file is allowed to be cut short.
        let end = (offset + sector_size).min(bytes.len());
        data.extend_from_slice(&bytes[offset..end]);
        if data.len() >= size {
            break;
        }
    }
    if data.len() < size {
        return Err(Error::Malformed(format!(
            "stream data ends after {} of {size} bytes",
            data.len()
        )));
    }
    data.truncate(size);
    let offset = chain
        .first()
        .map(|&sector| header.sector_offset(sector))
        .unwrap_or(0);
    Ok((data, offset, chain))
}

fn read_mini_stream(
    bytes: &[u8],
    header: &CfbHeader,
    minifat: &[u32],
    mini_stream: &[u32],
    start: u32,
    size: usize,
) -> error::Result<(Vec<u8>, usize, Vec<u32>)> {
    let chain = fat::chain(minifat, normalize_start(start))?;
    let mini_size = header.mini_sector_size();
    if chain.len() * mini_size < size {
        return Err(Error::Malformed(format!(
            "mini chain covers {} bytes but the entry declares {size}",
            chain.len() * mini_size
        )));
    }
    let mut data = Vec::with_capacity(size);
    for &mini in &chain {
        let offset = mini_sector_file_offset(header, mini_stream, mini)?;
        if offset >= bytes.len() {
            return Err(Error::Malformed(format!(
                "mini sector {mini} is past the end of the file"
            )));
        }
        let end = (offset + mini_size).min(bytes.len());
        data.extend_from_slice(&bytes[offset..end]);
        if data.len() >= size {
            break;
        }
    }
    if data.len() < size {
        return Err(Error::Malformed(format!(
            "stream data ends after {} of {size} bytes",
            data.len()
        )));
    }
    data.truncate(size);
    let offset = match chain.first() {
        Some(&mini) => mini_sector_file_offset(header, mini_stream, mini)?,
        None => 0,
    };
    Ok((data, offset, chain))
}

/// Maps a mini sector id to a file offset through the root entry's mini
/// stream. Mini sectors are 64 bytes and never straddle a regular sector.
fn mini_sector_file_offset(
    header: &CfbHeader,
    mini_stream: &[u32],
    mini: u32,
) -> error::Result<usize> {
    let byte = mini as usize * header.mini_sector_size();
    let index = byte / header.sector_size();
    let within = byte % header.sector_size();
    let &sector = mini_stream.get(index).ok_or_else(|| {
        Error::Malformed(format!("mini sector {mini} is outside the mini stream"))
    })?;
    Ok(header.sector_offset(sector) + within)
}

/// Builds the out-of-place rewrite: owns a copy of the file plus working
/// copies of every allocation structure, appends sectors at end-of-file,
/// and serialises the changed structures back in `finish`.
struct Rewriter<'m, 'a> {
    msi: &'m Msi<'a>,
    out: Vec<u8>,
    fat: Vec<u32>,
    fat_sectors: Vec<u32>,
    difat_sectors: Vec<u32>,
    minifat: Vec<u32>,
    minifat_sectors: Vec<u32>,
    mini_stream: Vec<u32>,
    root_size: u64,
    root_start: u32,
}

impl<'m, 'a> Rewriter<'m, 'a> {
    fn new(msi: &'m Msi<'a>) -> Self {
        let sector_size = msi.header.sector_size();
        let mut out = msi.bytes.to_vec();
        // Valid files end on a sector boundary; make it so before
        // appending.
        let aligned = out.len().div_ceil(sector_size) * sector_size;
        out.resize(aligned.max(sector_size), 0);
        Rewriter {
            msi,
            out,
            fat: msi.fat.clone(),
            fat_sectors: msi.fat_sectors.clone(),
            difat_sectors: msi.difat_sectors.clone(),
            minifat: msi.minifat.clone(),
            minifat_sectors: msi.minifat_sectors.clone(),
            mini_stream: msi.mini_stream.clone(),
            root_size: msi.root.stream_size,
            root_start: msi.root.start_sector,
        }
    }

    /// Marks the chain free and zeroes its data, so stale bytes of the
    /// old stream (a previous tag marker in particular) cannot survive in
    /// unallocated sectors.
    fn free(&mut self, chain: &[u32], mini: bool) -> error::Result<()> {
        if mini {
            let mini_size = self.msi.header.mini_sector_size();
            for &sector in chain {
                self.minifat[sector as usize] = FREESECT;
                let offset =
                    mini_sector_file_offset(&self.msi.header, &self.mini_stream, sector)?;
                let end = (offset + mini_size).min(self.out.len());
                if offset < self.out.len() {
                    self.out[offset..end].fill(0);
                }
            }
        } else {
            let sector_size = self.msi.header.sector_size();
            for &sector in chain {
                self.fat[sector as usize] = FREESECT;
                let offset = self.msi.header.sector_offset(sector);
                let end = (offset + sector_size).min(self.out.len());
                if offset < self.out.len() {
                    self.out[offset..end].fill(0);
                }
            }
        }
        Ok(())
    }

    /// Appends one sector at end-of-file and returns its id. The FAT copy
    /// is extended to cover it, still marked free.
    fn append_sector(&mut self, content: &[u8]) -> u32 {
        let sector_size = self.msi.header.sector_size();
        let id = (self.out.len() / sector_size - 1) as u32;
        debug_assert!(content.len() <= sector_size);
        self.out.extend_from_slice(content);
        self.out.resize(self.out.len() + sector_size - content.len(), 0);
        while self.fat.len() <= id as usize {
            self.fat.push(FREESECT);
        }
        id
    }

    /// Allocates a regular chain at end-of-file holding `data`, returning
    /// the first sector.
    fn alloc_regular(&mut self, data: &[u8]) -> error::Result<u32> {
        let sector_size = self.msi.header.sector_size();
        let mut chain = Vec::with_capacity(data.len().div_ceil(sector_size));
        for chunk in data.chunks(sector_size) {
            chain.push(self.append_sector(chunk));
        }
        for pair in chain.windows(2) {
            self.fat[pair[0] as usize] = pair[1];
        }
        let &last = chain.last().ok_or_else(|| {
            Error::Malformed("cannot allocate an empty signature stream".into())
        })?;
        self.fat[last as usize] = ENDOFCHAIN;
        Ok(chain[0])
    }

    /// Allocates a mini chain holding `data`: free mini slots are reused
    /// first, then the mini-FAT and the mini stream grow as needed.
    fn alloc_mini(&mut self, data: &[u8]) -> error::Result<u32> {
        let mini_size = self.msi.header.mini_sector_size();
        let needed = data.len().div_ceil(mini_size);
        if needed == 0 {
            return Err(Error::Malformed(
                "cannot allocate an empty signature stream".into(),
            ));
        }
        let mut slots: Vec<u32> = self
            .minifat
            .iter()
            .enumerate()
            .filter(|&(_, &entry)| entry == FREESECT)
            .map(|(index, _)| index as u32)
            .take(needed)
            .collect();
        while slots.len() < needed {
            slots.push(self.minifat.len() as u32);
            self.minifat.push(FREESECT);
        }
        self.ensure_minifat_capacity();

        // The mini stream must cover the highest slot in use.
        let highest = slots.iter().copied().max().unwrap_or(0) as usize + 1;
        let needed_bytes = highest * mini_size;
        let sector_size = self.msi.header.sector_size();
        while self.mini_stream.len() * sector_size < needed_bytes {
            let sector = self.append_sector(&[]);
            self.fat[sector as usize] = ENDOFCHAIN;
            match self.mini_stream.last() {
                Some(&last) => self.fat[last as usize] = sector,
                None => self.root_start = sector,
            }
            self.mini_stream.push(sector);
        }
        if needed_bytes as u64 > self.root_size {
            self.root_size = needed_bytes as u64;
        }

        for (index, &slot) in slots.iter().enumerate() {
            self.minifat[slot as usize] = match slots.get(index + 1) {
                Some(&next) => next,
                None => ENDOFCHAIN,
            };
        }
        for (chunk, &slot) in data.chunks(mini_size).zip(&slots) {
            let offset = mini_sector_file_offset(&self.msi.header, &self.mini_stream, slot)?;
            if offset + mini_size > self.out.len() {
                return Err(Error::Malformed(format!(
                    "mini sector {slot} is past the end of the output buffer"
                )));
            }
            self.out[offset..offset + chunk.len()].copy_from_slice(chunk);
            // Clear the slot's tail so freed garbage never leaks in.
            self.out[offset + chunk.len()..offset + mini_size].fill(0);
        }
        Ok(slots[0])
    }

    /// Appends mini-FAT sectors until the table copy fits its storage.
    fn ensure_minifat_capacity(&mut self) {
        let epf = self.msi.header.entries_per_sector();
        while self.minifat.len() > self.minifat_sectors.len() * epf {
            let sector = self.append_sector(&[]);
            self.fat[sector as usize] = ENDOFCHAIN;
            if let Some(&last) = self.minifat_sectors.last() {
                self.fat[last as usize] = sector;
            }
            self.minifat_sectors.push(sector);
        }
    }

    /// Appends FAT sectors (and DIFAT sectors registering them) until the
    /// FAT copy fits its storage. Appending grows the FAT again, so this
    /// loops to a fixed point.
    fn ensure_fat_capacity(&mut self) {
        let epf = self.msi.header.entries_per_sector();
        loop {
            if self.fat.len() <= self.fat_sectors.len() * epf {
                // Every DIFAT overflow entry also needs a home.
                let overflow = self.fat_sectors.len().saturating_sub(HEADER_DIFAT_ENTRIES);
                let difat_needed = overflow.div_ceil(epf - 1);
                if difat_needed <= self.difat_sectors.len() {
                    break;
                }
                let sector = self.append_sector(&[]);
                self.fat[sector as usize] = DIFSECT;
                self.difat_sectors.push(sector);
                continue;
            }
            let sector = self.append_sector(&[]);
            self.fat[sector as usize] = FATSECT;
            self.fat_sectors.push(sector);
        }
    }

    /// Serialises every changed structure and patches the directory
    /// entries and header counts. `start`/`size` describe the rewritten
    /// signature stream.
    fn finish(mut self, entry_offset: usize, start: u32, size: u64) -> error::Result<Vec<u8>> {
        self.ensure_fat_capacity();
        let header = &self.msi.header;
        let epf = header.entries_per_sector();

        for (index, &sector) in self.fat_sectors.iter().enumerate() {
            let mut entries = vec![FREESECT; epf];
            for (slot, entry) in entries.iter_mut().enumerate() {
                if let Some(&value) = self.fat.get(index * epf + slot) {
                    *entry = value;
                }
            }
            fat::write_entries(&mut self.out, header, sector, &entries)?;
        }
        for (index, &sector) in self.minifat_sectors.iter().enumerate() {
            let mut entries = vec![FREESECT; epf];
            for (slot, entry) in entries.iter_mut().enumerate() {
                if let Some(&value) = self.minifat.get(index * epf + slot) {
                    *entry = value;
                }
            }
            fat::write_entries(&mut self.out, header, sector, &entries)?;
        }

        // DIFAT: the first 109 entries live in the header, the rest in
        // the DIFAT chain with a link in each sector's last slot.
        let mut offset = HEADER_DIFAT_OFFSET;
        for slot in 0..HEADER_DIFAT_ENTRIES {
            let value = self.fat_sectors.get(slot).copied().unwrap_or(FREESECT);
            self.out
                .as_mut_slice()
                .gwrite_with(value, &mut offset, scroll::LE)?;
        }
        for (index, &sector) in self.difat_sectors.iter().enumerate() {
            let mut entries = vec![FREESECT; epf];
            for slot in 0..epf - 1 {
                let source = HEADER_DIFAT_ENTRIES + index * (epf - 1) + slot;
                if let Some(&value) = self.fat_sectors.get(source) {
                    entries[slot] = value;
                }
            }
            entries[epf - 1] = self
                .difat_sectors
                .get(index + 1)
                .copied()
                .unwrap_or(ENDOFCHAIN);
            fat::write_entries(&mut self.out, header, sector, &entries)?;
        }

        let out = self.out.as_mut_slice();
        out.pwrite_with(
            self.fat_sectors.len() as u32,
            NUM_FAT_SECTORS_OFFSET,
            scroll::LE,
        )?;
        out.pwrite_with(
            self.minifat_sectors.len() as u32,
            NUM_MINIFAT_SECTORS_OFFSET,
            scroll::LE,
        )?;
        out.pwrite_with(
            self.minifat_sectors.first().copied().unwrap_or(ENDOFCHAIN),
            FIRST_MINIFAT_SECTOR_OFFSET,
            scroll::LE,
        )?;
        out.pwrite_with(
            self.difat_sectors.len() as u32,
            NUM_DIFAT_SECTORS_OFFSET,
            scroll::LE,
        )?;
        out.pwrite_with(
            self.difat_sectors.first().copied().unwrap_or(ENDOFCHAIN),
            FIRST_DIFAT_SECTOR_OFFSET,
            scroll::LE,
        )?;

        // Root entry: the mini stream may have moved or grown.
        out.pwrite_with(
            self.root_start,
            self.msi.root_entry_offset + START_SECTOR_OFFSET,
            scroll::LE,
        )?;
        out.pwrite_with(
            self.root_size,
            self.msi.root_entry_offset + STREAM_SIZE_OFFSET,
            scroll::LE,
        )?;
        // Signature entry.
        out.pwrite_with(start, entry_offset + START_SECTOR_OFFSET, scroll::LE)?;
        out.pwrite_with(size, entry_offset + STREAM_SIZE_OFFSET, scroll::LE)?;

        Ok(self.out)
    }
}
