//! Sector allocation plumbing: chain walking and reading/writing the u32
//! entry tables (FAT, mini-FAT, DIFAT payloads) stored in sectors.

use crate::error::{Error, Result};
use crate::msi::header::{CfbHeader, ENDOFCHAIN, MAXREGSECT};
use scroll::{Pread, Pwrite};

/// Follows a chain from `start` through `table`, collecting sector ids in
/// order. Rejects special sector values inside the chain and chains longer
/// than the table, which would mean a cycle.
pub fn chain(table: &[u32], start: u32) -> Result<Vec<u32>> {
    let mut sectors = Vec::new();
    let mut sector = start;
    while sector != ENDOFCHAIN {
        if sector > MAXREGSECT {
            return Err(Error::Malformed(format!(
                "special sector {sector:#x} inside an allocation chain"
            )));
        }
        let next = *table.get(sector as usize).ok_or_else(|| {
            Error::Malformed(format!(
                "sector {sector} is outside the allocation table of {} entries",
                table.len()
            ))
        })?;
        sectors.push(sector);
        if sectors.len() > table.len() {
            return Err(Error::Malformed(
                "allocation chain does not terminate".into(),
            ));
        }
        sector = next;
    }
    Ok(sectors)
}

/// Reads all u32 entries of one sector.
pub fn read_entries(bytes: &[u8], header: &CfbHeader, sector: u32) -> Result<Vec<u32>> {
    let start = header.sector_offset(sector);
    let end = start + header.sector_size();
    if end > bytes.len() {
        return Err(Error::Malformed(format!(
            "sector {sector} is past the end of the file"
        )));
    }
    let mut entries = Vec::with_capacity(header.entries_per_sector());
    let mut offset = start;
    while offset < end {
        entries.push(bytes.gread_with(&mut offset, scroll::LE)?);
    }
    Ok(entries)
}

/// Writes `entries` over sector `sector`. The caller supplies exactly one
/// sector's worth.
pub fn write_entries(
    out: &mut [u8],
    header: &CfbHeader,
    sector: u32,
    entries: &[u32],
) -> Result<()> {
    debug_assert_eq!(entries.len(), header.entries_per_sector());
    let mut offset = header.sector_offset(sector);
    if offset + header.sector_size() > out.len() {
        return Err(Error::Malformed(format!(
            "sector {sector} is past the end of the output buffer"
        )));
    }
    for &entry in entries {
        out.gwrite_with(entry, &mut offset, scroll::LE)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msi::header::FREESECT;

    #[test]
    fn chain_walks_in_order() {
        let table = [2, ENDOFCHAIN, 1, FREESECT];
        assert_eq!(chain(&table, 0).unwrap(), vec![0, 2, 1]);
    }

    #[test]
    fn chain_from_endofchain_is_empty() {
        let table = [ENDOFCHAIN];
        assert!(chain(&table, ENDOFCHAIN).unwrap().is_empty());
    }

    #[test]
    fn cycle_is_detected() {
        let table = [1, 0];
        assert!(matches!(chain(&table, 0), Err(Error::Malformed(_))));
    }

    #[test]
    fn free_sector_in_chain_is_rejected() {
        // Entry 0 links to FREESECT, which must never appear mid-chain.
        let table = [FREESECT, ENDOFCHAIN];
        assert!(matches!(chain(&table, 0), Err(Error::Malformed(_))));
    }

    #[test]
    fn out_of_table_sector_is_rejected() {
        let table = [ENDOFCHAIN];
        assert!(chain(&table, 3).is_err());
    }
}
