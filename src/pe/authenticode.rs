// Reference:
//   https://learn.microsoft.com/en-us/windows-hardware/drivers/install/authenticode
//
// The Authenticode digest omits three regions of the file:
//   - the optional-header checksum field
//   - the certificate-table data directory entry
//   - the certificate table itself

use core::ops::Range;
use digest::{Digest, Output};

use super::PE;

/// File ranges excluded from the Authenticode computation, in file order.
#[derive(Debug, Clone)]
pub(super) struct ExcludedSections {
    pub checksum: Range<usize>,
    pub datadir_entry_certtable: Range<usize>,
    pub certtable: Option<Range<usize>>,
}

impl PE<'_> {
    /// The slices of the binary that are relevant for the signature, i.e.
    /// everything between and around the excluded regions, in file order.
    pub fn authenticode_ranges(&self) -> impl Iterator<Item = &[u8]> {
        let excluded = &self.excluded_sections;
        let mut cuts = vec![
            excluded.checksum.clone(),
            excluded.datadir_entry_certtable.clone(),
        ];
        if let Some(certtable) = excluded.certtable.clone() {
            cuts.push(certtable);
        }
        // The cuts are disjoint and sorted, so the kept slices are simply
        // the gaps between them plus whatever follows the last cut.
        let mut kept = Vec::with_capacity(cuts.len() + 1);
        let mut cursor = 0;
        for cut in cuts {
            kept.push(cursor..cut.start);
            cursor = cut.end;
        }
        kept.push(cursor..self.bytes.len());
        kept.into_iter().map(|range| &self.bytes[range])
    }

    /// Digest of the Authenticode-relevant ranges. Any write operation of
    /// this crate leaves this value unchanged; that is the whole point.
    pub fn authenticode_digest<D: Digest>(&self) -> Output<D> {
        let mut digest = D::new();
        for chunk in self.authenticode_ranges() {
            digest.update(chunk);
        }
        digest.finalize()
    }

    /// The concatenated Authenticode-relevant bytes, for callers feeding a
    /// non-prehashing signer interface.
    pub fn authenticode_slice(&self) -> Box<[u8]> {
        let length: usize = self.authenticode_ranges().map(|chunk| chunk.len()).sum();
        let mut out = Vec::with_capacity(length);
        for chunk in self.authenticode_ranges() {
            out.extend_from_slice(chunk);
        }
        out.into()
    }
}
