//! Geometry probe (spec §4.4).
//!
//! Real block devices expose their sector size and last valid sector through
//! a packet-command transport (SCSI/MMC `READ CAPACITY`, `MODE SENSE`), which
//! is explicitly out of scope for this crate (spec Non-goals). What remains
//! in scope, and is implemented here, is probing a `Read + Seek` byte source
//! (a file or in-memory image) for the two things volume recognition and
//! anchor discovery need: the sector size candidates to try, and the address
//! of the last readable block.

use hadris_io::{Seek, SeekFrom};

/// Sector sizes tried in order when a caller has not pinned one down (spec
/// §4.4): 2048 (optical media) is tried first since it is by far the most
/// common UDF sector size, then 512 (hard disks), then 4096 (Advanced
/// Format).
pub const CANDIDATE_SECTOR_SIZES: [u32; 3] = [2048, 512, 4096];

/// The probed geometry of a medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub sector_size: u32,
    /// Address, in sectors, of the last complete sector in the medium.
    pub last_sector: u64,
}

/// Probes `source` for its total length and derives `last_sector` for a
/// given candidate `sector_size`. Returns `None` if the medium is smaller
/// than one sector.
pub fn probe_with_sector_size<T: Seek>(
    source: &mut T,
    sector_size: u32,
) -> hadris_io::Result<Option<Geometry>> {
    let len = source.seek(SeekFrom::End(0))?;
    let sector_size_u64 = sector_size as u64;
    if len < sector_size_u64 {
        return Ok(None);
    }
    let last_sector = len / sector_size_u64 - 1;
    Ok(Some(Geometry {
        sector_size,
        last_sector,
    }))
}

/// Probes `source`'s length once and returns a `Geometry` for every
/// candidate sector size large enough to fit the medium, largest-first
/// tie-break aside (`CANDIDATE_SECTOR_SIZES` order is preserved). Callers
/// then run volume recognition against each candidate until one succeeds
/// (spec §4.5 depends on §4.4 only for this list).
pub fn probe_candidates<T: Seek>(source: &mut T) -> hadris_io::Result<alloc::vec::Vec<Geometry>> {
    let len = source.seek(SeekFrom::End(0))?;
    let mut out = alloc::vec::Vec::with_capacity(CANDIDATE_SECTOR_SIZES.len());
    for &sector_size in &CANDIDATE_SECTOR_SIZES {
        let sector_size_u64 = sector_size as u64;
        if len >= sector_size_u64 {
            out.push(Geometry {
                sector_size,
                last_sector: len / sector_size_u64 - 1,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn probe_exact_multiple() {
        let mut source = Cursor::new(vec![0u8; 2048 * 10]);
        let geom = probe_with_sector_size(&mut source, 2048).unwrap().unwrap();
        assert_eq!(geom.sector_size, 2048);
        assert_eq!(geom.last_sector, 9);
    }

    #[test]
    fn probe_too_small_returns_none() {
        let mut source = Cursor::new(vec![0u8; 100]);
        assert!(probe_with_sector_size(&mut source, 2048).unwrap().is_none());
    }

    #[test]
    fn probe_candidates_filters_by_size() {
        let mut source = Cursor::new(vec![0u8; 512 * 3]);
        let candidates = probe_candidates(&mut source).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sector_size, 512);
    }

    #[test]
    fn probe_candidates_orders_2048_first() {
        let mut source = Cursor::new(vec![0u8; 4096 * 4]);
        let candidates = probe_candidates(&mut source).unwrap();
        assert_eq!(candidates[0].sector_size, 2048);
    }
}
