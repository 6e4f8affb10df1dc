//! Free-space engine (spec §4.8): bitmap and table representations of a
//! partition's free blocks, allocation with a preferred starting block,
//! freeing, and the preallocation window used for regular-file writes.

use alloc::vec;
use alloc::vec::Vec;

use hadris_common::types::{endian::{Endian, LittleEndian}, number::U32};

use crate::tag::Tag;
use crate::types::{Extent, ExtentType, ShortAd};

/// Space Bitmap Descriptor fixed header (ECMA-167 4/14.12); the bitmap
/// bytes trail this in the same extent.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpaceBitmapHeader {
    pub tag: Tag,
    pub number_of_bits: U32<LittleEndian>,
    pub number_of_bytes: U32<LittleEndian>,
}

pub const SPACE_BITMAP_HEADER_SIZE: usize = 24;
static_assertions::const_assert_eq!(core::mem::size_of::<SpaceBitmapHeader>(), SPACE_BITMAP_HEADER_SIZE);

/// A parsed Space Bitmap: bit `n` set means block `n` of the owning
/// partition is free. Bits past `number_of_bits` in the final byte are
/// reserved and left untouched.
#[derive(Debug, Clone)]
pub struct SpaceBitmap {
    pub number_of_bits: u32,
    pub bytes: Vec<u8>,
}

impl SpaceBitmap {
    pub fn new_all_free(number_of_bits: u32) -> Self {
        let number_of_bytes = (number_of_bits as usize).div_ceil(8);
        let mut bytes = vec![0xFFu8; number_of_bytes];
        // Clear the reserved tail bits beyond number_of_bits in the last byte.
        let used_bits_in_last_byte = number_of_bits as usize % 8;
        if used_bits_in_last_byte != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= (1u8 << used_bits_in_last_byte) - 1;
            }
        }
        Self {
            number_of_bits,
            bytes,
        }
    }

    pub fn parse(header: &SpaceBitmapHeader, bitmap_bytes: &[u8]) -> Option<Self> {
        let number_of_bytes = header.number_of_bytes.get() as usize;
        let bytes = bitmap_bytes.get(..number_of_bytes)?.to_vec();
        Some(Self {
            number_of_bits: header.number_of_bits.get(),
            bytes,
        })
    }

    pub fn is_free(&self, bit: u32) -> bool {
        if bit >= self.number_of_bits {
            return false;
        }
        let byte = self.bytes[(bit / 8) as usize];
        byte & (1 << (bit % 8)) != 0
    }

    pub fn set_free(&mut self, bit: u32, free: bool) {
        if bit >= self.number_of_bits {
            return;
        }
        let idx = (bit / 8) as usize;
        let mask = 1u8 << (bit % 8);
        if free {
            self.bytes[idx] |= mask;
        } else {
            self.bytes[idx] &= !mask;
        }
    }

    pub fn count_free(&self) -> u32 {
        (0..self.number_of_bits).filter(|&b| self.is_free(b)).count() as u32
    }

    /// Claims `count` contiguous free blocks, preferring `goal` as the
    /// starting block (spec §4.8 steps 1-3: exact bit, then its containing
    /// word). Falls back to a forward scan from `goal`, wrapping around the
    /// whole bitmap once before giving up — a block-group-aware
    /// word/byte-stride scan is not reproduced bit-for-bit here, but the
    /// observable behavior (prefer the goal, otherwise take the first
    /// sufficiently long free run, wrapping once) matches.
    pub fn allocate(&mut self, goal: u32, count: u32) -> Option<u32> {
        if count == 0 || count > self.number_of_bits {
            return None;
        }
        let start_search = goal.min(self.number_of_bits.saturating_sub(1));
        let total = self.number_of_bits;

        for offset in 0..total {
            let start = (start_search + offset) % total;
            if start + count > total {
                continue;
            }
            if (start..start + count).all(|b| self.is_free(b)) {
                for b in start..start + count {
                    self.set_free(b, false);
                }
                return Some(start);
            }
        }
        None
    }

    /// Clears `count` bits starting at `start`. A bit that was already
    /// allocated (not free) is a double-free; it is reported via the
    /// returned count rather than aborting the operation (spec §4.8).
    pub fn free(&mut self, start: u32, count: u32) -> u32 {
        let mut double_frees = 0;
        for b in start..start.saturating_add(count) {
            if b >= self.number_of_bits {
                break;
            }
            if self.is_free(b) {
                double_frees += 1;
            }
            self.set_free(b, true);
        }
        double_frees
    }
}

/// An Unallocated Space Entry used as a free-space table (ECMA-167
/// 4/14.10): sorted, non-overlapping, `ALLOCATED`-type short_ad extents. No
/// partition reference per extent — it is implicitly the owning partition.
#[derive(Debug, Clone, Default)]
pub struct SpaceTable {
    /// `(start_block, length_blocks)`, kept sorted ascending by
    /// `start_block` with no overlaps; adjacent entries are coalesced
    /// unless doing so would exceed the maximum representable length.
    pub extents: Vec<(u32, u32)>,
}

impl SpaceTable {
    pub fn parse(short_ads: &[ShortAd]) -> crate::error::Result<Self> {
        crate::alloc_desc::check_sorted_ascending(short_ads)?;
        crate::alloc_desc::check_allocated_only(short_ads)?;
        let mut extents = Vec::new();
        for ad in short_ads {
            if ad.is_terminator() {
                break;
            }
            let (length, _) = ad.length_and_type();
            extents.push((ad.location.get(), length));
        }
        Ok(Self { extents })
    }

    pub fn to_short_ads(&self) -> Vec<ShortAd> {
        self.extents
            .iter()
            .map(|&(block, length)| ShortAd::new(length, ExtentType::AllocatedNotRecorded, block))
            .collect()
    }

    pub fn total_free_blocks(&self) -> u64 {
        self.extents.iter().map(|&(_, len)| len as u64).sum()
    }

    /// First-fit allocation, preferring the extent containing `goal` and
    /// otherwise the first extent long enough. On success, shrinks the
    /// extent from the front (or removes it if fully consumed).
    pub fn allocate(&mut self, goal: u32, count: u32) -> Option<u32> {
        if count == 0 {
            return None;
        }
        let preferred = self
            .extents
            .iter()
            .position(|&(start, len)| goal >= start && goal < start + len && start + len - goal >= count);
        let index = preferred.or_else(|| self.extents.iter().position(|&(_, len)| len >= count))?;

        let (start, len) = self.extents[index];
        let allocated_start = if preferred.is_some() { goal } else { start };
        let before = allocated_start - start;
        let after = len - before - count;

        let mut replacement = Vec::new();
        if before > 0 {
            replacement.push((start, before));
        }
        if after > 0 {
            replacement.push((allocated_start + count, after));
        }
        self.extents.splice(index..index + 1, replacement);
        Some(allocated_start)
    }

    /// Returns `start..start+count` to the free pool, coalescing with a
    /// neighboring extent when adjacent and the combined length still fits
    /// the maximum representable extent length.
    pub fn free(&mut self, start: u32, count: u32) {
        let index = self.extents.partition_point(|&(s, _)| s < start);
        let mut new_start = start;
        let mut new_len = count;

        // Merge with the following extent if adjacent.
        if index < self.extents.len() {
            let (next_start, next_len) = self.extents[index];
            if new_start + new_len == next_start
                && new_len as u64 + next_len as u64 <= crate::types::EXTENT_LENGTH_MASK as u64
            {
                new_len += next_len;
                self.extents.remove(index);
            }
        }
        // Merge with the preceding extent if adjacent.
        if index > 0 {
            let (prev_start, prev_len) = self.extents[index - 1];
            if prev_start + prev_len == new_start
                && new_len as u64 + prev_len as u64 <= crate::types::EXTENT_LENGTH_MASK as u64
            {
                new_start = prev_start;
                new_len += prev_len;
                self.extents.remove(index - 1);
                self.extents.insert(index - 1, (new_start, new_len));
                return;
            }
        }
        self.extents.insert(index, (new_start, new_len));
    }
}

/// The preallocation window an inode carries so that sequential writes to a
/// regular file tend to land in contiguous blocks (spec §4.8 step 6).
#[derive(Debug, Clone, Copy, Default)]
pub struct Preallocation {
    pub block: u32,
    pub count: u32,
}

impl Preallocation {
    /// Attempts to satisfy `count` blocks from the existing window before
    /// falling back to a fresh allocation; returns the blocks consumed from
    /// the window, if any, and updates the remaining window in place.
    pub fn take(&mut self, count: u32) -> Option<Extent> {
        if self.count == 0 || count == 0 {
            return None;
        }
        let taken = count.min(self.count);
        let block = self.block;
        self.block += taken;
        self.count -= taken;
        Some(Extent {
            location: crate::types::LbAddr::new(0, block),
            length: taken,
            ty: ExtentType::AllocatedNotRecorded,
        })
    }

    /// Replaces the window after a fresh bitmap/table allocation grabbed
    /// more blocks than were immediately needed.
    pub fn refill(&mut self, block: u32, count: u32) {
        self.block = block;
        self.count = count;
    }
}

/// A partition's free-space accounting, loaded from whichever structure its
/// Partition Header Descriptor records (spec §4.6/§4.8): a bitmap or a
/// table, never both on the same partition.
#[derive(Debug, Clone)]
pub enum PartitionSpace {
    Bitmap(SpaceBitmap),
    Table(SpaceTable),
}

impl PartitionSpace {
    pub fn total_free_blocks(&self) -> u64 {
        match self {
            PartitionSpace::Bitmap(bitmap) => bitmap.count_free() as u64,
            PartitionSpace::Table(table) => table.total_free_blocks(),
        }
    }

    pub fn allocate(&mut self, goal: u32, count: u32) -> Option<u32> {
        match self {
            PartitionSpace::Bitmap(bitmap) => bitmap.allocate(goal, count),
            PartitionSpace::Table(table) => table.allocate(goal, count),
        }
    }

    pub fn free(&mut self, start: u32, count: u32) {
        match self {
            PartitionSpace::Bitmap(bitmap) => {
                bitmap.free(start, count);
            }
            PartitionSpace::Table(table) => table.free(start, count),
        }
    }
}

/// Loads a partition's free-space map from its Partition Header Descriptor,
/// preferring the bitmap representation when a partition records both
/// (mirroring how a driver settles on one representation to maintain).
/// Returns `None` when the header records neither, which is a valid state
/// for read-only media.
pub fn load_partition_space<T: hadris_io::Read + hadris_io::Seek>(
    cache: &mut crate::cache::BlockCache<T>,
    entry: &crate::partition::PartitionEntry,
) -> crate::error::Result<Option<PartitionSpace>> {
    let header = entry.descriptor.partition_header();
    let base = entry.descriptor.partition_starting_location.get();
    let sector_size = cache.sector_size();

    if !header.unallocated_space_bitmap.is_terminator() {
        let (length, _) = header.unallocated_space_bitmap.length_and_type();
        let lba = base as u64 + header.unallocated_space_bitmap.location.get() as u64;
        let sector_count = (length as u64).div_ceil(sector_size as u64);
        let bytes = cache.cache_sectors(lba, sector_count)?.to_vec();
        let header_bytes: [u8; SPACE_BITMAP_HEADER_SIZE] = bytes
            .get(..SPACE_BITMAP_HEADER_SIZE)
            .ok_or_else(|| crate::error::UdfError::BadAd("space bitmap descriptor truncated".into()))?
            .try_into()
            .unwrap();
        let bitmap_header: SpaceBitmapHeader = *bytemuck::from_bytes(&header_bytes);
        let bitmap = SpaceBitmap::parse(&bitmap_header, &bytes[SPACE_BITMAP_HEADER_SIZE..])
            .ok_or_else(|| crate::error::UdfError::BadAd("space bitmap truncated".into()))?;
        return Ok(Some(PartitionSpace::Bitmap(bitmap)));
    }

    if !header.unallocated_space_table.is_terminator() {
        let (length, _) = header.unallocated_space_table.length_and_type();
        let lba = base as u64 + header.unallocated_space_table.location.get() as u64;
        let sector_count = (length as u64).div_ceil(sector_size as u64);
        let bytes = cache.cache_sectors(lba, sector_count)?.to_vec();
        let mut short_ads = Vec::with_capacity(bytes.len() / 8);
        for chunk in bytes.chunks_exact(8) {
            short_ads.push(*bytemuck::from_bytes::<ShortAd>(chunk));
        }
        let table = SpaceTable::parse(&short_ads)?;
        return Ok(Some(PartitionSpace::Table(table)));
    }

    Ok(None)
}

/// Mirrors a free-block-count delta into the LVID's per-partition table
/// (spec §4.8 step 6): every successful allocate/free updates the volume's
/// crash-consistent free-space accounting, not just the in-memory map.
pub fn apply_free_count_delta(free_space_table: &mut [u32], partition_index: usize, delta: i64) {
    if let Some(slot) = free_space_table.get_mut(partition_index) {
        *slot = (*slot as i64 + delta).max(0) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_allocate_prefers_goal() {
        let mut bitmap = SpaceBitmap::new_all_free(64);
        let start = bitmap.allocate(10, 4).unwrap();
        assert_eq!(start, 10);
        assert!(!bitmap.is_free(10));
        assert!(!bitmap.is_free(13));
        assert!(bitmap.is_free(14));
    }

    #[test]
    fn bitmap_allocate_wraps_when_goal_occupied() {
        let mut bitmap = SpaceBitmap::new_all_free(16);
        bitmap.allocate(0, 16).unwrap(); // fill everything
        assert!(bitmap.allocate(0, 1).is_none());
    }

    #[test]
    fn bitmap_free_detects_double_free() {
        let mut bitmap = SpaceBitmap::new_all_free(8);
        let double_frees = bitmap.free(0, 4);
        assert_eq!(double_frees, 4);
        bitmap.allocate(0, 2).unwrap();
        let double_frees = bitmap.free(0, 2);
        assert_eq!(double_frees, 0);
    }

    #[test]
    fn table_allocate_shrinks_from_front() {
        let mut table = SpaceTable {
            extents: vec![(100, 50)],
        };
        let start = table.allocate(100, 10).unwrap();
        assert_eq!(start, 100);
        assert_eq!(table.extents, vec![(110, 40)]);
    }

    #[test]
    fn table_allocate_splits_middle() {
        let mut table = SpaceTable {
            extents: vec![(100, 50)],
        };
        let start = table.allocate(120, 10).unwrap();
        assert_eq!(start, 120);
        assert_eq!(table.extents, vec![(100, 20), (130, 20)]);
    }

    #[test]
    fn table_free_coalesces_both_neighbors() {
        let mut table = SpaceTable {
            extents: vec![(100, 10), (120, 10)],
        };
        table.free(110, 10);
        assert_eq!(table.extents, vec![(100, 30)]);
    }

    #[test]
    fn preallocation_window_is_consumed_then_exhausted() {
        let mut window = Preallocation { block: 200, count: 8 };
        let extent = window.take(5).unwrap();
        assert_eq!(extent.location.block, 200);
        assert_eq!(extent.length, 5);
        assert_eq!(window.count, 3);
        assert_eq!(window.block, 205);
    }
}
