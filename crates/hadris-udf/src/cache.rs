//! Block I/O cache (spec §4.3).
//!
//! A fixed number of segments, each an arbitrary-length run of sectors read
//! in one shot. A request is a cache hit when an existing segment already
//! contains the requested range; otherwise the least-recently-filled segment
//! is evicted and refilled. This mirrors the buffer-head windowing the
//! original driver leans on, simplified to whole-segment granularity since
//! this crate addresses images and files rather than raw block devices.

use alloc::vec;
use alloc::vec::Vec;

use hadris_io::{Read, Seek, SeekFrom, Write};

/// Default number of cache segments (spec §4.3).
pub const DEFAULT_SEGMENTS: usize = 4;

/// Sector sizes this crate supports; any power of two in `[512, 65536]`
/// (spec §4.3).
pub fn is_valid_sector_size(size: u32) -> bool {
    size.is_power_of_two() && (512..=65536).contains(&size)
}

struct Segment {
    /// Starting sector, or `None` if never filled.
    start_sector: Option<u64>,
    sector_count: u64,
    data: Vec<u8>,
    /// Monotonically increasing fill counter, used to pick the
    /// least-recently-filled segment on eviction.
    stamp: u64,
}

/// A small round-robin/LRU cache of sector runs read from a seekable byte
/// source.
///
/// `cache_sectors` returns a borrow that is only valid until the next call:
/// callers must copy out any bytes they need before issuing further reads.
pub struct BlockCache<T> {
    inner: T,
    sector_size: u32,
    segments: Vec<Segment>,
    next_stamp: u64,
}

impl<T: Read + Seek> BlockCache<T> {
    pub fn new(inner: T, sector_size: u32) -> Self {
        Self::with_segments(inner, sector_size, DEFAULT_SEGMENTS)
    }

    pub fn with_segments(inner: T, sector_size: u32, segment_count: usize) -> Self {
        debug_assert!(is_valid_sector_size(sector_size));
        let segments = (0..segment_count.max(1))
            .map(|_| Segment {
                start_sector: None,
                sector_count: 0,
                data: Vec::new(),
                stamp: 0,
            })
            .collect();
        Self {
            inner,
            sector_size,
            segments,
            next_stamp: 0,
        }
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Returns the bytes for `count` sectors starting at `lba`, reading
    /// through to the backing source on a miss. The returned slice is only
    /// valid until the next call to `cache_sectors`.
    pub fn cache_sectors(&mut self, lba: u64, count: u64) -> hadris_io::Result<&[u8]> {
        if let Some(index) = self.find_containing(lba, count) {
            self.segments[index].stamp = self.bump_stamp();
            let seg = &self.segments[index];
            let start = seg.start_sector.unwrap();
            let offset = ((lba - start) * self.sector_size as u64) as usize;
            let length = (count * self.sector_size as u64) as usize;
            return Ok(&self.segments[index].data[offset..offset + length]);
        }

        let index = self.evict_index();
        let byte_offset = lba * self.sector_size as u64;
        let byte_len = (count * self.sector_size as u64) as usize;

        self.inner.seek(SeekFrom::Start(byte_offset))?;
        let mut buf = vec![0u8; byte_len];
        self.inner.read_exact(&mut buf)?;

        let stamp = self.bump_stamp();
        let seg = &mut self.segments[index];
        seg.start_sector = Some(lba);
        seg.sector_count = count;
        seg.data = buf;
        seg.stamp = stamp;

        Ok(&self.segments[index].data)
    }

    /// Invalidates every cached segment; used after a write invalidates the
    /// backing bytes underneath the cache.
    pub fn invalidate_all(&mut self) {
        for seg in &mut self.segments {
            seg.start_sector = None;
            seg.data.clear();
        }
    }

    fn find_containing(&self, lba: u64, count: u64) -> Option<usize> {
        self.segments.iter().position(|seg| match seg.start_sector {
            Some(start) => lba >= start && lba + count <= start + seg.sector_count,
            None => false,
        })
    }

    fn evict_index(&self) -> usize {
        // Prefer an empty segment; otherwise evict the least-recently-filled.
        if let Some(idx) = self.segments.iter().position(|s| s.start_sector.is_none()) {
            return idx;
        }
        self.segments
            .iter()
            .enumerate()
            .min_by_key(|(_, seg)| seg.stamp)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn bump_stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }
}

impl<T: Read + Write + Seek> BlockCache<T> {
    /// Writes `bytes` (a whole number of sectors) to the backing source
    /// starting at `lba` and invalidates any cached segment the write
    /// overlaps, so a later `cache_sectors` call re-reads the new content
    /// instead of serving stale data from the cache.
    pub fn write_sectors(&mut self, lba: u64, bytes: &[u8]) -> hadris_io::Result<()> {
        debug_assert_eq!(bytes.len() % self.sector_size as usize, 0);
        self.inner.seek(SeekFrom::Start(lba * self.sector_size as u64))?;
        self.inner.write_all(bytes)?;
        let count = bytes.len() as u64 / self.sector_size as u64;
        for seg in &mut self.segments {
            if let Some(start) = seg.start_sector {
                let overlaps = lba < start + seg.sector_count && start < lba + count;
                if overlaps {
                    seg.start_sector = None;
                    seg.data.clear();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_source(sector_size: usize, sectors: usize) -> Cursor<Vec<u8>> {
        let mut data = vec![0u8; sector_size * sectors];
        for (i, chunk) in data.chunks_mut(sector_size).enumerate() {
            chunk.fill(i as u8);
        }
        Cursor::new(data)
    }

    #[test]
    fn miss_then_hit() {
        let source = make_source(512, 16);
        let mut cache = BlockCache::with_segments(source, 512, 2);
        let bytes = cache.cache_sectors(0, 2).unwrap().to_vec();
        assert_eq!(&bytes[0..512], &[0u8; 512][..]);
        assert_eq!(&bytes[512..1024], &[1u8; 512][..]);

        // Second call for the same range should be a hit (no panic/error,
        // same content).
        let bytes_again = cache.cache_sectors(0, 2).unwrap().to_vec();
        assert_eq!(bytes, bytes_again);
    }

    #[test]
    fn eviction_round_robin_then_lru() {
        let source = make_source(512, 16);
        let mut cache = BlockCache::with_segments(source, 512, 2);
        cache.cache_sectors(0, 1).unwrap();
        cache.cache_sectors(4, 1).unwrap();
        // Touch segment for lba=0 again so it is not the LRU one.
        cache.cache_sectors(0, 1).unwrap();
        // This should evict the lba=4 segment, not lba=0.
        let data = cache.cache_sectors(8, 1).unwrap().to_vec();
        assert_eq!(data, vec![8u8; 512]);
        // lba=0 should still be a hit.
        let data = cache.cache_sectors(0, 1).unwrap().to_vec();
        assert_eq!(data, vec![0u8; 512]);
    }

    #[test]
    fn invalidate_forces_reread() {
        let source = make_source(512, 4);
        let mut cache = BlockCache::with_segments(source, 512, 1);
        cache.cache_sectors(0, 1).unwrap();
        cache.invalidate_all();
        let data = cache.cache_sectors(0, 1).unwrap().to_vec();
        assert_eq!(data, vec![0u8; 512]);
    }

    #[test]
    fn valid_sector_sizes() {
        assert!(is_valid_sector_size(512));
        assert!(is_valid_sector_size(2048));
        assert!(is_valid_sector_size(65536));
        assert!(!is_valid_sector_size(1000));
        assert!(!is_valid_sector_size(256));
        assert!(!is_valid_sector_size(131072));
    }
}
