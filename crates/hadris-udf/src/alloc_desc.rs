//! Allocation-descriptor walking (spec §4.10): short/long/extended AD
//! lists, Allocation Extent Descriptor (AED) chain following, and the
//! write-side diagnostics for coalescing and sort order.

use alloc::vec::Vec;

use hadris_common::types::{endian::{Endian, LittleEndian}, number::U32};
use hadris_io::{Read, Seek};

use crate::cache::BlockCache;
use crate::error::{Result, UdfError};
use crate::partition::PartitionTable;
use crate::tag::{validate_tag, Tag, TagId, TagStatus, TAG_SIZE};
use crate::types::{
    Extent, ExtAd, ExtentType, LbAddr, LongAd, ShortAd, EXT_AD_SIZE, LONG_AD_SIZE, SHORT_AD_SIZE,
};

/// Which allocation-descriptor encoding an ICB's AD region uses, taken from
/// bits 0-2 of the ICB tag's flags field (ECMA-167 4/14.6.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdType {
    Short,
    Long,
    Extended,
    /// `ADNONE`: the AD region *is* the file's data, read inline.
    InIcb,
}

impl AdType {
    pub fn from_icb_flags(flags: u16) -> Self {
        match flags & 0b111 {
            0 => AdType::Short,
            1 => AdType::Long,
            2 => AdType::Extended,
            _ => AdType::InIcb,
        }
    }

    fn record_size(self) -> usize {
        match self {
            AdType::Short => SHORT_AD_SIZE,
            AdType::Long => LONG_AD_SIZE,
            AdType::Extended => EXT_AD_SIZE,
            AdType::InIcb => 0,
        }
    }
}

/// Allocation Extent Descriptor fixed header (ECMA-167 4/14.5).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AedHeader {
    pub tag: Tag,
    pub previous_allocation_extent_location: U32<LittleEndian>,
    pub length_of_allocation_descriptors: U32<LittleEndian>,
}

pub const AED_HEADER_SIZE: usize = 24;
static_assertions::const_assert_eq!(core::mem::size_of::<AedHeader>(), AED_HEADER_SIZE);

/// Walks an AD list of `ad_type`, starting with `initial_region` (the bytes
/// trailing the owning FE/EFE's header + `L_EA`), following any
/// `NEXT-ALLOC-EXTENT` redirection into AED blocks via `cache`/`partitions`.
///
/// `icb_partition_ref` supplies the implicit partition for short ADs, and is
/// also the partition an AED's own `NEXT-ALLOC-EXTENT` location is resolved
/// against for short/long ADs recorded within that same ICB.
pub fn walk<T: Read + Seek>(
    cache: &mut BlockCache<T>,
    partitions: &PartitionTable,
    udf_revision: u8,
    ad_type: AdType,
    icb_partition_ref: u16,
    initial_region: &[u8],
) -> Result<Vec<Extent>> {
    if matches!(ad_type, AdType::InIcb) {
        return Ok(Vec::new());
    }

    let mut extents = Vec::new();
    let mut region: Vec<u8> = initial_region.to_vec();
    let mut offset = 0usize;
    let record_size = ad_type.record_size();
    let mut aed_hops = 0u32;

    loop {
        if offset + record_size > region.len() {
            break;
        }
        let raw = &region[offset..offset + record_size];

        let (length, ty, location) = match ad_type {
            AdType::Short => {
                let ad: &ShortAd = bytemuck::from_bytes(raw);
                let (length, ty) = ad.length_and_type();
                (length, ty, LbAddr::new(icb_partition_ref, ad.location.get()))
            }
            AdType::Long => {
                let ad: &LongAd = bytemuck::from_bytes(raw);
                let (length, ty) = ad.length_and_type();
                let loc: LbAddr = ad.location.into();
                (length, ty, loc)
            }
            AdType::Extended => {
                let ad: &ExtAd = bytemuck::from_bytes(raw);
                let (length, ty) = ad.length_and_type();
                let loc: LbAddr = ad.location.into();
                (length, ty, loc)
            }
            AdType::InIcb => unreachable!(),
        };

        if length == 0 {
            break;
        }

        if matches!(ty, ExtentType::NextAllocExtent) {
            aed_hops += 1;
            if aed_hops > 1024 {
                return Err(UdfError::BadAd("allocation extent descriptor chain too long".into()));
            }
            let phys = partitions.translate(location)?;
            let sector_size = cache.sector_size() as usize;
            let sectors_needed = (AED_HEADER_SIZE + length as usize).div_ceil(sector_size) as u64;
            let bytes = cache.cache_sectors(phys as u64, sectors_needed.max(1))?.to_vec();

            let tag_bytes: [u8; TAG_SIZE] = bytes
                .get(..TAG_SIZE)
                .ok_or_else(|| UdfError::BadAd("truncated allocation extent descriptor".into()))?
                .try_into()
                .unwrap();
            let body = &bytes[TAG_SIZE..];
            let check = validate_tag(
                &tag_bytes,
                body,
                phys,
                Some(TagId::AllocationExtentDescriptor),
                0,
                body.len().min(0x3FFF) as u16,
                udf_revision,
                None,
            );
            if !matches!(check.status, TagStatus::Good) {
                return Err(UdfError::BadAd("allocation extent descriptor failed tag validation".into()));
            }
            let header: AedHeader = *bytemuck::from_bytes(&bytes[..AED_HEADER_SIZE]);
            let l_ad = header.length_of_allocation_descriptors.get() as usize;
            let new_region = bytes
                .get(AED_HEADER_SIZE..AED_HEADER_SIZE + l_ad)
                .ok_or_else(|| UdfError::BadAd("allocation extent descriptor L_AD overruns block".into()))?
                .to_vec();
            region = new_region;
            offset = 0;
            continue;
        }

        extents.push(Extent {
            location,
            length,
            ty,
        });
        offset += record_size;
    }

    Ok(extents)
}

/// ERR_SEQ_ALLOC (spec §4.10): adjacent same-partition extents that together
/// would still fit under the maximum representable length must be
/// coalesced on write. Returns the index of the first violation, if any.
/// `block_size` converts each extent's byte length into the block count its
/// successor's starting block is compared against.
pub fn find_uncoalesced(extents: &[Extent], block_size: u32) -> Option<usize> {
    for i in 0..extents.len().saturating_sub(1) {
        let a = &extents[i];
        let b = &extents[i + 1];
        if a.ty != ExtentType::Recorded || b.ty != ExtentType::Recorded {
            continue;
        }
        if a.location.partition_ref != b.location.partition_ref {
            continue;
        }
        let adjacent = a.location.block + a.length.div_ceil(block_size) == b.location.block;
        let combined = a.length as u64 + b.length as u64;
        if adjacent && combined <= crate::types::EXTENT_LENGTH_MASK as u64 {
            return Some(i);
        }
    }
    None
}

/// ERR_UNSORTED_EXTENTS (spec §4.10): a short-AD free-space table must be
/// strictly ascending by starting block.
pub fn check_sorted_ascending(extents: &[ShortAd]) -> Result<()> {
    let mut last: Option<u32> = None;
    for ad in extents {
        if ad.is_terminator() {
            break;
        }
        let loc = ad.location.get();
        if let Some(prev) = last {
            if loc <= prev {
                return Err(UdfError::UnsortedExtents);
            }
        }
        last = Some(loc);
    }
    Ok(())
}

/// Free-space tables may only contain `ALLOCATED`-type extents (spec
/// §4.10): not `RECORDED`, not `NOT_ALLOCATED`.
pub fn check_allocated_only(extents: &[ShortAd]) -> Result<()> {
    for ad in extents {
        if ad.is_terminator() {
            break;
        }
        let (_, ty) = ad.length_and_type();
        if ty != ExtentType::AllocatedNotRecorded {
            return Err(UdfError::ProhibitedExtentType);
        }
    }
    Ok(())
}

/// Serializes extents back into a short-AD region, one entry per extent,
/// zero-terminated. All extents must share `icb_partition_ref`.
pub fn write_short_ad_region(extents: &[Extent]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extents.len() * SHORT_AD_SIZE + SHORT_AD_SIZE);
    for extent in extents {
        let ad = ShortAd::new(extent.length, extent.ty, extent.location.block);
        out.extend_from_slice(bytemuck::bytes_of(&ad));
    }
    out.extend_from_slice(bytemuck::bytes_of(&ShortAd::new(0, ExtentType::Recorded, 0)));
    out
}

/// Serializes extents back into a long-AD region, one entry per extent,
/// zero-terminated.
pub fn write_long_ad_region(extents: &[Extent]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extents.len() * LONG_AD_SIZE + LONG_AD_SIZE);
    for extent in extents {
        let ad = LongAd::new(extent.length, extent.ty, extent.location);
        out.extend_from_slice(bytemuck::bytes_of(&ad));
    }
    out.extend_from_slice(bytemuck::bytes_of(&LongAd::new(
        0,
        ExtentType::Recorded,
        LbAddr::default(),
    )));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cache_over(sector_size: u32, sectors: usize) -> BlockCache<Cursor<Vec<u8>>> {
        BlockCache::new(Cursor::new(vec![0u8; sector_size as usize * sectors]), sector_size)
    }

    fn single_partition_table(length_blocks: u32) -> PartitionTable {
        use crate::descriptor::PartitionDescriptor;
        let descriptor = PartitionDescriptor {
            tag: bytemuck::Zeroable::zeroed(),
            vds_number: U32::new(0),
            partition_flags: hadris_common::types::number::U16::new(1),
            partition_number: hadris_common::types::number::U16::new(0),
            partition_contents: bytemuck::Zeroable::zeroed(),
            partition_contents_use: [0; 128],
            access_type: U32::new(3),
            partition_starting_location: U32::new(0),
            partition_length: U32::new(length_blocks),
            implementation_identifier: bytemuck::Zeroable::zeroed(),
            implementation_use: [0; 128],
            reserved: [0; 156],
        };
        PartitionTable {
            entries: alloc::vec![crate::partition::PartitionEntry {
                map: crate::partition::PartitionMap::Type1 {
                    volume_sequence_number: 0,
                    partition_number: 0,
                },
                descriptor,
                vat: None,
                sparing_table: None,
            }],
        }
    }

    #[test]
    fn walks_short_ad_list_to_terminator() {
        let mut cache = cache_over(2048, 4);
        let partitions = single_partition_table(1000);
        let mut region = Vec::new();
        region.extend_from_slice(bytemuck::bytes_of(&ShortAd::new(100, ExtentType::Recorded, 5)));
        region.extend_from_slice(bytemuck::bytes_of(&ShortAd::new(50, ExtentType::Recorded, 200)));
        region.extend_from_slice(bytemuck::bytes_of(&ShortAd::new(0, ExtentType::Recorded, 0)));

        let extents = walk(&mut cache, &partitions, 3, AdType::Short, 0, &region).unwrap();
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].location.block, 5);
        assert_eq!(extents[0].length, 100);
        assert_eq!(extents[1].location.block, 200);
    }

    #[test]
    fn unsorted_table_is_rejected() {
        let table = [
            ShortAd::new(10, ExtentType::AllocatedNotRecorded, 200),
            ShortAd::new(10, ExtentType::AllocatedNotRecorded, 100),
        ];
        assert!(check_sorted_ascending(&table).is_err());
    }

    #[test]
    fn recorded_extent_in_free_table_is_rejected() {
        let table = [ShortAd::new(10, ExtentType::Recorded, 100)];
        assert!(check_allocated_only(&table).is_err());
    }
}
