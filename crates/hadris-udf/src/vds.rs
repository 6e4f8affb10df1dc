//! Anchor discovery and Volume Descriptor Sequence resolution (spec §4.5,
//! §4.6).

use alloc::vec;
use alloc::vec::Vec;

use hadris_common::types::endian::Endian;
use hadris_io::{Read, Seek, SeekFrom};

use crate::descriptor::{
    AnchorVolumeDescriptorPointer, FileSetDescriptor, ImplementationUseVolumeDescriptor,
    LogicalVolumeDescriptor, LogicalVolumeIntegrityDescriptor, PartitionDescriptor,
    PrimaryVolumeDescriptor, UnallocatedSpaceDescriptorHeader,
};
use crate::error::{Result, UdfError};
use crate::tag::{validate_tag, TagId, TagStatus, TAG_SIZE};

fn read_sector<T: Read + Seek>(source: &mut T, sector_size: u32, lba: u64) -> Result<Vec<u8>> {
    source.seek(SeekFrom::Start(lba * sector_size as u64))?;
    let mut buf = vec![0u8; sector_size as usize];
    source.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads and validates the tag at the head of `sector_bytes`, returning
/// `None` if it is not a valid tag of `expected_id` located at `lba`.
fn checked_tag(
    sector_bytes: &[u8],
    lba: u32,
    expected_id: TagId,
    udf_revision: u8,
) -> Option<()> {
    let tag_bytes: [u8; TAG_SIZE] = sector_bytes.get(..TAG_SIZE)?.try_into().ok()?;
    let body = &sector_bytes[TAG_SIZE..];
    let check = validate_tag(
        &tag_bytes,
        body,
        lba,
        Some(expected_id),
        0,
        body.len().min(0x3FFF) as u16,
        udf_revision,
        None,
    );
    matches!(check.status, TagStatus::Good).then_some(())
}

/// Finds the Anchor Volume Descriptor Pointer, trying the candidate sectors
/// in spec §4.5 order: 256, `last - 256`, `last`, then 512 for
/// non-conformant media that used a fixed anchor location.
pub fn find_anchor<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    last_sector: u64,
    udf_revision: u8,
) -> Result<AnchorVolumeDescriptorPointer> {
    let candidates = [256u64, last_sector.saturating_sub(256), last_sector, 512];
    for &lba in &candidates {
        if lba > last_sector {
            continue;
        }
        let Ok(bytes) = read_sector(source, sector_size, lba) else {
            continue;
        };
        if checked_tag(&bytes, lba as u32, TagId::AnchorVolumeDescriptorPointer, udf_revision)
            .is_some()
        {
            if let Some(avdp) = AnchorVolumeDescriptorPointer::parse(&bytes) {
                return Ok(avdp);
            }
        }
    }
    Err(UdfError::NoAnchor)
}

/// A fully resolved Volume Descriptor Sequence: every structural descriptor
/// needed to locate the file set and its partitions.
pub struct VolumeDescriptors {
    pub primary: PrimaryVolumeDescriptor,
    pub partitions: Vec<PartitionDescriptor>,
    pub logical_volumes: Vec<LogicalVolumeDescriptor>,
    pub implementation_use: Option<ImplementationUseVolumeDescriptor>,
    pub unallocated_space: Option<(UnallocatedSpaceDescriptorHeader, Vec<u8>)>,
}

/// Walks one Volume Descriptor Sequence extent (main or reserve), collecting
/// every structural descriptor until a Terminating Descriptor or the extent
/// bound is reached. Returns `Err` (rather than a partial result) if no
/// Primary Volume Descriptor was found, since nothing else is usable
/// without it.
fn walk_sequence<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    start: u32,
    length: u32,
    udf_revision: u8,
) -> Result<VolumeDescriptors> {
    let sector_count = (length as u64).div_ceil(sector_size as u64);
    let mut primary = None;
    let mut partitions = Vec::new();
    let mut logical_volumes = Vec::new();
    let mut implementation_use = None;
    let mut unallocated_space = None;

    for i in 0..sector_count {
        let lba = start as u64 + i;
        let bytes = read_sector(source, sector_size, lba)?;
        let tag_bytes: [u8; TAG_SIZE] = match bytes.get(..TAG_SIZE) {
            Some(b) => b.try_into().unwrap(),
            None => break,
        };
        let id = match TagId::from_u16(u16::from_le_bytes([tag_bytes[0], tag_bytes[1]])) {
            Some(id) => id,
            None => continue,
        };
        let body = &bytes[TAG_SIZE..];
        let check = validate_tag(
            &tag_bytes,
            body,
            lba as u32,
            Some(id),
            0,
            body.len().min(0x3FFF) as u16,
            udf_revision,
            None,
        );
        if !matches!(check.status, TagStatus::Good) {
            continue;
        }

        match id {
            TagId::PrimaryVolumeDescriptor => {
                if let Some(pvd) = PrimaryVolumeDescriptor::parse(&bytes) {
                    primary = Some(pvd);
                }
            }
            TagId::PartitionDescriptor => {
                if let Some(pd) = PartitionDescriptor::parse(&bytes) {
                    partitions.push(pd);
                }
            }
            TagId::LogicalVolumeDescriptor => {
                if let Some(lvd) = LogicalVolumeDescriptor::parse(&bytes) {
                    logical_volumes.push(lvd);
                }
            }
            TagId::ImplementationUseVolumeDescriptor => {
                implementation_use = ImplementationUseVolumeDescriptor::parse(&bytes);
            }
            TagId::UnallocatedSpaceDescriptor => {
                if let Some(header) = UnallocatedSpaceDescriptorHeader::parse(&bytes) {
                    let header_len =
                        core::mem::size_of::<UnallocatedSpaceDescriptorHeader>();
                    let extents_len = header.number_of_alloc_descriptors.get() as usize * 8;
                    let extents = bytes
                        .get(header_len..header_len + extents_len)
                        .unwrap_or(&[])
                        .to_vec();
                    unallocated_space = Some((header, extents));
                }
            }
            TagId::TerminatingDescriptor => break,
            _ => {}
        }
    }

    let primary = primary.ok_or(UdfError::NoVds)?;
    Ok(VolumeDescriptors {
        primary,
        partitions,
        logical_volumes,
        implementation_use,
        unallocated_space,
    })
}

/// Resolves the Volume Descriptor Sequence, preferring the main sequence and
/// falling back to the reserve sequence if the main one yields no usable
/// Primary Volume Descriptor (spec §4.6).
pub fn resolve<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    avdp: &AnchorVolumeDescriptorPointer,
    udf_revision: u8,
) -> Result<VolumeDescriptors> {
    let main = walk_sequence(
        source,
        sector_size,
        avdp.main_vds_extent.location.get(),
        avdp.main_vds_extent.length.get(),
        udf_revision,
    );
    if main.is_ok() {
        return main;
    }
    if let Err(err) = &main {
        log::warn!(
            "main volume descriptor sequence at block {} failed ({}), falling back to reserve sequence",
            avdp.main_vds_extent.location.get(),
            err
        );
    }
    let reserve = walk_sequence(
        source,
        sector_size,
        avdp.reserve_vds_extent.location.get(),
        avdp.reserve_vds_extent.length.get(),
        udf_revision,
    );
    if reserve.is_err() {
        log::warn!(
            "reserve volume descriptor sequence at block {} also failed, no usable volume descriptor sequence",
            avdp.reserve_vds_extent.location.get()
        );
    }
    reserve.map_err(|_| UdfError::NoVds)
}

/// Reads and validates the File Set Descriptor at `location` (a block
/// within the partition addressed by the caller-supplied `to_lbn`
/// translation).
pub fn read_file_set_descriptor<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    lba: u32,
    udf_revision: u8,
) -> Result<FileSetDescriptor> {
    let bytes = read_sector(source, sector_size, lba as u64)?;
    checked_tag(&bytes, lba, TagId::FileSetDescriptor, udf_revision).ok_or(UdfError::NoFsd)?;
    FileSetDescriptor::parse(&bytes).ok_or(UdfError::NoFsd)
}

/// Reads and validates a Logical Volume Integrity Descriptor and follows its
/// `next_integrity_extent` chain to the last one, which holds the current
/// free-space/size tables (spec §4.8 depends on this). Returns the last
/// descriptor alongside the block it was read from, since the write path
/// persists updates (free-space deltas, unique-ID high-water mark) back to
/// that same block rather than growing the chain.
pub fn read_lvid_chain<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    mut lba: u32,
    udf_revision: u8,
) -> Result<(LogicalVolumeIntegrityDescriptor, u32)> {
    let mut last = None;
    loop {
        let bytes = read_sector(source, sector_size, lba as u64)?;
        checked_tag(
            &bytes,
            lba,
            TagId::LogicalVolumeIntegrityDescriptor,
            udf_revision,
        )
        .ok_or(UdfError::NoVds)?;
        let lvid = LogicalVolumeIntegrityDescriptor::parse(&bytes).ok_or(UdfError::NoVds)?;
        let next = lvid.header.next_integrity_extent;
        last = Some((lvid, lba));
        if next.is_empty() {
            break;
        }
        lba = next.location.get();
    }
    last.ok_or(UdfError::NoVds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_anchor_returns_not_found_on_empty_image() {
        let mut image = std::io::Cursor::new(vec![0u8; 2048 * 300]);
        let err = find_anchor(&mut image, 2048, 299, 3).unwrap_err();
        assert!(matches!(err, UdfError::NoAnchor));
    }
}
