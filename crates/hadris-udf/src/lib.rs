//! Hadris UDF
//!
//! An implementation of OSTA UDF (ECMA-167), the filesystem used on DVD,
//! Blu-ray, and many USB-flash images. This crate mounts a `Read + Seek`
//! byte source by walking the same structural chain a kernel driver does:
//! probe geometry, scan the Volume Recognition Sequence, find the Anchor
//! Volume Descriptor Pointer, resolve the Volume Descriptor Sequence, build
//! the logical partition table, and read down from the File Set
//! Descriptor's root directory ICB. With the `write` feature (on by
//! default) and a `Read + Write + Seek` source, it can also create, write,
//! unlink, and rename files, directories, symlinks, and device nodes.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod alloc_desc;
pub mod cache;
#[cfg(feature = "checker")]
pub mod checker;
pub mod codec;
pub mod descriptor;
pub mod dir;
pub mod error;
pub mod geometry;
pub mod icb;
pub mod inode;
pub mod options;
pub mod partition;
pub mod path;
pub mod recognition;
pub mod space;
pub mod tag;
pub mod time;
pub mod types;
pub mod vds;
#[cfg(feature = "write")]
pub mod write;

use alloc::vec::Vec;

use hadris_common::types::endian::Endian;
use hadris_io::{Read, Seek, SeekFrom};

use crate::cache::BlockCache;
use crate::descriptor::{
    AnchorVolumeDescriptorPointer, FileSetDescriptor, LogicalVolumeDescriptor,
    LogicalVolumeIntegrityDescriptor,
};
use crate::dir::FileIdentifierDescriptor;
use crate::error::{Result, UdfError};
use crate::geometry::{probe_candidates, probe_with_sector_size, Geometry};
use crate::inode::Inode;
use crate::options::MountOptions;
use crate::partition::{self, PartitionEntry, PartitionMap, PartitionTable, SparingTable};
use crate::path::PathComponent;
use crate::tag::{validate_tag, TagId, TagStatus, TAG_SIZE};
use crate::types::LbAddr;

/// Everything [`Volume::mount`] needs to know once a geometry candidate has
/// resolved successfully, before the backing source is handed over to a
/// [`BlockCache`].
struct MountMeta {
    sector_size: u32,
    udf_revision: u8,
    partitions: PartitionTable,
    fsd: FileSetDescriptor,
    lvid: LogicalVolumeIntegrityDescriptor,
    /// Block the current LVID was read from (the tail of its
    /// `next_integrity_extent` chain), so writes persist back to the same
    /// block instead of growing the chain.
    lvid_location: u32,
    serial_number: u16,
}

/// A mounted UDF volume: the resolved partition map, the File Set
/// Descriptor, and the root directory's inode, ready for path lookups.
pub struct Volume<T> {
    pub(crate) cache: BlockCache<T>,
    pub(crate) partitions: PartitionTable,
    pub(crate) udf_revision: u8,
    pub(crate) options: MountOptions,
    pub(crate) lvid: LogicalVolumeIntegrityDescriptor,
    /// Block the mounted LVID lives at; the write path rewrites this block
    /// in place after every free-space or unique-ID change rather than
    /// extending the integrity sequence.
    pub(crate) lvid_location: u32,
    /// Serial number every structural descriptor on this volume was tagged
    /// with at mount time; new descriptors this session reuse it so a
    /// concurrent reader (or `fsck`) sees one consistent serial across the
    /// whole medium (spec §4.1).
    pub(crate) serial_number: u16,
    /// Per-partition free-space accounting, loaded lazily on first write
    /// (spec §4.8); `None` until a write operation needs it.
    pub(crate) space: alloc::vec::Vec<Option<space::PartitionSpace>>,
    pub file_set: FileSetDescriptor,
    pub root: Inode,
}

fn read_bytes_at<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    lba: u32,
    len: usize,
) -> Result<Vec<u8>> {
    source.seek(SeekFrom::Start(lba as u64 * sector_size as u64))?;
    let mut buf = alloc::vec![0u8; len];
    source.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads and validates an Anchor Volume Descriptor Pointer at a caller-forced
/// location (`anchor=N` mount option), bypassing the usual candidate scan.
fn read_avdp_at<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    lba: u32,
    udf_revision: u8,
) -> Result<AnchorVolumeDescriptorPointer> {
    let bytes = read_bytes_at(source, sector_size, lba, sector_size as usize)?;
    let tag_bytes: [u8; TAG_SIZE] = bytes
        .get(..TAG_SIZE)
        .ok_or(UdfError::NoAnchor)?
        .try_into()
        .map_err(|_| UdfError::NoAnchor)?;
    let body = &bytes[TAG_SIZE..];
    let check = validate_tag(
        &tag_bytes,
        body,
        lba,
        Some(TagId::AnchorVolumeDescriptorPointer),
        0,
        body.len().min(0x3FFF) as u16,
        udf_revision,
        None,
    );
    if !matches!(check.status, TagStatus::Good) {
        return Err(UdfError::NoAnchor);
    }
    AnchorVolumeDescriptorPointer::parse(&bytes).ok_or(UdfError::NoAnchor)
}

/// Resolves a logical volume's partition-map table into a [`PartitionTable`],
/// matching each map entry against its Partition Descriptor and, for
/// Sparable maps, locating a usable sparing table among its mirror copies.
///
/// Virtual partitions are left with `vat: None`: locating the Virtual
/// Allocation Table requires reading a specific file out of the underlying
/// physical partition, which this crate does not yet implement (see
/// `DESIGN.md`). Addresses within a Virtual partition fail with
/// [`UdfError::NoVat`] until that file is supplied by a future revision.
fn build_partition_table<T: Read + Seek>(
    source: &mut T,
    sector_size: u32,
    volumes: &vds::VolumeDescriptors,
    logical_volume: &LogicalVolumeDescriptor,
) -> Result<PartitionTable> {
    let maps = partition::parse_partition_maps(&logical_volume.partition_maps)?;
    let mut entries = Vec::with_capacity(maps.len());

    for map in maps {
        let partition_number = map.partition_number();
        let descriptor = *volumes
            .partitions
            .iter()
            .find(|pd| pd.partition_number.get() == partition_number)
            .ok_or_else(|| {
                UdfError::InvalidOption(alloc::format!(
                    "no partition descriptor for partition number {partition_number}"
                ))
            })?;

        let sparing_table = match &map {
            PartitionMap::Sparable {
                sparing_table_locations,
                sparing_table_size,
                ..
            } => sparing_table_locations.iter().find_map(|&location| {
                if location == 0 {
                    return None;
                }
                let bytes = read_bytes_at(source, sector_size, location, *sparing_table_size as usize).ok()?;
                SparingTable::parse(&bytes).ok()
            }),
            _ => None,
        };

        entries.push(PartitionEntry {
            map,
            descriptor,
            vat: None,
            sparing_table,
        });
    }

    Ok(PartitionTable { entries })
}

impl<T: Read + Seek> Volume<T> {
    /// Mounts a UDF volume from `source` (spec §2, §4.5-§4.9's control
    /// flow). Tries every sector-size candidate `options` leaves open,
    /// keeping the first that yields a usable Volume Descriptor Sequence and
    /// File Set Descriptor.
    pub fn mount(mut source: T, options: MountOptions) -> Result<Self> {
        let candidates: Vec<Geometry> = match options.sector_size {
            Some(sector_size) => probe_with_sector_size(&mut source, sector_size)?
                .into_iter()
                .collect(),
            None => probe_candidates(&mut source)?,
        };
        if candidates.is_empty() {
            return Err(UdfError::NoAnchor);
        }

        let mut last_error = UdfError::NoAnchor;
        for geometry in candidates {
            match Self::try_mount(&mut source, geometry, &options) {
                Ok(meta) => return Self::finish_mount(source, meta, options),
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }

    fn try_mount(source: &mut T, geometry: Geometry, options: &MountOptions) -> Result<MountMeta> {
        let sector_size = geometry.sector_size;
        let last_sector = options
            .last_block
            .map(|b| b as u64)
            .unwrap_or(geometry.last_sector);

        let udf_revision = if options.skip_vrs {
            3
        } else {
            recognition::scan(source)?.nsr.udf_revision()
        };

        let avdp = match options.anchor {
            Some(lba) => read_avdp_at(source, sector_size, lba, udf_revision)?,
            None => vds::find_anchor(source, sector_size, last_sector, udf_revision)?,
        };

        let descriptors = vds::resolve(source, sector_size, &avdp, udf_revision)?;

        let logical_volume = descriptors
            .logical_volumes
            .get(options.volume as usize)
            .ok_or_else(|| UdfError::InvalidOption(alloc::format!("no logical volume #{}", options.volume)))?;

        let partitions = build_partition_table(source, sector_size, &descriptors, logical_volume)?;

        let lvid_ad = logical_volume.header.integrity_sequence_extent;
        let (lvid, lvid_location) =
            vds::read_lvid_chain(source, sector_size, lvid_ad.location.get(), udf_revision)?;

        let fsd_long_ad = logical_volume.header.file_set_descriptor_location();
        let mut fsd_phys = partitions.translate(fsd_long_ad.location.into())?;
        let mut fsd = vds::read_file_set_descriptor(source, sector_size, fsd_phys, udf_revision)?;
        for fileset_index in 0..options.fileset {
            let next = fsd.next_extent;
            if next.is_terminator() {
                return Err(UdfError::InvalidOption(alloc::format!(
                    "no file set descriptor #{}",
                    fileset_index + 1
                )));
            }
            fsd_phys = partitions.translate(next.location.into())?;
            fsd = vds::read_file_set_descriptor(source, sector_size, fsd_phys, udf_revision)?;
        }

        let serial_number = fsd.tag.serial_number.get();

        Ok(MountMeta {
            sector_size,
            udf_revision,
            partitions,
            fsd,
            lvid,
            lvid_location,
            serial_number,
        })
    }

    fn finish_mount(source: T, meta: MountMeta, options: MountOptions) -> Result<Self> {
        let mut cache = BlockCache::new(source, meta.sector_size);
        let root_addr = match options.root_dir {
            Some(block) => LbAddr::new(meta.fsd.root_directory_icb.location.partition_ref(), block),
            None => meta.fsd.root_directory_icb.location.into(),
        };
        let root = Inode::read(&mut cache, &meta.partitions, meta.udf_revision, root_addr)?;
        let space = alloc::vec![None; meta.partitions.entries.len()];

        Ok(Self {
            cache,
            partitions: meta.partitions,
            udf_revision: meta.udf_revision,
            options,
            lvid: meta.lvid,
            lvid_location: meta.lvid_location,
            serial_number: meta.serial_number,
            space,
            file_set: meta.fsd,
            root,
        })
    }

    /// Lists a directory's live entries in on-disk order, including deleted
    /// tombstones (callers wanting `undelete`/`unhide` filtering apply it
    /// themselves via [`FileIdentifierDescriptor::is_deleted`] and
    /// [`dir::FidCharacteristics::HIDDEN`]).
    pub fn read_dir(&mut self, inode: &Inode) -> Result<Vec<FileIdentifierDescriptor>> {
        let stream = match inode.extents(&mut self.cache, &self.partitions, self.udf_revision)? {
            Some(extents) => dir::read_directory_stream(&mut self.cache, &self.partitions, &extents)?,
            None => inode.entry.allocation_descriptors().to_vec(),
        };
        dir::parse_entries(&stream, self.udf_revision)
    }

    /// Reads a regular file's or symlink's full data stream, truncated to
    /// its recorded information length.
    pub fn read_file(&mut self, inode: &Inode) -> Result<Vec<u8>> {
        let mut data = match inode.extents(&mut self.cache, &self.partitions, self.udf_revision)? {
            Some(extents) => dir::read_directory_stream(&mut self.cache, &self.partitions, &extents)?,
            None => inode.entry.allocation_descriptors().to_vec(),
        };
        let len = inode.size() as usize;
        if data.len() > len {
            data.truncate(len);
        }
        Ok(data)
    }

    /// Decodes a symbolic link's target into its path components.
    pub fn read_link(&mut self, inode: &Inode) -> Result<Vec<PathComponent>> {
        let data = self.read_file(inode)?;
        path::parse_symlink_target(&data)
    }

    /// Resolves a `/`-separated path from the root directory, honoring the
    /// mount's `unhide`/`undelete` options at each component.
    pub fn resolve(&mut self, path: &str) -> Result<Inode> {
        let mut current = self.root.clone();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_directory() {
                return Err(UdfError::InvalidOption(alloc::format!(
                    "{component}: not a directory"
                )));
            }
            let entries = self.read_dir(&current)?;
            let found = entries
                .iter()
                .find(|fid| {
                    if fid.is_deleted() && !self.options.undelete {
                        return false;
                    }
                    if fid.characteristics.contains(dir::FidCharacteristics::HIDDEN) && !self.options.unhide {
                        return false;
                    }
                    matches!(fid.name(), Ok(Some(name)) if name == component)
                })
                .ok_or_else(|| UdfError::InvalidOption(alloc::format!("no such entry: {component}")))?;
            let icb_addr: LbAddr = found.icb.location.into();
            current = Inode::read(&mut self.cache, &self.partitions, self.udf_revision, icb_addr)?;
        }
        Ok(current)
    }

    /// Recorded free block count for partition `index`, from the Logical
    /// Volume Integrity Descriptor (spec §4.8).
    pub fn free_space_blocks(&self, index: usize) -> Option<u32> {
        self.lvid.free_space_table.get(index).copied()
    }

    pub fn udf_revision(&self) -> u8 {
        self.udf_revision
    }

    pub fn sector_size(&self) -> u32 {
        self.cache.sector_size()
    }
}

#[cfg(feature = "checker")]
impl<T: Read + Seek> Volume<T> {
    /// Walks the whole volume from the root directory, reporting every
    /// structural problem found rather than stopping at the first one
    /// (spec §4.13).
    pub fn check(&mut self) -> Result<checker::CheckReport> {
        let mut report = checker::CheckReport::new();
        let mut claims = checker::SpaceClaims::new();
        let mut link_counts = alloc::collections::BTreeMap::new();

        let root = self.root.clone();
        self.walk_for_check(root, alloc::string::String::from("/"), &mut report, &mut claims, &mut link_counts)?;

        for (index, entry) in self.partitions.entries.iter().enumerate() {
            if let Some(&recorded) = self.lvid.free_space_table.get(index) {
                let claimed = claims.total_claimed_blocks(index as u16);
                let length = entry.descriptor.partition_length.get();
                if let Some(mismatched) = checker::check_free_space_matches(recorded, length, claimed) {
                    log::warn!(
                        "partition {index}: recorded free-space table says {recorded} blocks free, traversal disagrees by {mismatched} blocks"
                    );
                    report.record(
                        error::ErrorDescriptor::new(error::ErrorCode::SpaceMapMismatch, 0, recorded as u64, mismatched),
                        alloc::format!("partition {index}: free-space table disagrees with traversal"),
                    );
                }
            }
        }

        let high_water_mark = self.lvid.header.unique_id_high_water_mark();
        if let Some(max_seen) = report.max_unique_id() {
            if max_seen >= high_water_mark {
                report.record(
                    error::ErrorDescriptor::new(
                        error::ErrorCode::UniqueIdHighWaterMark,
                        self.lvid_location,
                        high_water_mark,
                        max_seen,
                    ),
                    alloc::format!(
                        "LVID unique-id high-water mark {high_water_mark:#x} does not exceed the maximum id {max_seen:#x} observed during traversal"
                    ),
                );
            }
        }

        Ok(report)
    }

    fn walk_for_check(
        &mut self,
        inode: Inode,
        display_path: alloc::string::String,
        report: &mut checker::CheckReport,
        claims: &mut checker::SpaceClaims,
        link_counts: &mut alloc::collections::BTreeMap<(u16, u32), u16>,
    ) -> Result<()> {
        report.tally.tags_validated += 1;

        if report.observe_unique_id(inode.entry.unique_id()) {
            report.record(
                error::ErrorDescriptor::new(error::ErrorCode::UniqueIdCollision, inode.icb_address.block, 0, inode.entry.unique_id()),
                alloc::format!("{display_path}: unique id already used elsewhere"),
            );
        }

        let sector_size = self.cache.sector_size();
        match inode.extents(&mut self.cache, &self.partitions, self.udf_revision) {
            Ok(Some(extents)) => {
                for extent in &extents {
                    if let Some(owner) = claims.claim(extent, sector_size, display_path.clone()) {
                        let code = if inode.is_directory() {
                            error::ErrorCode::VolSpaceOverlap
                        } else {
                            error::ErrorCode::FileSpaceOverlap
                        };
                        report.record(
                            error::ErrorDescriptor::new(code, extent.location.block, 0, 0),
                            alloc::format!("{display_path}: overlaps space already claimed by {owner}"),
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                report.tally.tags_damaged += 1;
                report.record(
                    checker::finding_for(&err, inode.icb_address.block),
                    alloc::format!("{display_path}: failed to walk allocation descriptors: {err}"),
                );
                // Allocation descriptors are unreadable; nothing underneath
                // this ICB can be trusted either, so stop at this subtree
                // rather than propagate and abort the whole check.
                return Ok(());
            }
        }

        if inode.is_directory() {
            report.tally.directories_visited += 1;
            match self.read_dir(&inode) {
                Ok(entries) => {
                    for fid in &entries {
                        if fid.is_deleted() || fid.is_parent() {
                            continue;
                        }
                        let name = match fid.name() {
                            Ok(name) => name.unwrap_or_default(),
                            Err(err) => {
                                report.tally.tags_damaged += 1;
                                report.record(
                                    checker::finding_for(&err, inode.icb_address.block),
                                    alloc::format!("{display_path}: malformed file identifier name: {err}"),
                                );
                                continue;
                            }
                        };
                        let child_addr: LbAddr = fid.icb.location.into();
                        *link_counts.entry((child_addr.partition_ref, child_addr.block)).or_insert(0) += 1;
                        match Inode::read(&mut self.cache, &self.partitions, self.udf_revision, child_addr) {
                            Ok(child) => {
                                let child_path = alloc::format!("{display_path}{name}/");
                                self.walk_for_check(child, child_path, report, claims, link_counts)?;
                            }
                            Err(err) => {
                                report.tally.tags_damaged += 1;
                                report.record(
                                    checker::finding_for(&err, child_addr.block),
                                    alloc::format!("{display_path}{name}: failed to read ICB: {err}"),
                                );
                            }
                        }
                    }
                }
                Err(err) => {
                    report.tally.tags_damaged += 1;
                    report.record(
                        checker::finding_for(&err, inode.icb_address.block),
                        alloc::format!("{display_path}: failed to read directory stream: {err}"),
                    );
                }
            }
        } else {
            if inode.is_symlink() {
                report.tally.symlinks_visited += 1;
            } else {
                report.tally.files_visited += 1;
            }
            let key = (inode.icb_address.partition_ref, inode.icb_address.block);
            let counted = *link_counts.get(&key).unwrap_or(&1);
            if let Some((recorded, counted)) = checker::check_link_count(inode.link_count(), counted) {
                report.record(
                    error::ErrorDescriptor::new(error::ErrorCode::LinkCountMismatch, inode.icb_address.block, recorded as u64, counted as u64),
                    alloc::format!("{display_path}: link count mismatch"),
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_reports_no_anchor_on_empty_image() {
        let image = std::io::Cursor::new(alloc::vec![0u8; 2048 * 300]);
        let err = Volume::mount(image, MountOptions::default()).unwrap_err();
        assert!(matches!(err, UdfError::NoAnchor) || matches!(err, UdfError::NoNsr));
    }
}
