//! ICB engine (spec §4.9): reading File Entries and Extended File Entries,
//! following strategy-4096 Indirect Entries, and walking an ICB hierarchy to
//! its authoritative entry.

use alloc::vec;
use alloc::vec::Vec;

use hadris_common::types::{
    endian::{Endian, LittleEndian},
    number::{U16, U32, U64},
};
use hadris_io::{Read, Seek};

use crate::alloc_desc::{self, AdType};
use crate::cache::BlockCache;
use crate::descriptor::Regid;
use crate::error::{Result, UdfError};
use crate::partition::PartitionTable;
use crate::tag::{crc_itu_t, validate_tag, Tag, TagId, TagStatus, TAG_SIZE};
use crate::time::UdfTimestamp;
use crate::types::{Extent, ExtentType, LbAddr, LongAd, RawLbAddr};

/// File type byte (ECMA-167 4/14.6.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Unspecified,
    UnallocatedSpaceEntry,
    PartitionIntegrityEntry,
    IndirectEntry,
    Directory,
    Regular,
    Block,
    Char,
    Extended,
    Fifo,
    Socket,
    TerminalEntry,
    Symlink,
    StreamDirectory,
    VatUdf201,
    Other(u8),
}

impl FileType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => FileType::Unspecified,
            1 => FileType::UnallocatedSpaceEntry,
            2 => FileType::PartitionIntegrityEntry,
            3 => FileType::IndirectEntry,
            4 => FileType::Directory,
            5 => FileType::Regular,
            6 => FileType::Block,
            7 => FileType::Char,
            8 => FileType::Extended,
            9 => FileType::Fifo,
            10 => FileType::Socket,
            11 => FileType::TerminalEntry,
            12 => FileType::Symlink,
            13 => FileType::StreamDirectory,
            248 => FileType::VatUdf201,
            other => FileType::Other(other),
        }
    }
}

/// `icbtag` (ECMA-167 4/14.6).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IcbTag {
    pub prior_recorded_number_of_direct_entries: U32<LittleEndian>,
    pub strategy_type: U16<LittleEndian>,
    pub strategy_parameter: [u8; 2],
    pub max_number_of_entries: U16<LittleEndian>,
    pub reserved: u8,
    pub file_type: u8,
    pub parent_icb: RawLbAddr,
    pub flags: U16<LittleEndian>,
}

pub const ICB_TAG_SIZE: usize = 20;
static_assertions::const_assert_eq!(core::mem::size_of::<IcbTag>(), ICB_TAG_SIZE);

/// Only these two strategy types are accepted on read (spec §4.9); any other
/// value is rejected rather than guessed at.
pub const STRATEGY_TYPE_DIRECT: u16 = 4;
pub const STRATEGY_TYPE_INDIRECT: u16 = 4096;

impl IcbTag {
    pub fn file_type(&self) -> FileType {
        FileType::from_byte(self.file_type)
    }

    pub fn ad_type(&self) -> AdType {
        AdType::from_icb_flags(self.flags.get())
    }

    pub fn directory_sorted(&self) -> bool {
        self.flags.get() & (1 << 3) != 0
    }

    pub fn setuid(&self) -> bool {
        self.flags.get() & (1 << 6) != 0
    }

    pub fn setgid(&self) -> bool {
        self.flags.get() & (1 << 7) != 0
    }

    pub fn sticky(&self) -> bool {
        self.flags.get() & (1 << 8) != 0
    }

    pub fn contiguous(&self) -> bool {
        self.flags.get() & (1 << 9) != 0
    }

    pub fn stream(&self) -> bool {
        self.flags.get() & (1 << 13) != 0
    }
}

/// File Entry fixed header (ECMA-167 4/14.9).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FileEntryHeader {
    pub tag: Tag,
    pub icb_tag: IcbTag,
    pub uid: U32<LittleEndian>,
    pub gid: U32<LittleEndian>,
    pub permissions: U32<LittleEndian>,
    pub file_link_count: U16<LittleEndian>,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: U32<LittleEndian>,
    pub information_length: U64<LittleEndian>,
    pub logical_blocks_recorded: U64<LittleEndian>,
    pub access_time: UdfTimestamp,
    pub modification_time: UdfTimestamp,
    pub attribute_time: UdfTimestamp,
    pub checkpoint: U32<LittleEndian>,
    pub extended_attribute_icb: LongAd,
    pub implementation_identifier: Regid,
    pub unique_id: U64<LittleEndian>,
    pub length_of_extended_attributes: U32<LittleEndian>,
    pub length_of_allocation_descriptors: U32<LittleEndian>,
}

pub const FILE_ENTRY_HEADER_SIZE: usize = 176;
static_assertions::const_assert_eq!(core::mem::size_of::<FileEntryHeader>(), FILE_ENTRY_HEADER_SIZE);

/// Extended File Entry fixed header (ECMA-167 4/14.17): a superset of the
/// File Entry header adding object size, creation time, a reserved field,
/// and a stream-directory ICB.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ExtendedFileEntryHeader {
    pub tag: Tag,
    pub icb_tag: IcbTag,
    pub uid: U32<LittleEndian>,
    pub gid: U32<LittleEndian>,
    pub permissions: U32<LittleEndian>,
    pub file_link_count: U16<LittleEndian>,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: U32<LittleEndian>,
    pub information_length: U64<LittleEndian>,
    pub object_size: U64<LittleEndian>,
    pub logical_blocks_recorded: U64<LittleEndian>,
    pub access_time: UdfTimestamp,
    pub modification_time: UdfTimestamp,
    pub creation_time: UdfTimestamp,
    pub attribute_time: UdfTimestamp,
    pub checkpoint: U32<LittleEndian>,
    pub reserved: U32<LittleEndian>,
    pub extended_attribute_icb: LongAd,
    pub stream_directory_icb: LongAd,
    pub implementation_identifier: Regid,
    pub unique_id: U64<LittleEndian>,
    pub length_of_extended_attributes: U32<LittleEndian>,
    pub length_of_allocation_descriptors: U32<LittleEndian>,
}

pub const EXTENDED_FILE_ENTRY_HEADER_SIZE: usize = 216;
static_assertions::const_assert_eq!(
    core::mem::size_of::<ExtendedFileEntryHeader>(),
    EXTENDED_FILE_ENTRY_HEADER_SIZE
);

/// An Indirect Entry (ECMA-167 4/14.7): redirects to the real entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IndirectEntry {
    pub tag: Tag,
    pub indirect_icb: LongAd,
}

static_assertions::const_assert_eq!(core::mem::size_of::<IndirectEntry>(), 32);

/// A parsed File Entry or Extended File Entry, with its variable-length
/// extended-attribute and allocation-descriptor regions sliced out.
#[derive(Debug, Clone)]
pub enum Entry {
    File {
        header: FileEntryHeader,
        extended_attributes: Vec<u8>,
        allocation_descriptors: Vec<u8>,
    },
    ExtendedFile {
        header: ExtendedFileEntryHeader,
        extended_attributes: Vec<u8>,
        allocation_descriptors: Vec<u8>,
    },
}

impl Entry {
    pub fn icb_tag(&self) -> &IcbTag {
        match self {
            Entry::File { header, .. } => &header.icb_tag,
            Entry::ExtendedFile { header, .. } => &header.icb_tag,
        }
    }

    pub fn information_length(&self) -> u64 {
        match self {
            Entry::File { header, .. } => header.information_length.get(),
            Entry::ExtendedFile { header, .. } => header.information_length.get(),
        }
    }

    pub fn file_link_count(&self) -> u16 {
        match self {
            Entry::File { header, .. } => header.file_link_count.get(),
            Entry::ExtendedFile { header, .. } => header.file_link_count.get(),
        }
    }

    pub fn unique_id(&self) -> u64 {
        match self {
            Entry::File { header, .. } => header.unique_id.get(),
            Entry::ExtendedFile { header, .. } => header.unique_id.get(),
        }
    }

    pub fn uid(&self) -> u32 {
        match self {
            Entry::File { header, .. } => header.uid.get(),
            Entry::ExtendedFile { header, .. } => header.uid.get(),
        }
    }

    pub fn gid(&self) -> u32 {
        match self {
            Entry::File { header, .. } => header.gid.get(),
            Entry::ExtendedFile { header, .. } => header.gid.get(),
        }
    }

    pub fn permissions(&self) -> u32 {
        match self {
            Entry::File { header, .. } => header.permissions.get(),
            Entry::ExtendedFile { header, .. } => header.permissions.get(),
        }
    }

    pub fn allocation_descriptors(&self) -> &[u8] {
        match self {
            Entry::File {
                allocation_descriptors,
                ..
            }
            | Entry::ExtendedFile {
                allocation_descriptors,
                ..
            } => allocation_descriptors,
        }
    }

    pub fn extended_attributes(&self) -> &[u8] {
        match self {
            Entry::File {
                extended_attributes,
                ..
            }
            | Entry::ExtendedFile {
                extended_attributes,
                ..
            } => extended_attributes,
        }
    }

    /// Resolves this entry's extents, or `None` if it uses in-ICB inline
    /// data (the caller should read `allocation_descriptors()` directly in
    /// that case).
    pub fn extents<T: Read + Seek>(
        &self,
        cache: &mut BlockCache<T>,
        partitions: &PartitionTable,
        udf_revision: u8,
        icb_partition_ref: u16,
    ) -> Result<Option<Vec<Extent>>> {
        let ad_type = self.icb_tag().ad_type();
        if matches!(ad_type, AdType::InIcb) {
            return Ok(None);
        }
        let extents = alloc_desc::walk(
            cache,
            partitions,
            udf_revision,
            ad_type,
            icb_partition_ref,
            self.allocation_descriptors(),
        )?;
        Ok(Some(extents))
    }
}

/// Rejects any strategy type other than 4 (direct) or 4096 (the Indirect
/// Entry redirection [`read_icb`] already followed to reach this point).
fn check_strategy_type(icb_tag: &IcbTag) -> Result<()> {
    match icb_tag.strategy_type.get() {
        STRATEGY_TYPE_DIRECT | STRATEGY_TYPE_INDIRECT => Ok(()),
        other => Err(UdfError::BadAd(alloc::format!(
            "unsupported ICB strategy type {other}"
        ))),
    }
}

fn checked_tag_at(
    bytes: &[u8],
    phys: u32,
    expected_id: TagId,
    crc_max_hint: usize,
    udf_revision: u8,
) -> Result<()> {
    let tag_bytes: [u8; TAG_SIZE] = bytes
        .get(..TAG_SIZE)
        .ok_or_else(|| UdfError::BadAd("truncated ICB block".into()))?
        .try_into()
        .unwrap();
    let body = &bytes[TAG_SIZE..];
    let crc_max = body.len().min(crc_max_hint).min(0x3FFF) as u16;
    let check = validate_tag(
        &tag_bytes,
        body,
        phys,
        Some(expected_id),
        0,
        crc_max,
        udf_revision,
        None,
    );
    match check.status {
        TagStatus::Good => Ok(()),
        _ => Err(UdfError::BadAd(alloc::format!(
            "ICB block at sector {phys} failed tag validation"
        ))),
    }
}

/// Reads and parses a single File Entry or Extended File Entry at `addr`,
/// without following strategy-4096 indirection (see [`read_icb`] for that).
fn read_entry_at<T: Read + Seek>(
    cache: &mut BlockCache<T>,
    partitions: &PartitionTable,
    udf_revision: u8,
    addr: LbAddr,
) -> Result<(TagId, Vec<u8>, u32)> {
    let phys = partitions.translate(addr)?;
    let sector_size = cache.sector_size() as usize;
    // One sector is enough to read the tag and decide what it is; the
    // caller re-reads with the right length once L_EA/L_AD are known.
    let first = cache.cache_sectors(phys as u64, 1)?.to_vec();
    let tag_bytes: [u8; TAG_SIZE] = first
        .get(..TAG_SIZE)
        .ok_or_else(|| UdfError::BadAd("truncated ICB block".into()))?
        .try_into()
        .unwrap();
    let id = TagId::from_u16(u16::from_le_bytes([tag_bytes[0], tag_bytes[1]]))
        .ok_or_else(|| UdfError::BadAd("unrecognised ICB tag id".into()))?;
    let _ = sector_size;
    Ok((id, first, phys))
}

/// Reads the ICB at `addr`, following a single level of strategy-4096
/// Indirect Entry redirection if encountered, and returns the authoritative
/// File Entry or Extended File Entry.
pub fn read_icb<T: Read + Seek>(
    cache: &mut BlockCache<T>,
    partitions: &PartitionTable,
    udf_revision: u8,
    mut addr: LbAddr,
) -> Result<Entry> {
    let mut hops = 0;
    loop {
        hops += 1;
        if hops > 16 {
            return Err(UdfError::BadAd("ICB indirect-entry chain too long".into()));
        }

        let (id, first_sector, phys) = read_entry_at(cache, partitions, udf_revision, addr)?;
        match id {
            TagId::IndirectEntry => {
                checked_tag_at(&first_sector, phys, TagId::IndirectEntry, 32 - TAG_SIZE, udf_revision)?;
                let entry: &IndirectEntry = bytemuck::from_bytes(&first_sector[..32]);
                addr = entry.indirect_icb.location.into();
                continue;
            }
            TagId::TerminalEntry => {
                return Err(UdfError::BadAd("ICB hierarchy ended at a terminal entry".into()));
            }
            TagId::FileEntry => {
                let sector_size = cache.sector_size() as usize;
                let header_bytes = first_sector
                    .get(..FILE_ENTRY_HEADER_SIZE)
                    .ok_or_else(|| UdfError::BadAd("truncated file entry".into()))?;
                let header: FileEntryHeader = *bytemuck::from_bytes(header_bytes);
                let l_ea = header.length_of_extended_attributes.get() as usize;
                let l_ad = header.length_of_allocation_descriptors.get() as usize;
                let total = FILE_ENTRY_HEADER_SIZE + l_ea + l_ad;
                let sectors_needed = total.div_ceil(sector_size).max(1) as u64;
                let bytes = cache.cache_sectors(phys as u64, sectors_needed)?;
                checked_tag_at(bytes, phys, TagId::FileEntry, total - TAG_SIZE, udf_revision)?;
                let ea_start = FILE_ENTRY_HEADER_SIZE;
                let ad_start = ea_start + l_ea;
                let extended_attributes = bytes
                    .get(ea_start..ad_start)
                    .ok_or_else(|| UdfError::BadAd("file entry L_EA overruns block".into()))?
                    .to_vec();
                let allocation_descriptors = bytes
                    .get(ad_start..ad_start + l_ad)
                    .ok_or_else(|| UdfError::BadAd("file entry L_AD overruns block".into()))?
                    .to_vec();
                check_strategy_type(&header.icb_tag)?;
                return Ok(Entry::File {
                    header,
                    extended_attributes,
                    allocation_descriptors,
                });
            }
            TagId::ExtendedFileEntry => {
                let sector_size = cache.sector_size() as usize;
                let header_bytes = first_sector
                    .get(..EXTENDED_FILE_ENTRY_HEADER_SIZE)
                    .ok_or_else(|| UdfError::BadAd("truncated extended file entry".into()))?;
                let header: ExtendedFileEntryHeader = *bytemuck::from_bytes(header_bytes);
                let l_ea = header.length_of_extended_attributes.get() as usize;
                let l_ad = header.length_of_allocation_descriptors.get() as usize;
                let total = EXTENDED_FILE_ENTRY_HEADER_SIZE + l_ea + l_ad;
                let sectors_needed = total.div_ceil(sector_size).max(1) as u64;
                let bytes = cache.cache_sectors(phys as u64, sectors_needed)?;
                checked_tag_at(bytes, phys, TagId::ExtendedFileEntry, total - TAG_SIZE, udf_revision)?;
                let ea_start = EXTENDED_FILE_ENTRY_HEADER_SIZE;
                let ad_start = ea_start + l_ea;
                let extended_attributes = bytes
                    .get(ea_start..ad_start)
                    .ok_or_else(|| UdfError::BadAd("extended file entry L_EA overruns block".into()))?
                    .to_vec();
                let allocation_descriptors = bytes
                    .get(ad_start..ad_start + l_ad)
                    .ok_or_else(|| UdfError::BadAd("extended file entry L_AD overruns block".into()))?
                    .to_vec();
                check_strategy_type(&header.icb_tag)?;
                return Ok(Entry::ExtendedFile {
                    header,
                    extended_attributes,
                    allocation_descriptors,
                });
            }
            other => {
                return Err(UdfError::BadAd(alloc::format!(
                    "unexpected tag id {other:?} where a File Entry was expected"
                )));
            }
        }
    }
}

/// Maps a [`FileType`] back onto its ECMA-167 4/14.6.6 byte.
fn file_type_byte(file_type: FileType) -> u8 {
    match file_type {
        FileType::Unspecified => 0,
        FileType::UnallocatedSpaceEntry => 1,
        FileType::PartitionIntegrityEntry => 2,
        FileType::IndirectEntry => 3,
        FileType::Directory => 4,
        FileType::Regular => 5,
        FileType::Block => 6,
        FileType::Char => 7,
        FileType::Extended => 8,
        FileType::Fifo => 9,
        FileType::Socket => 10,
        FileType::TerminalEntry => 11,
        FileType::Symlink => 12,
        FileType::StreamDirectory => 13,
        FileType::VatUdf201 => 248,
        FileType::Other(b) => b,
    }
}

/// Everything needed to serialize a freshly created File Entry (spec §4.9).
/// Used by the write path when creating a file, directory, symbolic link,
/// or device node.
pub struct FileEntryParams {
    pub file_type: FileType,
    pub permissions: u32,
    pub uid: u32,
    pub gid: u32,
    pub file_link_count: u16,
    pub unique_id: u64,
    pub information_length: u64,
    pub logical_blocks_recorded: u64,
    pub access_time: UdfTimestamp,
    pub modification_time: UdfTimestamp,
    pub attribute_time: UdfTimestamp,
    pub parent_icb: LbAddr,
    pub directory_sorted: bool,
    pub setuid: bool,
    pub setgid: bool,
    pub sticky: bool,
    pub ad_type: AdType,
    pub serial_number: u16,
    pub udf_revision: u8,
    pub tag_location: u32,
    pub extended_attributes: Vec<u8>,
    /// The allocation-descriptor region when `ad_type` is `Short`/`Long`,
    /// or the object's raw inline data when `ad_type` is `InIcb`.
    pub ad_region: Vec<u8>,
}

/// Serializes a File Entry (ECMA-167 4/14.9) for a freshly created object.
/// Always a plain File Entry: this crate's write path has no use for the
/// creation-time/object-size/stream-directory fields an Extended File
/// Entry adds.
pub fn build_file_entry(params: &FileEntryParams) -> Vec<u8> {
    let l_ea = params.extended_attributes.len() as u32;
    let l_ad = params.ad_region.len() as u32;

    let ad_type_bits: u16 = match params.ad_type {
        AdType::Short => 0,
        AdType::Long => 1,
        AdType::Extended => 2,
        AdType::InIcb => 3,
    };
    let mut flags = ad_type_bits | if params.directory_sorted { 1 << 3 } else { 0 };
    if params.setuid {
        flags |= 1 << 6;
    }
    if params.setgid {
        flags |= 1 << 7;
    }
    if params.sticky {
        flags |= 1 << 8;
    }

    let icb_tag = IcbTag {
        prior_recorded_number_of_direct_entries: U32::new(0),
        strategy_type: U16::new(STRATEGY_TYPE_DIRECT),
        strategy_parameter: [0; 2],
        max_number_of_entries: U16::new(1),
        reserved: 0,
        file_type: file_type_byte(params.file_type),
        parent_icb: params.parent_icb.into(),
        flags: U16::new(flags),
    };

    let header = FileEntryHeader {
        tag: bytemuck::Zeroable::zeroed(),
        icb_tag,
        uid: U32::new(params.uid),
        gid: U32::new(params.gid),
        permissions: U32::new(params.permissions),
        file_link_count: U16::new(params.file_link_count),
        record_format: 0,
        record_display_attributes: 0,
        record_length: U32::new(0),
        information_length: U64::new(params.information_length),
        logical_blocks_recorded: U64::new(params.logical_blocks_recorded),
        access_time: params.access_time,
        modification_time: params.modification_time,
        attribute_time: params.attribute_time,
        checkpoint: U32::new(1),
        extended_attribute_icb: LongAd::new(0, ExtentType::Recorded, LbAddr::default()),
        implementation_identifier: Regid::new("*hadris-udf"),
        unique_id: U64::new(params.unique_id),
        length_of_extended_attributes: U32::new(l_ea),
        length_of_allocation_descriptors: U32::new(l_ad),
    };

    let mut body = Vec::with_capacity(FILE_ENTRY_HEADER_SIZE - TAG_SIZE + l_ea as usize + l_ad as usize);
    body.extend_from_slice(&bytemuck::bytes_of(&header)[TAG_SIZE..]);
    body.extend_from_slice(&params.extended_attributes);
    body.extend_from_slice(&params.ad_region);

    let crc_len = body.len().min(0x3FFF);
    let crc = crc_itu_t(&body[..crc_len]);
    let mut tag = Tag {
        id: U16::new(TagId::FileEntry as u16),
        descriptor_version: U16::new(params.udf_revision as u16),
        checksum: 0,
        reserved: 0,
        serial_number: U16::new(params.serial_number),
        descriptor_crc: U16::new(crc),
        descriptor_crc_length: U16::new(crc_len as u16),
        tag_location: U32::new(params.tag_location),
    };
    let mut tag_bytes: [u8; TAG_SIZE] = bytemuck::bytes_of(&tag).try_into().unwrap();
    tag_bytes[4] = Tag::compute_checksum(&tag_bytes);
    tag = Tag::from_bytes(&tag_bytes);

    let mut out = Vec::with_capacity(TAG_SIZE + body.len());
    out.extend_from_slice(bytemuck::bytes_of(&tag));
    out.extend_from_slice(&body);
    out
}

/// Builds the lone Extended Attribute this write path ever emits: a Device
/// Specification (ECMA-167 4/14.10.7, attribute type 12) carrying a device
/// node's major/minor pair, preceded by its 24-byte Extended Attribute
/// Header Descriptor space. The header's implementation/application
/// attribute location fields are left zeroed since this crate's own reader
/// ([`crate::inode::find_device_specification`]) does not consult them.
pub fn build_device_specification_ea(major: u32, minor: u32) -> Vec<u8> {
    let mut out = vec![0u8; 24];
    out.extend_from_slice(&12u32.to_le_bytes());
    out.push(1);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&24u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&major.to_le_bytes());
    out.extend_from_slice(&minor.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::descriptor::PartitionDescriptor;
    use crate::tag::Tag;
    use hadris_common::types::number::U16 as CU16;

    fn partition_table(sector_size: u32, sectors: usize) -> PartitionTable {
        let descriptor = PartitionDescriptor {
            tag: bytemuck::Zeroable::zeroed(),
            vds_number: U32::new(0),
            partition_flags: CU16::new(1),
            partition_number: CU16::new(0),
            partition_contents: bytemuck::Zeroable::zeroed(),
            partition_contents_use: [0; 128],
            access_type: U32::new(3),
            partition_starting_location: U32::new(0),
            partition_length: U32::new(sectors as u32),
            implementation_identifier: bytemuck::Zeroable::zeroed(),
            implementation_use: [0; 128],
            reserved: [0; 156],
        };
        let _ = sector_size;
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

    fn write_tag(buf: &mut [u8], id: TagId, location: u32, body_len: usize) {
        let body = &buf[TAG_SIZE..TAG_SIZE + body_len];
        let crc = crate::tag::crc_itu_t(body);
        let mut tag = Tag {
            id: CU16::new(id as u16),
            descriptor_version: CU16::new(3),
            checksum: 0,
            reserved: 0,
            serial_number: CU16::new(1),
            descriptor_crc: CU16::new(crc),
            descriptor_crc_length: CU16::new(body_len as u16),
            tag_location: U32::new(location),
        };
        let bytes = bytemuck::bytes_of(&tag).to_vec();
        let mut tmp: [u8; TAG_SIZE] = bytes.try_into().unwrap();
        tmp[4] = Tag::compute_checksum(&tmp);
        tag = Tag::from_bytes(&tmp);
        buf[..TAG_SIZE].copy_from_slice(bytemuck::bytes_of(&tag));
    }

    #[test]
    fn reads_file_entry_with_in_icb_data() {
        let sector_size = 2048usize;
        let mut image = vec![0u8; sector_size * 4];
        let l_ea = 0usize;
        let data = b"hello in-icb file contents";
        let l_ad = data.len();

        let icb_tag = IcbTag {
            prior_recorded_number_of_direct_entries: U32::new(0),
            strategy_type: CU16::new(STRATEGY_TYPE_DIRECT),
            strategy_parameter: [0; 2],
            max_number_of_entries: CU16::new(1),
            reserved: 0,
            file_type: 5, // Regular
            parent_icb: LbAddr::new(0, 0).into(),
            flags: CU16::new(3), // ADNONE / in-ICB
        };
        let header = FileEntryHeader {
            tag: bytemuck::Zeroable::zeroed(),
            icb_tag,
            uid: U32::new(0),
            gid: U32::new(0),
            permissions: U32::new(0o644),
            file_link_count: CU16::new(1),
            record_format: 0,
            record_display_attributes: 0,
            record_length: U32::new(0),
            information_length: U64::new(data.len() as u64),
            logical_blocks_recorded: U64::new(0),
            access_time: bytemuck::Zeroable::zeroed(),
            modification_time: bytemuck::Zeroable::zeroed(),
            attribute_time: bytemuck::Zeroable::zeroed(),
            checkpoint: U32::new(1),
            extended_attribute_icb: bytemuck::Zeroable::zeroed(),
            implementation_identifier: bytemuck::Zeroable::zeroed(),
            unique_id: U64::new(42),
            length_of_extended_attributes: U32::new(l_ea as u32),
            length_of_allocation_descriptors: U32::new(l_ad as u32),
        };

        let sector = &mut image[0..sector_size];
        sector[..FILE_ENTRY_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        sector[FILE_ENTRY_HEADER_SIZE..FILE_ENTRY_HEADER_SIZE + l_ad].copy_from_slice(data);
        write_tag(sector, TagId::FileEntry, 0, FILE_ENTRY_HEADER_SIZE + l_ea + l_ad - TAG_SIZE);

        let mut cache = BlockCache::new(Cursor::new(image), sector_size as u32);
        let partitions = partition_table(sector_size as u32, 4);
        let entry = read_icb(&mut cache, &partitions, 3, LbAddr::new(0, 0)).unwrap();
        assert_eq!(entry.information_length(), data.len() as u64);
        assert_eq!(entry.allocation_descriptors(), data);
        assert!(matches!(entry.icb_tag().ad_type(), AdType::InIcb));
    }
}
