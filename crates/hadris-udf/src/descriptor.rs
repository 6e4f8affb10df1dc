//! On-disk volume descriptor layouts (ECMA-167 3/10, 4/14): the Anchor
//! Volume Descriptor Pointer, the structural descriptors making up the
//! Volume Descriptor Sequence, the Logical Volume Integrity Descriptor, and
//! the File Set Descriptor.
//!
//! Every struct here uses raw `[u8; N]` fields instead of nested multi-field
//! structs wherever ECMA packs something oddly sized (`regid` is 32 bytes,
//! `lb_addr` is 6): a nested struct's own alignment would otherwise pad its
//! size out and desynchronize every following field, the same trap
//! `Chs`/`MbrPartition` sidestep upstream.

use alloc::string::String;
use alloc::vec::Vec;

use hadris_common::types::{endian::{Endian, LittleEndian}, number::U32};

use crate::codec;
use crate::tag::Tag;
use crate::time::UdfTimestamp;
use crate::types::{LongAd, ShortAd};

/// `extent_ad` (ECMA-167 3/7.1): an unsplit `(length, location)` pair, used
/// by volume descriptors to point at other extents. Unlike `short_ad` the
/// full 32 bits of `length` are significant; there is no extent-type tag.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ExtentAd {
    pub length: U32<LittleEndian>,
    pub location: U32<LittleEndian>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<ExtentAd>(), 8);

impl ExtentAd {
    pub fn is_empty(&self) -> bool {
        self.length.get() == 0
    }
}

/// `regid` (ECMA-167 1/7.4): an implementation/domain identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Regid([u8; 32]);

static_assertions::const_assert_eq!(core::mem::size_of::<Regid>(), 32);

impl Regid {
    pub fn flags(&self) -> u8 {
        self.0[0]
    }

    /// The identifier field, as a `'.'`/letters/digits ASCII string with
    /// trailing NULs trimmed (e.g. `"*OSTA UDF Compliant"`).
    pub fn identifier(&self) -> String {
        let raw = &self.0[1..24];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub fn new(identifier: &str) -> Self {
        let mut bytes = [0u8; 32];
        let id_bytes = identifier.as_bytes();
        let copy_len = id_bytes.len().min(23);
        bytes[1..1 + copy_len].copy_from_slice(&id_bytes[..copy_len]);
        Regid(bytes)
    }
}

/// `charspec` (ECMA-167 1/7.2.1): a character set descriptor. UDF always
/// uses CS0 (`character_set_type == 0`), so only the type byte is checked in
/// practice.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Charspec([u8; 64]);

static_assertions::const_assert_eq!(core::mem::size_of::<Charspec>(), 64);

impl Charspec {
    pub fn character_set_type(&self) -> u8 {
        self.0[0]
    }

    pub const CS0: Self = {
        let mut bytes = [0u8; 64];
        bytes[1] = b'O';
        bytes[2] = b'S';
        bytes[3] = b'T';
        bytes[4] = b'A';
        Charspec(bytes)
    };
}

fn parse_bytes<T: bytemuck::Pod>(bytes: &[u8]) -> Option<T> {
    bytemuck::try_from_bytes::<T>(bytes.get(..core::mem::size_of::<T>())?)
        .ok()
        .copied()
}

/// Anchor Volume Descriptor Pointer (ECMA-167 3/10.2). Located at one of
/// several candidate sectors (spec §4.5): sector 256, `N - 256`, and `N`,
/// where `N` is the last sector of the volume, as well as sector 512 for
/// some non-conformant media.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AnchorVolumeDescriptorPointer {
    pub tag: Tag,
    pub main_vds_extent: ExtentAd,
    pub reserve_vds_extent: ExtentAd,
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<AnchorVolumeDescriptorPointer>(),
    32
);

impl AnchorVolumeDescriptorPointer {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }
}

/// Primary Volume Descriptor (ECMA-167 3/10.1).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrimaryVolumeDescriptor {
    pub tag: Tag,
    pub vds_number: U32<LittleEndian>,
    pub primary_volume_descriptor_number: U32<LittleEndian>,
    pub volume_identifier: [u8; 32],
    pub volume_sequence_number: hadris_common::types::number::U16<LittleEndian>,
    pub max_volume_sequence_number: hadris_common::types::number::U16<LittleEndian>,
    pub interchange_level: hadris_common::types::number::U16<LittleEndian>,
    pub max_interchange_level: hadris_common::types::number::U16<LittleEndian>,
    pub character_set_list: U32<LittleEndian>,
    pub max_character_set_list: U32<LittleEndian>,
    pub volume_set_identifier: [u8; 128],
    pub descriptor_character_set: Charspec,
    pub explanatory_character_set: Charspec,
    pub volume_abstract: ExtentAd,
    pub volume_copyright_notice: ExtentAd,
    pub application_identifier: Regid,
    pub recording_date_and_time: UdfTimestamp,
    pub implementation_identifier: Regid,
    pub implementation_use: [u8; 64],
    pub predecessor_vds_location: U32<LittleEndian>,
    pub flags: hadris_common::types::number::U16<LittleEndian>,
    pub reserved: [u8; 22],
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<PrimaryVolumeDescriptor>(),
    512
);

impl PrimaryVolumeDescriptor {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }

    pub fn volume_identifier(&self) -> Result<String, codec::Cs0Error> {
        codec::decode_dstring(&self.volume_identifier)
    }

    pub fn volume_set_identifier(&self) -> Result<String, codec::Cs0Error> {
        codec::decode_dstring(&self.volume_set_identifier)
    }
}

/// Partition Descriptor (ECMA-167 3/10.5).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PartitionDescriptor {
    pub tag: Tag,
    pub vds_number: U32<LittleEndian>,
    pub partition_flags: hadris_common::types::number::U16<LittleEndian>,
    pub partition_number: hadris_common::types::number::U16<LittleEndian>,
    pub partition_contents: Regid,
    pub partition_contents_use: [u8; 128],
    pub access_type: U32<LittleEndian>,
    pub partition_starting_location: U32<LittleEndian>,
    pub partition_length: U32<LittleEndian>,
    pub implementation_identifier: Regid,
    pub implementation_use: [u8; 128],
    pub reserved: [u8; 156],
}

static_assertions::const_assert_eq!(core::mem::size_of::<PartitionDescriptor>(), 512);

impl PartitionDescriptor {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }

    /// `partition_flags` bit 0: whether the partition space is allocated
    /// (vs. yet to be allocated, for sparse/spared media).
    pub fn is_allocated(&self) -> bool {
        self.partition_flags.get() & 1 != 0
    }

    /// Access type (ECMA-167 3/10.5.7): 0 read-only unspecified, 1
    /// read-only, 2 write-once, 3 rewritable, 4 overwritable.
    pub fn access_type(&self) -> u32 {
        self.access_type.get()
    }

    /// Reinterprets `partition_contents_use` as a [`PartitionHeaderDescriptor`].
    /// Only meaningful when `partition_contents` identifies a UDF partition
    /// (`+NSR02`); callers that care distinguish that themselves, since a
    /// zeroed header (all-empty `short_ad`s) is itself a valid "no free-space
    /// map recorded" answer for read-only media.
    pub fn partition_header(&self) -> PartitionHeaderDescriptor {
        *bytemuck::from_bytes(&self.partition_contents_use)
    }
}

/// Partition Header Descriptor (ECMA-167 4/14.3): embedded in a Partition
/// Descriptor's `partition_contents_use` for UDF partitions, giving the
/// partition-relative locations of the unallocated- and freed-space bitmap
/// and table extents (spec §4.6 "contained-space-header").
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PartitionHeaderDescriptor {
    pub unallocated_space_table: ShortAd,
    pub unallocated_space_bitmap: ShortAd,
    pub partition_integrity_table: ShortAd,
    pub freed_space_table: ShortAd,
    pub freed_space_bitmap: ShortAd,
    pub reserved: [u8; 88],
}

pub const PARTITION_HEADER_DESCRIPTOR_SIZE: usize = 128;
static_assertions::const_assert_eq!(
    core::mem::size_of::<PartitionHeaderDescriptor>(),
    PARTITION_HEADER_DESCRIPTOR_SIZE
);

/// Implementation Use Volume Descriptor (ECMA-167 3/10.4).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ImplementationUseVolumeDescriptor {
    pub tag: Tag,
    pub vds_number: U32<LittleEndian>,
    pub implementation_identifier: Regid,
    pub implementation_use: [u8; 460],
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<ImplementationUseVolumeDescriptor>(),
    512
);

impl ImplementationUseVolumeDescriptor {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }
}

/// The UDF-defined `LVInformation` layout carried inside an IUVD's
/// `implementation_use` when `implementation_identifier` is
/// `*UDF LV Info` (UDF 2.01 2.2.7.2).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LvInformation {
    pub character_set: Charspec,
    pub logical_volume_identifier: [u8; 128],
    pub info1: [u8; 36],
    pub info2: [u8; 36],
    pub info3: [u8; 36],
    pub implementation_identifier: Regid,
    pub implementation_use: [u8; 128],
}

static_assertions::const_assert_eq!(core::mem::size_of::<LvInformation>(), 460);

impl LvInformation {
    pub fn parse(bytes: &[u8; 460]) -> Self {
        *bytemuck::from_bytes(bytes)
    }
}

/// Unallocated Space Descriptor (ECMA-167 3/10.8): a fixed header followed
/// by `number_of_alloc_descriptors` `extent_ad`s, each a free extent of
/// *volume* space not yet assigned to any partition.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UnallocatedSpaceDescriptorHeader {
    pub tag: Tag,
    pub vds_number: U32<LittleEndian>,
    pub number_of_alloc_descriptors: U32<LittleEndian>,
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<UnallocatedSpaceDescriptorHeader>(),
    24
);

impl UnallocatedSpaceDescriptorHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }
}

/// Logical Volume Descriptor fixed header (ECMA-167 3/10.6); the partition
/// map table trails this in the same sector and is read separately since
/// its length is data-dependent.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LogicalVolumeDescriptorHeader {
    pub tag: Tag,
    pub vds_number: U32<LittleEndian>,
    pub descriptor_character_set: Charspec,
    pub logical_volume_identifier: [u8; 128],
    pub logical_block_size: U32<LittleEndian>,
    pub domain_identifier: Regid,
    /// A `long_ad` pointing at the File Set Descriptor.
    pub logical_volume_contents_use: [u8; 16],
    pub map_table_length: U32<LittleEndian>,
    pub number_of_partition_maps: U32<LittleEndian>,
    pub implementation_identifier: Regid,
    pub implementation_use: [u8; 128],
    pub integrity_sequence_extent: ExtentAd,
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<LogicalVolumeDescriptorHeader>(),
    440
);

impl LogicalVolumeDescriptorHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }

    pub fn logical_volume_identifier(&self) -> Result<String, codec::Cs0Error> {
        codec::decode_dstring(&self.logical_volume_identifier)
    }

    /// The root FSD location, decoded from `logical_volume_contents_use`.
    pub fn file_set_descriptor_location(&self) -> LongAd {
        *bytemuck::from_bytes(&self.logical_volume_contents_use)
    }
}

/// A parsed LVD: the fixed header plus the raw partition map table bytes
/// (spec §4.7 parses these into [`crate::partition::PartitionMap`]s).
pub struct LogicalVolumeDescriptor {
    pub header: LogicalVolumeDescriptorHeader,
    pub partition_maps: Vec<u8>,
}

impl LogicalVolumeDescriptor {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = LogicalVolumeDescriptorHeader::parse(bytes)?;
        let header_len = core::mem::size_of::<LogicalVolumeDescriptorHeader>();
        let map_len = header.map_table_length.get() as usize;
        let partition_maps = bytes.get(header_len..header_len + map_len)?.to_vec();
        Some(Self {
            header,
            partition_maps,
        })
    }
}

/// Logical Volume Integrity Descriptor fixed header (ECMA-167 3/10.10); the
/// free-space table, size table, and implementation-use area trail this and
/// are data-dependent in length.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LogicalVolumeIntegrityDescriptorHeader {
    pub tag: Tag,
    pub recording_date_and_time: UdfTimestamp,
    pub integrity_type: U32<LittleEndian>,
    pub next_integrity_extent: ExtentAd,
    /// Contains a `u64` unique-ID high-water mark followed by 24 reserved
    /// bytes (UDF 2.01 3.3.3.1).
    pub logical_volume_contents_use: [u8; 32],
    pub number_of_partitions: U32<LittleEndian>,
    pub length_of_implementation_use: U32<LittleEndian>,
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<LogicalVolumeIntegrityDescriptorHeader>(),
    80
);

/// Integrity type: the volume was dismounted cleanly (`Close`) or is
/// currently mounted/was not dismounted cleanly (`Open`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityType {
    Open,
    Close,
}

impl LogicalVolumeIntegrityDescriptorHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }

    pub fn integrity_type(&self) -> IntegrityType {
        if self.integrity_type.get() == 0 {
            IntegrityType::Open
        } else {
            IntegrityType::Close
        }
    }

    pub fn unique_id_high_water_mark(&self) -> u64 {
        u64::from_le_bytes(self.logical_volume_contents_use[0..8].try_into().unwrap())
    }

    pub fn set_unique_id_high_water_mark(&mut self, value: u64) {
        self.logical_volume_contents_use[0..8].copy_from_slice(&value.to_le_bytes());
    }
}

/// A parsed LVID: fixed header plus the two per-partition tables.
pub struct LogicalVolumeIntegrityDescriptor {
    pub header: LogicalVolumeIntegrityDescriptorHeader,
    pub free_space_table: Vec<u32>,
    pub size_table: Vec<u32>,
    pub implementation_use: Vec<u8>,
}

impl LogicalVolumeIntegrityDescriptor {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = LogicalVolumeIntegrityDescriptorHeader::parse(bytes)?;
        let header_len = core::mem::size_of::<LogicalVolumeIntegrityDescriptorHeader>();
        let n = header.number_of_partitions.get() as usize;
        let mut offset = header_len;
        let mut free_space_table = Vec::with_capacity(n);
        for _ in 0..n {
            let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
            free_space_table.push(u32::from_le_bytes(raw));
            offset += 4;
        }
        let mut size_table = Vec::with_capacity(n);
        for _ in 0..n {
            let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
            size_table.push(u32::from_le_bytes(raw));
            offset += 4;
        }
        let impl_use_len = header.length_of_implementation_use.get() as usize;
        let implementation_use = bytes.get(offset..offset + impl_use_len)?.to_vec();
        Some(Self {
            header,
            free_space_table,
            size_table,
            implementation_use,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = bytemuck::bytes_of(&self.header).to_vec();
        for &v in &self.free_space_table {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for &v in &self.size_table {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.implementation_use);
        out
    }

    /// Recomputes the tag's CRC and checksum over the current header/tables
    /// and stamps `tag_location`/`serial_number`, then serializes. Call this
    /// after mutating `free_space_table`, `size_table`, or the unique-ID
    /// high-water mark so the on-disk copy validates after being written
    /// back (spec §4.1).
    pub fn retagged_bytes(&mut self, tag_location: u32, serial_number: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&bytemuck::bytes_of(&self.header)[crate::tag::TAG_SIZE..]);
        for &v in &self.free_space_table {
            body.extend_from_slice(&v.to_le_bytes());
        }
        for &v in &self.size_table {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.extend_from_slice(&self.implementation_use);

        let crc_len = body.len().min(0x3FFF);
        let crc = crate::tag::crc_itu_t(&body[..crc_len]);
        let tag = crate::tag::Tag {
            id: hadris_common::types::number::U16::new(
                crate::tag::TagId::LogicalVolumeIntegrityDescriptor as u16,
            ),
            descriptor_version: self.header.tag.descriptor_version,
            checksum: 0,
            reserved: 0,
            serial_number: hadris_common::types::number::U16::new(serial_number),
            descriptor_crc: hadris_common::types::number::U16::new(crc),
            descriptor_crc_length: hadris_common::types::number::U16::new(crc_len as u16),
            tag_location: U32::new(tag_location),
        };
        let mut tag_bytes: [u8; crate::tag::TAG_SIZE] = bytemuck::bytes_of(&tag).try_into().unwrap();
        tag_bytes[4] = crate::tag::Tag::compute_checksum(&tag_bytes);
        self.header.tag = crate::tag::Tag::from_bytes(&tag_bytes);

        let mut out = Vec::with_capacity(crate::tag::TAG_SIZE + body.len());
        out.extend_from_slice(&tag_bytes);
        out.extend_from_slice(&body);
        out
    }
}

/// File Set Descriptor (ECMA-167 4/14.1): the per-file-set root of a UDF
/// namespace, pointed at by the LVD's `logical_volume_contents_use`.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FileSetDescriptor {
    pub tag: Tag,
    pub recording_date_and_time: UdfTimestamp,
    pub interchange_level: hadris_common::types::number::U16<LittleEndian>,
    pub max_interchange_level: hadris_common::types::number::U16<LittleEndian>,
    pub character_set_list: U32<LittleEndian>,
    pub max_character_set_list: U32<LittleEndian>,
    pub file_set_number: U32<LittleEndian>,
    pub file_set_descriptor_number: U32<LittleEndian>,
    pub logical_volume_identifier_character_set: Charspec,
    pub logical_volume_identifier: [u8; 128],
    pub file_set_character_set: Charspec,
    pub file_set_identifier: [u8; 32],
    pub copyright_file_identifier: [u8; 32],
    pub abstract_file_identifier: [u8; 32],
    pub root_directory_icb: LongAd,
    pub domain_identifier: Regid,
    pub next_extent: LongAd,
    pub system_stream_directory_icb: LongAd,
    pub reserved: [u8; 32],
}

static_assertions::const_assert_eq!(core::mem::size_of::<FileSetDescriptor>(), 512);

impl FileSetDescriptor {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        parse_bytes(bytes)
    }

    pub fn file_set_identifier(&self) -> Result<String, codec::Cs0Error> {
        codec::decode_dstring(&self.file_set_identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_ecma167() {
        assert_eq!(core::mem::size_of::<AnchorVolumeDescriptorPointer>(), 32);
        assert_eq!(core::mem::size_of::<PrimaryVolumeDescriptor>(), 512);
        assert_eq!(core::mem::size_of::<PartitionDescriptor>(), 512);
        assert_eq!(
            core::mem::size_of::<ImplementationUseVolumeDescriptor>(),
            512
        );
        assert_eq!(core::mem::size_of::<LvInformation>(), 460);
        assert_eq!(core::mem::size_of::<LogicalVolumeDescriptorHeader>(), 440);
        assert_eq!(
            core::mem::size_of::<LogicalVolumeIntegrityDescriptorHeader>(),
            80
        );
        assert_eq!(core::mem::size_of::<FileSetDescriptor>(), 512);
    }

    #[test]
    fn regid_identifier_round_trips() {
        let regid = Regid::new("*OSTA UDF Compliant");
        assert_eq!(regid.identifier(), "*OSTA UDF Compliant");
    }

    #[test]
    fn lvid_unique_id_high_water_mark() {
        let header = LogicalVolumeIntegrityDescriptorHeader {
            tag: bytemuck::Zeroable::zeroed(),
            recording_date_and_time: bytemuck::Zeroable::zeroed(),
            integrity_type: U32::new(1),
            next_integrity_extent: bytemuck::Zeroable::zeroed(),
            logical_volume_contents_use: [0; 32],
            number_of_partitions: U32::new(0),
            length_of_implementation_use: U32::new(0),
        };
        let mut header = header;
        header.set_unique_id_high_water_mark(0xDEAD_BEEF);
        assert_eq!(header.unique_id_high_water_mark(), 0xDEAD_BEEF);
        assert_eq!(header.integrity_type(), IntegrityType::Close);
    }
}
