//! Directory engine (spec §4.11): File Identifier Descriptors, straddling
//! reassembly of a directory's data stream, and lookup/add/delete/rename.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use hadris_common::types::{
    endian::{Endian, LittleEndian},
    number::{U16, U32},
};
use hadris_io::{Read, Seek};

use crate::cache::BlockCache;
use crate::codec;
use crate::error::{Result, UdfError};
use crate::options::Strictness;
use crate::partition::PartitionTable;
use crate::tag::{crc_itu_t, Tag, TagId, TAG_SIZE};
use crate::types::{Extent, ExtentType, LongAd};

bitflags::bitflags! {
    /// `fileCharacteristics` (ECMA-167 4/14.4.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FidCharacteristics: u8 {
        const HIDDEN = 0b0000_0001;
        const DIRECTORY = 0b0000_0010;
        const DELETED = 0b0000_0100;
        const PARENT = 0b0000_1000;
        const METADATA_STREAM = 0b0001_0000;
    }
}

/// Fixed header preceding a File Identifier Descriptor's implementation-use
/// and file-identifier bytes (ECMA-167 4/14.4).
pub const FID_HEADER_SIZE: usize = 38;

/// A parsed File Identifier Descriptor: one directory entry.
#[derive(Debug, Clone)]
pub struct FileIdentifierDescriptor {
    pub file_version_number: u16,
    pub characteristics: FidCharacteristics,
    pub icb: LongAd,
    pub implementation_use: Vec<u8>,
    /// Raw CS0 bytes; empty for the parent entry (`PARENT` is set instead).
    pub file_identifier: Vec<u8>,
}

impl FileIdentifierDescriptor {
    pub fn is_deleted(&self) -> bool {
        self.characteristics.contains(FidCharacteristics::DELETED)
    }

    pub fn is_directory(&self) -> bool {
        self.characteristics.contains(FidCharacteristics::DIRECTORY)
    }

    pub fn is_parent(&self) -> bool {
        self.characteristics.contains(FidCharacteristics::PARENT)
    }

    /// Decodes the file identifier, or `None` for the parent entry.
    pub fn name(&self) -> Result<Option<String>> {
        if self.file_identifier.is_empty() {
            return Ok(None);
        }
        codec::decode_cs0(&self.file_identifier)
            .map(Some)
            .map_err(|_| UdfError::BadAd("malformed FID filename".into()))
    }

    /// Total on-disk size, including implementation-use, file-identifier,
    /// and padding to the next 4-byte boundary (ECMA-167 4/14.4.1.1).
    fn padded_record_len(l_iu: usize, l_fi: usize) -> usize {
        let unpadded = FID_HEADER_SIZE + l_iu + l_fi;
        unpadded.div_ceil(4) * 4
    }
}

/// Parses one FID starting at `buf[offset..]`. Returns the entry and the
/// offset of the next record. The tag is validated against its own
/// self-reported `tag_location` rather than an externally supplied block
/// number, since a FID spanning two extents cannot be tied to a single
/// physical block the way a fixed-size descriptor can.
fn parse_one(buf: &[u8], offset: usize, udf_revision: u8) -> Result<(FileIdentifierDescriptor, usize)> {
    let header_bytes = buf
        .get(offset..offset + FID_HEADER_SIZE)
        .ok_or_else(|| UdfError::BadAd("truncated file identifier descriptor".into()))?;

    let tag_bytes: [u8; TAG_SIZE] = header_bytes[..TAG_SIZE].try_into().unwrap();
    let file_version_number = u16::from_le_bytes([header_bytes[16], header_bytes[17]]);
    let characteristics = FidCharacteristics::from_bits_truncate(header_bytes[18]);
    let l_fi = header_bytes[19] as usize;
    let icb: LongAd = *bytemuck::from_bytes(&header_bytes[20..36]);
    let l_iu = u16::from_le_bytes([header_bytes[36], header_bytes[37]]) as usize;

    let iu_start = offset + FID_HEADER_SIZE;
    let fi_start = iu_start + l_iu;
    let fi_end = fi_start + l_fi;
    if fi_end > buf.len() {
        return Err(UdfError::BadAd("file identifier descriptor overruns directory data".into()));
    }
    let implementation_use = buf[iu_start..fi_start].to_vec();
    let file_identifier = buf[fi_start..fi_end].to_vec();

    let body_len = l_iu + l_fi;
    let body = &buf[iu_start..fi_end];
    let tag_location = u32::from_le_bytes(tag_bytes[12..16].try_into().unwrap());
    let check = crate::tag::validate_tag(
        &tag_bytes,
        body,
        tag_location,
        Some(TagId::FileIdentifierDescriptor),
        0,
        body_len.min(0x3FFF) as u16,
        udf_revision,
        None,
    );
    if !matches!(check.status, crate::tag::TagStatus::Good) {
        return Err(UdfError::BadAd("file identifier descriptor failed tag validation".into()));
    }

    let record_len = FileIdentifierDescriptor::padded_record_len(l_iu, l_fi);
    let entry = FileIdentifierDescriptor {
        file_version_number,
        characteristics,
        icb,
        implementation_use,
        file_identifier,
    };
    Ok((entry, offset + record_len))
}

/// Concatenates a directory's extents into one contiguous byte buffer,
/// reassembling any FID that straddles an extent boundary (spec §8 scenario
/// 5). `AllocatedNotRecorded` extents read as zero; `NotAllocated` extents
/// are skipped (they carry no information-length bytes).
pub fn read_directory_stream<T: Read + Seek>(
    cache: &mut BlockCache<T>,
    partitions: &PartitionTable,
    extents: &[Extent],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let sector_size = cache.sector_size();
    for extent in extents {
        match extent.ty {
            ExtentType::Recorded => {
                let phys = partitions.translate(extent.location)?;
                let sectors = (extent.length as u64).div_ceil(sector_size as u64).max(1);
                let bytes = cache.cache_sectors(phys as u64, sectors)?;
                out.extend_from_slice(&bytes[..extent.length as usize]);
            }
            ExtentType::AllocatedNotRecorded => {
                out.resize(out.len() + extent.length as usize, 0);
            }
            ExtentType::NotAllocated | ExtentType::NextAllocExtent => {}
        }
    }
    Ok(out)
}

/// Parses every FID out of a directory's data stream, in recorded order
/// (including deleted tombstones — callers filter those out as needed).
pub fn parse_entries(stream: &[u8], udf_revision: u8) -> Result<Vec<FileIdentifierDescriptor>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset + FID_HEADER_SIZE <= stream.len() {
        let (entry, next) = parse_one(stream, offset, udf_revision)?;
        entries.push(entry);
        offset = next;
    }
    Ok(entries)
}

/// Looks up a live (non-deleted, non-parent) entry by name.
pub fn lookup<'a>(
    entries: &'a [FileIdentifierDescriptor],
    name: &str,
) -> Result<Option<&'a FileIdentifierDescriptor>> {
    for entry in entries {
        if entry.is_deleted() || entry.is_parent() {
            continue;
        }
        if entry.name()?.as_deref() == Some(name) {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// Adds a new directory entry. Fails with [`UdfError::NameExists`] if a live
/// entry already uses `name`, and with [`UdfError::NameTooLong`] if the
/// encoded name would not fit the 255-byte `lengthFileIdentifier` field. If
/// `directory_sorted` is set, the entry is inserted in CS0-byte-order
/// position; otherwise it is appended, reusing the first deleted tombstone
/// whose encoded name fits, to bound directory growth under repeated
/// create/delete churn.
pub fn add_entry(
    entries: &mut Vec<FileIdentifierDescriptor>,
    name: &str,
    icb: LongAd,
    is_directory: bool,
    directory_sorted: bool,
) -> Result<()> {
    if lookup(entries, name)?.is_some() {
        return Err(UdfError::NameExists);
    }
    let cs0 = codec::encode_cs0(name).map_err(|_| UdfError::BadAd("name not representable in CS0".into()))?;
    if cs0.len() > 255 {
        return Err(UdfError::NameTooLong(cs0.len()));
    }

    let mut characteristics = FidCharacteristics::empty();
    if is_directory {
        characteristics |= FidCharacteristics::DIRECTORY;
    }

    let new_entry = FileIdentifierDescriptor {
        file_version_number: 1,
        characteristics,
        icb,
        implementation_use: Vec::new(),
        file_identifier: cs0,
    };

    if let Some(slot) = entries.iter_mut().find(|e| {
        e.is_deleted() && e.file_identifier.len() >= new_entry.file_identifier.len()
    }) {
        *slot = new_entry;
        return Ok(());
    }

    if directory_sorted {
        let index = entries
            .iter()
            .position(|e| !e.is_parent() && e.file_identifier.as_slice() > new_entry.file_identifier.as_slice())
            .unwrap_or(entries.len());
        entries.insert(index, new_entry);
    } else {
        entries.push(new_entry);
    }
    Ok(())
}

/// Marks `name`'s entry deleted in place (a tombstone, per ECMA-167's
/// deleted-entry-retained model) rather than physically removing the
/// record; space reclamation happens the next time [`add_entry`] reuses the
/// slot or the directory is compacted.
pub fn delete_entry(entries: &mut [FileIdentifierDescriptor], name: &str, strictness: Strictness) -> Result<()> {
    let entry = entries
        .iter_mut()
        .find(|e| !e.is_deleted() && !e.is_parent() && e.name().ok().flatten().as_deref() == Some(name))
        .ok_or(UdfError::BadAd(alloc::format!("no such directory entry: {name}")))?;
    entry.characteristics |= FidCharacteristics::DELETED;
    if strictness == Strictness::Strict {
        entry.icb = LongAd::new(0, ExtentType::Recorded, crate::types::LbAddr::new(0, 0));
    }
    Ok(())
}

/// Renames `old_name` to `new_name` in place. If `new_name` already exists
/// it is first deleted (the caller is responsible for checking it is not a
/// non-empty directory before calling this, per spec §4.11's rename
/// algorithm); the moved entry keeps its original ICB and version number.
pub fn rename_entry(
    entries: &mut Vec<FileIdentifierDescriptor>,
    old_name: &str,
    new_name: &str,
    directory_sorted: bool,
    strictness: Strictness,
) -> Result<()> {
    if old_name == new_name {
        return Ok(());
    }
    if lookup(entries, new_name)?.is_some() {
        delete_entry(entries, new_name, strictness)?;
    }

    let index = entries
        .iter()
        .position(|e| !e.is_deleted() && !e.is_parent() && e.name().ok().flatten().as_deref() == Some(old_name))
        .ok_or(UdfError::BadAd(alloc::format!("no such directory entry: {old_name}")))?;

    let cs0 = codec::encode_cs0(new_name).map_err(|_| UdfError::BadAd("name not representable in CS0".into()))?;
    if cs0.len() > 255 {
        return Err(UdfError::NameTooLong(cs0.len()));
    }

    let mut moved = entries.remove(index);
    moved.file_identifier = cs0;

    if directory_sorted {
        let insert_at = entries
            .iter()
            .position(|e| !e.is_parent() && e.file_identifier.as_slice() > moved.file_identifier.as_slice())
            .unwrap_or(entries.len());
        entries.insert(insert_at, moved);
    } else {
        entries.push(moved);
    }
    Ok(())
}

/// Serializes a directory's live entry list back into a byte stream, each
/// FID re-tagged with `serial_number` and a `tag_location` equal to the
/// partition-relative block actually holding that record: `first_block`
/// plus however many whole sectors of output precede it. Used by the write
/// path after add/delete/rename mutate the in-memory entry list.
pub fn write_entries(
    entries: &[FileIdentifierDescriptor],
    serial_number: u16,
    udf_revision: u8,
    sector_size: u32,
    first_block: u32,
) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let l_iu = entry.implementation_use.len();
        let l_fi = entry.file_identifier.len();
        let record_len = FileIdentifierDescriptor::padded_record_len(l_iu, l_fi);
        let body_len = l_iu + l_fi;

        let mut body = vec![0u8; body_len];
        body[..l_iu].copy_from_slice(&entry.implementation_use);
        body[l_iu..].copy_from_slice(&entry.file_identifier);
        let crc = crc_itu_t(&body);

        let tag_location = first_block + (out.len() as u32) / sector_size;
        let mut tag = Tag {
            id: U16::new(TagId::FileIdentifierDescriptor as u16),
            descriptor_version: U16::new(udf_revision as u16),
            checksum: 0,
            reserved: 0,
            serial_number: U16::new(serial_number),
            descriptor_crc: U16::new(crc),
            descriptor_crc_length: U16::new(body_len as u16),
            tag_location: U32::new(tag_location),
        };
        let mut tag_bytes: [u8; TAG_SIZE] = bytemuck::bytes_of(&tag).try_into().unwrap();
        tag_bytes[4] = Tag::compute_checksum(&tag_bytes);
        tag = Tag::from_bytes(&tag_bytes);

        out.extend_from_slice(bytemuck::bytes_of(&tag));
        out.extend_from_slice(&entry.file_version_number.to_le_bytes());
        out.push(entry.characteristics.bits());
        out.push(l_fi as u8);
        out.extend_from_slice(bytemuck::bytes_of(&entry.icb));
        out.extend_from_slice(&(l_iu as u16).to_le_bytes());
        out.extend_from_slice(&body);
        out.resize(out.len() + (record_len - (FID_HEADER_SIZE + body_len)), 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn synthetic_fid(name: &str, characteristics: FidCharacteristics) -> Vec<u8> {
        let cs0 = codec::encode_cs0(name).unwrap();
        let l_fi = cs0.len();
        let body_len = l_fi;
        let record_len = FileIdentifierDescriptor::padded_record_len(0, l_fi);
        let crc = crc_itu_t(&cs0);

        let mut tag = Tag {
            id: U16::new(TagId::FileIdentifierDescriptor as u16),
            descriptor_version: U16::new(3),
            checksum: 0,
            reserved: 0,
            serial_number: U16::new(1),
            descriptor_crc: U16::new(crc),
            descriptor_crc_length: U16::new(body_len as u16),
            tag_location: U32::new(0),
        };
        let mut tag_bytes: [u8; TAG_SIZE] = bytemuck::bytes_of(&tag).try_into().unwrap();
        tag_bytes[4] = Tag::compute_checksum(&tag_bytes);
        tag = Tag::from_bytes(&tag_bytes);

        let mut out = Vec::new();
        out.extend_from_slice(bytemuck::bytes_of(&tag));
        out.extend_from_slice(&1u16.to_le_bytes());
        out.push(characteristics.bits());
        out.push(l_fi as u8);
        out.extend_from_slice(bytemuck::bytes_of(&LongAd::new(1, ExtentType::Recorded, crate::types::LbAddr::new(0, 10))));
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&cs0);
        out.resize(out.len() + (record_len - (FID_HEADER_SIZE + body_len)), 0);
        out
    }

    #[test]
    fn parses_two_entries_in_sequence() {
        let mut stream = synthetic_fid("alpha", FidCharacteristics::empty());
        stream.extend(synthetic_fid("beta", FidCharacteristics::DIRECTORY));

        let entries = parse_entries(&stream, 3).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name().unwrap().as_deref(), Some("alpha"));
        assert!(!entries[0].is_directory());
        assert_eq!(entries[1].name().unwrap().as_deref(), Some("beta"));
        assert!(entries[1].is_directory());
    }

    #[test]
    fn lookup_skips_deleted_entries() {
        let stream = synthetic_fid("gone", FidCharacteristics::DELETED);
        let entries = parse_entries(&stream, 3).unwrap();
        assert!(lookup(&entries, "gone").unwrap().is_none());
    }

    #[test]
    fn add_entry_rejects_duplicate_name() {
        let stream = synthetic_fid("dup", FidCharacteristics::empty());
        let mut entries = parse_entries(&stream, 3).unwrap();
        let icb = LongAd::new(1, ExtentType::Recorded, crate::types::LbAddr::new(0, 20));
        let err = add_entry(&mut entries, "dup", icb, false, false).unwrap_err();
        assert!(matches!(err, UdfError::NameExists));
    }

    #[test]
    fn delete_then_rename_round_trips() {
        let mut stream = synthetic_fid("old", FidCharacteristics::empty());
        stream.extend(synthetic_fid("other", FidCharacteristics::empty()));
        let mut entries = parse_entries(&stream, 3).unwrap();

        rename_entry(&mut entries, "old", "new", false, Strictness::Lenient).unwrap();
        assert!(lookup(&entries, "old").unwrap().is_none());
        assert!(lookup(&entries, "new").unwrap().is_some());

        delete_entry(&mut entries, "new", Strictness::Lenient).unwrap();
        assert!(lookup(&entries, "new").unwrap().is_none());
    }

    #[test]
    fn reads_directory_stream_across_recorded_and_allocated_extents() {
        let sector_size = 512u32;
        let data = vec![7u8; sector_size as usize];
        let mut cache = BlockCache::new(Cursor::new(data), sector_size);
        let descriptor = crate::descriptor::PartitionDescriptor {
            tag: bytemuck::Zeroable::zeroed(),
            vds_number: U32::new(0),
            partition_flags: U16::new(1),
            partition_number: U16::new(0),
            partition_contents: bytemuck::Zeroable::zeroed(),
            partition_contents_use: [0; 128],
            access_type: U32::new(3),
            partition_starting_location: U32::new(0),
            partition_length: U32::new(1),
            implementation_identifier: bytemuck::Zeroable::zeroed(),
            implementation_use: [0; 128],
            reserved: [0; 156],
        };
        let partitions = PartitionTable {
            entries: vec![crate::partition::PartitionEntry {
                map: crate::partition::PartitionMap::Type1 {
                    volume_sequence_number: 0,
                    partition_number: 0,
                },
                descriptor,
                vat: None,
                sparing_table: None,
            }],
        };
        let extents = [
            Extent {
                location: crate::types::LbAddr::new(0, 0),
                length: 100,
                ty: ExtentType::Recorded,
            },
            Extent {
                location: crate::types::LbAddr::new(0, 0),
                length: 20,
                ty: ExtentType::AllocatedNotRecorded,
            },
        ];
        let stream = read_directory_stream(&mut cache, &partitions, &extents).unwrap();
        assert_eq!(stream.len(), 120);
        assert!(stream[..100].iter().all(|&b| b == 7));
        assert!(stream[100..].iter().all(|&b| b == 0));
    }
}
