//! Tag & CRC primitives (spec §4.1).
//!
//! Every structural ECMA-167 descriptor begins with a 16-byte tag. Validating
//! one requires, in order: the cheap 8-bit checksum, an optional descriptor-id
//! match, the CRC-ITU-T over the body, the tag's self-reported location, the
//! descriptor version, and finally the volume-wide serial number.

use hadris_common::alg::hash::crc::Crc16HasherItuT;
use hadris_common::types::{
    endian::{Endian, LittleEndian},
    number::{U16, U32},
};

pub const TAG_SIZE: usize = 16;

/// Descriptor tag identifiers (ECMA-167 3/7.2 Table 3.7).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagId {
    PrimaryVolumeDescriptor = 1,
    AnchorVolumeDescriptorPointer = 2,
    VolumeDescriptorPointer = 3,
    ImplementationUseVolumeDescriptor = 4,
    PartitionDescriptor = 5,
    LogicalVolumeDescriptor = 6,
    UnallocatedSpaceDescriptor = 7,
    TerminatingDescriptor = 8,
    LogicalVolumeIntegrityDescriptor = 9,
    FileSetDescriptor = 256,
    FileIdentifierDescriptor = 257,
    AllocationExtentDescriptor = 258,
    IndirectEntry = 259,
    TerminalEntry = 260,
    FileEntry = 261,
    ExtendedAttributeHeaderDescriptor = 262,
    UnallocatedSpaceEntry = 263,
    SpaceBitmapDescriptor = 264,
    SpaceTableDescriptor = 265,
    PartitionIntegrityEntry = 266,
    ExtendedFileEntry = 267,
}

impl TagId {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Self::PrimaryVolumeDescriptor,
            2 => Self::AnchorVolumeDescriptorPointer,
            3 => Self::VolumeDescriptorPointer,
            4 => Self::ImplementationUseVolumeDescriptor,
            5 => Self::PartitionDescriptor,
            6 => Self::LogicalVolumeDescriptor,
            7 => Self::UnallocatedSpaceDescriptor,
            8 => Self::TerminatingDescriptor,
            9 => Self::LogicalVolumeIntegrityDescriptor,
            256 => Self::FileSetDescriptor,
            257 => Self::FileIdentifierDescriptor,
            258 => Self::AllocationExtentDescriptor,
            259 => Self::IndirectEntry,
            260 => Self::TerminalEntry,
            261 => Self::FileEntry,
            262 => Self::ExtendedAttributeHeaderDescriptor,
            263 => Self::UnallocatedSpaceEntry,
            264 => Self::SpaceBitmapDescriptor,
            265 => Self::SpaceTableDescriptor,
            266 => Self::PartitionIntegrityEntry,
            267 => Self::ExtendedFileEntry,
            _ => return None,
        })
    }
}

/// The 16-byte descriptor tag (`tag` in ECMA-167 3/7.2).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Tag {
    pub id: U16<LittleEndian>,
    pub descriptor_version: U16<LittleEndian>,
    pub checksum: u8,
    pub reserved: u8,
    pub serial_number: U16<LittleEndian>,
    pub descriptor_crc: U16<LittleEndian>,
    pub descriptor_crc_length: U16<LittleEndian>,
    pub tag_location: U32<LittleEndian>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Tag>(), TAG_SIZE);

impl Tag {
    pub fn from_bytes(bytes: &[u8; TAG_SIZE]) -> Self {
        *bytemuck::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        bytemuck::bytes_of(self).try_into().unwrap()
    }

    /// The 8-bit sum-of-bytes checksum over bytes 0-3 and 5-15 of the tag
    /// (byte 4, the checksum field itself, is excluded).
    pub fn compute_checksum(bytes: &[u8; TAG_SIZE]) -> u8 {
        let mut sum: u8 = 0;
        for &b in &bytes[0..4] {
            sum = sum.wrapping_add(b);
        }
        for &b in &bytes[5..16] {
            sum = sum.wrapping_add(b);
        }
        sum
    }
}

/// Outcome of validating a tag against its expected context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStatus {
    /// All checks passed.
    Good,
    /// The checksum passed but something else (CRC, location, version, or
    /// serial) did not; the block is still usable.
    Damaged,
    /// The checksum itself failed; this is not a tag at all.
    NotATag,
}

/// The result of checking a descriptor's tag, matching `CheckTag`'s return
/// value plus an optional recorded error for the first thing that failed.
#[derive(Debug, Clone, Copy)]
pub struct TagCheck {
    pub status: TagStatus,
    pub error: Option<crate::error::ErrorDescriptor>,
}

/// Validates a tag the way `CheckTag` does in the original `chkudf` tool
/// (spec §4.1): checksum, then id, then CRC length/value, then
/// self-location, then descriptor version, then serial number.
///
/// `udf_revision` is 2 for UDF ≤ 1.50 (NSR02) or 3 for UDF ≥ 2.00 (NSR03);
/// a version-3 volume may still legally carry version-2 descriptors
/// (ECMA-167r3 3/7.2.2), so `udf_revision == 3` accepts either 2 or 3.
/// `expected_serial`, when `Some`, enforces that the serial number is
/// stable across the volume once it has been observed once.
pub fn validate_tag(
    bytes: &[u8; TAG_SIZE],
    body: &[u8],
    expected_loc: u32,
    expected_id: Option<TagId>,
    crc_min: u16,
    crc_max: u16,
    udf_revision: u8,
    expected_serial: Option<u16>,
) -> TagCheck {
    use crate::error::{ErrorCode, ErrorDescriptor};

    let checksum = Tag::compute_checksum(bytes);
    if checksum != bytes[4] {
        log::warn!(
            "tag checksum mismatch at sector {expected_loc}: expected {checksum:#x}, found {:#x}",
            bytes[4]
        );
        return TagCheck {
            status: TagStatus::NotATag,
            error: Some(ErrorDescriptor::new(
                ErrorCode::TagChecksum,
                expected_loc,
                checksum as u64,
                bytes[4] as u64,
            )),
        };
    }

    let tag = Tag::from_bytes(bytes);

    if let Some(expected_id) = expected_id {
        let found = tag.id.get();
        if found != expected_id as u16 {
            log::warn!(
                "tag at sector {expected_loc} has id {found:#x}, expected {:#x}",
                expected_id as u16
            );
            return TagCheck {
                status: TagStatus::Damaged,
                error: Some(ErrorDescriptor::new(
                    ErrorCode::TagWrongId,
                    expected_loc,
                    expected_id as u64,
                    found as u64,
                )),
            };
        }
    }

    let crc_len = tag.descriptor_crc_length.get();
    if crc_len < crc_min || crc_len > crc_max || crc_len as usize > body.len() || crc_len >= 0x4000
    {
        log::warn!("tag at sector {expected_loc} has out-of-range CRC length {crc_len}");
        return TagCheck {
            status: TagStatus::Damaged,
            error: Some(ErrorDescriptor::new(
                ErrorCode::CrcLength,
                expected_loc,
                crc_min as u64,
                crc_len as u64,
            )),
        };
    }

    let crc = crc_itu_t(&body[..crc_len as usize]);
    if crc != tag.descriptor_crc.get() {
        log::warn!(
            "tag CRC mismatch at sector {expected_loc}: computed {crc:#x}, recorded {:#x}",
            tag.descriptor_crc.get()
        );
        return TagCheck {
            status: TagStatus::Damaged,
            error: Some(ErrorDescriptor::new(
                ErrorCode::TagCrc,
                expected_loc,
                crc as u64,
                tag.descriptor_crc.get() as u64,
            )),
        };
    }

    let tag_location = tag.tag_location.get();
    if tag_location != expected_loc {
        log::warn!(
            "tag at sector {expected_loc} self-reports location {tag_location}, a misfiled or stray block"
        );
        return TagCheck {
            status: TagStatus::Damaged,
            error: Some(ErrorDescriptor::new(
                ErrorCode::TagWrongLoc,
                expected_loc,
                expected_loc as u64,
                tag_location as u64,
            )),
        };
    }

    let descriptor_version = tag.descriptor_version.get();
    let version_ok = descriptor_version as u8 == udf_revision
        || (udf_revision == 3 && descriptor_version == 2);
    if !version_ok {
        log::warn!(
            "tag at sector {expected_loc} has descriptor version {descriptor_version}, expected {udf_revision}"
        );
        return TagCheck {
            status: TagStatus::Damaged,
            error: Some(ErrorDescriptor::new(
                ErrorCode::TagBadVersion,
                expected_loc,
                udf_revision as u64,
                descriptor_version as u64,
            )),
        };
    }

    if let Some(expected_serial) = expected_serial {
        let serial = tag.serial_number.get();
        if serial != expected_serial {
            log::warn!(
                "tag at sector {expected_loc} has serial number {serial}, expected stable serial {expected_serial}"
            );
            return TagCheck {
                status: TagStatus::Damaged,
                error: Some(ErrorDescriptor::new(
                    ErrorCode::TagWrongSerial,
                    expected_loc,
                    expected_serial as u64,
                    serial as u64,
                )),
            };
        }
    }

    TagCheck {
        status: TagStatus::Good,
        error: None,
    }
}

/// CRC-ITU-T (polynomial 0x1021, zero init, no reflection, no final XOR)
/// over `data`. Buffers of 0x4000 bytes or more are rejected by the tag's
/// `descCRCLength` field (a 16-bit value whose top two bits are reserved, so
/// the practical limit is 0x3FFF) before this is ever called with them.
pub fn crc_itu_t(data: &[u8]) -> u16 {
    Crc16HasherItuT::checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario 1 from spec §8: tag bytes
    /// `01 00 02 00 00 00 01 00 00 00 00 00 10 00 00 01` yield checksum
    /// `0x15`, and mutating byte 0 to `0x02` yields `0x16`.
    #[test]
    fn checksum_scenario_from_spec() {
        let bytes: [u8; TAG_SIZE] = [
            0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00,
            0x00, 0x01,
        ];
        assert_eq!(Tag::compute_checksum(&bytes), 0x15);

        let mut mutated = bytes;
        mutated[0] = 0x02;
        assert_eq!(Tag::compute_checksum(&mutated), 0x16);
    }

    #[test]
    fn crc_itu_t_empty_is_zero() {
        assert_eq!(crc_itu_t(&[]), 0);
    }

    #[test]
    fn checksum_excludes_itself() {
        let mut bytes = [0u8; TAG_SIZE];
        bytes[4] = 0xFF; // checksum field garbage should not affect the sum
        let checksum = Tag::compute_checksum(&bytes);
        bytes[4] = checksum;
        assert_eq!(Tag::compute_checksum(&bytes), checksum);
    }
}
