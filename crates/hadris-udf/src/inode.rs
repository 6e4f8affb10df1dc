//! Inode façade (spec §4.12): maps a [`crate::icb::Entry`] onto the
//! POSIX-flavored view a filesystem driver presents — permission bits, time
//! stamps, uid/gid substitution, file-type classification, and device
//! major/minor extracted from the Device Specification extended attribute.

use hadris_common::types::endian::Endian;
use hadris_io::{Read, Seek};

use crate::cache::BlockCache;
use crate::error::Result;
use crate::icb::{self, Entry, FileType, IcbTag};
use crate::partition::PartitionTable;
use crate::time::{HostTime, Timezone};
use crate::types::{Extent, LbAddr};

/// Permission bit positions (ECMA-167 4/14.9.5). Each of the three
/// identity groups carries execute/write/read/changeAttr/delete, in that
/// bit order, five bits apart.
mod perm_bits {
    pub const OTHER_EXEC: u32 = 1 << 0;
    pub const OTHER_WRITE: u32 = 1 << 1;
    pub const OTHER_READ: u32 = 1 << 2;
    pub const GROUP_EXEC: u32 = 1 << 5;
    pub const GROUP_WRITE: u32 = 1 << 6;
    pub const GROUP_READ: u32 = 1 << 7;
    pub const OWNER_EXEC: u32 = 1 << 10;
    pub const OWNER_WRITE: u32 = 1 << 11;
    pub const OWNER_READ: u32 = 1 << 12;
    /// changeAttr and delete bits exist per group but have no POSIX mode
    /// counterpart and are dropped on the way to `st_mode`.
    pub const _OTHER_CHANGE_ATTR: u32 = 1 << 3;
    pub const _OTHER_DELETE: u32 = 1 << 4;
}

/// Converts the UDF permission field plus ICB-tag setuid/setgid/sticky
/// flags into a POSIX mode's permission bits (the low 12 bits: `rwxrwxrwx`
/// plus setuid/setgid/sticky). changeAttr and delete bits carry no POSIX
/// equivalent and are dropped.
pub fn permissions_to_posix_mode(udf_permissions: u32, icb_tag: &IcbTag) -> u32 {
    use perm_bits::*;
    let mut mode = 0u32;
    if udf_permissions & OWNER_READ != 0 {
        mode |= 0o400;
    }
    if udf_permissions & OWNER_WRITE != 0 {
        mode |= 0o200;
    }
    if udf_permissions & OWNER_EXEC != 0 {
        mode |= 0o100;
    }
    if udf_permissions & GROUP_READ != 0 {
        mode |= 0o040;
    }
    if udf_permissions & GROUP_WRITE != 0 {
        mode |= 0o020;
    }
    if udf_permissions & GROUP_EXEC != 0 {
        mode |= 0o010;
    }
    if udf_permissions & OTHER_READ != 0 {
        mode |= 0o004;
    }
    if udf_permissions & OTHER_WRITE != 0 {
        mode |= 0o002;
    }
    if udf_permissions & OTHER_EXEC != 0 {
        mode |= 0o001;
    }
    if icb_tag.setuid() {
        mode |= 0o4000;
    }
    if icb_tag.setgid() {
        mode |= 0o2000;
    }
    if icb_tag.sticky() {
        mode |= 0o1000;
    }
    mode
}

/// Converts a POSIX mode's permission bits back into a UDF permission
/// field. changeAttr and delete are set to mirror the corresponding
/// write bit, matching the common convention of not distinguishing them
/// from write access. setuid/setgid/sticky are returned separately since
/// they live in the ICB tag's flags field, not the permission field.
pub fn posix_mode_to_permissions(mode: u32) -> u32 {
    use perm_bits::*;
    let mut perm = 0u32;

    // Owner.
    if mode & 0o400 != 0 {
        perm |= OWNER_READ;
    }
    if mode & 0o200 != 0 {
        perm |= OWNER_WRITE | (1 << 13) | (1 << 14); // changeAttr, delete mirror write
    }
    if mode & 0o100 != 0 {
        perm |= OWNER_EXEC;
    }
    // Group.
    if mode & 0o040 != 0 {
        perm |= GROUP_READ;
    }
    if mode & 0o020 != 0 {
        perm |= GROUP_WRITE | (1 << 8) | (1 << 9);
    }
    if mode & 0o010 != 0 {
        perm |= GROUP_EXEC;
    }
    // Other.
    if mode & 0o004 != 0 {
        perm |= OTHER_READ;
    }
    if mode & 0o002 != 0 {
        perm |= OTHER_WRITE | (1 << 3) | (1 << 4);
    }
    if mode & 0o001 != 0 {
        perm |= OTHER_EXEC;
    }
    perm
}

/// A recorded uid/gid of `0xFFFF_FFFF`, or anything `>= 0xFFFF`, means "not
/// specified"; the caller's configured default (spec §6 `uid=`/`gid=`
/// mount options) is substituted.
pub fn resolve_id(raw: u32, default_id: u32) -> u32 {
    if raw == u32::MAX || raw >= 0xFFFF {
        default_id
    } else {
        raw
    }
}

/// Device Specification extended attribute (ECMA-167 4/14.10.7, attribute
/// type 12): `(major, minor)` device identifiers for a block or character
/// special file.
pub fn find_device_specification(extended_attributes: &[u8]) -> Option<(u32, u32)> {
    const EA_HEADER_SIZE: usize = 24;
    const DEVICE_SPECIFICATION: u32 = 12;

    let mut offset = EA_HEADER_SIZE;
    while offset + 12 <= extended_attributes.len() {
        let attr_type = u32::from_le_bytes(extended_attributes[offset..offset + 4].try_into().ok()?);
        let attr_length =
            u32::from_le_bytes(extended_attributes[offset + 8..offset + 12].try_into().ok()?) as usize;
        if attr_length < 12 || offset + attr_length > extended_attributes.len() {
            break;
        }
        if attr_type == DEVICE_SPECIFICATION {
            let body = &extended_attributes[offset + 12..offset + attr_length];
            if body.len() >= 12 {
                let major = u32::from_le_bytes(body[4..8].try_into().ok()?);
                let minor = u32::from_le_bytes(body[8..12].try_into().ok()?);
                return Some((major, minor));
            }
        }
        offset += attr_length;
    }
    None
}

/// A resolved ICB plus the address it was read from, presenting the
/// file-type-agnostic view a filesystem layer wants.
#[derive(Debug, Clone)]
pub struct Inode {
    pub icb_address: LbAddr,
    pub entry: Entry,
}

impl Inode {
    pub fn read<T: Read + Seek>(
        cache: &mut BlockCache<T>,
        partitions: &PartitionTable,
        udf_revision: u8,
        icb_address: LbAddr,
    ) -> Result<Self> {
        let entry = icb::read_icb(cache, partitions, udf_revision, icb_address)?;
        Ok(Self { icb_address, entry })
    }

    pub fn file_type(&self) -> FileType {
        self.entry.icb_tag().file_type()
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.file_type(), FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.file_type(), FileType::Symlink)
    }

    pub fn size(&self) -> u64 {
        self.entry.information_length()
    }

    pub fn link_count(&self) -> u16 {
        self.entry.file_link_count()
    }

    pub fn posix_mode(&self) -> u32 {
        let file_type_bits = match self.file_type() {
            FileType::Directory => 0o040000,
            FileType::Regular => 0o100000,
            FileType::Block => 0o060000,
            FileType::Char => 0o020000,
            FileType::Fifo => 0o010000,
            FileType::Socket => 0o140000,
            FileType::Symlink => 0o120000,
            _ => 0,
        };
        file_type_bits | permissions_to_posix_mode(self.entry.permissions(), self.entry.icb_tag())
    }

    pub fn uid(&self, default_uid: u32) -> u32 {
        resolve_id(self.entry.uid(), default_uid)
    }

    pub fn gid(&self, default_gid: u32) -> u32 {
        resolve_id(self.entry.gid(), default_gid)
    }

    pub fn device(&self) -> Option<(u32, u32)> {
        if matches!(self.file_type(), FileType::Block | FileType::Char) {
            find_device_specification(self.entry.extended_attributes())
        } else {
            None
        }
    }

    /// `(access, modification, attribute)` times, decoded to host form.
    pub fn times(&self) -> ((HostTime, Timezone), (HostTime, Timezone), (HostTime, Timezone)) {
        match &self.entry {
            Entry::File { header, .. } => (
                header.access_time.to_host(),
                header.modification_time.to_host(),
                header.attribute_time.to_host(),
            ),
            Entry::ExtendedFile { header, .. } => (
                header.access_time.to_host(),
                header.modification_time.to_host(),
                header.attribute_time.to_host(),
            ),
        }
    }

    /// Creation time, only present on an Extended File Entry.
    pub fn creation_time(&self) -> Option<(HostTime, Timezone)> {
        match &self.entry {
            Entry::ExtendedFile { header, .. } => Some(header.creation_time.to_host()),
            Entry::File { .. } => None,
        }
    }

    pub fn extents<T: Read + Seek>(
        &self,
        cache: &mut BlockCache<T>,
        partitions: &PartitionTable,
        udf_revision: u8,
    ) -> Result<Option<alloc::vec::Vec<Extent>>> {
        self.entry
            .extents(cache, partitions, udf_revision, self.icb_address.partition_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_round_trip_drops_change_attr_and_delete() {
        let mode = 0o754;
        let perm = posix_mode_to_permissions(mode);
        let icb_tag = IcbTag {
            prior_recorded_number_of_direct_entries: hadris_common::types::number::U32::new(0),
            strategy_type: hadris_common::types::number::U16::new(4),
            strategy_parameter: [0; 2],
            max_number_of_entries: hadris_common::types::number::U16::new(1),
            reserved: 0,
            file_type: 5,
            parent_icb: LbAddr::new(0, 0).into(),
            flags: hadris_common::types::number::U16::new(0),
        };
        let back = permissions_to_posix_mode(perm, &icb_tag);
        assert_eq!(back, mode);
    }

    #[test]
    fn setuid_setgid_sticky_round_trip_via_icb_flags() {
        let icb_tag = IcbTag {
            prior_recorded_number_of_direct_entries: hadris_common::types::number::U32::new(0),
            strategy_type: hadris_common::types::number::U16::new(4),
            strategy_parameter: [0; 2],
            max_number_of_entries: hadris_common::types::number::U16::new(1),
            reserved: 0,
            file_type: 5,
            parent_icb: LbAddr::new(0, 0).into(),
            flags: hadris_common::types::number::U16::new((1 << 6) | (1 << 7) | (1 << 8)),
        };
        let mode = permissions_to_posix_mode(0, &icb_tag);
        assert_eq!(mode & 0o7000, 0o7000);
    }

    #[test]
    fn resolve_id_substitutes_unspecified_values() {
        assert_eq!(resolve_id(u32::MAX, 65534), 65534);
        assert_eq!(resolve_id(0xFFFF, 65534), 65534);
        assert_eq!(resolve_id(1000, 65534), 1000);
    }

    #[test]
    fn device_specification_ea_round_trip() {
        let mut ea = alloc::vec![0u8; 24];
        ea.extend_from_slice(&12u32.to_le_bytes()); // attribute type
        ea.push(1); // subtype
        ea.extend_from_slice(&[0, 0, 0]); // reserved
        let attr_length: u32 = 12 + 12; // header + impUseLength/major/minor
        ea.extend_from_slice(&attr_length.to_le_bytes());
        ea.extend_from_slice(&0u32.to_le_bytes()); // impUseLength
        ea.extend_from_slice(&8u32.to_le_bytes()); // major
        ea.extend_from_slice(&3u32.to_le_bytes()); // minor

        let found = find_device_specification(&ea).unwrap();
        assert_eq!(found, (8, 3));
    }
}
