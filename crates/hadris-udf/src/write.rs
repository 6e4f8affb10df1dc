//! Write path (spec §1, §4.8-§4.12): creating and rewriting files,
//! directories, symbolic links, and device nodes on a mounted volume.
//!
//! Every mutation follows the same shape: free whatever blocks the object
//! used to occupy, decide in-ICB vs. extent-based placement for the new
//! content, allocate and write it, rebuild the File Entry, and mirror the
//! free-space delta into the LVID before persisting it back to disk. None of
//! this crate's structures carry a wall clock, so every entry point below
//! takes the caller's `(HostTime, Timezone)` rather than sampling one.

use alloc::string::String;
use alloc::vec::Vec;

use hadris_common::types::endian::Endian;
use hadris_io::{Read, Seek, Write};

use crate::alloc_desc::{self, AdType};
use crate::dir::{self, FidCharacteristics, FileIdentifierDescriptor};
use crate::error::{Result, UdfError};
use crate::icb::{self, Entry, FileType};
use crate::inode::{self, Inode};
use crate::path::PathComponent;
use crate::space::{self, PartitionSpace};
use crate::time::{HostTime, Timezone, UdfTimestamp};
use crate::types::{Extent, ExtentType, LbAddr, LongAd};
use crate::Volume;

/// The kind of device special file [`Volume::mknod`] creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Block,
    Char,
    Fifo,
    Socket,
}

/// What a freshly created object's data consists of, before it is known
/// whether that data will be recorded in-ICB or in an allocated extent.
enum NodeContent {
    Bytes(Vec<u8>),
    /// A brand new directory, holding only its own `PARENT` FID.
    Directory,
}

/// Snapshot of the header fields a rewrite needs to carry forward unchanged:
/// `(uid, gid, permissions, unique_id, access_time, attribute_time,
/// file_type, parent_icb, directory_sorted, setuid, setgid, sticky,
/// extended_attributes)`.
#[allow(clippy::type_complexity)]
fn header_snapshot(
    entry: &Entry,
) -> (
    u32,
    u32,
    u32,
    u64,
    UdfTimestamp,
    UdfTimestamp,
    FileType,
    LbAddr,
    bool,
    bool,
    bool,
    bool,
    Vec<u8>,
) {
    let icb_tag = entry.icb_tag();
    let (access_time, attribute_time) = match entry {
        Entry::File { header, .. } => (header.access_time, header.attribute_time),
        Entry::ExtendedFile { header, .. } => (header.access_time, header.attribute_time),
    };
    (
        entry.uid(),
        entry.gid(),
        entry.permissions(),
        entry.unique_id(),
        access_time,
        attribute_time,
        icb_tag.file_type(),
        icb_tag.parent_icb.into(),
        icb_tag.directory_sorted(),
        icb_tag.setuid(),
        icb_tag.setgid(),
        icb_tag.sticky(),
        entry.extended_attributes().to_vec(),
    )
}

impl<T: Read + Write + Seek> Volume<T> {
    fn check_writable(&self) -> Result<()> {
        if self.options.read_only {
            return Err(UdfError::ReadOnly);
        }
        Ok(())
    }

    fn partition_space_mut(&mut self, partition_ref: u16) -> Result<&mut PartitionSpace> {
        let idx = partition_ref as usize;
        if idx >= self.space.len() {
            return Err(UdfError::BadPartitionRef(partition_ref));
        }
        if self.space[idx].is_none() {
            let entry = &self.partitions.entries[idx];
            let loaded = space::load_partition_space(&mut self.cache, entry)?
                .ok_or(UdfError::NoSpace(partition_ref))?;
            self.space[idx] = Some(loaded);
        }
        Ok(self.space[idx].as_mut().unwrap())
    }

    fn allocate_blocks(&mut self, partition_ref: u16, goal: u32, count: u32) -> Result<u32> {
        if count == 0 {
            return Ok(0);
        }
        let start = {
            let space = self.partition_space_mut(partition_ref)?;
            space
                .allocate(goal, count)
                .ok_or(UdfError::NoSpace(partition_ref))?
        };
        space::apply_free_count_delta(&mut self.lvid.free_space_table, partition_ref as usize, -(count as i64));
        Ok(start)
    }

    fn free_blocks(&mut self, partition_ref: u16, start: u32, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let space = self.partition_space_mut(partition_ref)?;
        space.free(start, count);
        space::apply_free_count_delta(&mut self.lvid.free_space_table, partition_ref as usize, count as i64);
        Ok(())
    }

    fn next_unique_id(&mut self) -> u64 {
        let id = self.lvid.header.unique_id_high_water_mark();
        self.lvid.header.set_unique_id_high_water_mark(id + 1);
        id
    }

    /// Persists the in-memory LVID back to the sector it was mounted from.
    /// Called after every allocation, free, or unique-ID assignment so a
    /// crash leaves the on-disk free-space accounting no more stale than one
    /// write behind.
    fn persist_lvid(&mut self) -> Result<()> {
        let tag_location = self.lvid_location;
        let serial_number = self.serial_number;
        let mut bytes = self.lvid.retagged_bytes(tag_location, serial_number);
        let sector_size = self.cache.sector_size() as usize;
        let total_sectors = bytes.len().div_ceil(sector_size);
        bytes.resize(total_sectors * sector_size, 0);
        self.cache.write_sectors(tag_location as u64, &bytes)?;
        Ok(())
    }

    fn write_file_entry_at(&mut self, addr: LbAddr, params: &icb::FileEntryParams) -> Result<()> {
        let phys = self.partitions.translate(addr)?;
        let sector_size = self.cache.sector_size() as usize;
        let mut bytes = icb::build_file_entry(params);
        let total_sectors = bytes.len().div_ceil(sector_size);
        bytes.resize(total_sectors * sector_size, 0);
        self.cache.write_sectors(phys as u64, &bytes)?;
        Ok(())
    }

    /// Decides in-ICB vs. extent placement for `probe_len` bytes of content
    /// and writes it. `payload_for` is handed the block the content will
    /// actually live at (the ICB's own block for in-ICB, or the allocated
    /// extent's start block otherwise) so a directory's FID stream can be
    /// re-tagged against its real location. Returns `(ad_type, ad_region,
    /// logical_blocks_recorded, information_length)`.
    fn layout_payload(
        &mut self,
        partition_ref: u16,
        icb_block_for_in_icb: u32,
        extended_attributes_len: usize,
        payload_for: impl Fn(u32) -> Vec<u8>,
        probe_len: usize,
    ) -> Result<(AdType, Vec<u8>, u64, u64)> {
        let sector_size = self.cache.sector_size();
        let icb_capacity =
            (sector_size as usize).saturating_sub(icb::FILE_ENTRY_HEADER_SIZE + extended_attributes_len);

        if probe_len <= icb_capacity {
            let data = payload_for(icb_block_for_in_icb);
            return Ok((AdType::InIcb, data, 0, probe_len as u64));
        }

        let block_count = (probe_len as u64).div_ceil(sector_size as u64) as u32;
        let start = self.allocate_blocks(partition_ref, 0, block_count)?;
        let mut data = payload_for(start);
        data.resize(block_count as usize * sector_size as usize, 0);
        let phys = self.partitions.translate(LbAddr::new(partition_ref, start))?;
        self.cache.write_sectors(phys as u64, &data)?;

        let extent = Extent {
            location: LbAddr::new(partition_ref, start),
            length: probe_len as u32,
            ty: ExtentType::Recorded,
        };
        Ok((
            AdType::Short,
            alloc_desc::write_short_ad_region(&[extent]),
            block_count as u64,
            probe_len as u64,
        ))
    }

    /// Frees every extent an entry's allocation descriptors reference
    /// (a no-op for in-ICB entries).
    fn free_entry_extents(&mut self, inode: &Inode) -> Result<()> {
        let sector_size = self.cache.sector_size();
        if let Some(extents) = inode.extents(&mut self.cache, &self.partitions, self.udf_revision)? {
            for extent in &extents {
                if matches!(extent.ty, ExtentType::Recorded | ExtentType::AllocatedNotRecorded) {
                    let blocks = (extent.length as u64).div_ceil(sector_size as u64) as u32;
                    self.free_blocks(extent.location.partition_ref, extent.location.block, blocks)?;
                }
            }
        }
        Ok(())
    }

    /// Frees an object's data extents and its own ICB block. Called once an
    /// unlink/rmdir/rename-overwrite has dropped an object's last link.
    fn free_node(&mut self, inode: &Inode) -> Result<()> {
        self.free_entry_extents(inode)?;
        self.free_blocks(inode.icb_address.partition_ref, inode.icb_address.block, 1)
    }

    /// Rewrites an existing object's content (file bytes or a directory's
    /// FID stream), freeing its previous extents first and rebuilding its
    /// File Entry in place. `probe_len` is `payload_for(0).len()`; since
    /// none of this crate's payloads vary in length with the block they are
    /// tagged against, the caller computes it once up front.
    fn commit_object_data(
        &mut self,
        inode: &Inode,
        payload_for: impl Fn(u32) -> Vec<u8>,
        probe_len: usize,
        now: HostTime,
        tz: Timezone,
    ) -> Result<Inode> {
        let partition_ref = inode.icb_address.partition_ref;
        self.free_entry_extents(inode)?;

        let (uid, gid, permissions, unique_id, access_time, attribute_time, file_type, parent_icb, directory_sorted, setuid, setgid, sticky, extended_attributes) =
            header_snapshot(&inode.entry);
        let file_link_count = inode.entry.file_link_count();

        let (ad_type, ad_region, logical_blocks_recorded, information_length) = self.layout_payload(
            partition_ref,
            inode.icb_address.block,
            extended_attributes.len(),
            payload_for,
            probe_len,
        )?;

        let tag_location = self.partitions.translate(inode.icb_address)?;
        let params = icb::FileEntryParams {
            file_type,
            permissions,
            uid,
            gid,
            file_link_count,
            unique_id,
            information_length,
            logical_blocks_recorded,
            access_time,
            modification_time: UdfTimestamp::from_host(now, tz),
            attribute_time,
            parent_icb,
            directory_sorted,
            setuid,
            setgid,
            sticky,
            ad_type,
            serial_number: self.serial_number,
            udf_revision: self.udf_revision,
            tag_location,
            extended_attributes,
            ad_region,
        };
        self.write_file_entry_at(inode.icb_address, &params)?;
        self.persist_lvid()?;
        Inode::read(&mut self.cache, &self.partitions, self.udf_revision, inode.icb_address)
    }

    /// Rewrites a directory's FID stream and re-reads its (possibly
    /// relocated) inode.
    fn write_directory_entries(
        &mut self,
        dir_inode: &Inode,
        entries: &[FileIdentifierDescriptor],
        now: HostTime,
        tz: Timezone,
    ) -> Result<Inode> {
        let serial_number = self.serial_number;
        let udf_revision = self.udf_revision;
        let sector_size = self.cache.sector_size();
        let entries_owned = entries.to_vec();
        let probe_len = dir::write_entries(&entries_owned, serial_number, udf_revision, sector_size, 0).len();
        self.commit_object_data(
            dir_inode,
            move |first_block| dir::write_entries(&entries_owned, serial_number, udf_revision, sector_size, first_block),
            probe_len,
            now,
            tz,
        )
    }

    /// Rewrites an existing file's or symlink's data.
    pub fn write_file(&mut self, file: &Inode, data: &[u8], now: HostTime, tz: Timezone) -> Result<Inode> {
        self.check_writable()?;
        if file.is_directory() {
            return Err(UdfError::InvalidOption("write_file target is a directory".into()));
        }
        let owned = data.to_vec();
        let probe_len = owned.len();
        self.commit_object_data(file, move |_| owned.clone(), probe_len, now, tz)
    }

    /// Rewrites only `file_link_count`/`modification_time`, keeping the
    /// object's data and placement untouched. Used after an unlink or a
    /// rename overwrite drops (but does not zero) an object's link count.
    fn update_link_count(&mut self, inode: &Inode, file_link_count: u16, now: HostTime, tz: Timezone) -> Result<()> {
        let ad_type = inode.entry.icb_tag().ad_type();
        let ad_region = inode.entry.allocation_descriptors().to_vec();
        let logical_blocks_recorded = match &inode.entry {
            Entry::File { header, .. } => header.logical_blocks_recorded.get(),
            Entry::ExtendedFile { header, .. } => header.logical_blocks_recorded.get(),
        };
        let (uid, gid, permissions, unique_id, access_time, attribute_time, file_type, parent_icb, directory_sorted, setuid, setgid, sticky, extended_attributes) =
            header_snapshot(&inode.entry);
        let tag_location = self.partitions.translate(inode.icb_address)?;

        let params = icb::FileEntryParams {
            file_type,
            permissions,
            uid,
            gid,
            file_link_count,
            unique_id,
            information_length: inode.entry.information_length(),
            logical_blocks_recorded,
            access_time,
            modification_time: UdfTimestamp::from_host(now, tz),
            attribute_time,
            parent_icb,
            directory_sorted,
            setuid,
            setgid,
            sticky,
            ad_type,
            serial_number: self.serial_number,
            udf_revision: self.udf_revision,
            tag_location,
            extended_attributes,
            ad_region,
        };
        self.write_file_entry_at(inode.icb_address, &params)
    }

    /// Drops an object's link count by one, freeing it once the count
    /// reaches zero (mirroring `checker.rs`'s own link-counting model, in
    /// which only non-deleted, non-parent FIDs contribute to the count).
    fn drop_link(&mut self, inode: &Inode, now: HostTime, tz: Timezone) -> Result<()> {
        let remaining = inode.link_count().saturating_sub(1);
        if remaining == 0 {
            self.free_node(inode)
        } else {
            self.update_link_count(inode, remaining, now, tz)
        }
    }

    /// Shared machinery for `create_file`/`mkdir`/`symlink`/`mknod`:
    /// allocates a fresh ICB block, lays out `content`, writes the new File
    /// Entry, and links it into `parent`. A subdirectory's own FID is the
    /// only thing that gives it a link count — `parent`'s `file_link_count`
    /// is deliberately left untouched (spec §4.11; `checker.rs` tallies link
    /// counts by walking non-`PARENT` FIDs, and a child's `PARENT` FID back
    /// to its parent is never counted against the parent).
    fn create_node(
        &mut self,
        parent: &Inode,
        name: &str,
        file_type: FileType,
        mode: u32,
        uid: u32,
        gid: u32,
        now: HostTime,
        tz: Timezone,
        content: NodeContent,
        extended_attributes: Vec<u8>,
    ) -> Result<Inode> {
        self.check_writable()?;
        if !parent.is_directory() {
            return Err(UdfError::InvalidOption(alloc::format!("{name}: parent is not a directory")));
        }
        let mut entries = self.read_dir(parent)?;
        if dir::lookup(&entries, name)?.is_some() {
            return Err(UdfError::NameExists);
        }
        let cs0 = crate::codec::encode_cs0(name)
            .map_err(|_| UdfError::BadAd("name not representable in CS0".into()))?;
        if cs0.len() > 255 {
            return Err(UdfError::NameTooLong(cs0.len()));
        }

        let partition_ref = parent.icb_address.partition_ref;
        let icb_block = self.allocate_blocks(partition_ref, 0, 1)?;
        let icb_addr = LbAddr::new(partition_ref, icb_block);
        let unique_id = self.next_unique_id();
        let sector_size = self.cache.sector_size();
        let is_directory = matches!(file_type, FileType::Directory);

        let (ad_type, ad_region, logical_blocks_recorded, information_length) = match content {
            NodeContent::Bytes(data) => {
                let probe_len = data.len();
                self.layout_payload(partition_ref, icb_block, extended_attributes.len(), move |_| data.clone(), probe_len)?
            }
            NodeContent::Directory => {
                let parent_fid = FileIdentifierDescriptor {
                    file_version_number: 1,
                    characteristics: FidCharacteristics::PARENT,
                    icb: LongAd::new(sector_size, ExtentType::Recorded, parent.icb_address),
                    implementation_use: Vec::new(),
                    file_identifier: Vec::new(),
                };
                let serial_number = self.serial_number;
                let udf_revision = self.udf_revision;
                let seed = alloc::vec![parent_fid];
                let probe_len = dir::write_entries(&seed, serial_number, udf_revision, sector_size, 0).len();
                self.layout_payload(partition_ref, icb_block, extended_attributes.len(), move |block| {
                    dir::write_entries(&seed, serial_number, udf_revision, sector_size, block)
                }, probe_len)?
            }
        };

        let permissions = inode::posix_mode_to_permissions(mode);
        let setuid = mode & 0o4000 != 0;
        let setgid = mode & 0o2000 != 0;
        let sticky = mode & 0o1000 != 0;
        let ts = UdfTimestamp::from_host(now, tz);
        let tag_location = self.partitions.translate(icb_addr)?;

        let params = icb::FileEntryParams {
            file_type,
            permissions,
            uid,
            gid,
            file_link_count: 1,
            unique_id,
            information_length,
            logical_blocks_recorded,
            access_time: ts,
            modification_time: ts,
            attribute_time: ts,
            parent_icb: parent.icb_address,
            directory_sorted: false,
            setuid,
            setgid,
            sticky,
            ad_type,
            serial_number: self.serial_number,
            udf_revision: self.udf_revision,
            tag_location,
            extended_attributes,
            ad_region,
        };
        self.write_file_entry_at(icb_addr, &params)?;

        let icb_ref = LongAd::new(sector_size, ExtentType::Recorded, icb_addr);
        dir::add_entry(&mut entries, name, icb_ref, is_directory, parent.entry.icb_tag().directory_sorted())?;
        self.write_directory_entries(parent, &entries, now, tz)?;
        self.persist_lvid()?;

        Inode::read(&mut self.cache, &self.partitions, self.udf_revision, icb_addr)
    }

    /// Creates an empty regular file.
    pub fn create_file(
        &mut self,
        parent: &Inode,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        now: HostTime,
        tz: Timezone,
    ) -> Result<Inode> {
        self.create_node(parent, name, FileType::Regular, mode, uid, gid, now, tz, NodeContent::Bytes(Vec::new()), Vec::new())
    }

    /// Creates a new, empty directory holding only its `PARENT` FID.
    pub fn mkdir(
        &mut self,
        parent: &Inode,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        now: HostTime,
        tz: Timezone,
    ) -> Result<Inode> {
        self.create_node(parent, name, FileType::Directory, mode, uid, gid, now, tz, NodeContent::Directory, Vec::new())
    }

    /// Creates a symbolic link whose target is `components`.
    pub fn symlink(
        &mut self,
        parent: &Inode,
        name: &str,
        target: &[PathComponent],
        mode: u32,
        uid: u32,
        gid: u32,
        now: HostTime,
        tz: Timezone,
    ) -> Result<Inode> {
        let data = crate::path::encode_symlink_target(target)?;
        self.create_node(parent, name, FileType::Symlink, mode, uid, gid, now, tz, NodeContent::Bytes(data), Vec::new())
    }

    /// Creates a device node, FIFO, or socket.
    #[allow(clippy::too_many_arguments)]
    pub fn mknod(
        &mut self,
        parent: &Inode,
        name: &str,
        kind: DeviceKind,
        mode: u32,
        uid: u32,
        gid: u32,
        major: u32,
        minor: u32,
        now: HostTime,
        tz: Timezone,
    ) -> Result<Inode> {
        let (file_type, extended_attributes) = match kind {
            DeviceKind::Block => (FileType::Block, icb::build_device_specification_ea(major, minor)),
            DeviceKind::Char => (FileType::Char, icb::build_device_specification_ea(major, minor)),
            DeviceKind::Fifo => (FileType::Fifo, Vec::new()),
            DeviceKind::Socket => (FileType::Socket, Vec::new()),
        };
        self.create_node(parent, name, file_type, mode, uid, gid, now, tz, NodeContent::Bytes(Vec::new()), extended_attributes)
    }

    /// Removes a non-directory entry, freeing its object once its last link
    /// is gone.
    pub fn unlink(&mut self, parent: &Inode, name: &str, now: HostTime, tz: Timezone) -> Result<()> {
        self.check_writable()?;
        let mut entries = self.read_dir(parent)?;
        let target = dir::lookup(&entries, name)?
            .cloned()
            .ok_or_else(|| UdfError::NotFound(String::from(name)))?;
        if target.is_directory() {
            return Err(UdfError::InvalidOption(alloc::format!("{name}: is a directory")));
        }
        let child_addr: LbAddr = target.icb.location.into();
        let child = Inode::read(&mut self.cache, &self.partitions, self.udf_revision, child_addr)?;

        dir::delete_entry(&mut entries, name, self.options.strictness)?;
        self.write_directory_entries(parent, &entries, now, tz)?;
        self.drop_link(&child, now, tz)?;
        self.persist_lvid()?;
        Ok(())
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, parent: &Inode, name: &str, now: HostTime, tz: Timezone) -> Result<()> {
        self.check_writable()?;
        let mut entries = self.read_dir(parent)?;
        let target = dir::lookup(&entries, name)?
            .cloned()
            .ok_or_else(|| UdfError::NotFound(String::from(name)))?;
        if !target.is_directory() {
            return Err(UdfError::InvalidOption(alloc::format!("{name}: not a directory")));
        }
        let child_addr: LbAddr = target.icb.location.into();
        let child = Inode::read(&mut self.cache, &self.partitions, self.udf_revision, child_addr)?;
        let child_entries = self.read_dir(&child)?;
        if child_entries.iter().any(|e| !e.is_deleted() && !e.is_parent()) {
            return Err(UdfError::NotEmpty);
        }

        dir::delete_entry(&mut entries, name, self.options.strictness)?;
        self.write_directory_entries(parent, &entries, now, tz)?;
        self.free_node(&child)?;
        self.persist_lvid()?;
        Ok(())
    }

    fn parent_of(&mut self, dir_inode: &Inode) -> Result<Option<LbAddr>> {
        let entries = self.read_dir(dir_inode)?;
        Ok(entries.iter().find(|e| e.is_parent()).map(|e| e.icb.location.into()))
    }

    /// Whether walking `PARENT` FIDs upward from `destination_parent` ever
    /// reaches `moved_dir` — i.e. whether moving `moved_dir` under
    /// `destination_parent` would make it its own ancestor.
    fn creates_cycle(&mut self, moved_dir: LbAddr, destination_parent: LbAddr) -> Result<bool> {
        let mut cursor = destination_parent;
        let mut hops = 0u32;
        loop {
            if cursor == moved_dir {
                return Ok(true);
            }
            hops += 1;
            if hops > 10_000 {
                return Ok(false);
            }
            let cursor_inode = Inode::read(&mut self.cache, &self.partitions, self.udf_revision, cursor)?;
            match self.parent_of(&cursor_inode)? {
                Some(parent) if parent != cursor => cursor = parent,
                _ => return Ok(false),
            }
        }
    }

    /// Moves or renames `old_name` in `old_parent` to `new_name` in
    /// `new_parent`, following the seven-step rename algorithm of spec
    /// §4.11: reject moving a directory into its own subtree, replace an
    /// existing `new_name` target (requiring it be an empty directory if it
    /// is one), move the FID across parents when they differ, and rewrite
    /// the moved directory's own `PARENT` FID to point at its new parent.
    pub fn rename(
        &mut self,
        old_parent: &Inode,
        old_name: &str,
        new_parent: &Inode,
        new_name: &str,
        now: HostTime,
        tz: Timezone,
    ) -> Result<()> {
        self.check_writable()?;
        if !old_parent.is_directory() || !new_parent.is_directory() {
            return Err(UdfError::InvalidOption("rename requires directory parents".into()));
        }

        let mut old_entries = self.read_dir(old_parent)?;
        let source = dir::lookup(&old_entries, old_name)?
            .cloned()
            .ok_or_else(|| UdfError::NotFound(String::from(old_name)))?;
        let source_addr: LbAddr = source.icb.location.into();

        if source.is_directory() && self.creates_cycle(source_addr, new_parent.icb_address)? {
            return Err(UdfError::InvalidOption(
                "cannot move a directory into its own subtree".into(),
            ));
        }

        let new_parent_same = old_parent.icb_address == new_parent.icb_address;
        let mut new_entries = if new_parent_same {
            old_entries.clone()
        } else {
            self.read_dir(new_parent)?
        };

        if let Some(existing) = dir::lookup(&new_entries, new_name)?.cloned() {
            let existing_addr: LbAddr = existing.icb.location.into();
            let existing_inode = Inode::read(&mut self.cache, &self.partitions, self.udf_revision, existing_addr)?;
            if existing.is_directory() {
                let existing_entries = self.read_dir(&existing_inode)?;
                if existing_entries.iter().any(|e| !e.is_deleted() && !e.is_parent()) {
                    return Err(UdfError::NotEmpty);
                }
                self.free_node(&existing_inode)?;
            } else {
                self.drop_link(&existing_inode, now, tz)?;
            }
            dir::delete_entry(&mut new_entries, new_name, self.options.strictness)?;
        }

        if new_parent_same {
            dir::rename_entry(&mut new_entries, old_name, new_name, new_parent.entry.icb_tag().directory_sorted(), self.options.strictness)?;
            self.write_directory_entries(new_parent, &new_entries, now, tz)?;
        } else {
            dir::delete_entry(&mut old_entries, old_name, self.options.strictness)?;
            self.write_directory_entries(old_parent, &old_entries, now, tz)?;
            dir::add_entry(
                &mut new_entries,
                new_name,
                source.icb,
                source.is_directory(),
                new_parent.entry.icb_tag().directory_sorted(),
            )?;
            self.write_directory_entries(new_parent, &new_entries, now, tz)?;

            if source.is_directory() {
                let source_inode = Inode::read(&mut self.cache, &self.partitions, self.udf_revision, source_addr)?;
                let mut source_entries = self.read_dir(&source_inode)?;
                let sector_size = self.cache.sector_size();
                if let Some(parent_fid) = source_entries.iter_mut().find(|e| e.is_parent()) {
                    parent_fid.icb = LongAd::new(sector_size, ExtentType::Recorded, new_parent.icb_address);
                }
                self.write_directory_entries(&source_inode, &source_entries, now, tz)?;
            }
        }

        self.persist_lvid()?;
        Ok(())
    }

    /// Marks the volume cleanly dismounted and persists the LVID one last
    /// time. Safe to call repeatedly; a volume left `Open` (no `sync` before
    /// drop) is exactly the state a driver leaves behind after a crash.
    pub fn sync(&mut self) -> Result<()> {
        self.lvid.header.integrity_type = hadris_common::types::number::U32::new(1);
        self.persist_lvid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::cache::BlockCache;
    use crate::descriptor::{
        FileSetDescriptor, LogicalVolumeIntegrityDescriptor, LogicalVolumeIntegrityDescriptorHeader,
        PartitionDescriptor, PartitionHeaderDescriptor,
    };
    use crate::options::MountOptions;
    use crate::partition::{PartitionEntry, PartitionMap, PartitionTable};
    use crate::space::SpaceBitmap;
    use hadris_common::types::number::U32;

    const EPOCH: HostTime = HostTime {
        unix_seconds: 1_700_000_000,
        micros: 0,
    };

    const SECTOR_SIZE: u32 = 2048;
    const PARTITION_BLOCKS: u32 = 64;
    const BITMAP_BLOCK: u32 = 1;
    const ROOT_BLOCK: u32 = 2;
    const UDF_REVISION: u8 = 2;
    const SERIAL_NUMBER: u16 = 1;

    /// Builds a tiny one-partition volume directly from [`Volume`]'s own
    /// fields rather than a byte-perfect on-disk image: block 1 holds the
    /// partition's Space Bitmap Descriptor, block 2 holds the root
    /// directory's (in-ICB) File Entry, and blocks 3.. are free. Bypassing
    /// [`Volume::mount`] means none of the AVDP/VDS/LVD tag validation needs
    /// to round-trip; only what the write path itself reads back needs to be
    /// correct.
    fn mount_fixture() -> Volume<Cursor<Vec<u8>>> {
        let mut cache = BlockCache::new(
            Cursor::new(vec![0u8; SECTOR_SIZE as usize * PARTITION_BLOCKS as usize]),
            SECTOR_SIZE,
        );

        let mut bitmap = SpaceBitmap::new_all_free(PARTITION_BLOCKS);
        bitmap.allocate(0, 3); // blocks 0 (unused), 1 (bitmap), 2 (root ICB)
        let bitmap_header = crate::space::SpaceBitmapHeader {
            tag: bytemuck::Zeroable::zeroed(),
            number_of_bits: U32::new(bitmap.number_of_bits),
            number_of_bytes: U32::new(bitmap.bytes.len() as u32),
        };
        let mut bitmap_bytes = bytemuck::bytes_of(&bitmap_header).to_vec();
        bitmap_bytes.extend_from_slice(&bitmap.bytes);
        bitmap_bytes.resize(SECTOR_SIZE as usize, 0);
        cache.write_sectors(BITMAP_BLOCK as u64, &bitmap_bytes).expect("write bitmap");

        let root_addr = LbAddr::new(0, ROOT_BLOCK);
        let parent_fid = FileIdentifierDescriptor {
            file_version_number: 1,
            characteristics: FidCharacteristics::PARENT,
            icb: LongAd::new(SECTOR_SIZE, ExtentType::Recorded, root_addr),
            implementation_use: Vec::new(),
            file_identifier: Vec::new(),
        };
        let root_stream = dir::write_entries(&[parent_fid], SERIAL_NUMBER, UDF_REVISION, SECTOR_SIZE, ROOT_BLOCK);
        let ts = UdfTimestamp::from_host(EPOCH, Timezone::NotSpecified);
        let root_fe = icb::build_file_entry(&icb::FileEntryParams {
            file_type: FileType::Directory,
            permissions: inode::posix_mode_to_permissions(0o755),
            uid: 0,
            gid: 0,
            file_link_count: 1,
            unique_id: 0,
            information_length: root_stream.len() as u64,
            logical_blocks_recorded: 0,
            access_time: ts,
            modification_time: ts,
            attribute_time: ts,
            parent_icb: root_addr,
            directory_sorted: false,
            setuid: false,
            setgid: false,
            sticky: false,
            ad_type: AdType::InIcb,
            serial_number: SERIAL_NUMBER,
            udf_revision: UDF_REVISION,
            tag_location: ROOT_BLOCK,
            extended_attributes: Vec::new(),
            ad_region: root_stream,
        });
        let mut root_sector = root_fe;
        root_sector.resize(SECTOR_SIZE as usize, 0);
        cache.write_sectors(ROOT_BLOCK as u64, &root_sector).expect("write root FE");

        let mut partition_header: PartitionHeaderDescriptor = bytemuck::Zeroable::zeroed();
        partition_header.unallocated_space_bitmap =
            crate::types::ShortAd::new(bitmap_bytes.len() as u32, ExtentType::Recorded, BITMAP_BLOCK);
        let mut descriptor: PartitionDescriptor = bytemuck::Zeroable::zeroed();
        descriptor.partition_starting_location = U32::new(0);
        descriptor.partition_length = U32::new(PARTITION_BLOCKS);
        descriptor.partition_contents_use = *bytemuck::bytes_of(&partition_header)
            .try_into()
            .expect("partition header descriptor is 128 bytes");

        let partitions = PartitionTable {
            entries: alloc::vec![PartitionEntry {
                map: PartitionMap::Type1 {
                    volume_sequence_number: 0,
                    partition_number: 0,
                },
                descriptor,
                vat: None,
                sparing_table: None,
            }],
        };

        let root = Inode::read(&mut cache, &partitions, UDF_REVISION, root_addr).expect("read root inode");

        let mut lvid_header: LogicalVolumeIntegrityDescriptorHeader = bytemuck::Zeroable::zeroed();
        lvid_header.integrity_type = U32::new(0);
        lvid_header.number_of_partitions = U32::new(1);
        lvid_header.set_unique_id_high_water_mark(1);
        let lvid = LogicalVolumeIntegrityDescriptor {
            header: lvid_header,
            free_space_table: alloc::vec![PARTITION_BLOCKS - 3],
            size_table: alloc::vec![PARTITION_BLOCKS],
            implementation_use: Vec::new(),
        };

        let mut file_set: FileSetDescriptor = bytemuck::Zeroable::zeroed();
        file_set.root_directory_icb = LongAd::new(SECTOR_SIZE, ExtentType::Recorded, root_addr);

        Volume {
            cache,
            partitions,
            udf_revision: UDF_REVISION,
            options: MountOptions::default(),
            lvid,
            lvid_location: 0,
            serial_number: SERIAL_NUMBER,
            space: alloc::vec![None],
            file_set,
            root,
        }
    }

    #[test]
    fn create_file_then_read_back() {
        let mut volume = mount_fixture();
        let root = volume.root.clone();
        let file = volume
            .create_file(&root, "hello.txt", 0o644, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("create_file");
        assert!(!file.is_directory());
        assert_eq!(file.link_count(), 1);

        let updated = volume
            .write_file(&file, b"hello world", EPOCH, Timezone::NotSpecified)
            .expect("write_file");
        let data = volume.read_file(&updated).expect("read_file");
        assert_eq!(data, b"hello world");

        let resolved = volume.resolve("hello.txt").expect("resolve");
        assert_eq!(resolved.size(), 11);
    }

    #[test]
    fn mkdir_creates_empty_directory_with_parent_entry() {
        let mut volume = mount_fixture();
        let root = volume.root.clone();
        let dir_inode = volume
            .mkdir(&root, "sub", 0o755, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("mkdir");
        assert!(dir_inode.is_directory());
        assert_eq!(dir_inode.link_count(), 1);

        let entries = volume.read_dir(&dir_inode).expect("read_dir");
        assert!(entries.iter().any(|e| e.is_parent()));

        let root_after = volume.resolve("sub").expect("resolve sub");
        assert!(root_after.is_directory());
    }

    #[test]
    fn unlink_removes_entry_and_frees_space() {
        let mut volume = mount_fixture();
        let root = volume.root.clone();
        volume
            .create_file(&root, "gone.txt", 0o644, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("create_file");
        volume
            .unlink(&root, "gone.txt", EPOCH, Timezone::NotSpecified)
            .expect("unlink");
        assert!(volume.resolve("gone.txt").is_err());
    }

    #[test]
    fn rmdir_rejects_non_empty_directory() {
        let mut volume = mount_fixture();
        let root = volume.root.clone();
        let sub = volume
            .mkdir(&root, "sub", 0o755, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("mkdir");
        volume
            .create_file(&sub, "child.txt", 0o644, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("create_file");
        let err = volume.rmdir(&root, "sub", EPOCH, Timezone::NotSpecified).unwrap_err();
        assert!(matches!(err, UdfError::NotEmpty));
    }

    #[test]
    fn rename_moves_entry_between_directories() {
        let mut volume = mount_fixture();
        let root = volume.root.clone();
        volume
            .create_file(&root, "a.txt", 0o644, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("create_file");
        let sub = volume
            .mkdir(&root, "sub", 0o755, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("mkdir");

        volume
            .rename(&root, "a.txt", &sub, "b.txt", EPOCH, Timezone::NotSpecified)
            .expect("rename");

        assert!(volume.resolve("a.txt").is_err());
        let moved = volume.resolve("sub/b.txt").expect("resolve moved file");
        assert!(!moved.is_directory());
    }

    #[test]
    fn rename_rejects_moving_directory_into_itself() {
        let mut volume = mount_fixture();
        let root = volume.root.clone();
        let sub = volume
            .mkdir(&root, "sub", 0o755, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("mkdir");
        let nested = volume
            .mkdir(&sub, "nested", 0o755, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("mkdir nested");

        let err = volume
            .rename(&root, "sub", &nested, "sub", EPOCH, Timezone::NotSpecified)
            .unwrap_err();
        assert!(matches!(err, UdfError::InvalidOption(_)));
    }

    #[test]
    fn mknod_records_device_major_minor() {
        let mut volume = mount_fixture();
        let root = volume.root.clone();
        let node = volume
            .mknod(&root, "dev0", DeviceKind::Char, 0o600, 0, 0, 7, 3, EPOCH, Timezone::NotSpecified)
            .expect("mknod");
        assert_eq!(node.device(), Some((7, 3)));
    }

    #[test]
    fn read_only_volume_rejects_mutations() {
        let mut volume = mount_fixture();
        volume.options.read_only = true;
        let root = volume.root.clone();
        let err = volume
            .create_file(&root, "a.txt", 0o644, 0, 0, EPOCH, Timezone::NotSpecified)
            .unwrap_err();
        assert!(matches!(err, UdfError::ReadOnly));
        let err = volume.unlink(&root, "a.txt", EPOCH, Timezone::NotSpecified).unwrap_err();
        assert!(matches!(err, UdfError::ReadOnly));
    }

    #[test]
    fn strict_delete_zeroes_fid_icb() {
        let mut volume = mount_fixture();
        volume.options.strictness = crate::options::Strictness::Strict;
        let root = volume.root.clone();
        volume
            .create_file(&root, "a.txt", 0o644, 0, 0, EPOCH, Timezone::NotSpecified)
            .expect("create_file");
        volume.unlink(&root, "a.txt", EPOCH, Timezone::NotSpecified).expect("unlink");

        let entries = volume.read_dir(&root).expect("read_dir");
        let deleted = entries.iter().find(|e| e.is_deleted() && !e.is_parent()).expect("tombstone survives");
        assert!(deleted.icb.is_terminator());
    }
}
