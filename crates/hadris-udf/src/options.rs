//! Mount options (spec §6): the knobs a caller sets before opening a volume,
//! mirroring the original driver's `mount -t udf -o ...` option string.

use alloc::string::String;

/// How strictly recognition and descriptor validation are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Damaged-but-recoverable descriptors (failed CRC/location/version,
    /// checksum still good) are tolerated and reported, not fatal.
    #[default]
    Lenient,
    /// Any damaged descriptor aborts the mount (`strict` option).
    Strict,
}

/// Mount-time options (spec §6 table). Every field has a spec-mandated
/// default; construct with [`MountOptions::default`] and layer `with_*`
/// calls for anything the caller overrides.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// `bs=N`: sector size in bytes. `None` probes the medium.
    pub sector_size: Option<u32>,
    /// `session=N`: which session of a multi-session medium to mount.
    pub session: Option<u32>,
    /// `lastblock=N`: overrides the medium's reported last valid block,
    /// for media that misreport their own size.
    pub last_block: Option<u32>,
    /// `anchor=N`: forces a specific Anchor Volume Descriptor Pointer
    /// location instead of probing the usual candidates.
    pub anchor: Option<u32>,
    /// `volume=N`: which Logical Volume Descriptor to mount, for volume
    /// sets with more than one.
    pub volume: u32,
    /// `partition=N`: which logical partition within the volume to use as
    /// the file set's home partition, for volumes with more than one.
    pub partition: u32,
    /// `fileset=N`: which File Set Descriptor to mount within the chosen
    /// partition, for multi-fileset volumes.
    pub fileset: u32,
    /// `rootdir=N`: overrides the root directory ICB address instead of
    /// using the one recorded in the File Set Descriptor.
    pub root_dir: Option<u32>,
    /// `uid=N`: substituted when a recorded uid is unspecified.
    pub default_uid: u32,
    /// `gid=N`: substituted when a recorded gid is unspecified.
    pub default_gid: u32,
    /// `umask=N`: bits cleared from every reported permission mode.
    pub umask: u32,
    /// `unhide`: present entries whose `HIDDEN` characteristic is set.
    pub unhide: bool,
    /// `undelete`: present entries whose `DELETED` characteristic is set
    /// (read-only recovery aid; writes never clear `DELETED` this way).
    pub undelete: bool,
    /// `strict`: see [`Strictness`].
    pub strictness: Strictness,
    /// `utf8`: decode CS0 names as UTF-8 without host-safe mangling.
    pub utf8: bool,
    /// `iocharset=X`: the host character set mangled names are produced
    /// for, when `utf8` is not set.
    pub iocharset: Option<String>,
    /// `novrs`: skip the Volume Recognition Sequence scan (spec §4.5),
    /// going directly to anchor discovery. For media that omit VRS markers
    /// outright.
    pub skip_vrs: bool,
    /// `ro`: mirrors the original driver's `mount -o ro`. Every mutating
    /// operation in the write path rejects with [`crate::error::UdfError::ReadOnly`]
    /// instead of touching the medium.
    pub read_only: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            sector_size: None,
            session: None,
            last_block: None,
            anchor: None,
            volume: 0,
            partition: 0,
            fileset: 0,
            root_dir: None,
            default_uid: 0,
            default_gid: 0,
            umask: 0,
            unhide: false,
            undelete: false,
            strictness: Strictness::Lenient,
            utf8: false,
            iocharset: None,
            skip_vrs: false,
            read_only: false,
        }
    }
}

impl MountOptions {
    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = Some(sector_size);
        self
    }

    pub fn with_session(mut self, session: u32) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_last_block(mut self, last_block: u32) -> Self {
        self.last_block = Some(last_block);
        self
    }

    pub fn with_anchor(mut self, anchor: u32) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_volume(mut self, volume: u32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_fileset(mut self, fileset: u32) -> Self {
        self.fileset = fileset;
        self
    }

    pub fn with_root_dir(mut self, root_dir: u32) -> Self {
        self.root_dir = Some(root_dir);
        self
    }

    pub fn with_default_uid(mut self, uid: u32) -> Self {
        self.default_uid = uid;
        self
    }

    pub fn with_default_gid(mut self, gid: u32) -> Self {
        self.default_gid = gid;
        self
    }

    pub fn with_umask(mut self, umask: u32) -> Self {
        self.umask = umask;
        self
    }

    pub fn with_unhide(mut self, unhide: bool) -> Self {
        self.unhide = unhide;
        self
    }

    pub fn with_undelete(mut self, undelete: bool) -> Self {
        self.undelete = undelete;
        self
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_utf8(mut self, utf8: bool) -> Self {
        self.utf8 = utf8;
        self
    }

    pub fn with_iocharset(mut self, iocharset: String) -> Self {
        self.iocharset = Some(iocharset);
        self
    }

    pub fn with_skip_vrs(mut self, skip_vrs: bool) -> Self {
        self.skip_vrs = skip_vrs;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Applies `umask` to a raw POSIX mode, as the driver does before
    /// returning stat data to a caller.
    pub fn apply_umask(&self, mode: u32) -> u32 {
        mode & !self.umask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let opts = MountOptions::default();
        assert_eq!(opts.volume, 0);
        assert_eq!(opts.partition, 0);
        assert_eq!(opts.fileset, 0);
        assert!(!opts.unhide);
        assert!(!opts.undelete);
        assert_eq!(opts.strictness, Strictness::Lenient);
        assert!(!opts.read_only);
    }

    #[test]
    fn builder_chains_overrides() {
        let opts = MountOptions::default()
            .with_sector_size(2048)
            .with_default_uid(1000)
            .with_default_gid(1000)
            .with_umask(0o022)
            .with_strictness(Strictness::Strict);
        assert_eq!(opts.sector_size, Some(2048));
        assert_eq!(opts.default_uid, 1000);
        assert_eq!(opts.apply_umask(0o777), 0o755);
        assert_eq!(opts.strictness, Strictness::Strict);
    }
}
