//! Error kinds produced while mounting, reading, writing, or checking a UDF
//! volume (spec §7).

use alloc::string::String;

/// A single structural error observed while parsing on-disk UDF data.
///
/// This carries enough context for a caller to report the precise location
/// of the problem, mirroring the `(code, sector, expected, found)` tuple the
/// original `chkudf` tool keeps in its global `Error` struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDescriptor {
    pub code: ErrorCode,
    pub sector: u32,
    pub expected: u64,
    pub found: u64,
}

impl ErrorDescriptor {
    pub fn new(code: ErrorCode, sector: u32, expected: u64, found: u64) -> Self {
        Self {
            code,
            sector,
            expected,
            found,
        }
    }
}

/// The taxonomy of structural/logical errors a UDF implementation can
/// encounter, as enumerated in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    TagChecksum,
    TagCrc,
    TagWrongId,
    TagWrongLoc,
    TagWrongSerial,
    TagBadVersion,
    CrcLength,
    ReadIo,
    WriteIo,
    NoAnchor,
    NoVds,
    NoFsd,
    NoVat,
    NoSparePartition,
    BadPartitionRef,
    BadLbn,
    BadAd,
    ProhibitedExtentType,
    ProhibitedAdType,
    UnsortedExtents,
    SeqAlloc,
    VolSpaceOverlap,
    FileSpaceOverlap,
    SpaceMapMismatch,
    LinkCountMismatch,
    UniqueIdCollision,
    UniqueIdHighWaterMark,
    NameTooLong,
    NameExists,
    NotEmpty,
    NoMem,
}

impl ErrorCode {
    /// Whether this finding indicates the volume cannot be trusted at the
    /// affected sector, as opposed to a cosmetic or self-describing
    /// discrepancy that leaves the data reachable and correct. Mirrors the
    /// distinction the traditional `fsck` exit-status convention draws
    /// between "errors corrected"/"minor issues" and "errors left
    /// uncorrected" (spec §7, §4.13): a stray tag location, a drifted
    /// bookkeeping counter, or a high-water-mark understatement is worth
    /// flagging but does not mean a file was lost or its contents are wrong.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ErrorCode::TagWrongLoc
                | ErrorCode::TagWrongSerial
                | ErrorCode::TagBadVersion
                | ErrorCode::SpaceMapMismatch
                | ErrorCode::LinkCountMismatch
                | ErrorCode::UniqueIdHighWaterMark
                | ErrorCode::NameTooLong
        )
    }
}

/// Errors that can occur when working with a UDF volume.
#[derive(Debug, thiserror::Error)]
pub enum UdfError {
    /// A structural descriptor failed tag validation (checksum, CRC,
    /// location, version, or serial number) and the volume cannot be
    /// trusted at that point.
    #[error("tag validation failed at sector {sector}: {code:?} (expected {expected:#x}, found {found:#x})", sector = .0.sector, code = .0.code, expected = .0.expected, found = .0.found)]
    Tag(ErrorDescriptor),

    /// No Anchor Volume Descriptor Pointer could be located at any of the
    /// candidate offsets.
    #[error("no anchor volume descriptor pointer found")]
    NoAnchor,

    /// Neither the main nor the reserve Volume Descriptor Sequence could be
    /// resolved into a usable set of descriptors.
    #[error("no usable volume descriptor sequence (main and reserve both failed)")]
    NoVds,

    /// The File Set Descriptor referenced by the Logical Volume Descriptor
    /// could not be read or validated.
    #[error("no file set descriptor at the location recorded by the logical volume descriptor")]
    NoFsd,

    /// A virtual partition has no Virtual Allocation Table, or more than one
    /// was found.
    #[error("no virtual allocation table found for virtual partition")]
    NoVat,

    /// A sparable partition's sparing table could not be located in any of
    /// its mirror locations.
    #[error("no usable sparing table found for sparable partition")]
    NoSparePartition,

    /// A `lb_addr.partition_ref` did not index a partition in the logical
    /// volume's partition-map table.
    #[error("partition reference {0} is out of range")]
    BadPartitionRef(u16),

    /// A partition-relative block number was not `< length_blocks`.
    #[error("logical block {block} is out of range for partition {partition_ref} (length {length})")]
    BadLbn {
        partition_ref: u16,
        block: u32,
        length: u32,
    },

    /// An allocation descriptor referenced a prohibited extent type, or its
    /// structure was otherwise malformed.
    #[error("malformed allocation descriptor: {0}")]
    BadAd(String),

    /// Free-space table extents that should be `ALLOCATED`-only carried a
    /// prohibited extent type.
    #[error("prohibited extent type encountered where only ALLOCATED extents are valid")]
    ProhibitedExtentType,

    /// An allocation-descriptor list used a type the context forbids (e.g.
    /// an extended AD recorded in a table meant only for short ADs).
    #[error("prohibited allocation descriptor type in this context")]
    ProhibitedAdType,

    /// A short_ad free-space table was not in ascending sorted order.
    #[error("unallocated space table extents are not sorted ascending")]
    UnsortedExtents,

    /// Adjacent allocation descriptors could have been coalesced but were
    /// not.
    #[error("adjacent allocation descriptors were not coalesced")]
    SeqAlloc,

    /// Two or more tracked extents occupy overlapping volume space.
    #[error("overlapping allocation in volume space at block {0}")]
    VolSpaceOverlap(u32),

    /// Two or more extents belonging to the same file overlap.
    #[error("overlapping allocation within a single file")]
    FileSpaceOverlap,

    /// The shadow free-space map built by walking the volume disagrees with
    /// the map recorded on disk.
    #[error("recorded space map disagrees with the map built by traversal ({mismatched} blocks)")]
    SpaceMapMismatch { mismatched: usize },

    /// A File Entry's `fileLinkCount` does not match the number of File
    /// Identifier Descriptors that reference it.
    #[error("link count mismatch: FE says {recorded}, counted {counted}")]
    LinkCountMismatch { recorded: u16, counted: u16 },

    /// Two objects were assigned the same unique ID.
    #[error("unique id {0:#x} used more than once")]
    UniqueIdCollision(u64),

    /// A requested name exceeds the 255-byte limit for a file identifier.
    #[error("name too long ({0} bytes, maximum 255)")]
    NameTooLong(usize),

    /// `add` was asked to create a name that already exists in the
    /// directory.
    #[error("name already exists in directory")]
    NameExists,

    /// A rename or unlink targeted a non-empty directory where an empty one
    /// was required.
    #[error("directory not empty")]
    NotEmpty,

    /// An allocation failed because the partition has no free space left
    /// (or none large enough for the requested preallocation).
    #[error("no space left on partition {0}")]
    NoSpace(u16),

    /// Allocation of an in-memory buffer failed.
    #[error("out of memory")]
    NoMem,

    /// The volume recognition sequence did not contain an NSR descriptor.
    #[error("no NSR descriptor found during volume recognition")]
    NoNsr,

    /// The requested mount option referenced a logical volume, partition, or
    /// file set index that does not exist.
    #[error("invalid mount option: {0}")]
    InvalidOption(String),

    /// An operation that requires `write` support was attempted on a
    /// read-only-configured volume.
    #[error("volume is mounted read-only")]
    ReadOnly,

    /// A lookup, unlink, or rename targeted a name that does not exist in
    /// the given directory.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// An I/O error occurred while reading or writing the underlying block
    /// device or image.
    #[error(transparent)]
    Io(#[from] hadris_io::Error),
}

impl UdfError {
    /// Maps a structural error onto the POSIX errno the driver path would
    /// return to its VFS caller (spec §7, "User-visible failures").
    pub fn to_errno(&self) -> i32 {
        match self {
            UdfError::Tag(_)
            | UdfError::NoAnchor
            | UdfError::NoVds
            | UdfError::NoFsd
            | UdfError::NoVat
            | UdfError::NoSparePartition
            | UdfError::BadLbn { .. }
            | UdfError::BadAd(_)
            | UdfError::Io(_) => libc_like::EIO,
            UdfError::BadPartitionRef(_) => libc_like::EIO,
            UdfError::NameTooLong(_) => libc_like::ENAMETOOLONG,
            UdfError::NameExists => libc_like::EEXIST,
            UdfError::NotEmpty => libc_like::ENOTEMPTY,
            UdfError::NoMem => libc_like::ENOMEM,
            UdfError::NoSpace(_) => libc_like::ENOSPC,
            UdfError::ReadOnly => libc_like::EROFS,
            UdfError::NotFound(_) => libc_like::ENOENT,
            _ => libc_like::EIO,
        }
    }
}

/// Minimal errno constants, so this crate does not need to depend on `libc`
/// just to document the driver-path error mapping from spec §7.
mod libc_like {
    pub const EIO: i32 = 5;
    pub const ENAMETOOLONG: i32 = 36;
    pub const EEXIST: i32 = 17;
    pub const ENOTEMPTY: i32 = 39;
    pub const ENOMEM: i32 = 12;
    pub const ENOSPC: i32 = 28;
    pub const EROFS: i32 = 30;
    pub const ENOENT: i32 = 2;
}

pub type Result<T> = core::result::Result<T, UdfError>;
