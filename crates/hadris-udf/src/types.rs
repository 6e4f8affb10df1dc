//! Core data-model primitives shared across the rest of the crate (spec §3):
//! extents, logical block addresses, and the three allocation-descriptor
//! encodings.

use hadris_common::types::{endian::{Endian, LittleEndian}, number::U32};

/// The type of an extent, packed into the top 2 bits of a 32-bit
/// length field (ECMA-167 4/14.14.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentType {
    /// Recorded and allocated.
    Recorded,
    /// Allocated but not recorded (reads as zero, write retains the
    /// allocation).
    AllocatedNotRecorded,
    /// Not allocated and not recorded.
    NotAllocated,
    /// The extent points at the next block of allocation descriptors
    /// (an Allocation Extent Descriptor).
    NextAllocExtent,
}

impl ExtentType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => ExtentType::Recorded,
            1 => ExtentType::AllocatedNotRecorded,
            2 => ExtentType::NotAllocated,
            3 => ExtentType::NextAllocExtent,
            _ => unreachable!(),
        }
    }

    pub fn to_bits(self) -> u8 {
        match self {
            ExtentType::Recorded => 0,
            ExtentType::AllocatedNotRecorded => 1,
            ExtentType::NotAllocated => 2,
            ExtentType::NextAllocExtent => 3,
        }
    }
}

/// The low-30/high-2 split used by every allocation-descriptor length
/// field.
pub const EXTENT_LENGTH_MASK: u32 = 0x3FFF_FFFF;

/// Splits a packed `(length: u30, type: u2)` field.
pub fn split_extent_len_type(raw: u32) -> (u32, ExtentType) {
    let length = raw & EXTENT_LENGTH_MASK;
    let ty = ExtentType::from_bits((raw >> 30) as u8);
    (length, ty)
}

/// Packs a `(length, type)` pair back into a u32 field.
pub fn pack_extent_len_type(length: u32, ty: ExtentType) -> u32 {
    debug_assert!(length <= EXTENT_LENGTH_MASK);
    (length & EXTENT_LENGTH_MASK) | ((ty.to_bits() as u32) << 30)
}

/// A logical block address: `(partition_ref, block)` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LbAddr {
    pub partition_ref: u16,
    pub block: u32,
}

impl LbAddr {
    pub const fn new(partition_ref: u16, block: u32) -> Self {
        Self {
            partition_ref,
            block,
        }
    }
}

/// An on-disk `lb_addr` (ECMA-167 4/7.1): 6 bytes, block then partition
/// reference. Stored as a raw byte array (rather than nesting `U32`/`U16`
/// directly) so the type's alignment stays 1 and its size stays exactly 6 —
/// nesting 4-byte-aligned fields here would pad the struct out to 8 bytes
/// and desynchronize every allocation descriptor that embeds it.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawLbAddr([u8; 6]);

impl RawLbAddr {
    pub fn block(&self) -> u32 {
        u32::from_le_bytes(self.0[0..4].try_into().unwrap())
    }

    pub fn partition_ref(&self) -> u16 {
        u16::from_le_bytes(self.0[4..6].try_into().unwrap())
    }
}

impl From<RawLbAddr> for LbAddr {
    fn from(raw: RawLbAddr) -> Self {
        LbAddr::new(raw.partition_ref(), raw.block())
    }
}

impl From<LbAddr> for RawLbAddr {
    fn from(addr: LbAddr) -> Self {
        let mut bytes = [0u8; 6];
        bytes[0..4].copy_from_slice(&addr.block.to_le_bytes());
        bytes[4..6].copy_from_slice(&addr.partition_ref.to_le_bytes());
        RawLbAddr(bytes)
    }
}

/// A resolved, in-memory extent, independent of whether it was read from a
/// short, long, or extended allocation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub location: LbAddr,
    pub length: u32,
    pub ty: ExtentType,
}

/// `short_ad` (ECMA-167 4/14.14.1): partition is inherited from the
/// enclosing ICB.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShortAd {
    pub ext_len_and_type: U32<LittleEndian>,
    pub location: U32<LittleEndian>,
}

pub const SHORT_AD_SIZE: usize = 8;
static_assertions::const_assert_eq!(core::mem::size_of::<ShortAd>(), SHORT_AD_SIZE);

impl ShortAd {
    pub fn length_and_type(&self) -> (u32, ExtentType) {
        split_extent_len_type(self.ext_len_and_type.get())
    }

    pub fn new(length: u32, ty: ExtentType, location: u32) -> Self {
        Self {
            ext_len_and_type: U32::new(pack_extent_len_type(length, ty)),
            location: U32::new(location),
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.ext_len_and_type.get() == 0
    }
}

/// `long_ad` (ECMA-167 4/14.14.2): partition is explicit per extent.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LongAd {
    pub ext_len_and_type: U32<LittleEndian>,
    pub location: RawLbAddr,
    pub impl_use: [u8; 6],
}

pub const LONG_AD_SIZE: usize = 16;
static_assertions::const_assert_eq!(core::mem::size_of::<LongAd>(), LONG_AD_SIZE);

impl LongAd {
    pub fn length_and_type(&self) -> (u32, ExtentType) {
        split_extent_len_type(self.ext_len_and_type.get())
    }

    pub fn new(length: u32, ty: ExtentType, location: LbAddr) -> Self {
        Self {
            ext_len_and_type: U32::new(pack_extent_len_type(length, ty)),
            location: location.into(),
            impl_use: [0; 6],
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.ext_len_and_type.get() == 0
    }
}

/// `ext_ad` (ECMA-167 4/14.14.3): as `long_ad`, plus a separately recorded
/// length and information length. Tolerated on read; never emitted on
/// write (spec §4.10).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ExtAd {
    pub ext_len: U32<LittleEndian>,
    pub recorded_len: U32<LittleEndian>,
    pub information_len: U32<LittleEndian>,
    pub location: RawLbAddr,
    pub impl_use: [u8; 2],
}

pub const EXT_AD_SIZE: usize = 20;
static_assertions::const_assert_eq!(core::mem::size_of::<ExtAd>(), EXT_AD_SIZE);

impl ExtAd {
    pub fn length_and_type(&self) -> (u32, ExtentType) {
        split_extent_len_type(self.ext_len.get())
    }

    pub fn is_terminator(&self) -> bool {
        self.ext_len.get() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_len_type_round_trip() {
        for ty in [
            ExtentType::Recorded,
            ExtentType::AllocatedNotRecorded,
            ExtentType::NotAllocated,
            ExtentType::NextAllocExtent,
        ] {
            let packed = pack_extent_len_type(0x1234, ty);
            let (len, decoded_ty) = split_extent_len_type(packed);
            assert_eq!(len, 0x1234);
            assert_eq!(decoded_ty, ty);
        }
    }

    #[test]
    fn short_ad_zero_length_is_terminator() {
        let ad = ShortAd::new(0, ExtentType::Recorded, 0);
        assert!(ad.is_terminator());
        let ad = ShortAd::new(1, ExtentType::Recorded, 0);
        assert!(!ad.is_terminator());
    }

    #[test]
    fn sizes_match_ecma167() {
        assert_eq!(core::mem::size_of::<ShortAd>(), 8);
        assert_eq!(core::mem::size_of::<LongAd>(), 16);
        assert_eq!(core::mem::size_of::<ExtAd>(), 20);
    }
}
