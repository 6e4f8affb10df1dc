//! Volume Recognition Sequence scan (spec §4.5, ECMA-167 2/8.3, 2/9).
//!
//! Starting at sector 16 and continuing one sector at a time, each 2048-byte
//! sector is a Volume Structure Descriptor whose first 5 bytes are a
//! standard identifier. A `BEA01` opens the sequence, an `NSR02`/`NSR03`
//! confirms UDF, a `TEA01` closes it; any `CD001` (ISO 9660) or `BOOT2`
//! descriptor encountered in between is tolerated and skipped.

use hadris_io::{Read, Seek, SeekFrom};

/// Fixed size of a Volume Structure Descriptor / sector used by the VRS,
/// independent of the medium's logical sector size (ECMA-167 2/8.3.1).
pub const VRS_SECTOR_SIZE: u64 = 2048;

/// First sector the VRS may begin at (ECMA-167 2/8.3.1: "starting at sector
/// 16").
pub const VRS_START_SECTOR: u64 = 16;

/// Maximum number of sectors scanned before giving up, guarding against
/// corrupt media with no `TEA01` ever appearing.
pub const VRS_MAX_SECTORS: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsrVersion {
    /// `NSR02`: UDF revision 1.50 and earlier.
    Nsr02,
    /// `NSR03`: UDF revision 2.00 and later.
    Nsr03,
}

impl NsrVersion {
    /// The `udf_revision` byte used by [`crate::tag::validate_tag`]: 2 for
    /// NSR02, 3 for NSR03.
    pub fn udf_revision(self) -> u8 {
        match self {
            NsrVersion::Nsr02 => 2,
            NsrVersion::Nsr03 => 3,
        }
    }
}

/// Outcome of a successful volume recognition scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionResult {
    pub nsr: NsrVersion,
    /// Sector at which the `NSR0x` descriptor itself was found.
    pub nsr_sector: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StandardId {
    Bea01,
    Nsr02,
    Nsr03,
    Tea01,
    Cd001,
    Boot2,
    Unknown,
}

fn classify(ident: &[u8; 5]) -> StandardId {
    match ident {
        b"BEA01" => StandardId::Bea01,
        b"NSR02" => StandardId::Nsr02,
        b"NSR03" => StandardId::Nsr03,
        b"TEA01" => StandardId::Tea01,
        b"CD001" => StandardId::Cd001,
        b"BOOT2" => StandardId::Boot2,
        _ => StandardId::Unknown,
    }
}

/// Scans `source` for the Volume Recognition Sequence, returning the NSR
/// version found. `source` must address the medium in `sector_size`-byte
/// units consistent with [`crate::geometry::Geometry`]; the VRS itself is
/// always read in fixed 2048-byte units per ECMA-167, so `sector_size` is
/// only used to translate that fixed unit into a byte offset (which is
/// identical for any sector size, since 2048 is expressed in bytes either
/// way).
pub fn scan<T: Read + Seek>(source: &mut T) -> crate::error::Result<RecognitionResult> {
    let mut saw_bea01 = false;
    let mut nsr = None;

    for i in 0..VRS_MAX_SECTORS {
        let sector = VRS_START_SECTOR + i;
        let offset = sector * VRS_SECTOR_SIZE;
        source.seek(SeekFrom::Start(offset))?;

        let mut ident = [0u8; 5];
        if source.read_exact(&mut ident).is_err() {
            break;
        }
        // Skip the structure type/version bytes (6 and 7), not needed here.
        let mut rest = [0u8; VRS_SECTOR_SIZE as usize - 5];
        source.read_exact(&mut rest)?;

        match classify(&ident) {
            StandardId::Bea01 => saw_bea01 = true,
            StandardId::Nsr02 if saw_bea01 => {
                nsr = Some(RecognitionResult {
                    nsr: NsrVersion::Nsr02,
                    nsr_sector: sector,
                })
            }
            StandardId::Nsr03 if saw_bea01 => {
                nsr = Some(RecognitionResult {
                    nsr: NsrVersion::Nsr03,
                    nsr_sector: sector,
                })
            }
            StandardId::Tea01 if saw_bea01 => {
                return nsr.ok_or(crate::error::UdfError::NoNsr);
            }
            StandardId::Cd001 | StandardId::Boot2 | StandardId::Unknown => {}
            _ => {}
        }

        // An all-zero identifier (common past the end of a short VRS on
        // some media) means there is nothing more to scan.
        if ident == [0u8; 5] && !saw_bea01 {
            break;
        }
    }

    nsr.ok_or(crate::error::UdfError::NoNsr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn vsd(ident: &[u8; 5], structure_type: u8) -> [u8; VRS_SECTOR_SIZE as usize] {
        let mut buf = [0u8; VRS_SECTOR_SIZE as usize];
        buf[0] = structure_type;
        buf[1..6].copy_from_slice(ident);
        buf[6] = 1; // standard version
        buf
    }

    fn make_image(descriptors: &[[u8; VRS_SECTOR_SIZE as usize]]) -> Cursor<Vec<u8>> {
        let mut data = vec![0u8; (VRS_START_SECTOR as usize) * VRS_SECTOR_SIZE as usize];
        for d in descriptors {
            data.extend_from_slice(d);
        }
        Cursor::new(data)
    }

    #[test]
    fn scans_bea01_nsr03_tea01() {
        let mut image = make_image(&[
            vsd(b"BEA01", 0),
            vsd(b"NSR03", 0),
            vsd(b"TEA01", 0),
        ]);
        let result = scan(&mut image).unwrap();
        assert_eq!(result.nsr, NsrVersion::Nsr03);
        assert_eq!(result.nsr_sector, VRS_START_SECTOR + 1);
    }

    #[test]
    fn tolerates_cd001_interleaved() {
        let mut image = make_image(&[
            vsd(b"BEA01", 0),
            vsd(b"CD001", 1),
            vsd(b"NSR02", 0),
            vsd(b"TEA01", 0),
        ]);
        let result = scan(&mut image).unwrap();
        assert_eq!(result.nsr, NsrVersion::Nsr02);
    }

    #[test]
    fn missing_nsr_is_an_error() {
        let mut image = make_image(&[vsd(b"BEA01", 0), vsd(b"TEA01", 0)]);
        assert!(scan(&mut image).is_err());
    }

    #[test]
    fn missing_bea01_is_an_error() {
        let mut image = make_image(&[vsd(b"NSR03", 0), vsd(b"TEA01", 0)]);
        assert!(scan(&mut image).is_err());
    }
}
