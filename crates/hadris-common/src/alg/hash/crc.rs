use crc::{CRC_16_XMODEM, CRC_32_ISO_HDLC, Crc};

const HASHER_ISO_HDLC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const HASHER_ITU_T: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// A CRC-32 checksum with the ISO-HDLC polynomial.
#[derive(Debug, Copy, Clone)]
pub struct Crc32HasherIsoHdlc;

impl Crc32HasherIsoHdlc {
    pub fn checksum(data: &[u8]) -> u32 {
        HASHER_ISO_HDLC.checksum(data)
    }
}

/// A CRC-16 checksum using the CRC-ITU-T polynomial (0x1021), zero initial
/// value, no reflection and no final XOR. This is the checksum used by the
/// ECMA-167 / OSTA-UDF descriptor tag.
#[derive(Debug, Copy, Clone)]
pub struct Crc16HasherItuT;

impl Crc16HasherItuT {
    pub fn checksum(data: &[u8]) -> u16 {
        HASHER_ITU_T.checksum(data)
    }
}
