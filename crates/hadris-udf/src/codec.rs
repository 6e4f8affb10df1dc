//! Endian/codec layer (spec §4.2).
//!
//! All on-disk multi-byte fields are little-endian (re-exported from
//! [`hadris_common::types`]). This module owns the two string encodings UDF
//! layers on top of that: **d-string** / **d-chars**, the OSTA-compressed
//! Unicode (CS0) scheme, and host-safe filename mangling.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hadris_common::alg::hash::crc::Crc16HasherItuT;

/// CS0 compression identifiers (ECMA-167 1/7.2.12).
pub const COMPRESSION_ID_8: u8 = 8;
pub const COMPRESSION_ID_16: u8 = 16;

/// Decodes a CS0 (OSTA compressed Unicode) byte string into UTF-8.
///
/// `bytes[0]` is the compression id (8 or 16); the remaining bytes are
/// either one byte per code point (8-bit) or two big-endian bytes per code
/// point (16-bit), per `udf_CS0toUTF8` in the original driver.
pub fn decode_cs0(bytes: &[u8]) -> Result<String, Cs0Error> {
    if bytes.is_empty() {
        return Ok(String::new());
    }
    let compression_id = bytes[0];
    let payload = &bytes[1..];
    match compression_id {
        COMPRESSION_ID_8 => {
            let mut out = String::with_capacity(payload.len());
            for &b in payload {
                push_code_point(&mut out, b as u32);
            }
            Ok(out)
        }
        COMPRESSION_ID_16 => {
            if payload.len() % 2 != 0 {
                return Err(Cs0Error::TruncatedUnit);
            }
            let mut out = String::with_capacity(payload.len() / 2);
            for chunk in payload.chunks_exact(2) {
                let code = u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
                push_code_point(&mut out, code);
            }
            Ok(out)
        }
        other => Err(Cs0Error::UnknownCompressionId(other)),
    }
}

fn push_code_point(out: &mut String, code: u32) {
    // 8-bit and 16-bit code points here are Latin-1/BMP values, not
    // necessarily valid standalone Unicode scalars (e.g. surrogate halves
    // would not be), but ECMA-167 treats CS0 as a byte-for-byte transform so
    // we mirror the original driver's 1-2-3 byte UTF-8 expansion rather than
    // rejecting values `char::from_u32` would refuse.
    if code < 0x80 {
        out.push(code as u8 as char);
    } else if code < 0x800 {
        let b0 = 0xC0 | ((code >> 6) as u8);
        let b1 = 0x80 | ((code & 0x3F) as u8);
        // SAFETY: constructed as a valid 2-byte UTF-8 sequence for any code
        // in [0x80, 0x800).
        unsafe {
            out.as_mut_vec().extend_from_slice(&[b0, b1]);
        }
    } else {
        let b0 = 0xE0 | ((code >> 12) as u8);
        let b1 = 0x80 | (((code >> 6) & 0x3F) as u8);
        let b2 = 0x80 | ((code & 0x3F) as u8);
        unsafe {
            out.as_mut_vec().extend_from_slice(&[b0, b1, b2]);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cs0Error {
    UnknownCompressionId(u8),
    TruncatedUnit,
    InvalidUtf8,
    CodePointTooLarge(u32),
}

/// Encodes a UTF-8 string into CS0, trying 8-bit compression first and
/// falling back to 16-bit if any code point exceeds `0xFF`, mirroring the
/// encode-side rule in spec §4.2. Code points above `0xFFFF` cannot be
/// represented by CS0 and are rejected.
pub fn encode_cs0(s: &str) -> Result<Vec<u8>, Cs0Error> {
    let mut code_points = Vec::with_capacity(s.len());
    for c in s.chars() {
        let cp = c as u32;
        if cp > 0xFFFF {
            return Err(Cs0Error::CodePointTooLarge(cp));
        }
        code_points.push(cp);
    }

    let needs_16bit = code_points.iter().any(|&cp| cp > 0xFF);
    let mut out = Vec::with_capacity(1 + code_points.len() * if needs_16bit { 2 } else { 1 });
    if needs_16bit {
        out.push(COMPRESSION_ID_16);
        for cp in code_points {
            out.extend_from_slice(&(cp as u16).to_be_bytes());
        }
    } else {
        out.push(COMPRESSION_ID_8);
        for cp in code_points {
            out.push(cp as u8);
        }
    }
    Ok(out)
}

/// Decodes a **d-string** field: a fixed-width buffer whose first byte is
/// the CS0 compression id, whose last byte is the payload length, and whose
/// interior is the CS0 payload padded with zeros.
pub fn decode_dstring(field: &[u8]) -> Result<String, Cs0Error> {
    if field.is_empty() {
        return Ok(String::new());
    }
    let len = *field.last().unwrap() as usize;
    if len == 0 {
        return Ok(String::new());
    }
    let len = len.min(field.len() - 1);
    decode_cs0(&field[..len])
}

/// Encodes a UTF-8 string into a fixed-width d-string field.
pub fn encode_dstring(s: &str, field_len: usize) -> Result<Vec<u8>, Cs0Error> {
    let cs0 = encode_cs0(s)?;
    let mut out = Vec::with_capacity(field_len);
    let copy_len = cs0.len().min(field_len - 1);
    out.extend_from_slice(&cs0[..copy_len]);
    out.resize(field_len - 1, 0);
    out.push(copy_len as u8);
    Ok(out)
}

/// Illegal characters in a UDF filename once mangled for a host filesystem:
/// NUL and the path separator are always illegal, plus whatever the caller's
/// host adds (e.g. `\` and `:` on some hosts).
pub fn is_host_illegal(byte: u8, extra_illegal: &[u8]) -> bool {
    byte == 0 || byte == b'/' || extra_illegal.contains(&byte)
}

/// Mangles a decoded CS0 name into a host-safe name (spec §4.2): illegal
/// bytes become `_`, a 4-hex-digit CRC-ITU-T of the original CS0 bytes is
/// appended as `#XXXX`, an extension of up to 5 characters is preserved, and
/// the whole thing is truncated to 255 bytes.
pub fn mangle_name(original_cs0: &[u8], decoded: &str, extra_illegal: &[u8]) -> String {
    const MAX_LEN: usize = 255;
    let crc = Crc16HasherItuT::checksum(original_cs0);
    let suffix = format!("#{crc:04X}");

    let (stem, ext) = match decoded.rfind('.') {
        Some(idx) if idx > 0 && decoded.len() - idx - 1 <= 5 => {
            (&decoded[..idx], &decoded[idx..])
        }
        _ => (decoded, ""),
    };

    let mut mangled_stem: String = stem
        .bytes()
        .map(|b| {
            if is_host_illegal(b, extra_illegal) {
                '_'
            } else {
                b as char
            }
        })
        .collect();

    let budget = MAX_LEN.saturating_sub(suffix.len() + ext.len());
    if mangled_stem.len() > budget {
        mangled_stem.truncate(budget);
    }

    let mut out = String::with_capacity(mangled_stem.len() + suffix.len() + ext.len());
    out.push_str(&mangled_stem);
    out.push_str(&suffix);
    out.push_str(ext);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ascii() {
        let encoded = encode_cs0("hello.txt").unwrap();
        assert_eq!(encoded[0], COMPRESSION_ID_8);
        let decoded = decode_cs0(&encoded).unwrap();
        assert_eq!(decoded, "hello.txt");
    }

    #[test]
    fn round_trip_bmp() {
        let name = "caf\u{e9}.txt"; // é is > 0xFF? no, 0xE9 fits in 8-bit.
        let encoded = encode_cs0(name).unwrap();
        assert_eq!(encoded[0], COMPRESSION_ID_8);
        assert_eq!(decode_cs0(&encoded).unwrap(), name);
    }

    #[test]
    fn round_trip_requires_16bit() {
        let name = "\u{4e2d}\u{6587}.txt"; // Chinese characters exceed 0xFF
        let encoded = encode_cs0(name).unwrap();
        assert_eq!(encoded[0], COMPRESSION_ID_16);
        assert_eq!(decode_cs0(&encoded).unwrap(), name);
    }

    #[test]
    fn empty_name_round_trips() {
        let encoded = encode_cs0("").unwrap();
        assert_eq!(decode_cs0(&encoded).unwrap(), "");
    }

    #[test]
    fn mangle_replaces_illegal_bytes_and_appends_crc() {
        let original = {
            let mut v = encode_cs0("a/b").unwrap();
            v
        };
        let mangled = mangle_name(&original, "a/b", &[]);
        assert!(mangled.starts_with("a_b#"));
        assert_eq!(mangled.len(), "a_b#".len() + 4);
    }

    #[test]
    fn mangle_preserves_short_extension() {
        let original = encode_cs0("weird:name.txt").unwrap();
        let mangled = mangle_name(&original, "weird:name.txt", &[b':']);
        assert!(mangled.ends_with(".txt"));
        assert!(mangled.contains('#'));
    }
}
