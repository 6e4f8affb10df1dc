//! Path components (spec §3): the alphabet a symbolic link's target is
//! written in, distinct from a directory-lookup name string.

use alloc::string::String;
use alloc::vec::Vec;

use crate::codec;
use crate::error::Result;

/// One component of a symbolic-link target (ECMA-167 4/14.16.1.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathComponent {
    /// Reserved for future use; carries its raw component-type byte.
    Reserved(u8),
    /// `/` — root of the file system the link was recorded on.
    Root,
    /// `.` — the directory containing the link.
    CurrentDir,
    /// `..` — the parent of the directory containing the link.
    ParentDir,
    /// A named child, decoded from CS0.
    Name(String),
}

/// Component-type byte values (ECMA-167 4/14.16.1.1).
const TYPE_RESERVED: u8 = 0;
const TYPE_CURRENT: u8 = 1;
const TYPE_PARENT: u8 = 2;
const TYPE_ROOT: u8 = 3;
const TYPE_NAME: u8 = 5;

/// Parses a symbolic link's data stream (ECMA-167 4/14.16) into an ordered
/// list of path components. Each record is `(component_type: u8,
/// length_of_component_identifier: u8, component_file_version_number: u16,
/// component_identifier: [u8; len])`.
pub fn parse_symlink_target(data: &[u8]) -> Result<Vec<PathComponent>> {
    let mut components = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= data.len() {
        let component_type = data[offset];
        let len = data[offset + 1] as usize;
        // data[offset + 2..offset + 4] is the component file version number;
        // UDF read-only implementations are not expected to act on it.
        let ident_start = offset + 4;
        let ident_end = ident_start + len;
        if ident_end > data.len() {
            break;
        }
        let ident = &data[ident_start..ident_end];

        let component = match component_type {
            TYPE_RESERVED => PathComponent::Reserved(component_type),
            TYPE_CURRENT => PathComponent::CurrentDir,
            TYPE_PARENT => PathComponent::ParentDir,
            TYPE_ROOT => PathComponent::Root,
            TYPE_NAME => {
                let name = codec::decode_cs0(ident).map_err(|_| {
                    crate::error::UdfError::BadAd("malformed symlink component name".into())
                })?;
                PathComponent::Name(name)
            }
            _ => PathComponent::Reserved(component_type),
        };
        components.push(component);

        // Each record is padded to a 4-byte boundary.
        let record_len = 4 + len;
        offset += record_len.div_ceil(4) * 4;
    }
    Ok(components)
}

/// Encodes path components back into a symlink data stream.
pub fn encode_symlink_target(components: &[PathComponent]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for component in components {
        let (ty, ident) = match component {
            PathComponent::Reserved(b) => (*b, Vec::new()),
            PathComponent::CurrentDir => (TYPE_CURRENT, Vec::new()),
            PathComponent::ParentDir => (TYPE_PARENT, Vec::new()),
            PathComponent::Root => (TYPE_ROOT, Vec::new()),
            PathComponent::Name(name) => {
                let cs0 = codec::encode_cs0(name).map_err(|_| {
                    crate::error::UdfError::BadAd("symlink component name not representable in CS0".into())
                })?;
                (TYPE_NAME, cs0)
            }
        };
        if ident.len() > 255 {
            return Err(crate::error::UdfError::NameTooLong(ident.len()));
        }
        out.push(ty);
        out.push(ident.len() as u8);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&ident);
        let record_len = 4 + ident.len();
        let padded = record_len.div_ceil(4) * 4;
        out.resize(out.len() + (padded - record_len), 0);
    }
    Ok(out)
}

/// Joins path components into a host-style `/`-separated string, for
/// diagnostics and the checker's reporting (not used for on-disk storage).
pub fn components_to_display_string(components: &[PathComponent]) -> String {
    let mut out = String::new();
    for component in components {
        match component {
            PathComponent::Reserved(_) => {}
            PathComponent::Root => out.push('/'),
            PathComponent::CurrentDir => out.push_str("./"),
            PathComponent::ParentDir => out.push_str("../"),
            PathComponent::Name(name) => {
                out.push_str(name);
                out.push('/');
            }
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_relative_target() {
        let components = alloc::vec![
            PathComponent::ParentDir,
            PathComponent::Name("foo".into()),
            PathComponent::Name("bar.txt".into()),
        ];
        let encoded = encode_symlink_target(&components).unwrap();
        let decoded = parse_symlink_target(&encoded).unwrap();
        assert_eq!(decoded, components);
    }

    #[test]
    fn root_component_round_trips() {
        let components = alloc::vec![PathComponent::Root, PathComponent::Name("etc".into())];
        let encoded = encode_symlink_target(&components).unwrap();
        let decoded = parse_symlink_target(&encoded).unwrap();
        assert_eq!(decoded, components);
    }

    #[test]
    fn display_string_joins_with_slashes() {
        let components = alloc::vec![
            PathComponent::Root,
            PathComponent::Name("a".into()),
            PathComponent::Name("b".into()),
        ];
        assert_eq!(components_to_display_string(&components), "/a/b");
    }
}
