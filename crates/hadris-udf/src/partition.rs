//! Partition map parsing and logical-to-physical address translation (spec
//! §4.7): Type 1 (direct), Type 2 Virtual, and Type 2 Sparable partition
//! maps.

use alloc::vec::Vec;

use hadris_common::types::endian::Endian;

use crate::descriptor::{PartitionDescriptor, Regid};
use crate::error::{Result, UdfError};
use crate::types::LbAddr;

const VIRTUAL_PARTITION_MAP_ID: &str = "*UDF Virtual Partition";
const SPARABLE_PARTITION_MAP_ID: &str = "*UDF Sparable Partition";

/// One entry of an LVD partition map table (ECMA-167 3/10.7, UDF 2.01 2.2.8
/// / 2.2.9).
#[derive(Debug, Clone)]
pub enum PartitionMap {
    /// Type 1: the logical partition is the physical partition directly,
    /// identified by `partition_number` matching a Partition Descriptor.
    Type1 {
        volume_sequence_number: u16,
        partition_number: u16,
    },
    /// Type 2, Virtual Partition: block addresses are indirected through a
    /// Virtual Allocation Table stored as a file in the partition named by
    /// `partition_number`.
    Virtual {
        volume_sequence_number: u16,
        partition_number: u16,
    },
    /// Type 2, Sparable Partition: defective packets are transparently
    /// redirected through a sparing table.
    Sparable {
        volume_sequence_number: u16,
        partition_number: u16,
        packet_length: u16,
        sparing_table_size: u32,
        sparing_table_locations: Vec<u32>,
    },
}

impl PartitionMap {
    pub fn partition_number(&self) -> u16 {
        match self {
            PartitionMap::Type1 {
                partition_number, ..
            }
            | PartitionMap::Virtual {
                partition_number, ..
            }
            | PartitionMap::Sparable {
                partition_number, ..
            } => *partition_number,
        }
    }
}

/// Parses the raw partition map table trailing an LVD (spec §4.7). Unknown
/// map types are skipped using their self-reported length, matching the
/// original driver's tolerant behavior.
pub fn parse_partition_maps(bytes: &[u8]) -> Result<Vec<PartitionMap>> {
    let mut maps = Vec::new();
    let mut offset = 0usize;
    while offset + 2 <= bytes.len() {
        let map_type = bytes[offset];
        let map_len = bytes[offset + 1] as usize;
        if map_len == 0 || offset + map_len > bytes.len() {
            break;
        }
        let entry = &bytes[offset..offset + map_len];

        match map_type {
            1 => {
                if entry.len() < 6 {
                    return Err(UdfError::BadAd("type 1 partition map too short".into()));
                }
                let volume_sequence_number = u16::from_le_bytes([entry[2], entry[3]]);
                let partition_number = u16::from_le_bytes([entry[4], entry[5]]);
                maps.push(PartitionMap::Type1 {
                    volume_sequence_number,
                    partition_number,
                });
            }
            2 => {
                if entry.len() < 40 {
                    return Err(UdfError::BadAd("type 2 partition map too short".into()));
                }
                let type_id: &Regid = bytemuck::from_bytes(&entry[4..36]);
                let identifier = type_id.identifier();
                let volume_sequence_number = u16::from_le_bytes([entry[36], entry[37]]);
                let partition_number = u16::from_le_bytes([entry[38], entry[39]]);

                if identifier == VIRTUAL_PARTITION_MAP_ID {
                    maps.push(PartitionMap::Virtual {
                        volume_sequence_number,
                        partition_number,
                    });
                } else if identifier == SPARABLE_PARTITION_MAP_ID {
                    if entry.len() < 64 {
                        return Err(UdfError::BadAd("sparable partition map too short".into()));
                    }
                    let packet_length = u16::from_le_bytes([entry[40], entry[41]]);
                    let num_sparing_tables = entry[42] as usize;
                    let sparing_table_size = u32::from_le_bytes(
                        entry[44..48].try_into().unwrap(),
                    );
                    let mut locations = Vec::with_capacity(num_sparing_tables.min(4));
                    for i in 0..num_sparing_tables.min(4) {
                        let base = 48 + i * 4;
                        locations.push(u32::from_le_bytes(
                            entry[base..base + 4].try_into().unwrap(),
                        ));
                    }
                    maps.push(PartitionMap::Sparable {
                        volume_sequence_number,
                        partition_number,
                        packet_length,
                        sparing_table_size,
                        sparing_table_locations: locations,
                    });
                }
                // Other type-2 identifiers (e.g. Metadata Partition) are out
                // of scope and silently skipped, matching the non-goal for
                // UDF 2.50 metadata partitions.
            }
            _ => {}
        }

        offset += map_len;
    }
    Ok(maps)
}

/// A single entry of a UDF Sparing Table: `original_location` is the
/// defective packet's address, `mapped_location` is its replacement.
/// `0xFFFF_FFFF` in either field marks an unused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparingEntry {
    pub original_location: u32,
    pub mapped_location: u32,
}

pub const SPARING_UNUSED: u32 = 0xFFFF_FFFF;

/// A parsed Sparing Table (UDF 2.01 2.2.12): a sorted list of
/// defective-packet remappings.
#[derive(Debug, Clone, Default)]
pub struct SparingTable {
    pub entries: Vec<SparingEntry>,
}

impl SparingTable {
    /// Parses a sparing table whose header is `(identifier: regid[32],
    /// reallocation_table_length: u16, reserved: u16, sequence_number:
    /// u32)` followed by `reallocation_table_length` 8-byte entries.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 40 {
            return Err(UdfError::NoSparePartition);
        }
        // `bytes[0..32]` carries the `*UDF Sparing Table` EntityID; callers
        // locate this structure via the sparable partition map's own
        // identifier check, so it is not re-verified here.
        let table_len = u16::from_le_bytes([bytes[32], bytes[33]]) as usize;
        let mut entries = Vec::with_capacity(table_len);
        let mut offset = 40;
        for _ in 0..table_len {
            let Some(chunk) = bytes.get(offset..offset + 8) else {
                break;
            };
            entries.push(SparingEntry {
                original_location: u32::from_le_bytes(chunk[0..4].try_into().unwrap()),
                mapped_location: u32::from_le_bytes(chunk[4..8].try_into().unwrap()),
            });
            offset += 8;
        }
        Ok(Self { entries })
    }

    /// Looks up the remapped location for `packet_location`, if a mapping
    /// exists.
    pub fn lookup(&self, packet_location: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.original_location == packet_location && e.mapped_location != SPARING_UNUSED)
            .map(|e| e.mapped_location)
    }
}

/// Resolved state needed to translate addresses within one logical
/// partition.
pub struct PartitionEntry {
    pub map: PartitionMap,
    pub descriptor: PartitionDescriptor,
    /// Virtual Allocation Table entries (Virtual partitions only): `vat[n]`
    /// is the block on the underlying Type 1 partition holding logical
    /// block `n`.
    pub vat: Option<Vec<u32>>,
    /// Sparing table (Sparable partitions only).
    pub sparing_table: Option<SparingTable>,
}

/// The full set of logical partitions for a logical volume, indexable by
/// `lb_addr.partition_ref`.
pub struct PartitionTable {
    pub entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Translates a logical block address into an absolute sector on the
    /// medium (spec §4.7).
    pub fn translate(&self, addr: LbAddr) -> Result<u32> {
        let entry = self
            .entries
            .get(addr.partition_ref as usize)
            .ok_or(UdfError::BadPartitionRef(addr.partition_ref))?;
        let length = entry.descriptor.partition_length.get();
        if addr.block >= length && !matches!(entry.map, PartitionMap::Virtual { .. }) {
            return Err(UdfError::BadLbn {
                partition_ref: addr.partition_ref,
                block: addr.block,
                length,
            });
        }

        let start = entry.descriptor.partition_starting_location.get();
        match &entry.map {
            PartitionMap::Type1 { .. } => Ok(start + addr.block),
            PartitionMap::Virtual { .. } => {
                let vat = entry.vat.as_ref().ok_or(UdfError::NoVat)?;
                let mapped = *vat
                    .get(addr.block as usize)
                    .ok_or(UdfError::BadLbn {
                        partition_ref: addr.partition_ref,
                        block: addr.block,
                        length: vat.len() as u32,
                    })?;
                Ok(start + mapped)
            }
            PartitionMap::Sparable { packet_length, .. } => {
                let packet_length = *packet_length as u32;
                let packet_start = (addr.block / packet_length) * packet_length;
                let offset_in_packet = addr.block % packet_length;
                if let Some(table) = &entry.sparing_table {
                    if let Some(remapped) = table.lookup(packet_start) {
                        return Ok(remapped + offset_in_packet);
                    }
                }
                Ok(start + addr.block)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hadris_common::types::number::U32;

    fn type1_bytes(volume_sequence_number: u16, partition_number: u16) -> [u8; 6] {
        let mut buf = [0u8; 6];
        buf[0] = 1;
        buf[1] = 6;
        buf[2..4].copy_from_slice(&volume_sequence_number.to_le_bytes());
        buf[4..6].copy_from_slice(&partition_number.to_le_bytes());
        buf
    }

    #[test]
    fn parses_type1_map() {
        let bytes = type1_bytes(0, 3);
        let maps = parse_partition_maps(&bytes).unwrap();
        assert_eq!(maps.len(), 1);
        match &maps[0] {
            PartitionMap::Type1 {
                partition_number, ..
            } => assert_eq!(*partition_number, 3),
            _ => panic!("expected Type1"),
        }
    }

    #[test]
    fn sparing_table_lookup() {
        let table = SparingTable {
            entries: vec![
                SparingEntry {
                    original_location: 100,
                    mapped_location: 9000,
                },
                SparingEntry {
                    original_location: SPARING_UNUSED,
                    mapped_location: SPARING_UNUSED,
                },
            ],
        };
        assert_eq!(table.lookup(100), Some(9000));
        assert_eq!(table.lookup(200), None);
    }

    fn sparable_partition_entry(start: u32, packet_length: u16, table: SparingTable) -> PartitionEntry {
        PartitionEntry {
            map: PartitionMap::Sparable {
                volume_sequence_number: 0,
                partition_number: 0,
                packet_length,
                sparing_table_size: 0,
                sparing_table_locations: Vec::new(),
            },
            descriptor: PartitionDescriptor {
                tag: bytemuck::Zeroable::zeroed(),
                vds_number: U32::new(0),
                partition_flags: hadris_common::types::number::U16::new(1),
                partition_number: hadris_common::types::number::U16::new(0),
                partition_contents: bytemuck::Zeroable::zeroed(),
                partition_contents_use: [0; 128],
                access_type: U32::new(0),
                partition_starting_location: U32::new(start),
                partition_length: U32::new(0x10000),
                implementation_identifier: bytemuck::Zeroable::zeroed(),
                implementation_use: [0; 128],
                reserved: [0; 156],
            },
            vat: None,
            sparing_table: Some(table),
        }
    }

    /// Spec §8 scenario 4: packet length 32, table `{(0x100, 0x10000),
    /// (0x200, 0x10020)}`, accessing block 0x20F with offset 0 in a
    /// sparable partition of start 0x400 must return `0x1002F`.
    #[test]
    fn translate_sparable_partition_remaps_defective_packet() {
        let table = SparingTable {
            entries: vec![
                SparingEntry {
                    original_location: 0x100,
                    mapped_location: 0x10000,
                },
                SparingEntry {
                    original_location: 0x200,
                    mapped_location: 0x10020,
                },
                SparingEntry {
                    original_location: SPARING_UNUSED,
                    mapped_location: SPARING_UNUSED,
                },
            ],
        };
        let partitions = PartitionTable {
            entries: vec![sparable_partition_entry(0x400, 32, table)],
        };
        let phys = partitions.translate(LbAddr::new(0, 0x20F)).unwrap();
        assert_eq!(phys, 0x1002F);
    }

    /// A block whose packet has no sparing entry falls back to the plain
    /// `start + block` translation.
    #[test]
    fn translate_sparable_partition_falls_back_when_packet_unmapped() {
        let table = SparingTable {
            entries: vec![SparingEntry {
                original_location: 0x100,
                mapped_location: 0x10000,
            }],
        };
        let partitions = PartitionTable {
            entries: vec![sparable_partition_entry(0x400, 32, table)],
        };
        let phys = partitions.translate(LbAddr::new(0, 0x10)).unwrap();
        assert_eq!(phys, 0x410);
    }
}
