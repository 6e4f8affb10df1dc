//! Consistency checker (spec §4.13): the read-only audit that walks a whole
//! volume and reports every structural problem it can find, mirroring the
//! original `chkudf` tool's behavior of never stopping at the first error.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{ErrorCode, ErrorDescriptor, UdfError};
use crate::types::Extent;

/// Classifies an error encountered mid-traversal into an `ErrorDescriptor`,
/// so a damaged tag, malformed AD, or bad partition reference anywhere in
/// the tree is recorded as a `Finding` and the walk can skip that subtree
/// and keep going, rather than aborting the whole check (spec §4.13: report
/// every structural problem found instead of stopping at the first one).
pub fn finding_for(err: &UdfError, sector: u32) -> ErrorDescriptor {
    match err {
        UdfError::Tag(desc) => *desc,
        UdfError::BadAd(_) => ErrorDescriptor::new(ErrorCode::BadAd, sector, 0, 0),
        UdfError::BadLbn {
            partition_ref,
            block,
            length,
        } => ErrorDescriptor::new(ErrorCode::BadLbn, sector, *length as u64, ((*partition_ref as u64) << 32) | *block as u64),
        UdfError::BadPartitionRef(partition_ref) => {
            ErrorDescriptor::new(ErrorCode::BadPartitionRef, sector, 0, *partition_ref as u64)
        }
        UdfError::NoVat => ErrorDescriptor::new(ErrorCode::NoVat, sector, 0, 0),
        UdfError::NoSparePartition => ErrorDescriptor::new(ErrorCode::NoSparePartition, sector, 0, 0),
        UdfError::Io(_) => ErrorDescriptor::new(ErrorCode::ReadIo, sector, 0, 0),
        _ => ErrorDescriptor::new(ErrorCode::BadAd, sector, 0, 0),
    }
}

/// One finding surfaced by a check pass, carrying enough context for a
/// human-facing report (`chkudf -v`/`-d`) to point at the offending
/// structure.
#[derive(Debug, Clone)]
pub struct Finding {
    pub error: ErrorDescriptor,
    pub context: String,
}

/// Tallies produced while walking the volume, independent of whether any
/// errors were found — used for the summary line a checker CLI prints.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub tags_validated: u64,
    pub tags_damaged: u64,
    pub files_visited: u64,
    pub directories_visited: u64,
    pub symlinks_visited: u64,
}

/// The accumulated result of checking a volume: every finding observed, plus
/// the tallies needed to print a summary. Exit-code mapping (spec §6
/// `chkudf`) is left to the caller, which knows whether `-n`/`-y` were
/// passed.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub findings: Vec<Finding>,
    pub tally: Tally,
    /// Set once, the first time a unique id collides; subsequent
    /// collisions on the same id are not re-reported.
    seen_unique_ids: Vec<u64>,
    /// The largest unique id observed anywhere in the traversal so far, used
    /// to verify the LVID's high-water mark at the end of `check()` (spec
    /// §4.13: "the LVID's next-unique-id must exceed the maximum observed").
    max_unique_id: Option<u64>,
}

impl CheckReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, error: ErrorDescriptor, context: impl Into<String>) {
        self.findings.push(Finding {
            error,
            context: context.into(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Whether any recorded finding is fatal (`ErrorCode::is_fatal`), as
    /// opposed to every finding being a minor/cosmetic discrepancy. A clean
    /// report has no findings at all and so is neither fatal nor minor.
    pub fn has_fatal_findings(&self) -> bool {
        self.findings.iter().any(|f| f.error.code.is_fatal())
    }

    /// Records a unique-id observation, returning `true` if this id has
    /// already been seen (a collision the caller should report).
    pub fn observe_unique_id(&mut self, id: u64) -> bool {
        self.max_unique_id = Some(self.max_unique_id.map_or(id, |max| max.max(id)));
        if self.seen_unique_ids.contains(&id) {
            true
        } else {
            self.seen_unique_ids.push(id);
            false
        }
    }

    /// The largest unique id observed so far, or `None` if nothing has been
    /// walked yet.
    pub fn max_unique_id(&self) -> Option<u64> {
        self.max_unique_id
    }
}

/// A sorted, non-overlapping set of volume-space claims, built incrementally
/// while walking ICBs and their extents. Used to detect two files (or a file
/// and a free-space table entry) claiming the same block.
#[derive(Debug, Clone, Default)]
pub struct SpaceClaims {
    /// `(partition_ref, start_block, length_blocks, owner_description)`,
    /// kept sorted by `(partition_ref, start_block)`.
    claims: Vec<(u16, u32, u32, String)>,
}

impl SpaceClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `extent` as claimed by `owner`, returning the prior owner's
    /// description if this collides with an existing claim. `extent.length`
    /// is a byte count (ECMA-167 4/14.14.1.1); `sector_size` converts it to
    /// the block count the claim table is indexed by.
    pub fn claim(&mut self, extent: &Extent, sector_size: u32, owner: impl Into<String>) -> Option<String> {
        let partition_ref = extent.location.partition_ref;
        let start = extent.location.block;
        let length_blocks = (extent.length as u64).div_ceil(sector_size as u64) as u32;
        let end = start + length_blocks;
        let owner = owner.into();

        for (existing_partition, existing_start, existing_len, existing_owner) in &self.claims {
            if *existing_partition != partition_ref {
                continue;
            }
            let existing_end = existing_start + existing_len;
            if start < existing_end && *existing_start < end {
                return Some(existing_owner.clone());
            }
        }

        let index = self
            .claims
            .partition_point(|(p, s, _, _)| (*p, *s) < (partition_ref, start));
        self.claims.insert(index, (partition_ref, start, length_blocks, owner));
        None
    }

    pub fn total_claimed_blocks(&self, partition_ref: u16) -> u64 {
        self.claims
            .iter()
            .filter(|(p, ..)| *p == partition_ref)
            .map(|(_, _, len, _)| *len as u64)
            .sum()
    }
}

/// Compares the volume's recorded free-block count for a partition against
/// the count actually reachable by summing every live extent walked during
/// the traversal (spec §4.13's shadow free-map diff).
pub fn check_free_space_matches(
    recorded_free_blocks: u32,
    partition_length: u32,
    claimed_blocks: u64,
) -> Option<u64> {
    let computed_free = (partition_length as u64).saturating_sub(claimed_blocks);
    if computed_free == recorded_free_blocks as u64 {
        None
    } else {
        Some(computed_free.abs_diff(recorded_free_blocks as u64))
    }
}

/// Verifies a File Entry's recorded `fileLinkCount` against the number of
/// live (non-deleted) FIDs the traversal actually found referencing it.
pub fn check_link_count(recorded: u16, counted: u16) -> Option<(u16, u16)> {
    if recorded == counted {
        None
    } else {
        Some((recorded, counted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExtentType, LbAddr};

    #[test]
    fn fatal_findings_outrank_minor_ones() {
        let mut report = CheckReport::new();
        report.record(
            ErrorDescriptor::new(ErrorCode::TagWrongLoc, 10, 10, 11),
            "stray block",
        );
        assert!(!report.has_fatal_findings());
        report.record(
            ErrorDescriptor::new(ErrorCode::TagChecksum, 20, 0x15, 0x16),
            "bad checksum",
        );
        assert!(report.has_fatal_findings());
    }

    #[test]
    fn space_claims_detect_overlap() {
        let mut claims = SpaceClaims::new();
        let a = Extent {
            location: LbAddr::new(0, 100),
            length: 50,
            ty: ExtentType::Recorded,
        };
        let b = Extent {
            location: LbAddr::new(0, 120),
            length: 10,
            ty: ExtentType::Recorded,
        };
        assert!(claims.claim(&a, 1, "file-a").is_none());
        let collision = claims.claim(&b, 1, "file-b");
        assert_eq!(collision.as_deref(), Some("file-a"));
    }

    #[test]
    fn space_claims_allow_disjoint_partitions() {
        let mut claims = SpaceClaims::new();
        let a = Extent {
            location: LbAddr::new(0, 100),
            length: 50,
            ty: ExtentType::Recorded,
        };
        let b = Extent {
            location: LbAddr::new(1, 100),
            length: 50,
            ty: ExtentType::Recorded,
        };
        assert!(claims.claim(&a, 1, "file-a").is_none());
        assert!(claims.claim(&b, 1, "file-b").is_none());
    }

    #[test]
    fn claim_converts_byte_length_to_blocks() {
        let mut claims = SpaceClaims::new();
        let extent = Extent {
            location: LbAddr::new(0, 10),
            length: 4096, // two 2048-byte blocks
            ty: ExtentType::Recorded,
        };
        assert!(claims.claim(&extent, 2048, "file-a").is_none());
        assert_eq!(claims.total_claimed_blocks(0), 2);
        // Block 12 lies just past the 2-block extent ending at block 12.
        let adjacent = Extent {
            location: LbAddr::new(0, 12),
            length: 2048,
            ty: ExtentType::Recorded,
        };
        assert!(claims.claim(&adjacent, 2048, "file-b").is_none());
    }

    #[test]
    fn unique_id_collision_reported_once() {
        let mut report = CheckReport::new();
        assert!(!report.observe_unique_id(42));
        assert!(report.observe_unique_id(42));
    }

    #[test]
    fn free_space_mismatch_reports_delta() {
        assert_eq!(check_free_space_matches(900, 1000, 100), None);
        assert_eq!(check_free_space_matches(800, 1000, 100), Some(100));
    }

    #[test]
    fn link_count_mismatch_reports_both_sides() {
        assert_eq!(check_link_count(2, 2), None);
        assert_eq!(check_link_count(2, 1), Some((2, 1)));
    }
}
