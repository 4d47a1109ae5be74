//! Core data types for match post-processing

use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous, non-overlapping, inclusive subrange of the global
/// sequence-identifier space, assigned to exactly one worker.
///
/// Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub id: u32,
    pub range_start: u64,
    pub range_end: u64,
}

impl Partition {
    pub fn new(id: u32, range_start: u64, range_end: u64) -> Self {
        Self {
            id,
            range_start,
            range_end,
        }
    }

    /// Stable label used for readiness registration and output-file naming
    pub fn key(&self) -> String {
        format!("{}_{}", self.range_start, self.range_end)
    }

    pub fn contains(&self, sequence_id: u64) -> bool {
        sequence_id >= self.range_start && sequence_id <= self.range_end
    }

    /// Number of identifiers covered by this partition
    pub fn span(&self) -> u64 {
        self.range_end - self.range_start + 1
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}_{}]", self.range_start, self.range_end)
    }
}

/// One raw alignment record from an upstream analysis tool.
///
/// Transient: consumed and discarded after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub sequence_id: u64,
    pub model_id: String,
    pub start: u32,
    pub end: u32,
    pub score: f64,
    pub evalue: f64,
}

/// One raw site record emitted by site-producing analysis tools.
///
/// `residues` is a comma-delimited list of `<symbol><position>` tokens,
/// e.g. `"D45,H90"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSite {
    pub sequence_id: u64,
    pub model_id: String,
    pub title: String,
    pub residues: String,
}

/// A single annotated residue within a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteResidue {
    pub symbol: char,
    pub position: u32,
}

/// A site annotation attached to a location.
///
/// Residues are kept sorted by position so equality is content-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub title: String,
    pub residues: Vec<SiteResidue>,
}

/// One aligned region of a filtered match.
///
/// Invariants: `start <= end`, both within `[1, sequence_length]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub start: u32,
    pub end: u32,
    pub score: f64,
    pub evalue: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sites: Vec<Site>,
}

/// A post-processed match grouped by model/signature, containing one or
/// more locations.
///
/// All locations derive from hits sharing the same `(sequence_id, model_id)`;
/// locations are kept sorted by `(start, end)` so equality is content-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredMatch {
    pub signature_id: String,
    pub model_id: String,
    pub score: f64,
    pub evalue: f64,
    pub locations: Vec<Location>,
}

/// The filtered matches of one sequence, as streamed to the matches output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMatches {
    pub sequence_id: u64,
    pub matches: Vec<FilteredMatch>,
}

/// What a worker learns when scanning one sequence id: the sequence length
/// (location bounds) and the shared entities reachable from it via
/// cross-references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: u64,
    pub length: u32,
    #[serde(default)]
    pub shared_refs: Vec<u64>,
}

/// Kind of entity an output file carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Per-partition filtered matches
    Matches,
    /// Cross-partition shared entities
    Shared,
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Matches => "matches",
            EntityType::Shared => "shared",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data discoverable from multiple partitions, serialized to output exactly
/// once regardless of which partition performs the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedEntity {
    pub id: u64,
    pub entity_type: EntityType,
    pub payload: serde_json::Value,
}

/// Signature/model metadata resolved from the model registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub signature_id: String,
    pub model_length: u32,
}

/// Key for raw hits in the backing store: one sequence, one analysis
/// (signature library).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    pub sequence_id: u64,
    pub analysis: String,
}

impl StoreKey {
    pub fn new(sequence_id: u64, analysis: impl Into<String>) -> Self {
        Self {
            sequence_id,
            analysis: analysis.into(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sequence_id, self.analysis)
    }
}

/// Sort matches and their nested collections into canonical order so two
/// aggregation results can be compared as sets
pub fn canonicalize_matches(matches: &mut [FilteredMatch]) {
    for m in matches.iter_mut() {
        m.locations
            .sort_by_key(|location| (location.start, location.end));
        for location in m.locations.iter_mut() {
            location.sites.sort_by(|a, b| a.title.cmp(&b.title));
            for site in location.sites.iter_mut() {
                site.residues.sort_by_key(|r| (r.position, r.symbol));
            }
        }
    }
    matches.sort_by(|a, b| a.model_id.cmp(&b.model_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_contains_and_len() {
        let partition = Partition::new(0, 101, 200);
        assert!(partition.contains(101));
        assert!(partition.contains(200));
        assert!(!partition.contains(100));
        assert!(!partition.contains(201));
        assert_eq!(partition.span(), 100);
        assert_eq!(partition.key(), "101_200");
        assert_eq!(partition.to_string(), "[101_200]");
    }

    #[test]
    fn test_canonicalize_matches_is_order_independent() {
        let location = |start, end| Location {
            start,
            end,
            score: 1.0,
            evalue: 0.5,
            sites: Vec::new(),
        };
        let mut a = vec![
            FilteredMatch {
                signature_id: "SIG2".into(),
                model_id: "M2".into(),
                score: 2.0,
                evalue: 0.1,
                locations: vec![location(30, 40), location(10, 20)],
            },
            FilteredMatch {
                signature_id: "SIG1".into(),
                model_id: "M1".into(),
                score: 1.0,
                evalue: 0.2,
                locations: vec![location(5, 9)],
            },
        ];
        let mut b = vec![a[1].clone(), a[0].clone()];
        canonicalize_matches(&mut a);
        canonicalize_matches(&mut b);
        assert_eq!(a, b);
        assert_eq!(a[0].model_id, "M1");
        assert_eq!(a[1].locations[0].start, 10);
    }

    #[test]
    fn test_store_key_display() {
        let key = StoreKey::new(42, "pfam");
        assert_eq!(key.to_string(), "42:pfam");
    }
}
