//! Raw-hit aggregation into filtered matches
//!
//! Scattered raw hits for one sequence are grouped per model into canonical
//! matches: one [`FilteredMatch`] per model, one [`Location`] per distinct
//! coordinate pair, site annotations attached where their residues fall
//! inside the location.

use crate::error::{PrepError, Result};
use crate::model::{
    canonicalize_matches, FilteredMatch, Location, RawHit, RawSite, Site, SiteResidue,
};
use crate::registry::ModelRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Groups the raw hits of one sequence into filtered matches
pub struct MatchAggregator<R> {
    registry: Arc<R>,
}

impl<R: ModelRegistry> MatchAggregator<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self { registry }
    }

    /// Aggregate the raw hits of one sequence.
    ///
    /// Hits are partitioned by model id; each model must resolve against the
    /// registry or the whole sequence fails with
    /// [`PrepError::MissingModelMetadata`]. One location is built per
    /// distinct `(start, end)` pair; when score or evalue differ across hits
    /// mapped to the same pair, the last observed value wins. A site record
    /// attaches to a location only when its model matches and every residue
    /// position lies within the location.
    pub fn aggregate(
        &self,
        sequence_id: u64,
        sequence_length: u32,
        hits: &[RawHit],
        sites: &[RawSite],
    ) -> Result<Vec<FilteredMatch>> {
        let mut by_model: BTreeMap<&str, Vec<&RawHit>> = BTreeMap::new();
        for hit in hits {
            if hit.model_id.trim().is_empty() {
                tracing::warn!(sequence_id, "Raw hit with empty model id skipped");
                continue;
            }
            by_model.entry(hit.model_id.as_str()).or_default().push(hit);
        }

        let mut matches = Vec::with_capacity(by_model.len());
        for (model_id, model_hits) in by_model {
            let metadata = self.registry.lookup(model_id).ok_or_else(|| {
                PrepError::MissingModelMetadata {
                    model_id: model_id.to_string(),
                    sequence_id,
                }
            })?;

            let mut locations: BTreeMap<(u32, u32), Location> = BTreeMap::new();
            let mut score = 0.0;
            let mut evalue = 0.0;
            for hit in &model_hits {
                if hit.start > hit.end || hit.start < 1 || hit.end > sequence_length {
                    return Err(PrepError::LocationOutOfBounds {
                        sequence_id,
                        model_id: model_id.to_string(),
                        start: hit.start,
                        end: hit.end,
                        length: sequence_length,
                    });
                }
                // Last observed hit wins for both the match-level and the
                // per-location score/evalue
                score = hit.score;
                evalue = hit.evalue;
                let location = locations.entry((hit.start, hit.end)).or_insert(Location {
                    start: hit.start,
                    end: hit.end,
                    score: hit.score,
                    evalue: hit.evalue,
                    sites: Vec::new(),
                });
                location.score = hit.score;
                location.evalue = hit.evalue;
            }

            let mut locations: Vec<Location> = locations.into_values().collect();
            for location in locations.iter_mut() {
                location.sites = sites_for_location(model_id, location, sites)?;
            }

            matches.push(FilteredMatch {
                signature_id: metadata.signature_id,
                model_id: model_id.to_string(),
                score,
                evalue,
                locations,
            });
        }

        canonicalize_matches(&mut matches);
        Ok(matches)
    }
}

/// Site records attachable to one location: same model (analysis tools emit
/// model ids in mixed case) and every residue inside `[start, end]`
fn sites_for_location(
    model_id: &str,
    location: &Location,
    sites: &[RawSite],
) -> Result<Vec<Site>> {
    let mut attached = Vec::new();
    for raw_site in sites {
        if !raw_site.model_id.eq_ignore_ascii_case(model_id) {
            continue;
        }
        let residues = parse_residues(&raw_site.residues, &raw_site.title)?;
        let in_range = residues
            .iter()
            .all(|r| r.position >= location.start && r.position <= location.end);
        if in_range {
            attached.push(Site {
                title: raw_site.title.clone(),
                residues,
            });
        }
    }
    Ok(attached)
}

/// Parse a delimited residue coordinate list (`"D45,H90"`) into residues
fn parse_residues(residues: &str, title: &str) -> Result<Vec<SiteResidue>> {
    let mut parsed = Vec::new();
    for token in residues.split(',') {
        let token = token.trim();
        let malformed = || PrepError::InvalidSiteResidues {
            token: token.to_string(),
            title: title.to_string(),
        };
        let mut chars = token.chars();
        let symbol = chars.next().ok_or_else(malformed)?;
        let position: u32 = chars.as_str().parse().map_err(|_| malformed())?;
        parsed.push(SiteResidue { symbol, position });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelMetadata;
    use crate::registry::InMemoryModelRegistry;

    fn registry() -> Arc<InMemoryModelRegistry> {
        let mut registry = InMemoryModelRegistry::new(vec!["pfam".to_string()]);
        registry.insert(
            "M1",
            ModelMetadata {
                signature_id: "SIG-M1".to_string(),
                model_length: 120,
            },
        );
        registry.insert(
            "M2",
            ModelMetadata {
                signature_id: "SIG-M2".to_string(),
                model_length: 80,
            },
        );
        Arc::new(registry)
    }

    fn hit(model_id: &str, start: u32, end: u32, score: f64) -> RawHit {
        RawHit {
            sequence_id: 1,
            model_id: model_id.to_string(),
            start,
            end,
            score,
            evalue: 1e-4,
        }
    }

    #[test]
    fn test_two_hits_one_model_two_locations() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("M1", 10, 20, 5.0), hit("M1", 30, 40, 5.0)];

        let matches = aggregator
            .aggregate(1, 500, &hits, &[])
            .expect("aggregation should succeed");

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.model_id, "M1");
        assert_eq!(m.signature_id, "SIG-M1");
        assert_eq!(m.locations.len(), 2);
        assert_eq!(
            m.locations
                .iter()
                .map(|l| (l.start, l.end))
                .collect::<Vec<_>>(),
            vec![(10, 20), (30, 40)]
        );
    }

    #[test]
    fn test_missing_model_metadata_is_fatal() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("UNKNOWN", 10, 20, 5.0)];

        let err = aggregator.aggregate(1, 500, &hits, &[]).unwrap_err();
        match err {
            PrepError::MissingModelMetadata {
                model_id,
                sequence_id,
            } => {
                assert_eq!(model_id, "UNKNOWN");
                assert_eq!(sequence_id, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_location_key_last_score_wins() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("M1", 10, 20, 5.0), hit("M1", 10, 20, 9.0)];

        let matches = aggregator.aggregate(1, 500, &hits, &[]).expect("aggregate");
        assert_eq!(matches[0].locations.len(), 1);
        assert_eq!(matches[0].locations[0].score, 9.0);
        assert_eq!(matches[0].score, 9.0);
    }

    #[test]
    fn test_location_outside_sequence_bounds() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("M1", 10, 600, 5.0)];

        let err = aggregator.aggregate(1, 500, &hits, &[]).unwrap_err();
        assert!(matches!(err, PrepError::LocationOutOfBounds { end: 600, .. }));
    }

    #[test]
    fn test_inverted_location_is_rejected() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("M1", 20, 10, 5.0)];

        let err = aggregator.aggregate(1, 500, &hits, &[]).unwrap_err();
        assert!(matches!(err, PrepError::LocationOutOfBounds { .. }));
    }

    #[test]
    fn test_site_attaches_when_residues_in_range() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("M2", 40, 100, 2.5)];
        let sites = vec![
            RawSite {
                sequence_id: 1,
                model_id: "m2".to_string(), // mixed case still matches
                title: "active site".to_string(),
                residues: "D45,H90".to_string(),
            },
            RawSite {
                sequence_id: 1,
                model_id: "M2".to_string(),
                title: "binding site".to_string(),
                residues: "K200".to_string(), // outside [40, 100]
            },
        ];

        let matches = aggregator
            .aggregate(1, 500, &hits, &sites)
            .expect("aggregate");
        let location = &matches[0].locations[0];
        assert_eq!(location.sites.len(), 1);
        let site = &location.sites[0];
        assert_eq!(site.title, "active site");
        assert_eq!(
            site.residues,
            vec![
                SiteResidue {
                    symbol: 'D',
                    position: 45
                },
                SiteResidue {
                    symbol: 'H',
                    position: 90
                },
            ]
        );
    }

    #[test]
    fn test_site_for_other_model_is_ignored() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("M1", 10, 100, 2.5)];
        let sites = vec![RawSite {
            sequence_id: 1,
            model_id: "M2".to_string(),
            title: "active site".to_string(),
            residues: "D45".to_string(),
        }];

        let matches = aggregator
            .aggregate(1, 500, &hits, &sites)
            .expect("aggregate");
        assert!(matches[0].locations[0].sites.is_empty());
    }

    #[test]
    fn test_malformed_residue_token_is_fatal() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("M2", 40, 100, 2.5)];
        let sites = vec![RawSite {
            sequence_id: 1,
            model_id: "M2".to_string(),
            title: "active site".to_string(),
            residues: "D45,Hxx".to_string(),
        }];

        let err = aggregator.aggregate(1, 500, &hits, &sites).unwrap_err();
        assert!(matches!(err, PrepError::InvalidSiteResidues { .. }));
    }

    #[test]
    fn test_empty_model_id_skipped_with_warning() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![hit("  ", 10, 20, 5.0), hit("M1", 10, 20, 5.0)];

        let matches = aggregator.aggregate(1, 500, &hits, &[]).expect("aggregate");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].model_id, "M1");
    }

    #[test]
    fn test_output_is_canonically_ordered() {
        let aggregator = MatchAggregator::new(registry());
        let hits = vec![
            hit("M2", 50, 60, 1.0),
            hit("M1", 30, 40, 1.0),
            hit("M1", 10, 20, 1.0),
        ];

        let matches = aggregator.aggregate(1, 500, &hits, &[]).expect("aggregate");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].model_id, "M1");
        assert_eq!(matches[0].locations[0].start, 10);
        assert_eq!(matches[1].model_id, "M2");
    }
}
