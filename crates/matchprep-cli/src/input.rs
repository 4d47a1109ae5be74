//! Input loading: JSONL/JSON files into the in-memory stores
//!
//! Upstream analysis output is staged as line-delimited JSON, one record per
//! line; the model registry is a single JSON document. Everything is loaded
//! once at startup and handed to the pipeline behind the store traits.

use crate::error::{CliError, Result};
use matchprep_core::model::{EntityType, ModelMetadata, RawHit, RawSite, SequenceRecord, SharedEntity};
use matchprep_core::registry::InMemoryModelRegistry;
use matchprep_core::store::InMemoryStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// One raw hit row: a [`RawHit`] plus the analysis it came from
#[derive(Debug, Deserialize)]
pub struct HitRow {
    pub analysis: String,
    pub sequence_id: u64,
    pub model_id: String,
    pub start: u32,
    pub end: u32,
    pub score: f64,
    pub evalue: f64,
}

/// One shared entity row
#[derive(Debug, Deserialize)]
pub struct EntityRow {
    pub id: u64,
    pub payload: serde_json::Value,
}

/// One model registry entry
#[derive(Debug, Deserialize)]
pub struct ModelRow {
    pub model_id: String,
    pub signature_id: String,
    pub model_length: u32,
}

/// The model registry document
#[derive(Debug, Deserialize)]
pub struct ModelsFile {
    pub analyses: Vec<String>,
    pub models: Vec<ModelRow>,
}

/// Counts gathered while loading
#[derive(Debug, Default, Clone)]
pub struct InputStats {
    pub sequences: u64,
    pub hits: u64,
    pub sites: u64,
    pub entities: u64,
    pub hits_per_analysis: BTreeMap<String, u64>,
    pub min_sequence_id: Option<u64>,
    pub max_sequence_id: Option<u64>,
}

/// Everything the pipeline needs, loaded from disk
#[derive(Debug)]
pub struct LoadedInputs {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<InMemoryModelRegistry>,
    pub stats: InputStats,
}

/// Apply `on_row` to every non-empty line of a JSONL file, returning the row
/// count
pub fn for_each_jsonl<T, F>(path: &Path, mut on_row: F) -> Result<u64>
where
    T: serde::de::DeserializeOwned,
    F: FnMut(T),
{
    let file = File::open(path)
        .map_err(|err| CliError::input(path.display().to_string(), err.to_string()))?;
    let reader = BufReader::new(file);

    let mut rows = 0u64;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: T = serde_json::from_str(&line).map_err(|err| CliError::Parse {
            path: path.display().to_string(),
            line: index + 1,
            message: err.to_string(),
        })?;
        on_row(row);
        rows += 1;
    }
    Ok(rows)
}

/// Load the model registry document
pub fn load_models(path: &Path) -> Result<Arc<InMemoryModelRegistry>> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| CliError::input(path.display().to_string(), err.to_string()))?;
    let models_file: ModelsFile = serde_json::from_str(&content)?;
    if models_file.analyses.is_empty() {
        return Err(CliError::invalid_inputs(format!(
            "model registry '{}' declares no analyses",
            path.display()
        )));
    }

    let mut registry = InMemoryModelRegistry::new(models_file.analyses);
    for row in models_file.models {
        registry.insert(
            row.model_id,
            ModelMetadata {
                signature_id: row.signature_id,
                model_length: row.model_length,
            },
        );
    }
    tracing::info!(
        path = %path.display(),
        models = registry.model_count(),
        "Loaded model registry"
    );
    Ok(Arc::new(registry))
}

/// Load all pipeline inputs into the in-memory stores
pub fn load_inputs(
    hits: &Path,
    sites: Option<&Path>,
    sequences: &Path,
    entities: Option<&Path>,
    models: &Path,
) -> Result<LoadedInputs> {
    let registry = load_models(models)?;
    let store = Arc::new(InMemoryStore::new());
    let mut stats = InputStats::default();

    stats.sequences = for_each_jsonl(sequences, |record: SequenceRecord| {
        stats.min_sequence_id = Some(stats.min_sequence_id.map_or(record.id, |m| m.min(record.id)));
        stats.max_sequence_id = Some(stats.max_sequence_id.map_or(record.id, |m| m.max(record.id)));
        store.insert_sequence(record);
    })?;
    if stats.sequences == 0 {
        return Err(CliError::invalid_inputs(format!(
            "sequence file '{}' contains no records",
            sequences.display()
        )));
    }

    stats.hits = for_each_jsonl(hits, |row: HitRow| {
        *stats.hits_per_analysis.entry(row.analysis.clone()).or_default() += 1;
        store.insert_hit(
            &row.analysis,
            RawHit {
                sequence_id: row.sequence_id,
                model_id: row.model_id,
                start: row.start,
                end: row.end,
                score: row.score,
                evalue: row.evalue,
            },
        );
    })?;

    if let Some(sites) = sites {
        stats.sites = for_each_jsonl(sites, |site: RawSite| {
            store.insert_site(site);
        })?;
    }

    if let Some(entities) = entities {
        stats.entities = for_each_jsonl(entities, |row: EntityRow| {
            store.insert_entity(SharedEntity {
                id: row.id,
                entity_type: EntityType::Shared,
                payload: row.payload,
            });
        })?;
    }

    tracing::info!(
        sequences = stats.sequences,
        hits = stats.hits,
        sites = stats.sites,
        entities = stats.entities,
        "Loaded pipeline inputs"
    );

    Ok(LoadedInputs {
        store,
        registry,
        stats,
    })
}
