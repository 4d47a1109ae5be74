//! `matchprep inspect` - pre-flight summary of a set of input files

use crate::error::Result;
use crate::input::load_inputs;
use matchprep_core::registry::ModelRegistry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct InspectArgs {
    pub hits: PathBuf,
    pub sequences: PathBuf,
    pub models: PathBuf,
    pub sites: Option<PathBuf>,
    pub entities: Option<PathBuf>,
}

pub async fn run(args: InspectArgs) -> Result<()> {
    let loaded = load_inputs(
        &args.hits,
        args.sites.as_deref(),
        &args.sequences,
        args.entities.as_deref(),
        &args.models,
    )?;
    let stats = &loaded.stats;

    println!("Input summary");
    println!(
        "  sequences: {} (ids {}..{})",
        stats.sequences,
        stats.min_sequence_id.unwrap_or(0),
        stats.max_sequence_id.unwrap_or(0)
    );
    println!("  hits:      {}", stats.hits);
    for (analysis, count) in &stats.hits_per_analysis {
        println!("    {}: {}", analysis, count);
    }
    println!("  sites:     {}", stats.sites);
    println!("  entities:  {}", stats.entities);
    println!(
        "  analyses declared by the model registry: {}",
        loaded.registry.analyses().join(", ")
    );

    // Shared-entity fan-in: how many sequences reference each entity. Ids
    // referenced from more than one sequence are the dedup-sensitive ones.
    let fan_in = shared_fan_in(&args.sequences)?;
    let multi: Vec<_> = fan_in.iter().filter(|(_, n)| **n > 1).collect();
    println!(
        "  shared refs: {} distinct, {} referenced more than once",
        fan_in.len(),
        multi.len()
    );
    Ok(())
}

fn shared_fan_in(sequences: &Path) -> Result<BTreeMap<u64, u64>> {
    use matchprep_core::model::SequenceRecord;

    let mut fan_in: BTreeMap<u64, u64> = BTreeMap::new();
    crate::input::for_each_jsonl(sequences, |record: SequenceRecord| {
        for entity_id in record.shared_refs {
            *fan_in.entry(entity_id).or_default() += 1;
        }
    })?;
    Ok(fan_in)
}
