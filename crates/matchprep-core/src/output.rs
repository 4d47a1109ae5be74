//! Streaming output assembly
//!
//! Entities are streamed to a partition-owned temporary file one at a time (a
//! partition may hold tens of thousands, so the result set is never buffered
//! in memory), then the file is promoted to its final, collision-free name.
//! The temporary name is derived deterministically from the partition bounds
//! and entity type, so a restarted run overwrites its own leftovers rather
//! than inventing new ones.
//!
//! Output is line-delimited JSON: one header line, one line per entity, one
//! footer line carrying the entity count.

use crate::error::{PrepError, Result};
use crate::model::{EntityType, Partition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Upper bound on promotion attempts; past this something is systematically
/// claiming every candidate name
const MAX_PROMOTE_ATTEMPTS: u32 = 2000;

/// A finalized output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedOutput {
    pub path: PathBuf,
    pub entities: u64,
    pub checksum: String,
}

/// Streams one partition's entities to disk with atomic open/promote/close
/// semantics.
///
/// The underlying file is released on every exit path: `finalize` consumes
/// the assembler, and `Drop` closes the sink if an error unwound past it.
pub struct OutputAssembler {
    dir: PathBuf,
    temp_path: PathBuf,
    partition: Partition,
    entity_type: EntityType,
    run_version: String,
    writer: Option<BufWriter<File>>,
    entities: u64,
}

impl OutputAssembler {
    /// Open the deterministic temporary sink for one partition and entity
    /// type: `<dir>/<entity_type>.prepare.<start>_<end>.tmp.jsonl`
    pub fn open(
        dir: impl AsRef<Path>,
        partition: Partition,
        entity_type: EntityType,
        run_version: impl Into<String>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(PrepError::OutputWriteFailed)?;

        let temp_path = dir.join(format!(
            "{}.prepare.{}.tmp.jsonl",
            entity_type.as_str(),
            partition.key()
        ));
        let file = File::create(&temp_path).map_err(PrepError::OutputWriteFailed)?;
        tracing::debug!(
            partition = %partition,
            entity_type = entity_type.as_str(),
            path = %temp_path.display(),
            "Opened output sink"
        );

        Ok(Self {
            dir,
            temp_path,
            partition,
            entity_type,
            run_version: run_version.into(),
            writer: Some(BufWriter::new(file)),
            entities: 0,
        })
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            PrepError::OutputWriteFailed(std::io::Error::other("output sink already closed"))
        })
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.writer()?
            .write_all(&line)
            .map_err(PrepError::OutputWriteFailed)
    }

    /// Write the header line
    pub fn write_header(&mut self) -> Result<()> {
        let header = serde_json::json!({
            "format": "matchprep-entities",
            "version": self.run_version,
            "entity_type": self.entity_type.as_str(),
            "partition": self.partition.key(),
        });
        self.write_line(&header)
    }

    /// Stream one entity; entities land on disk in visit order
    pub fn write_entity<T: Serialize>(&mut self, entity: &T) -> Result<()> {
        self.write_line(entity)?;
        self.entities += 1;
        Ok(())
    }

    /// Write the footer line carrying the entity count
    pub fn write_footer(&mut self) -> Result<()> {
        let footer = serde_json::json!({ "entities": self.entities });
        self.write_line(&footer)
    }

    /// Number of entities streamed so far
    pub fn entity_count(&self) -> u64 {
        self.entities
    }

    /// Close the sink. Idempotent; flush failures surface here rather than
    /// being silently dropped in `Drop`.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(PrepError::OutputWriteFailed)?;
        }
        Ok(())
    }

    /// Close the sink and promote the temporary file to its final name.
    ///
    /// The final name is `<dir>/<entity_type>.<start>_<end>.jsonl`; when that
    /// path is taken, numeric suffixes (`_1`, `_2`, ...) are tried until a
    /// free name is claimed with `create_new`, which keeps promotion
    /// collision-safe when many partitions or concurrent runs share one
    /// output directory. On success the temporary file is gone.
    pub fn finalize(mut self) -> Result<FinalizedOutput> {
        self.close()?;

        let stem = format!("{}.{}", self.entity_type.as_str(), self.partition.key());
        let mut promoted = None;
        for counter in 0..MAX_PROMOTE_ATTEMPTS {
            let candidate = if counter == 0 {
                self.dir.join(format!("{stem}.jsonl"))
            } else {
                self.dir.join(format!("{stem}_{counter}.jsonl"))
            };
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(_) => {
                    std::fs::rename(&self.temp_path, &candidate)
                        .map_err(PrepError::OutputWriteFailed)?;
                    promoted = Some(candidate);
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(PrepError::OutputWriteFailed(err)),
            }
        }
        let path = promoted.ok_or_else(|| {
            PrepError::OutputWriteFailed(std::io::Error::other(format!(
                "no free output name for {} after {} attempts",
                stem, MAX_PROMOTE_ATTEMPTS
            )))
        })?;

        let checksum = matchprep_common::checksum::sha256_file(&path)
            .map_err(|err| PrepError::Internal(err.to_string()))?;
        tracing::info!(
            partition = %self.partition,
            entity_type = self.entity_type.as_str(),
            path = %path.display(),
            entities = self.entities,
            checksum = %checksum,
            "Finalized output"
        );

        Ok(FinalizedOutput {
            path,
            entities: self.entities,
            checksum,
        })
    }
}

impl Drop for OutputAssembler {
    fn drop(&mut self) {
        // Errors on the unwind path cannot be reported; explicit close() and
        // finalize() are the surfaces that do.
        let _ = self.close();
    }
}

/// Re-parse a finalized output file, skipping the header and footer lines
pub fn read_entities<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);

    let mut entities = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)?;
        let is_envelope = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("format") || obj.contains_key("entities"));
        if is_envelope {
            continue;
        }
        entities.push(serde_json::from_value(value)?);
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilteredMatch, Location, SequenceMatches};

    fn partition() -> Partition {
        Partition::new(0, 1, 100)
    }

    fn sample_matches(sequence_id: u64) -> SequenceMatches {
        SequenceMatches {
            sequence_id,
            matches: vec![FilteredMatch {
                signature_id: "SIG1".to_string(),
                model_id: "M1".to_string(),
                score: 5.0,
                evalue: 1e-5,
                locations: vec![Location {
                    start: 10,
                    end: 20,
                    score: 5.0,
                    evalue: 1e-5,
                    sites: Vec::new(),
                }],
            }],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut assembler =
            OutputAssembler::open(dir.path(), partition(), EntityType::Matches, "1.0")
                .expect("open");
        assembler.write_header().expect("header");
        let written = vec![sample_matches(3), sample_matches(7)];
        for record in &written {
            assembler.write_entity(record).expect("entity");
        }
        assembler.write_footer().expect("footer");
        let finalized = assembler.finalize().expect("finalize");

        assert_eq!(finalized.entities, 2);
        assert_eq!(
            finalized.path,
            dir.path().join("matches.1_100.jsonl")
        );
        // Temp marker is gone after promotion
        assert!(!dir.path().join("matches.prepare.1_100.tmp.jsonl").exists());

        let read_back: Vec<SequenceMatches> =
            read_entities(&finalized.path).expect("read back");
        assert_eq!(read_back, written);
    }

    #[test]
    fn test_promotion_appends_suffix_on_collision() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("matches.1_100.jsonl"), b"occupied").expect("seed");
        std::fs::write(dir.path().join("matches.1_100_1.jsonl"), b"occupied").expect("seed");

        let mut assembler =
            OutputAssembler::open(dir.path(), partition(), EntityType::Matches, "1.0")
                .expect("open");
        assembler.write_header().expect("header");
        assembler.write_footer().expect("footer");
        let finalized = assembler.finalize().expect("finalize");

        assert_eq!(
            finalized.path,
            dir.path().join("matches.1_100_2.jsonl")
        );
        // Occupied names are untouched
        assert_eq!(
            std::fs::read(dir.path().join("matches.1_100.jsonl")).expect("read"),
            b"occupied"
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut assembler =
            OutputAssembler::open(dir.path(), partition(), EntityType::Shared, "1.0")
                .expect("open");
        assembler.write_header().expect("header");
        assembler.close().expect("close");
        assembler.close().expect("close again");

        let err = assembler.write_entity(&sample_matches(1)).unwrap_err();
        assert!(matches!(err, PrepError::OutputWriteFailed(_)));
    }

    #[test]
    fn test_deterministic_temp_naming_overwrites_stale_leftover() {
        let dir = tempfile::tempdir().expect("tempdir");
        let temp = dir.path().join("shared.prepare.1_100.tmp.jsonl");
        std::fs::write(&temp, b"stale content from a crashed run").expect("seed");

        let mut assembler =
            OutputAssembler::open(dir.path(), partition(), EntityType::Shared, "1.0")
                .expect("open");
        assembler.write_header().expect("header");
        assembler.write_footer().expect("footer");
        let finalized = assembler.finalize().expect("finalize");

        let content = std::fs::read_to_string(&finalized.path).expect("read");
        assert!(!content.contains("stale content"));
    }

    #[test]
    fn test_checksum_matches_file_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut assembler =
            OutputAssembler::open(dir.path(), partition(), EntityType::Matches, "1.0")
                .expect("open");
        assembler.write_header().expect("header");
        assembler.write_entity(&sample_matches(3)).expect("entity");
        assembler.write_footer().expect("footer");
        let finalized = assembler.finalize().expect("finalize");

        matchprep_common::checksum::verify_sha256(&finalized.path, &finalized.checksum)
            .expect("checksum should verify");
    }
}
