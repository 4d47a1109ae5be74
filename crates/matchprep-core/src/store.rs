//! Resilient access to the backing match store
//!
//! The backing store is read-heavy and eventually consistent: raw hits may be
//! written by one node and read by another behind a replication lag, so a
//! failed read is retried after a workload-proportional delay rather than
//! immediately. Exhausting the attempt bound is fatal for the enclosing unit
//! of work; no partial or degraded result is ever returned.

use crate::config::RetryConfig;
use crate::error::{PrepError, Result};
use crate::model::{
    FilteredMatch, RawHit, RawSite, SequenceRecord, SharedEntity, StoreKey,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Error raised by a backing store implementation.
///
/// Every store failure is treated as transient and retried up to the attempt
/// bound; the retry wrapper escalates to [`PrepError::StoreUnavailable`] once
/// the bound is exhausted.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for backing-store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Raw-hit and filtered-match storage, keyed per sequence per analysis
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Raw hits for one sequence under one analysis
    async fn read_hits(&self, key: &StoreKey) -> StoreResult<Vec<RawHit>>;

    /// Raw site records for one sequence, across analyses
    async fn read_sites(&self, sequence_id: u64) -> StoreResult<Vec<RawSite>>;

    /// Persist the aggregated matches of one sequence
    async fn write_matches(
        &self,
        sequence_id: u64,
        matches: &[FilteredMatch],
    ) -> StoreResult<()>;

    /// Previously persisted matches of one sequence
    async fn read_matches(&self, sequence_id: u64) -> StoreResult<Vec<FilteredMatch>>;
}

/// Source of sequence records; id gaps are normal in a sparse identifier
/// space, so a missing id is `None`, not an error
#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn fetch(&self, sequence_id: u64) -> StoreResult<Option<SequenceRecord>>;
}

/// Source of cross-partition shared entities
#[async_trait]
pub trait SharedEntitySource: Send + Sync {
    async fn fetch_entity(&self, entity_id: u64) -> StoreResult<SharedEntity>;
}

/// Injectable backoff policy: `(attempt, workload_items) -> delay`
pub type BackoffFn = Arc<dyn Fn(u32, u64) -> Duration + Send + Sync>;

/// Retry policy for store access: attempt bound plus delay computation
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    backoff: Option<BackoffFn>,
}

impl RetryPolicy {
    /// Policy with the default workload-proportional delay
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            backoff: None,
        }
    }

    /// Policy with a caller-supplied backoff function
    pub fn with_backoff(config: RetryConfig, backoff: BackoffFn) -> Self {
        Self {
            config,
            backoff: Some(backoff),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before the next attempt.
    ///
    /// The default recomputes the same workload-derived wait on every attempt;
    /// it deliberately does not grow.
    pub fn delay(&self, attempt: u32, workload_items: u64) -> Duration {
        match self.backoff {
            Some(ref backoff) => backoff(attempt, workload_items),
            None => self.config.delay_for(workload_items),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("custom_backoff", &self.backoff.is_some())
            .finish()
    }
}

/// Retrying wrapper over the backing stores.
///
/// Retries are synchronous within the calling worker only; they never block
/// other workers. `workload_items` is the size of the worker's partition and
/// drives the propagation-delay estimate.
pub struct RetryingStore<S> {
    inner: Arc<S>,
    policy: RetryPolicy,
    workload_items: u64,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: Arc<S>, policy: RetryPolicy, workload_items: u64) -> Self {
        Self {
            inner,
            policy,
            workload_items,
        }
    }

    async fn with_retry<'a, T>(
        &'a self,
        op: &'static str,
        key: &str,
        mut call: impl FnMut() -> BoxFuture<'a, StoreResult<T>>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.policy.max_attempts() {
                        return Err(PrepError::StoreUnavailable {
                            key: key.to_string(),
                            attempts: attempt,
                            message: err.message,
                        });
                    }
                    let delay = self.policy.delay(attempt, self.workload_items);
                    tracing::warn!(
                        op = op,
                        key = %key,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Store access failed, waiting for propagation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl<S: MatchStore> RetryingStore<S> {
    pub async fn read_hits(&self, key: &StoreKey) -> Result<Vec<RawHit>> {
        self.with_retry("read_hits", &key.to_string(), || {
            self.inner.read_hits(key)
        })
        .await
    }

    pub async fn read_sites(&self, sequence_id: u64) -> Result<Vec<RawSite>> {
        self.with_retry("read_sites", &sequence_id.to_string(), || {
            self.inner.read_sites(sequence_id)
        })
        .await
    }

    pub async fn write_matches(
        &self,
        sequence_id: u64,
        matches: &[FilteredMatch],
    ) -> Result<()> {
        self.with_retry("write_matches", &sequence_id.to_string(), || {
            self.inner.write_matches(sequence_id, matches)
        })
        .await
    }

    pub async fn read_matches(&self, sequence_id: u64) -> Result<Vec<FilteredMatch>> {
        self.with_retry("read_matches", &sequence_id.to_string(), || {
            self.inner.read_matches(sequence_id)
        })
        .await
    }
}

impl<S: SequenceSource> RetryingStore<S> {
    pub async fn fetch_sequence(&self, sequence_id: u64) -> Result<Option<SequenceRecord>> {
        self.with_retry("fetch_sequence", &sequence_id.to_string(), || {
            self.inner.fetch(sequence_id)
        })
        .await
    }
}

impl<S: SharedEntitySource> RetryingStore<S> {
    pub async fn fetch_entity(&self, entity_id: u64) -> Result<SharedEntity> {
        self.with_retry("fetch_entity", &entity_id.to_string(), || {
            self.inner.fetch_entity(entity_id)
        })
        .await
    }
}

/// In-memory realization of the backing stores.
///
/// Used by the CLI loader (inputs are read into memory once) and by tests.
/// `fail_next` scripts transient failures per operation/key so retry paths
/// can be exercised.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    hits: Mutex<HashMap<StoreKey, Vec<RawHit>>>,
    sites: Mutex<HashMap<u64, Vec<RawSite>>>,
    matches: Mutex<HashMap<u64, Vec<FilteredMatch>>>,
    sequences: Mutex<HashMap<u64, SequenceRecord>>,
    entities: Mutex<HashMap<u64, SharedEntity>>,
    failures: Mutex<HashMap<String, u32>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned map of plain values is still usable
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_hit(&self, analysis: &str, hit: RawHit) {
        let key = StoreKey::new(hit.sequence_id, analysis);
        lock(&self.hits).entry(key).or_default().push(hit);
    }

    pub fn insert_site(&self, site: RawSite) {
        lock(&self.sites)
            .entry(site.sequence_id)
            .or_default()
            .push(site);
    }

    pub fn insert_sequence(&self, sequence: SequenceRecord) {
        lock(&self.sequences).insert(sequence.id, sequence);
    }

    pub fn insert_entity(&self, entity: SharedEntity) {
        lock(&self.entities).insert(entity.id, entity);
    }

    /// Script the next `times` calls tagged `op:key` to fail
    pub fn fail_next(&self, tag: impl Into<String>, times: u32) {
        lock(&self.failures).insert(tag.into(), times);
    }

    pub fn sequence_count(&self) -> usize {
        lock(&self.sequences).len()
    }

    pub fn persisted_matches(&self, sequence_id: u64) -> Vec<FilteredMatch> {
        lock(&self.matches)
            .get(&sequence_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_failure(&self, tag: &str) -> StoreResult<()> {
        let mut failures = lock(&self.failures);
        if let Some(remaining) = failures.get_mut(tag) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::new(format!("scripted failure for {}", tag)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn read_hits(&self, key: &StoreKey) -> StoreResult<Vec<RawHit>> {
        self.check_failure(&format!("read_hits:{}", key))?;
        Ok(lock(&self.hits).get(key).cloned().unwrap_or_default())
    }

    async fn read_sites(&self, sequence_id: u64) -> StoreResult<Vec<RawSite>> {
        self.check_failure(&format!("read_sites:{}", sequence_id))?;
        Ok(lock(&self.sites)
            .get(&sequence_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_matches(
        &self,
        sequence_id: u64,
        matches: &[FilteredMatch],
    ) -> StoreResult<()> {
        self.check_failure(&format!("write_matches:{}", sequence_id))?;
        lock(&self.matches).insert(sequence_id, matches.to_vec());
        Ok(())
    }

    async fn read_matches(&self, sequence_id: u64) -> StoreResult<Vec<FilteredMatch>> {
        self.check_failure(&format!("read_matches:{}", sequence_id))?;
        Ok(lock(&self.matches)
            .get(&sequence_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SequenceSource for InMemoryStore {
    async fn fetch(&self, sequence_id: u64) -> StoreResult<Option<SequenceRecord>> {
        self.check_failure(&format!("fetch_sequence:{}", sequence_id))?;
        Ok(lock(&self.sequences).get(&sequence_id).cloned())
    }
}

#[async_trait]
impl SharedEntitySource for InMemoryStore {
    async fn fetch_entity(&self, entity_id: u64) -> StoreResult<SharedEntity> {
        self.check_failure(&format!("fetch_entity:{}", entity_id))?;
        lock(&self.entities)
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| StoreError::new(format!("entity {} not found", entity_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(sequence_id: u64, model_id: &str) -> RawHit {
        RawHit {
            sequence_id,
            model_id: model_id.to_string(),
            start: 10,
            end: 20,
            score: 5.0,
            evalue: 1e-5,
        }
    }

    fn store_with_hit() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.insert_hit("pfam", hit(42, "PF00001"));
        store
    }

    fn zero_backoff_policy(max_attempts: u32) -> RetryPolicy {
        let config = RetryConfig {
            max_attempts,
            ..RetryConfig::default()
        };
        RetryPolicy::with_backoff(config, Arc::new(|_, _| Duration::from_secs(0)))
    }

    #[tokio::test]
    async fn test_read_succeeds_first_attempt() {
        let store = store_with_hit();
        let retrying = RetryingStore::new(store, zero_backoff_policy(4), 100);

        let hits = retrying
            .read_hits(&StoreKey::new(42, "pfam"))
            .await
            .expect("read should succeed");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].model_id, "PF00001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_recovers_on_third_attempt() {
        let store = store_with_hit();
        store.fail_next("read_hits:42:pfam", 2);
        let policy = RetryPolicy::new(RetryConfig::default());
        let retrying = RetryingStore::new(store, policy, 16_000);

        // Two scripted failures, then success; paused time auto-advances
        // through the propagation sleeps.
        let hits = retrying
            .read_hits(&StoreKey::new(42, "pfam"))
            .await
            .expect("third attempt should succeed");
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_read_exhausts_attempts() {
        let store = store_with_hit();
        store.fail_next("read_hits:42:pfam", 10);
        let retrying = RetryingStore::new(store.clone(), zero_backoff_policy(4), 100);

        let err = retrying
            .read_hits(&StoreKey::new(42, "pfam"))
            .await
            .expect_err("retries should be exhausted");
        match err {
            PrepError::StoreUnavailable { key, attempts, .. } => {
                assert_eq!(key, "42:pfam");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Exactly max_attempts calls were made: the bound stops the loop
        let remaining = lock(&store.failures)
            .get("read_hits:42:pfam")
            .copied()
            .unwrap_or(0);
        assert_eq!(remaining, 6);
    }

    #[tokio::test]
    async fn test_write_then_read_matches() {
        let store = Arc::new(InMemoryStore::new());
        let retrying = RetryingStore::new(store, zero_backoff_policy(4), 100);

        let matches = vec![FilteredMatch {
            signature_id: "SIG1".to_string(),
            model_id: "M1".to_string(),
            score: 5.0,
            evalue: 1e-5,
            locations: vec![],
        }];
        retrying
            .write_matches(7, &matches)
            .await
            .expect("write should succeed");
        let read_back = retrying.read_matches(7).await.expect("read should succeed");
        assert_eq!(read_back, matches);
    }

    #[tokio::test]
    async fn test_fetch_sequence_gap_is_none() {
        let store = Arc::new(InMemoryStore::new());
        let retrying = RetryingStore::new(store, zero_backoff_policy(4), 100);
        let fetched = retrying
            .fetch_sequence(999)
            .await
            .expect("gap should not be an error");
        assert!(fetched.is_none());
    }
}
