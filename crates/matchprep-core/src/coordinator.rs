//! Partition readiness tracking and the barrier wait
//!
//! Partitions run as independent units of work with no direct signaling
//! channel, so the barrier is a coarse sleep-poll loop: cheap, crash-tolerant
//! (a partition that never registers surfaces as a timeout at the caller's
//! ceiling, not a deadlock), and deliberately without heartbeats or liveness
//! probes.

use crate::config::BarrierConfig;
use crate::error::{PrepError, Result};
use std::collections::HashSet;
use std::sync::Mutex;

/// Tracks which partitions have finished their pre-barrier phases
#[derive(Debug, Default)]
pub struct PartitionCoordinator {
    ready: Mutex<HashSet<String>>,
}

impl PartitionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a partition ready. Idempotent; the ready set only ever grows.
    pub fn register(&self, partition_key: &str) {
        let mut ready = self
            .ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if ready.insert(partition_key.to_string()) {
            tracing::debug!(
                partition = partition_key,
                ready = ready.len(),
                "Partition registered ready"
            );
        }
    }

    /// Current size of the ready set
    pub fn ready_count(&self) -> usize {
        self.ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Block until at least `expected` partitions registered ready.
    ///
    /// Re-checks every `cfg.poll_interval`; returns `Ok(())` exactly once per
    /// caller as soon as the condition holds (the ready set is monotonic, so
    /// the first true observation stays true for every waiter). Fails with
    /// [`PrepError::CoordinationTimeout`] once `cfg.max_wait` elapses.
    pub async fn await_barrier(&self, expected: usize, cfg: &BarrierConfig) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            let ready = self.ready_count();
            if ready >= expected {
                tracing::debug!(ready, expected, "Barrier satisfied");
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= cfg.max_wait {
                return Err(PrepError::CoordinationTimeout {
                    ready,
                    expected,
                    waited_secs: waited.as_secs(),
                });
            }
            tracing::debug!(
                ready,
                expected,
                waited_secs = waited.as_secs(),
                "Waiting for partitions"
            );
            tokio::time::sleep(cfg.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_barrier() -> BarrierConfig {
        BarrierConfig {
            poll_interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let coordinator = PartitionCoordinator::new();
        coordinator.register("1_100");
        coordinator.register("1_100");
        coordinator.register("101_200");
        assert_eq!(coordinator.ready_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_returns_once_expected_reached() {
        let coordinator = Arc::new(PartitionCoordinator::new());
        coordinator.register("1_100");

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_barrier(2, &fast_barrier()).await })
        };

        // Let the waiter observe an unsatisfied barrier at least once
        tokio::time::sleep(Duration::from_millis(25)).await;
        coordinator.register("101_200");

        waiter
            .await
            .expect("waiter should not panic")
            .expect("barrier should be satisfied");
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_never_returns_early() {
        let coordinator = Arc::new(PartitionCoordinator::new());
        coordinator.register("1_100");

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_barrier(2, &fast_barrier()).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        coordinator.register("101_200");
        waiter
            .await
            .expect("waiter should not panic")
            .expect("barrier should be satisfied");
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_satisfied_before_wait_returns_immediately() {
        let coordinator = PartitionCoordinator::new();
        coordinator.register("1_100");
        coordinator.register("101_200");

        let started = tokio::time::Instant::now();
        coordinator
            .await_barrier(2, &fast_barrier())
            .await
            .expect("barrier already satisfied");
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_times_out() {
        let coordinator = PartitionCoordinator::new();
        coordinator.register("1_100");

        let cfg = BarrierConfig {
            poll_interval: Duration::from_millis(10),
            max_wait: Duration::from_millis(95),
        };
        let err = coordinator
            .await_barrier(3, &cfg)
            .await
            .expect_err("barrier cannot be satisfied");
        match err {
            PrepError::CoordinationTimeout {
                ready, expected, ..
            } => {
                assert_eq!(ready, 1);
                assert_eq!(expected, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_with_zero_expected_is_trivially_satisfied() {
        let coordinator = PartitionCoordinator::new();
        coordinator
            .await_barrier(0, &fast_barrier())
            .await
            .expect("empty barrier");
    }
}
