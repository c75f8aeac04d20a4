//! Balancer statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::heap::WorkerId;

/// Point-in-time balancer statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancerStats {
    /// Configured number of workers.
    pub worker_count: usize,
    /// Workers currently in rotation.
    pub live_workers: usize,
    /// Tasks accepted by the intake.
    pub submitted_tasks: u64,
    /// Tasks handed to a worker.
    pub dispatched_tasks: u64,
    /// Tasks that produced a value.
    pub completed_tasks: u64,
    /// Tasks that failed or timed out while running.
    pub failed_tasks: u64,
    /// Tasks refused by a full queue or with no worker to take them.
    pub rejected_tasks: u64,
    /// Workers that died and were retired or replaced.
    pub lost_workers: u64,
    /// Tasks held by a worker when it died. Their requesters see
    /// `Abandoned`.
    pub abandoned_tasks: u64,
}

impl BalancerStats {
    /// Tasks dispatched that have neither finished nor been abandoned.
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.dispatched_tasks
            .saturating_sub(self.completed_tasks)
            .saturating_sub(self.failed_tasks)
            .saturating_sub(self.abandoned_tasks)
    }
}

/// Lock-free counters shared by the facade, the balancer thread and workers.
#[derive(Debug, Default)]
pub(crate) struct BalancerCounters {
    pub live_workers: AtomicUsize,
    pub submitted_tasks: AtomicU64,
    pub dispatched_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub rejected_tasks: AtomicU64,
    pub lost_workers: AtomicU64,
    pub abandoned_tasks: AtomicU64,
}

impl BalancerCounters {
    pub fn snapshot(&self, worker_count: usize) -> BalancerStats {
        BalancerStats {
            worker_count,
            live_workers: self.live_workers.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            dispatched_tasks: self.dispatched_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
            lost_workers: self.lost_workers.load(Ordering::Relaxed),
            abandoned_tasks: self.abandoned_tasks.load(Ordering::Relaxed),
        }
    }
}

/// One worker as seen by the balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLoad {
    /// Worker slot.
    pub id: WorkerId,
    /// Respawn generation of the thread occupying the slot.
    pub generation: u32,
    /// Outstanding tasks.
    pub load: usize,
    /// Heap index, `None` for a retired worker.
    pub position: Option<usize>,
}

/// Consistent view of the pool, taken between two balancer events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Every worker slot, ordered by id.
    pub workers: Vec<WorkerLoad>,
    /// Tasks dispatched and not yet completed.
    pub in_flight: usize,
    /// Whether the heap order and position invariants held.
    pub heap_valid: bool,
}

impl PoolSnapshot {
    /// Sum of worker loads. Equals `in_flight` whenever `heap_valid` holds.
    #[must_use]
    pub fn total_load(&self) -> usize {
        self.workers.iter().map(|w| w.load).sum()
    }

    /// Loads indexed by worker id.
    #[must_use]
    pub fn loads(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.load).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = BalancerCounters::default();
        counters.submitted_tasks.fetch_add(10, Ordering::Relaxed);
        counters.dispatched_tasks.fetch_add(8, Ordering::Relaxed);
        counters.completed_tasks.fetch_add(5, Ordering::Relaxed);
        counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
        counters.live_workers.store(4, Ordering::Relaxed);

        let stats = counters.snapshot(4);
        assert_eq!(stats.worker_count, 4);
        assert_eq!(stats.live_workers, 4);
        assert_eq!(stats.submitted_tasks, 10);
        assert_eq!(stats.outstanding(), 2);

        // Tasks lost with a dead worker stop counting as outstanding.
        counters.abandoned_tasks.fetch_add(2, Ordering::Relaxed);
        assert_eq!(counters.snapshot(4).outstanding(), 0);
    }

    #[test]
    fn test_snapshot_totals() {
        let snapshot = PoolSnapshot {
            workers: vec![
                WorkerLoad { id: 0, generation: 0, load: 2, position: Some(1) },
                WorkerLoad { id: 1, generation: 1, load: 0, position: Some(0) },
            ],
            in_flight: 2,
            heap_valid: true,
        };
        assert_eq!(snapshot.total_load(), 2);
        assert_eq!(snapshot.loads(), vec![2, 0]);
    }
}
