//! C9 — read-only, racy-but-safe statistics (spec section 4.7, design note
//! "Statistics races"). Every counter is a relaxed atomic so that gathering
//! stats never needs to lock a zone's owning executor.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Statistics {
    pub entries_indexed: AtomicU64,
    pub memory_used: AtomicU64,
    pub collisions: AtomicU64,
    pub entries_discarded: AtomicU64,
    pub checkpoints: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub entries_indexed: u64,
    pub memory_used: u64,
    pub collisions: u64,
    pub entries_discarded: u64,
    pub checkpoints: u64,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            entries_indexed: self.entries_indexed.load(Ordering::Relaxed),
            memory_used: self.memory_used.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            entries_discarded: self.entries_discarded.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
        }
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.entries_discarded.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::ops::Add for StatisticsSnapshot {
    type Output = StatisticsSnapshot;

    fn add(self, rhs: StatisticsSnapshot) -> StatisticsSnapshot {
        StatisticsSnapshot {
            entries_indexed: self.entries_indexed + rhs.entries_indexed,
            memory_used: self.memory_used + rhs.memory_used,
            collisions: self.collisions + rhs.collisions,
            entries_discarded: self.entries_discarded + rhs.entries_discarded,
            checkpoints: self.checkpoints + rhs.checkpoints,
        }
    }
}
