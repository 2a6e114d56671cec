use std::sync::atomic::{AtomicU64, Ordering};

use crate::CacheStats;

/// Lock-free counters behind every back-end's `stats()`.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
    partial_hits: AtomicU64,
}

impl StatsCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn partial_hit(&self) {
        self.partial_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hit, marking it partial when it covers fewer steps than
    /// requested.
    pub fn hit_with_len(&self, matched: usize, requested: usize) {
        self.hit();
        if matched < requested {
            self.partial_hit();
        }
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            partial_hits: self.partial_hits.load(Ordering::Relaxed),
        }
    }
}
