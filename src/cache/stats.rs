//! Cache Statistics Module
//!
//! Tracks table activity: lookup hits and misses, loader insertions,
//! expirations and explicit deletions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of a table's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the map
    pub hits: u64,
    /// Lookups that found no item in the map (loaded or not)
    pub misses: u64,
    /// Items inserted by the data loader
    pub loads: u64,
    /// Items removed by the expiration sweep
    pub expirations: u64,
    /// Items removed by explicit deletion
    pub deletions: u64,
    /// Current number of items in the table
    pub total_entries: usize,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters shared by every operation on a table.
///
/// Lookups only hold the table's shared lock, so the counters cannot live
/// behind it.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    expirations: AtomicU64,
    deletions: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deletion(&self) {
        self.deletions.fetch_add(1, Ordering::Relaxed);
    }

    /// Builds a snapshot; `total_entries` comes from the caller's view of the map.
    pub(crate) fn snapshot(&self, total_entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            total_entries,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let recorder = StatsRecorder::default();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_miss();

        let stats = recorder.snapshot(3);
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.total_entries, 3);
    }

    #[test]
    fn test_removal_counters() {
        let recorder = StatsRecorder::default();
        recorder.record_expiration();
        recorder.record_expiration();
        recorder.record_deletion();
        recorder.record_load();

        let stats = recorder.snapshot(0);
        assert_eq!(stats.expirations, 2);
        assert_eq!(stats.deletions, 1);
        assert_eq!(stats.loads, 1);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = CacheStats {
            hits: 4,
            total_entries: 2,
            ..CacheStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["hits"], 4);
        assert_eq!(json["total_entries"], 2);
    }
}
