//! Acquisition pipeline telemetry.
//!
//! Lock-free atomic counters recording what the cache, downloader, and
//! engine are doing. One [`Metrics`] instance is shared across the
//! components of an engine; [`Metrics::snapshot`] takes a point-in-time
//! copy for display.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for one engine's acquisition pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    downloads_coalesced: AtomicU64,
    fetches_cancelled: AtomicU64,
}

impl Metrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cache read served from memory or disk.
    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache read that found nothing.
    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one evicted cache entry.
    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed download.
    pub fn download_succeeded(&self) {
        self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a download that failed permanently.
    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fetch answered by an already in-flight request.
    pub fn download_coalesced(&self) {
        self.downloads_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fetch discarded because its token was cancelled.
    pub fn fetch_cancelled(&self) {
        self.fetches_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            downloads_coalesced: self.downloads_coalesced.load(Ordering::Relaxed),
            fetches_cancelled: self.fetches_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Cache reads served from memory or disk.
    pub cache_hits: u64,
    /// Cache reads that found nothing.
    pub cache_misses: u64,
    /// Entries evicted under the byte budget.
    pub evictions: u64,
    /// Downloads completed successfully.
    pub downloads_succeeded: u64,
    /// Downloads that failed permanently.
    pub downloads_failed: u64,
    /// Fetches answered by an already in-flight request.
    pub downloads_coalesced: u64,
    /// Fetches discarded because their token was cancelled.
    pub fetches_cancelled: u64,
}
