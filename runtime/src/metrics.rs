// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Offline cache metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineMetrics {
    /// Hits over lookups, in `[0, 1]`.
    pub cache_hit_rate: f64,
    pub cache_miss_rate: f64,
    pub pending_sync: usize,
    pub storage_used: u64,
    pub storage_available: u64,
    pub is_online: bool,
    /// Epoch milliseconds of the last drain that attempted anything.
    pub last_sync: Option<i64>,
}

/// Live counters behind [`OfflineMetrics`].
#[derive(Debug, Default)]
pub struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    pending_sync: AtomicU64,
    storage_used: AtomicU64,
    storage_available: AtomicU64,
    // 0 means never
    last_sync: AtomicU64,
}

impl Counters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending_sync.store(pending as u64, Ordering::Relaxed);
    }

    pub fn set_storage(&self, used: u64, available: u64) {
        self.storage_used.store(used, Ordering::Relaxed);
        self.storage_available.store(available, Ordering::Relaxed);
    }

    pub fn set_last_sync(&self, at: i64) {
        self.last_sync.store(at.max(1) as u64, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.pending_sync,
            &self.storage_used,
            &self.storage_available,
            &self.last_sync,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, is_online: bool) -> OfflineMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let (cache_hit_rate, cache_miss_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (hits as f64 / total as f64, misses as f64 / total as f64)
        };
        let last_sync = match self.last_sync.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at as i64),
        };
        OfflineMetrics {
            cache_hit_rate,
            cache_miss_rate,
            pending_sync: self.pending_sync.load(Ordering::Relaxed) as usize,
            storage_used: self.storage_used.load(Ordering::Relaxed),
            storage_available: self.storage_available.load(Ordering::Relaxed),
            is_online,
            last_sync,
        }
    }
}
