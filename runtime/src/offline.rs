// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Offline/cache manager.
//!
//! Persists fetched resources in the [`OfflineStore`], serves them back
//! according to per-URL [`CacheStrategy`](crate::strategy::CacheStrategy) rules, and replays queued
//! mutations ([`SyncTask`]s) whenever the device is online.
//!
//! A persistent write rejected for lack of quota is not an error: the
//! record is kept in an in-memory overlay for the rest of the session and
//! the rejection is logged.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::connectivity::Connectivity;
use crate::error::{FetchError, OfflineError, OfflineResult, StoreError};
use crate::http::{HttpClient, HttpResponse, DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS};
use crate::metrics::{Counters, OfflineMetrics};
use crate::scheduler::Scheduler;
use crate::store::{cache_key, CacheRecord, Collection, OfflineStore, ResourceKind};
use crate::strategy::{default_specs, StrategyKind, StrategySpec, StrategyTable};
use crate::sync::{NewSyncTask, SyncOperation, SyncReport, SyncTask, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_MAX_AGE_SECS: u64 = 24 * 3600;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;
pub const DEFAULT_STORAGE_QUOTA_BYTES: u64 = 50 * 1024 * 1024;

/// Offline manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OfflineConfig {
    /// SQLite file; `None` resolves to the default location.
    pub db_path: Option<PathBuf>,
    /// Freshness window for URLs no strategy matches.
    pub max_age_secs: u64,
    pub sync_interval_secs: u64,
    pub metrics_interval_secs: u64,
    pub max_sync_attempts: u32,
    /// Payloads larger than this are gzip-compressed at rest.
    pub compression_threshold: usize,
    /// Zero disables the quota check.
    pub storage_quota_bytes: u64,
    pub strategies: Vec<StrategySpec>,
    /// Polled on the metrics interval to detect connectivity.
    pub probe_url: Option<String>,
    pub http_timeout_ms: u64,
    pub http_retries: u32,
    pub start_online: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
            max_sync_attempts: DEFAULT_MAX_ATTEMPTS,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA_BYTES,
            strategies: default_specs(),
            probe_url: None,
            http_timeout_ms: DEFAULT_TIMEOUT_MS,
            http_retries: DEFAULT_RETRIES,
            start_online: true,
        }
    }
}

/// Where a fetched payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub data: Vec<u8>,
    pub source: FetchSource,
}

type SharedFetch = Shared<BoxFuture<'static, Result<HttpResponse, FetchError>>>;

struct Inner {
    store: OfflineStore,
    http: HttpClient,
    strategies: StrategyTable,
    config: OfflineConfig,
    clock: Arc<dyn Clock>,
    connectivity: Connectivity,
    counters: Counters,
    overlay: Mutex<HashMap<String, CacheRecord>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    draining: AtomicBool,
    destroyed: AtomicBool,
    scheduler: Scheduler,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the offline manager. Cheap to clone.
#[derive(Clone)]
pub struct OfflineManager {
    inner: Arc<Inner>,
}

impl OfflineManager {
    pub fn new(store: OfflineStore, config: OfflineConfig) -> OfflineResult<Self> {
        let http = HttpClient::new(config.http_timeout_ms, config.http_retries)?;
        let connectivity = Connectivity::new(config.start_online);
        Self::from_parts(store, config, http, connectivity, Arc::new(SystemClock))
    }

    pub fn from_parts(
        store: OfflineStore,
        config: OfflineConfig,
        http: HttpClient,
        connectivity: Connectivity,
        clock: Arc<dyn Clock>,
    ) -> OfflineResult<Self> {
        let strategies = StrategyTable::compile(&config.strategies)?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                http,
                strategies,
                config,
                clock,
                connectivity,
                counters: Counters::default(),
                overlay: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                draining: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                scheduler: Scheduler::new(),
                watcher: Mutex::new(None),
            }),
        })
    }

    pub fn store(&self) -> &OfflineStore {
        &self.inner.store
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.inner.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> OfflineResult<()> {
        if self.is_destroyed() {
            Err(OfflineError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    fn max_age_for(&self, url: &str) -> Duration {
        self.inner
            .strategies
            .resolve(url)
            .map(|s| s.max_age)
            .unwrap_or(Duration::from_secs(self.inner.config.max_age_secs))
    }

    // ── Cache ─────────────────────────────

    /// Store `data` for `url`.
    pub async fn cache_response(
        &self,
        url: &str,
        data: impl Into<Vec<u8>>,
        kind: ResourceKind,
    ) -> OfflineResult<()> {
        self.ensure_live()?;
        let generation = self.inner.store.generation();
        self.write_record(url, data.into(), kind, None, generation)
            .await?;
        Ok(())
    }

    /// Fresh cached payload for `url`, or `None`. Expired records are purged.
    pub async fn get_cached(&self, url: &str) -> OfflineResult<Option<Vec<u8>>> {
        self.ensure_live()?;
        self.lookup(url).await
    }

    /// Fetch `url` applying the first matching cache strategy. URLs no
    /// strategy matches go straight to the network and are not cached.
    pub async fn fetch(&self, url: &str, kind: ResourceKind) -> OfflineResult<Fetched> {
        let strategy = self
            .inner
            .strategies
            .resolve(url)
            .map(|s| s.kind)
            .unwrap_or(StrategyKind::NetworkOnly);
        self.fetch_with(url, kind, strategy).await
    }

    /// Fetch `url` with an explicit strategy.
    pub async fn fetch_with(
        &self,
        url: &str,
        kind: ResourceKind,
        strategy: StrategyKind,
    ) -> OfflineResult<Fetched> {
        self.ensure_live()?;
        tracing::debug!("fetch {} via {}", url, strategy.as_str());
        let write = strategy.writes_through();

        match strategy {
            StrategyKind::CacheFirst => {
                if let Some(data) = self.lookup(url).await? {
                    return Ok(cached(data));
                }
                self.fetch_network(url, kind, write).await
            }
            StrategyKind::NetworkFirst => match self.fetch_network(url, kind, write).await {
                Ok(fetched) => Ok(fetched),
                Err(OfflineError::Fetch(e)) => match self.lookup(url).await? {
                    Some(data) => {
                        tracing::debug!("network failed for {url}, serving cache: {e}");
                        Ok(cached(data))
                    }
                    None => Err(OfflineError::Fetch(e)),
                },
                Err(e) => Err(e),
            },
            StrategyKind::StaleWhileRevalidate => match self.lookup(url).await? {
                Some(data) => {
                    let manager = self.clone();
                    let url = url.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = manager.fetch_network(&url, kind, write).await {
                            tracing::debug!("background revalidation of {url} failed: {e}");
                        }
                    });
                    Ok(cached(data))
                }
                None => self.fetch_network(url, kind, write).await,
            },
            StrategyKind::NetworkOnly => self.fetch_network(url, kind, write).await,
            StrategyKind::CacheOnly => self
                .lookup(url)
                .await?
                .map(cached)
                .ok_or_else(|| OfflineError::NotCached(url.to_string())),
        }
    }

    async fn fetch_network(
        &self,
        url: &str,
        kind: ResourceKind,
        write_through: bool,
    ) -> OfflineResult<Fetched> {
        let generation = self.inner.store.generation();
        let (response, leader) = self.coalesced_get(url).await;
        let response = response?;
        // one write per coalesced request
        if write_through && leader {
            self.write_record(
                url,
                response.body.clone(),
                kind,
                response.content_type.clone(),
                generation,
            )
            .await?;
        }
        Ok(Fetched {
            data: response.body,
            source: FetchSource::Network,
        })
    }

    /// GET `url`, joining a request already in flight for the same URL.
    /// The flag is `true` for the caller that issued the request.
    async fn coalesced_get(&self, url: &str) -> (Result<HttpResponse, FetchError>, bool) {
        if !self.inner.connectivity.is_online() {
            return (Err(FetchError::Offline), false);
        }
        let (shared, leader) = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(url) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let http = self.inner.http.clone();
                    let target = url.to_string();
                    let fut = async move { http.get(&target).await }.boxed().shared();
                    in_flight.insert(url.to_string(), fut.clone());
                    (fut, true)
                }
            }
        };
        let result = shared.clone().await;
        let mut in_flight = lock(&self.inner.in_flight);
        if in_flight.get(url).is_some_and(|f| f.ptr_eq(&shared)) {
            in_flight.remove(url);
        }
        (result, leader)
    }

    async fn lookup(&self, url: &str) -> OfflineResult<Option<Vec<u8>>> {
        let key = cache_key(url);
        let max_age = self.max_age_for(url).as_millis() as i64;
        let now = self.now();

        let in_memory = lock(&self.inner.overlay).get(&key).cloned();
        let found = match in_memory {
            Some(record) => Some((None, record)),
            None => self
                .inner
                .store
                .find_record(&key)
                .await?
                .map(|(c, r)| (Some(c), r)),
        };

        let Some((collection, record)) = found else {
            self.inner.counters.miss();
            tracing::debug!("cache miss: {url}");
            return Ok(None);
        };

        if now - record.timestamp > max_age {
            match collection {
                Some(collection) => {
                    self.inner.store.delete_record(collection, &key).await?;
                }
                None => {
                    lock(&self.inner.overlay).remove(&key);
                }
            }
            self.inner.counters.miss();
            tracing::debug!("cache expired: {url}");
            return Ok(None);
        }

        self.inner.counters.hit();
        tracing::debug!("cache hit: {url}");
        Ok(Some(decode_payload(&record)?))
    }

    /// Persist a payload. Returns `false` when the write was discarded
    /// because the store was cleared or the manager destroyed meanwhile.
    async fn write_record(
        &self,
        url: &str,
        data: Vec<u8>,
        kind: ResourceKind,
        content_type: Option<String>,
        generation: u64,
    ) -> OfflineResult<bool> {
        if self.is_destroyed() {
            return Ok(false);
        }
        let size = data.len();
        let compressed = size > self.inner.config.compression_threshold;
        let payload = if compressed { gzip(&data)? } else { data };
        let record = CacheRecord {
            key: cache_key(url),
            url: url.to_string(),
            kind,
            payload,
            timestamp: self.now(),
            version: 0,
            compressed,
            metadata: serde_json::json!({ "contentType": content_type, "size": size }),
        };

        match self
            .inner
            .store
            .put_record(kind.collection(), record.clone(), Some(generation))
            .await
        {
            Ok(Some(_)) => {
                lock(&self.inner.overlay).remove(&record.key);
                Ok(true)
            }
            Ok(None) => {
                tracing::debug!("discarded write for {url}: store cleared meanwhile");
                Ok(false)
            }
            Err(e) if e.is_quota() => {
                tracing::warn!("storage quota reached, keeping {url} in memory only: {e}");
                if self.inner.store.generation() != generation {
                    return Ok(false);
                }
                lock(&self.inner.overlay).insert(record.key.clone(), record);
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Sync queue ────────────────────────

    /// Queue a mutation for the next drain. Returns the task id.
    pub async fn enqueue_sync(&self, task: NewSyncTask) -> OfflineResult<String> {
        self.ensure_live()?;
        let task = task.into_task(self.inner.config.max_sync_attempts, self.now());
        let id = task.id.clone();
        tracing::debug!(
            "sync task queued: {} {} {} ({:?})",
            id,
            task.operation.as_str(),
            task.url,
            task.priority
        );
        self.inner.store.insert_task(task).await?;
        self.refresh_pending().await?;
        Ok(id)
    }

    /// Queued tasks in drain order.
    pub async fn pending_tasks(&self) -> OfflineResult<Vec<SyncTask>> {
        Ok(self.inner.store.load_tasks().await?)
    }

    /// Attempt every queued task once, in priority order. Does nothing
    /// while offline or while another drain is running.
    pub async fn process_queue(&self) -> OfflineResult<SyncReport> {
        self.ensure_live()?;
        let mut report = SyncReport::default();
        if !self.inner.connectivity.is_online() {
            report.skipped_offline = true;
            return Ok(report);
        }
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            tracing::debug!("queue drain already running");
            return Ok(report);
        }
        let _guard = DrainGuard(&self.inner.draining);

        let generation = self.inner.store.generation();
        let tasks = self.inner.store.load_tasks().await?;

        for mut task in tasks {
            if self.inner.store.generation() != generation || self.is_destroyed() {
                break;
            }
            if !self.inner.connectivity.is_online() {
                break;
            }
            if task.exhausted() {
                self.inner.store.delete_task(&task.id).await?;
                report.dropped += 1;
                continue;
            }

            report.attempted += 1;
            report.order.push(task.id.clone());
            match self.attempt(&task).await {
                Ok(response) => {
                    self.inner.store.delete_task(&task.id).await?;
                    if task.operation == SyncOperation::Download {
                        self.write_record(
                            &task.url,
                            response.body,
                            ResourceKind::ApiResponse,
                            response.content_type,
                            generation,
                        )
                        .await?;
                    }
                    report.succeeded += 1;
                }
                Err(e) => {
                    task.attempts += 1;
                    task.last_attempt = Some(self.now());
                    report.failed += 1;
                    if task.exhausted() {
                        tracing::warn!(
                            "sync task {} dropped after {} attempts: {} {}: {e}",
                            task.id,
                            task.attempts,
                            task.operation.as_str(),
                            task.url
                        );
                        self.inner.store.delete_task(&task.id).await?;
                        report.dropped += 1;
                    } else {
                        tracing::debug!(
                            "sync task {} failed (attempt {}/{}): {e}",
                            task.id,
                            task.attempts,
                            task.max_attempts
                        );
                        self.inner.store.update_task(task, generation).await?;
                    }
                }
            }
        }

        if report.attempted > 0 && self.inner.store.generation() == generation {
            self.inner.counters.set_last_sync(self.now());
        }
        self.refresh_pending().await?;
        if report.attempted > 0 || report.dropped > 0 {
            tracing::info!(
                "sync queue drained: attempted={} succeeded={} failed={} dropped={}",
                report.attempted,
                report.succeeded,
                report.failed,
                report.dropped
            );
        }
        Ok(report)
    }

    /// One attempt is one request; the queue owns the retry budget.
    async fn attempt(&self, task: &SyncTask) -> Result<HttpResponse, FetchError> {
        self.inner
            .http
            .send_once(task.operation.method(), &task.url, task.payload.as_ref())
            .await
    }

    // ── Lifecycle & metrics ───────────────

    /// Empty every collection and reset metrics. Writes from operations
    /// still in flight are discarded.
    pub async fn clear(&self) -> OfflineResult<()> {
        self.ensure_live()?;
        self.inner.store.clear_all().await?;
        lock(&self.inner.overlay).clear();
        self.inner.counters.reset();
        tracing::info!("offline cache cleared");
        Ok(())
    }

    pub fn metrics(&self) -> OfflineMetrics {
        self.inner
            .counters
            .snapshot(self.inner.connectivity.is_online())
    }

    /// Re-query pending count and storage usage.
    pub async fn refresh_metrics(&self) -> OfflineResult<OfflineMetrics> {
        self.refresh_pending().await?;
        let estimate = self.inner.store.estimate().await?;
        self.inner.counters.set_storage(estimate.used, estimate.quota);
        Ok(self.metrics())
    }

    async fn refresh_pending(&self) -> Result<(), StoreError> {
        let pending = self.inner.store.count(Collection::SyncQueue).await?;
        self.inner.counters.set_pending(pending);
        Ok(())
    }

    /// Delete every persisted record past its freshness window.
    pub async fn sweep_expired(&self) -> OfflineResult<usize> {
        let now = self.now();
        let mut removed = 0;
        for head in self.inner.store.record_heads().await? {
            let max_age = self.max_age_for(&head.url).as_millis() as i64;
            if now - head.timestamp > max_age
                && self
                    .inner
                    .store
                    .delete_record(head.collection, &head.key)
                    .await?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("expired {removed} cached record(s)");
        }
        Ok(removed)
    }

    /// Start the sync and metrics timers and the connectivity watcher.
    pub fn start(&self) -> OfflineResult<()> {
        self.ensure_live()?;
        let config = &self.inner.config;

        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(
            "sync-queue",
            Duration::from_secs(config.sync_interval_secs),
            move || {
                let weak = weak.clone();
                async move {
                    let Some(manager) = upgrade(&weak) else {
                        return;
                    };
                    if manager.inner.connectivity.is_online() {
                        if let Err(e) = manager.process_queue().await {
                            tracing::warn!("scheduled queue drain failed: {e}");
                        }
                    }
                }
            },
        );

        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(
            "offline-metrics",
            Duration::from_secs(config.metrics_interval_secs),
            move || {
                let weak = weak.clone();
                async move {
                    let Some(manager) = upgrade(&weak) else {
                        return;
                    };
                    manager.metrics_tick().await;
                }
            },
        );

        let weak = Arc::downgrade(&self.inner);
        let mut rx = self.inner.connectivity.subscribe();
        let watcher = tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let came_online = online && !was_online;
                was_online = online;
                if !came_online {
                    continue;
                }
                let Some(manager) = upgrade(&weak) else {
                    break;
                };
                if let Err(e) = manager.process_queue().await {
                    tracing::warn!("reconnect queue drain failed: {e}");
                }
            }
        });
        if let Some(previous) = lock(&self.inner.watcher).replace(watcher) {
            previous.abort();
        }
        tracing::info!(
            "offline manager started: sync every {}s, metrics every {}s",
            config.sync_interval_secs,
            config.metrics_interval_secs
        );
        Ok(())
    }

    async fn metrics_tick(&self) {
        if let Some(url) = self.inner.config.probe_url.as_deref() {
            self.inner.connectivity.probe(&self.inner.http, url).await;
        }
        if let Err(e) = self.sweep_expired().await {
            tracing::warn!("expired-record sweep failed: {e}");
        }
        if let Err(e) = self.refresh_metrics().await {
            tracing::warn!("metrics refresh failed: {e}");
        }
    }

    /// Stop every timer. In-flight work completes but its results are
    /// discarded.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.scheduler.cancel_all();
        if let Some(watcher) = lock(&self.inner.watcher).take() {
            watcher.abort();
        }
        tracing::info!("offline manager destroyed");
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<OfflineManager> {
    weak.upgrade().map(|inner| OfflineManager { inner })
}

fn cached(data: Vec<u8>) -> Fetched {
    Fetched {
        data,
        source: FetchSource::Cache,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| StoreError::Compression(e.to_string()))
}

fn decode_payload(record: &CacheRecord) -> Result<Vec<u8>, StoreError> {
    if !record.compressed {
        return Ok(record.payload.clone());
    }
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(record.payload.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| StoreError::Compression(format!("{}: {e}", record.key)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manager(clock: ManualClock) -> OfflineManager {
        let store = OfflineStore::open_in_memory(0).unwrap();
        OfflineManager::from_parts(
            store,
            OfflineConfig::default(),
            HttpClient::new(1_000, 0).unwrap(),
            Connectivity::new(false),
            Arc::new(clock),
        )
        .unwrap()
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = vec![b'x'; 4096];
        let record = CacheRecord {
            key: "k".into(),
            url: "u".into(),
            kind: ResourceKind::Tiles,
            payload: gzip(&data).unwrap(),
            timestamp: 0,
            version: 1,
            compressed: true,
            metadata: serde_json::Value::Null,
        };
        assert!(record.payload.len() < data.len());
        assert_eq!(decode_payload(&record).unwrap(), data);
    }

    #[tokio::test]
    async fn test_large_payloads_are_compressed_at_rest() {
        let m = manager(ManualClock::new(0));
        let data = vec![7u8; 10_000];
        m.cache_response("https://x/big", data.clone(), ResourceKind::UserData)
            .await
            .unwrap();

        let (_, record) = m
            .store()
            .find_record(&cache_key("https://x/big"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.compressed);
        assert_eq!(m.get_cached("https://x/big").await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_strategy_max_age_overrides_default() {
        let clock = ManualClock::new(0);
        let m = manager(clock.clone());
        // /api/ is network-first with a five minute window
        m.cache_response("https://x/api/traffic", b"[]".to_vec(), ResourceKind::ApiResponse)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(301));
        assert_eq!(m.get_cached("https://x/api/traffic").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_fetch_falls_back_to_cache() {
        let m = manager(ManualClock::new(0));
        m.cache_response("https://x/api/weather", b"{}".to_vec(), ResourceKind::ApiResponse)
            .await
            .unwrap();
        let fetched = m
            .fetch("https://x/api/weather", ResourceKind::ApiResponse)
            .await
            .unwrap();
        assert_eq!(fetched.source, FetchSource::Cache);

        let err = m
            .fetch("https://x/api/other", ResourceKind::ApiResponse)
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::Fetch(FetchError::Offline)));
    }

    #[tokio::test]
    async fn test_process_queue_offline_is_noop() {
        let m = manager(ManualClock::new(0));
        m.enqueue_sync(NewSyncTask::new(
            SyncOperation::Upload,
            "https://x/api/reports",
            crate::sync::SyncPriority::High,
        ))
        .await
        .unwrap();
        let report = m.process_queue().await.unwrap();
        assert!(report.skipped_offline);
        assert_eq!(report.attempted, 0);
        assert_eq!(m.pending_tasks().await.unwrap().len(), 1);
        assert_eq!(m.metrics().pending_sync, 1);
    }

    #[tokio::test]
    async fn test_destroyed_manager_rejects_calls() {
        let m = manager(ManualClock::new(0));
        m.destroy();
        assert!(matches!(
            m.get_cached("https://x").await,
            Err(OfflineError::Destroyed)
        ));
        assert!(m.start().is_err());
    }
}
