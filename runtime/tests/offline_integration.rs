// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Offline manager against a mock HTTP server and a real SQLite store.

use std::sync::Arc;
use std::time::Duration;

use geolens_runtime::clock::ManualClock;
use geolens_runtime::connectivity::Connectivity;
use geolens_runtime::http::HttpClient;
use geolens_runtime::offline::{FetchSource, OfflineConfig, OfflineManager};
use geolens_runtime::store::{cache_key, Collection, OfflineStore, ResourceKind};
use geolens_runtime::{NewSyncTask, SyncOperation, SyncPriority};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const START: i64 = 1_700_000_000_000;

fn manager(store: OfflineStore, online: bool, clock: ManualClock) -> OfflineManager {
    OfflineManager::from_parts(
        store,
        OfflineConfig::default(),
        HttpClient::new(2_000, 0).unwrap(),
        Connectivity::new(online),
        Arc::new(clock),
    )
    .unwrap()
}

fn in_memory(online: bool) -> (OfflineManager, ManualClock) {
    let clock = ManualClock::new(START);
    let store = OfflineStore::open_in_memory(0).unwrap();
    (manager(store, online, clock.clone()), clock)
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}

// ── Cache TTL ──────────────────────────────

#[tokio::test]
async fn test_cached_response_expires_after_max_age() {
    let (m, clock) = in_memory(false);
    let url = "https://geo.example.org/reports/42";

    m.cache_response(url, b"{\"id\":42}".to_vec(), ResourceKind::UserData)
        .await
        .unwrap();
    assert_eq!(
        m.get_cached(url).await.unwrap().as_deref(),
        Some(&b"{\"id\":42}"[..])
    );

    clock.advance(Duration::from_secs(24 * 3600 + 1));
    assert_eq!(m.get_cached(url).await.unwrap(), None);
    assert!(m.store().find_record(&cache_key(url)).await.unwrap().is_none());

    let metrics = m.metrics();
    assert_eq!(metrics.cache_hit_rate, 0.5);
    assert_eq!(metrics.cache_miss_rate, 0.5);
}

#[tokio::test]
async fn test_recache_bumps_version() {
    let (m, _) = in_memory(false);
    let url = "https://geo.example.org/reports/1";
    m.cache_response(url, b"a".to_vec(), ResourceKind::UserData)
        .await
        .unwrap();
    m.cache_response(url, b"b".to_vec(), ResourceKind::UserData)
        .await
        .unwrap();
    let record = m
        .store()
        .get_record(Collection::UserData, &cache_key(url))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.payload, b"b");
}

#[tokio::test]
async fn test_latest_write_wins_across_resource_kinds() {
    let (m, _) = in_memory(false);
    let url = "https://geo.example.org/api/civic/heatmap";
    m.cache_response(url, b"old".to_vec(), ResourceKind::VectorData)
        .await
        .unwrap();
    m.cache_response(url, b"new".to_vec(), ResourceKind::ApiResponse)
        .await
        .unwrap();

    assert_eq!(m.get_cached(url).await.unwrap(), Some(b"new".to_vec()));
    assert_eq!(m.store().count(Collection::Tiles).await.unwrap(), 0);
}

#[tokio::test]
async fn test_quota_rejection_keeps_data_in_memory() {
    let clock = ManualClock::new(START);
    let store = OfflineStore::open_in_memory(1).unwrap();
    let m = manager(store, false, clock);
    let url = "https://geo.example.org/big";

    m.cache_response(url, vec![1u8; 64], ResourceKind::UserData)
        .await
        .unwrap();
    assert_eq!(m.store().count(Collection::UserData).await.unwrap(), 0);
    assert_eq!(m.get_cached(url).await.unwrap(), Some(vec![1u8; 64]));
}

// ── Strategies ─────────────────────────────

#[tokio::test]
async fn test_cache_first_hits_network_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/12/655/1583.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
        .expect(1)
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    let url = format!("{}/12/655/1583.png", server.uri());
    let first = m.fetch(&url, ResourceKind::Tiles).await.unwrap();
    let second = m.fetch(&url, ResourceKind::Tiles).await.unwrap();
    assert_eq!(first.source, FetchSource::Network);
    assert_eq!(second.source, FetchSource::Cache);
    assert_eq!(first.data, second.data);
    assert_eq!(m.store().count(Collection::Tiles).await.unwrap(), 1);
}

#[tokio::test]
async fn test_network_first_falls_back_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/traffic"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[1]"))
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    let url = format!("{}/api/traffic", server.uri());
    assert_eq!(
        m.fetch(&url, ResourceKind::ApiResponse).await.unwrap().source,
        FetchSource::Network
    );

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetched = m.fetch(&url, ResourceKind::ApiResponse).await.unwrap();
    assert_eq!(fetched.source, FetchSource::Cache);
    assert_eq!(fetched.data, b"[1]");
}

#[tokio::test]
async fn test_stale_while_revalidate_refreshes_in_background() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user/me"))
        .respond_with(ResponseTemplate::new(200).set_body_string("new"))
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    let url = format!("{}/api/user/me", server.uri());
    m.cache_response(&url, b"old".to_vec(), ResourceKind::ApiResponse)
        .await
        .unwrap();

    let served = m.fetch(&url, ResourceKind::ApiResponse).await.unwrap();
    assert_eq!(served.source, FetchSource::Cache);
    assert_eq!(served.data, b"old");

    eventually(|| {
        let m = m.clone();
        let url = url.clone();
        async move { m.get_cached(&url).await.unwrap().as_deref() == Some(&b"new"[..]) }
    })
    .await;
}

#[tokio::test]
async fn test_concurrent_fetches_are_coalesced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/weather"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    let url = format!("{}/api/weather", server.uri());
    let (a, b) = tokio::join!(
        m.fetch(&url, ResourceKind::ApiResponse),
        m.fetch(&url, ResourceKind::ApiResponse)
    );
    assert_eq!(a.unwrap().data, b.unwrap().data);
}

// ── Sync queue ─────────────────────────────

#[tokio::test]
async fn test_sync_drains_by_priority() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(3)
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    let mut ids = Vec::new();
    for (priority, name) in [
        (SyncPriority::Low, "low"),
        (SyncPriority::High, "high"),
        (SyncPriority::Medium, "medium"),
    ] {
        let task = NewSyncTask::new(
            SyncOperation::Upload,
            format!("{}/api/{name}", server.uri()),
            priority,
        )
        .with_payload(serde_json::json!({ "name": name }));
        ids.push(m.enqueue_sync(task).await.unwrap());
    }

    let report = m.process_queue().await.unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(
        report.order,
        vec![ids[1].clone(), ids[2].clone(), ids[0].clone()]
    );

    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/api/high", "/api/medium", "/api/low"]);
    assert!(m.pending_tasks().await.unwrap().is_empty());
    assert!(m.metrics().last_sync.is_some());
}

#[tokio::test]
async fn test_failing_task_dropped_at_attempt_ceiling() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    m.enqueue_sync(NewSyncTask::new(
        SyncOperation::Update,
        format!("{}/api/reports/9", server.uri()),
        SyncPriority::High,
    ))
    .await
    .unwrap();

    for attempt in 1..=2u32 {
        let report = m.process_queue().await.unwrap();
        assert_eq!((report.failed, report.dropped), (1, 0));
        let pending = m.pending_tasks().await.unwrap();
        assert_eq!(pending[0].attempts, attempt);
        assert!(pending[0].last_attempt.is_some());
    }
    let report = m.process_queue().await.unwrap();
    assert_eq!((report.failed, report.dropped), (1, 1));
    assert!(m.pending_tasks().await.unwrap().is_empty());

    let report = m.process_queue().await.unwrap();
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_sync_attempt_sends_one_request_with_default_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reports"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = OfflineStore::open_in_memory(0).unwrap();
    let m = OfflineManager::new(store, OfflineConfig::default()).unwrap();
    m.enqueue_sync(
        NewSyncTask::new(
            SyncOperation::Upload,
            format!("{}/api/reports", server.uri()),
            SyncPriority::High,
        )
        .with_max_attempts(1),
    )
    .await
    .unwrap();

    let report = m.process_queue().await.unwrap();
    assert_eq!((report.attempted, report.dropped), (1, 1));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_download_task_caches_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/boundaries/admin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"type\":\"FeatureCollection\"}"))
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    let url = format!("{}/api/boundaries/admin", server.uri());
    m.enqueue_sync(NewSyncTask::new(
        SyncOperation::Download,
        url.clone(),
        SyncPriority::Low,
    ))
    .await
    .unwrap();
    m.process_queue().await.unwrap();
    assert!(m.get_cached(&url).await.unwrap().is_some());
}

#[tokio::test]
async fn test_reconnect_triggers_drain() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (m, _) = in_memory(false);
    m.start().unwrap();
    m.enqueue_sync(NewSyncTask::new(
        SyncOperation::Delete,
        format!("{}/api/reports/3", server.uri()),
        SyncPriority::Medium,
    ))
    .await
    .unwrap();
    assert!(m.process_queue().await.unwrap().skipped_offline);

    m.connectivity().set_online(true);
    eventually(|| {
        let m = m.clone();
        async move { m.pending_tasks().await.unwrap().is_empty() }
    })
    .await;
    m.destroy();
}

// ── Clear ──────────────────────────────────

#[tokio::test]
async fn test_clear_during_drain_does_not_resurrect_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/population"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("[]")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let (m, _) = in_memory(true);
    let url = format!("{}/api/population", server.uri());
    m.cache_response("https://geo.example.org/other", b"x".to_vec(), ResourceKind::UserData)
        .await
        .unwrap();
    m.enqueue_sync(NewSyncTask::new(
        SyncOperation::Download,
        url.clone(),
        SyncPriority::High,
    ))
    .await
    .unwrap();

    let drain = tokio::spawn({
        let m = m.clone();
        async move { m.process_queue().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    m.clear().await.unwrap();
    drain.await.unwrap().unwrap();

    for collection in Collection::ALL {
        assert_eq!(m.store().count(collection).await.unwrap(), 0, "{collection:?}");
    }
    assert_eq!(m.get_cached(&url).await.unwrap(), None);
    assert_eq!(m.metrics().pending_sync, 0);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("offline.db");
    {
        let store = OfflineStore::open(&db, 0).unwrap();
        let m = manager(store, false, ManualClock::new(START));
        m.enqueue_sync(NewSyncTask::new(
            SyncOperation::Upload,
            "https://geo.example.org/api/reports",
            SyncPriority::High,
        ))
        .await
        .unwrap();
    }
    let store = OfflineStore::open(&db, 0).unwrap();
    let m = manager(store, false, ManualClock::new(START));
    let pending = m.pending_tasks().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].max_attempts, 3);
}
