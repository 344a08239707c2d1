// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layer orchestrator behaviour: exclusivity, ordering, events, refresh.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geolens_runtime::error::{FetchError, OfflineResult};
use geolens_runtime::layers::{
    LayerConfig, LayerDataSource, LayerKind, LayerManager, LayerManagerConfig, LayerSource,
};
use geolens_runtime::offline::{OfflineConfig, OfflineManager};
use geolens_runtime::strategy::StrategyKind;
use geolens_runtime::{EventKind, LayerError, LayerEvent, OfflineError, OfflineStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Counts fetches; fails when `fail` is set.
#[derive(Default)]
struct Stub {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl LayerDataSource for Stub {
    async fn fetch_layer_data(&self, url: &str, _: StrategyKind) -> OfflineResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(OfflineError::Fetch(FetchError::Status {
                url: url.to_string(),
                status: 502,
            }));
        }
        Ok(b"{\"features\":[]}".to_vec())
    }
}

fn catalog_manager() -> LayerManager {
    LayerManager::new(LayerManagerConfig::default(), Arc::new(Stub::default())).unwrap()
}

fn bare_manager(source: Arc<Stub>) -> LayerManager {
    let config = LayerManagerConfig {
        load_default_catalog: false,
        ..Default::default()
    };
    LayerManager::new(config, source).unwrap()
}

fn api_layer(id: &str) -> LayerConfig {
    LayerConfig::new(
        id,
        id,
        LayerKind::Vector,
        LayerSource::Api {
            url: format!("https://geo.example.org/api/{id}"),
            refresh_interval_ms: 0,
        },
    )
}

fn record(manager: &LayerManager, kind: EventKind) -> Arc<Mutex<Vec<LayerEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.subscribe(kind, move |e| sink.lock().unwrap().push(e.clone()));
    seen
}

fn visible_basemaps(manager: &LayerManager) -> Vec<String> {
    ["osm-streets", "satellite", "terrain"]
        .into_iter()
        .filter(|id| manager.layer(id).unwrap().visible)
        .map(str::to_string)
        .collect()
}

// ── Exclusive groups ───────────────────────

#[tokio::test]
async fn test_toggle_in_exclusive_group_leaves_exactly_one_visible() {
    let m = catalog_manager();
    assert_eq!(visible_basemaps(&m), vec!["osm-streets"]);

    assert!(m.toggle_layer("satellite").unwrap());
    assert_eq!(visible_basemaps(&m), vec!["satellite"]);

    assert!(m.toggle_layer("osm-streets").unwrap());
    assert_eq!(visible_basemaps(&m), vec!["osm-streets"]);
    assert_eq!(m.active_basemap().as_deref(), Some("osm-streets"));
    m.destroy();
}

#[tokio::test]
async fn test_toggle_emits_hide_before_show() {
    let m = catalog_manager();
    let seen = record(&m, EventKind::VisibilityChange);

    m.toggle_layer("terrain").unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            LayerEvent::VisibilityChange {
                layer_id: "osm-streets".into(),
                visible: false
            },
            LayerEvent::VisibilityChange {
                layer_id: "terrain".into(),
                visible: true
            },
        ]
    );
    m.destroy();
}

#[tokio::test]
async fn test_set_basemap() {
    let m = catalog_manager();
    let changes = record(&m, EventKind::BasemapChange);

    m.set_basemap("terrain").unwrap();
    assert_eq!(visible_basemaps(&m), vec!["terrain"]);
    assert_eq!(m.active_basemap().as_deref(), Some("terrain"));
    assert_eq!(changes.lock().unwrap().len(), 1);

    assert_eq!(
        m.set_basemap("traffic"),
        Err(LayerError::NotABasemap("traffic".into()))
    );
    m.destroy();
}

#[tokio::test]
async fn test_non_exclusive_group_allows_many_visible() {
    let m = catalog_manager();
    m.set_visibility("traffic", true).unwrap();
    m.set_visibility("weather", true).unwrap();
    assert!(m.layer("civic-issues").unwrap().visible);
    assert!(m.layer("traffic").unwrap().visible);
    m.destroy();
}

// ── Ordering ───────────────────────────────

#[tokio::test]
async fn test_visible_layers_sorted_by_z_index_stably() {
    let m = bare_manager(Arc::new(Stub::default()));
    for (id, z) in [("a", 5), ("b", 1), ("c", 5), ("d", 1), ("e", 0)] {
        m.add_layer(api_layer(id).z_index(z).visible(id != "e")).unwrap();
    }
    let order: Vec<String> = m.get_visible_layers().into_iter().map(|l| l.id).collect();
    assert_eq!(order, vec!["b", "d", "a", "c"]);
}

// ── Events ─────────────────────────────────

#[tokio::test]
async fn test_listener_panic_does_not_block_later_listeners() {
    let m = bare_manager(Arc::new(Stub::default()));
    m.subscribe(EventKind::Load, |_| panic!("bad listener"));
    let seen = record(&m, EventKind::Load);

    m.add_layer(api_layer("a")).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![LayerEvent::Load {
            layer_id: "a".into()
        }]
    );
}

#[tokio::test]
async fn test_opacity_is_clamped_and_announced() {
    let m = bare_manager(Arc::new(Stub::default()));
    m.add_layer(api_layer("a")).unwrap();
    let seen = record(&m, EventKind::OpacityChange);

    assert_eq!(m.set_opacity("a", 1.7).unwrap(), 1.0);
    assert_eq!(m.layer("a").unwrap().opacity, 1.0);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![LayerEvent::OpacityChange {
            layer_id: "a".into(),
            opacity: 1.0
        }]
    );
}

#[tokio::test]
async fn test_stream_sees_every_event() {
    let m = bare_manager(Arc::new(Stub::default()));
    let mut rx = m.events().stream();
    m.add_layer(api_layer("a")).unwrap();
    m.remove_layer("a").unwrap();
    assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Load);
    assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Remove);
}

// ── Refresh ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_periodic_refresh_only_while_visible() {
    let source = Arc::new(Stub::default());
    let m = bare_manager(Arc::clone(&source));
    let updates = record(&m, EventKind::Update);

    m.add_layer(api_layer("live").update_frequency(1_000).visible(true))
        .unwrap();
    m.add_layer(api_layer("hidden").update_frequency(1_000))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    tokio::task::yield_now().await;

    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    assert_eq!(updates.lock().unwrap().len(), 3);
    assert!(m.layer_data("live").is_some());
    assert!(m.layer_data("hidden").is_none());

    m.remove_layer("live").unwrap();
    tokio::time::sleep(Duration::from_millis(3_000)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_refresh_failure_emits_error_event() {
    let source = Arc::new(Stub {
        fail: true,
        ..Default::default()
    });
    let m = bare_manager(source);
    m.add_layer(api_layer("traffic")).unwrap();
    let errors = record(&m, EventKind::Error);

    assert!(!m.refresh_layer("traffic").await.unwrap());
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        LayerEvent::Error { layer_id, message } if layer_id == "traffic" && message.contains("502")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_destroy_stops_all_refresh() {
    let source = Arc::new(Stub::default());
    let m = bare_manager(Arc::clone(&source));
    m.add_layer(api_layer("a").update_frequency(500).visible(true))
        .unwrap();
    m.destroy();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(m.refresh_layer("a").await, Err(LayerError::Destroyed));
}

#[tokio::test]
async fn test_refresh_through_offline_manager() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/civic/heatmap"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[{\"lat\":37.77}]"))
        .mount(&server)
        .await;

    let store = OfflineStore::open_in_memory(0).unwrap();
    let offline = OfflineManager::new(store, OfflineConfig::default()).unwrap();
    let config = LayerManagerConfig {
        api_base: server.uri(),
        ..Default::default()
    };
    let m = LayerManager::new(config, Arc::new(offline.clone())).unwrap();

    assert!(m.refresh_layer("civic-issues").await.unwrap());
    let data = m.layer_data("civic-issues").unwrap();
    assert_eq!(data.json(), Some(serde_json::json!([{ "lat": 37.77 }])));

    let url = format!("{}/api/civic/heatmap", server.uri());
    assert!(offline.get_cached(&url).await.unwrap().is_some());
    m.destroy();
    offline.destroy();
}
