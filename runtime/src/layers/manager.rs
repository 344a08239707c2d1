// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layer orchestrator.
//!
//! Owns the layer catalog and groups, enforces exclusive-group visibility,
//! schedules per-layer refresh and publishes [`LayerEvent`]s. State changes
//! made by one call are applied under a single lock before any event is
//! delivered, so listeners always observe a consistent catalog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::catalog::{Catalog, BASEMAP_GROUP};
use super::config::{LayerConfig, LayerGroup};
use crate::error::{LayerError, LayerResult, OfflineError, OfflineResult};
use crate::events::{EventBus, EventKind, LayerEvent, Subscription};
use crate::offline::OfflineManager;
use crate::scheduler::{Scheduler, TimerId};
use crate::store::ResourceKind;
use crate::strategy::StrategyKind;

/// Fetches layer payloads on refresh.
#[async_trait]
pub trait LayerDataSource: Send + Sync {
    async fn fetch_layer_data(&self, url: &str, strategy: StrategyKind) -> OfflineResult<Vec<u8>>;
}

#[async_trait]
impl LayerDataSource for OfflineManager {
    async fn fetch_layer_data(&self, url: &str, strategy: StrategyKind) -> OfflineResult<Vec<u8>> {
        Ok(self
            .fetch_with(url, ResourceKind::VectorData, strategy)
            .await?
            .data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayerManagerConfig {
    /// Prefix for catalog data endpoints.
    pub api_base: String,
    /// Load the built-in catalog on construction.
    pub load_default_catalog: bool,
    /// Buffer of the async event stream.
    pub event_capacity: usize,
}

impl Default for LayerManagerConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080".to_string(),
            load_default_catalog: true,
            event_capacity: 256,
        }
    }
}

/// Latest payload fetched for a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerData {
    pub payload: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

impl LayerData {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

#[derive(Default)]
struct State {
    layers: IndexMap<String, LayerConfig>,
    groups: IndexMap<String, LayerGroup>,
    timers: HashMap<String, TimerId>,
    data: HashMap<String, LayerData>,
    active_basemap: Option<String>,
}

impl State {
    fn layer_mut(&mut self, id: &str) -> LayerResult<&mut LayerConfig> {
        self.layers
            .get_mut(id)
            .ok_or_else(|| LayerError::NotFound(id.to_string()))
    }

    /// Set visibility and, when showing, hide every other member of the
    /// exclusive groups `id` belongs to.
    fn apply_visibility(&mut self, id: &str, visible: bool, events: &mut Vec<LayerEvent>) {
        if visible {
            let siblings: Vec<String> = self
                .groups
                .values()
                .filter(|g| g.exclusive && g.contains(id))
                .flat_map(|g| g.layers.iter().filter(|l| *l != id).cloned())
                .collect();
            for sibling in siblings {
                if let Some(layer) = self.layers.get_mut(&sibling) {
                    if layer.visible {
                        layer.visible = false;
                        events.push(LayerEvent::VisibilityChange {
                            layer_id: sibling,
                            visible: false,
                        });
                    }
                }
            }
            if self.is_basemap(id) {
                self.active_basemap = Some(id.to_string());
            }
        } else if self.active_basemap.as_deref() == Some(id) {
            self.active_basemap = None;
        }

        if let Some(layer) = self.layers.get_mut(id) {
            if layer.visible != visible {
                layer.visible = visible;
                events.push(LayerEvent::VisibilityChange {
                    layer_id: id.to_string(),
                    visible,
                });
            }
        }
    }

    fn is_basemap(&self, id: &str) -> bool {
        self.groups
            .get(BASEMAP_GROUP)
            .is_some_and(|g| g.contains(id))
    }
}

struct Inner {
    state: Mutex<State>,
    events: EventBus,
    scheduler: Scheduler,
    source: Arc<dyn LayerDataSource>,
    destroyed: AtomicBool,
}

/// Handle to the layer orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct LayerManager {
    inner: Arc<Inner>,
}

impl LayerManager {
    /// Build a manager, loading the default catalog if configured.
    ///
    /// Must be called from within a tokio runtime when the catalog contains
    /// periodically refreshed layers.
    pub fn new(config: LayerManagerConfig, source: Arc<dyn LayerDataSource>) -> LayerResult<Self> {
        let manager = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                events: EventBus::new(config.event_capacity),
                scheduler: Scheduler::new(),
                source,
                destroyed: AtomicBool::new(false),
            }),
        };
        if config.load_default_catalog {
            manager.load_catalog(super::catalog::default_catalog(&config.api_base))?;
        }
        Ok(manager)
    }

    /// Register every layer, then every group of a catalog.
    pub fn load_catalog(&self, catalog: Catalog) -> LayerResult<()> {
        for layer in catalog.layers {
            self.add_layer(layer)?;
        }
        for group in catalog.groups {
            self.add_group(group)?;
        }
        Ok(())
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&LayerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.inner.events.unsubscribe(subscription)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_live(&self) -> LayerResult<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            Err(LayerError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn emit_all(&self, events: Vec<LayerEvent>) {
        for event in events {
            self.inner.events.emit(event);
        }
    }

    // ── Catalog ───────────────────────────

    /// Register a layer and start its refresh timer when it has one.
    pub fn add_layer(&self, mut config: LayerConfig) -> LayerResult<()> {
        self.ensure_live()?;
        config.validate()?;
        let id = config.id.clone();
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            if state.layers.contains_key(&id) {
                return Err(LayerError::Duplicate(id));
            }
            let every = config.update_frequency;
            let visible = config.visible;
            state.layers.insert(id.clone(), config);
            events.push(LayerEvent::Load {
                layer_id: id.clone(),
            });
            if visible {
                state.apply_visibility(&id, true, &mut events);
            }
            if every > 0 {
                let timer = self.start_refresh_timer(&id, Duration::from_millis(every));
                state.timers.insert(id.clone(), timer);
            }
        }
        tracing::debug!("layer registered: {id}");
        self.emit_all(events);
        Ok(())
    }

    /// Register a group. Every member must already be registered; an
    /// exclusive group with several visible members keeps only one.
    pub fn add_group(&self, group: LayerGroup) -> LayerResult<()> {
        self.ensure_live()?;
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            if state.groups.contains_key(&group.id) {
                return Err(LayerError::Duplicate(group.id));
            }
            if let Some(missing) = group.layers.iter().find(|l| !state.layers.contains_key(*l)) {
                return Err(LayerError::NotFound(missing.clone()));
            }
            let keep = if group.exclusive {
                let visible: Vec<&String> = group
                    .layers
                    .iter()
                    .filter(|l| state.layers.get(*l).is_some_and(|c| c.visible))
                    .collect();
                group
                    .default_layer
                    .as_ref()
                    .filter(|d| visible.contains(d))
                    .or(visible.first().copied())
                    .cloned()
            } else {
                None
            };
            let id = group.id.clone();
            state.groups.insert(id, group);
            if let Some(keep) = keep {
                state.apply_visibility(&keep, true, &mut events);
            }
        }
        self.emit_all(events);
        Ok(())
    }

    /// Cancel refresh, drop cached data and forget the layer.
    pub fn remove_layer(&self, id: &str) -> LayerResult<()> {
        self.ensure_live()?;
        {
            let mut state = self.lock();
            if state.layers.shift_remove(id).is_none() {
                return Err(LayerError::NotFound(id.to_string()));
            }
            if let Some(timer) = state.timers.remove(id) {
                self.inner.scheduler.cancel(timer);
            }
            state.data.remove(id);
            for group in state.groups.values_mut() {
                group.layers.retain(|l| l != id);
                if group.default_layer.as_deref() == Some(id) {
                    group.default_layer = None;
                }
            }
            if state.active_basemap.as_deref() == Some(id) {
                state.active_basemap = None;
            }
        }
        tracing::debug!("layer removed: {id}");
        self.inner.events.emit(LayerEvent::Remove {
            layer_id: id.to_string(),
        });
        Ok(())
    }

    pub fn layer(&self, id: &str) -> Option<LayerConfig> {
        self.lock().layers.get(id).cloned()
    }

    /// Every layer in registration order.
    pub fn layers(&self) -> Vec<LayerConfig> {
        self.lock().layers.values().cloned().collect()
    }

    pub fn group(&self, id: &str) -> Option<LayerGroup> {
        self.lock().groups.get(id).cloned()
    }

    pub fn groups(&self) -> Vec<LayerGroup> {
        self.lock().groups.values().cloned().collect()
    }

    pub fn layer_data(&self, id: &str) -> Option<LayerData> {
        self.lock().data.get(id).cloned()
    }

    pub fn active_basemap(&self) -> Option<String> {
        self.lock().active_basemap.clone()
    }

    /// Visible layers by ascending stacking index; ties keep registration
    /// order.
    pub fn get_visible_layers(&self) -> Vec<LayerConfig> {
        let mut visible: Vec<LayerConfig> = self
            .lock()
            .layers
            .values()
            .filter(|l| l.visible)
            .cloned()
            .collect();
        visible.sort_by_key(|l| l.z_index);
        visible
    }

    // ── Visibility ────────────────────────

    /// Flip a layer's visibility. Returns the new state.
    pub fn toggle_layer(&self, id: &str) -> LayerResult<bool> {
        self.ensure_live()?;
        let mut events = Vec::new();
        let visible = {
            let mut state = self.lock();
            let visible = !state.layer_mut(id)?.visible;
            state.apply_visibility(id, visible, &mut events);
            visible
        };
        self.emit_all(events);
        Ok(visible)
    }

    pub fn set_visibility(&self, id: &str, visible: bool) -> LayerResult<()> {
        self.ensure_live()?;
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            state.layer_mut(id)?;
            state.apply_visibility(id, visible, &mut events);
        }
        self.emit_all(events);
        Ok(())
    }

    /// Set opacity, clamped to `[0, 1]`. Returns the applied value.
    pub fn set_opacity(&self, id: &str, opacity: f64) -> LayerResult<f64> {
        self.ensure_live()?;
        if !opacity.is_finite() {
            return Err(LayerError::Invalid {
                id: id.to_string(),
                reason: "opacity is not a finite number".to_string(),
            });
        }
        let opacity = opacity.clamp(0.0, 1.0);
        self.lock().layer_mut(id)?.opacity = opacity;
        self.inner.events.emit(LayerEvent::OpacityChange {
            layer_id: id.to_string(),
            opacity,
        });
        Ok(opacity)
    }

    /// Show `id` and hide every other base map.
    pub fn set_basemap(&self, id: &str) -> LayerResult<()> {
        self.ensure_live()?;
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let group = state
                .groups
                .get(BASEMAP_GROUP)
                .ok_or_else(|| LayerError::GroupNotFound(BASEMAP_GROUP.to_string()))?;
            if !group.contains(id) {
                return Err(LayerError::NotABasemap(id.to_string()));
            }
            let siblings: Vec<String> = group.layers.iter().filter(|l| *l != id).cloned().collect();
            state.layer_mut(id)?;
            for sibling in siblings {
                state.apply_visibility(&sibling, false, &mut events);
            }
            state.apply_visibility(id, true, &mut events);
            state.active_basemap = Some(id.to_string());
        }
        events.push(LayerEvent::BasemapChange {
            layer_id: id.to_string(),
        });
        self.emit_all(events);
        Ok(())
    }

    // ── Refresh ───────────────────────────

    fn start_refresh_timer(&self, id: &str, every: Duration) -> TimerId {
        let weak = Arc::downgrade(&self.inner);
        let layer_id = id.to_string();
        self.inner
            .scheduler
            .start(&format!("layer:{id}"), every, move || {
                let weak = weak.clone();
                let layer_id = layer_id.clone();
                async move {
                    let Some(manager) = upgrade(&weak) else {
                        return;
                    };
                    let visible = manager.lock().layers.get(&layer_id).is_some_and(|l| l.visible);
                    if visible {
                        // errors are reported as events
                        let _ = manager.refresh_layer(&layer_id).await;
                    }
                }
            })
    }

    /// Fetch fresh data for a layer. A failed fetch emits
    /// [`LayerEvent::Error`] and returns `Ok(false)`; results arriving after
    /// the layer was removed or the manager destroyed are discarded.
    pub async fn refresh_layer(&self, id: &str) -> LayerResult<bool> {
        self.ensure_live()?;
        let (url, strategy) = {
            let state = self.lock();
            let layer = state
                .layers
                .get(id)
                .ok_or_else(|| LayerError::NotFound(id.to_string()))?;
            match layer.source.data_url() {
                Some(url) => (url.to_string(), layer.cache_strategy),
                None => return Ok(false),
            }
        };

        let result = self.inner.source.fetch_layer_data(&url, strategy).await;

        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        match result {
            Ok(payload) => {
                let bytes = payload.len();
                {
                    let mut state = self.lock();
                    if !state.layers.contains_key(id) {
                        return Ok(false);
                    }
                    state.data.insert(
                        id.to_string(),
                        LayerData {
                            payload,
                            updated_at: Utc::now(),
                        },
                    );
                }
                tracing::debug!("layer {id} refreshed: {bytes} bytes");
                self.inner.events.emit(LayerEvent::Update {
                    layer_id: id.to_string(),
                    bytes,
                });
                Ok(true)
            }
            Err(OfflineError::Destroyed) => Ok(false),
            Err(e) => {
                if !self.lock().layers.contains_key(id) {
                    return Ok(false);
                }
                tracing::warn!("layer {id} refresh failed: {e}");
                self.inner.events.emit(LayerEvent::Error {
                    layer_id: id.to_string(),
                    message: e.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// Stop every refresh timer and drop all state and listeners.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.scheduler.cancel_all();
        *self.lock() = State::default();
        self.inner.events.clear();
        tracing::info!("layer manager destroyed");
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<LayerManager> {
    weak.upgrade().map(|inner| LayerManager { inner })
}
