// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layer event bus: typed events from the layer orchestrator.
//!
//! Handlers subscribe per [`EventKind`] and are called synchronously, in
//! subscription order. A panicking handler is logged and skipped; the
//! remaining handlers still run. Every event is also pushed into a
//! `tokio::sync::broadcast` channel for async consumers. When no
//! subscribers exist, events are silently dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the layer orchestrator emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LayerEvent {
    /// A layer was registered.
    Load { layer_id: String },
    VisibilityChange { layer_id: String, visible: bool },
    OpacityChange { layer_id: String, opacity: f64 },
    /// Fresh data was fetched and cached for a layer.
    Update { layer_id: String, bytes: usize },
    /// A scheduled or manual refresh failed.
    Error { layer_id: String, message: String },
    BasemapChange { layer_id: String },
    Remove { layer_id: String },
}

/// Discriminant used to subscribe to one event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Load,
    VisibilityChange,
    OpacityChange,
    Update,
    Error,
    BasemapChange,
    Remove,
}

impl LayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LayerEvent::Load { .. } => EventKind::Load,
            LayerEvent::VisibilityChange { .. } => EventKind::VisibilityChange,
            LayerEvent::OpacityChange { .. } => EventKind::OpacityChange,
            LayerEvent::Update { .. } => EventKind::Update,
            LayerEvent::Error { .. } => EventKind::Error,
            LayerEvent::BasemapChange { .. } => EventKind::BasemapChange,
            LayerEvent::Remove { .. } => EventKind::Remove,
        }
    }

    pub fn layer_id(&self) -> &str {
        match self {
            LayerEvent::Load { layer_id }
            | LayerEvent::VisibilityChange { layer_id, .. }
            | LayerEvent::OpacityChange { layer_id, .. }
            | LayerEvent::Update { layer_id, .. }
            | LayerEvent::Error { layer_id, .. }
            | LayerEvent::BasemapChange { layer_id }
            | LayerEvent::Remove { layer_id } => layer_id,
        }
    }
}

type Handler = Arc<dyn Fn(&LayerEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`]; pass it back to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(Subscription, Handler)>,
}

/// Synchronous publish/subscribe bus with a broadcast side channel.
pub struct EventBus {
    registry: Mutex<Registry>,
    sender: broadcast::Sender<LayerEvent>,
}

impl EventBus {
    /// Create a bus whose broadcast stream buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            registry: Mutex::new(Registry::default()),
            sender,
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&LayerEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let sub = Subscription {
            kind,
            id: registry.next_id,
        };
        registry.handlers.push((sub, Arc::new(handler)));
        sub
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut registry = self.lock();
        let before = registry.handlers.len();
        registry.handlers.retain(|(s, _)| *s != subscription);
        registry.handlers.len() != before
    }

    /// Stream of every future event.
    pub fn stream(&self) -> broadcast::Receiver<LayerEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock()
            .handlers
            .iter()
            .filter(|(s, _)| s.kind == kind)
            .count()
    }

    /// Deliver an event to every handler of its kind, then to the stream.
    pub fn emit(&self, event: LayerEvent) {
        let kind = event.kind();
        // handlers may subscribe or emit re-entrantly
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .iter()
            .filter(|(s, _)| s.kind == kind)
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::warn!(
                    "layer event listener panicked: kind={:?} layer={}",
                    kind,
                    event.layer_id()
                );
            }
        }
        let _ = self.sender.send(event);
    }

    pub fn clear(&self) {
        self.lock().handlers.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(id: &str) -> LayerEvent {
        LayerEvent::Load {
            layer_id: id.to_string(),
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = LayerEvent::OpacityChange {
            layer_id: "traffic".to_string(),
            opacity: 0.5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"opacity-change\""));
        let parsed: LayerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::Load, move |_| seen.lock().unwrap().push(n));
        }
        bus.emit(load("a"));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(0));
        bus.subscribe(EventKind::Load, |_| panic!("listener failure"));
        let counter = Arc::clone(&seen);
        bus.subscribe(EventKind::Load, move |_| *counter.lock().unwrap() += 1);

        bus.emit(load("a"));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_only_matching_kind_is_delivered() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        bus.subscribe(EventKind::Remove, move |_| *counter.lock().unwrap() += 1);
        bus.emit(load("a"));
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let sub = bus.subscribe(EventKind::Load, move |_| *counter.lock().unwrap() += 1);
        assert!(bus.unsubscribe(sub));
        assert!(!bus.unsubscribe(sub));
        bus.emit(load("a"));
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(bus.listener_count(EventKind::Load), 0);
    }

    #[test]
    fn test_stream_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.stream();
        bus.emit(load("osm-streets"));
        assert_eq!(rx.try_recv().unwrap(), load("osm-streets"));
    }

    #[test]
    fn test_emit_no_subscribers() {
        let bus = EventBus::default();
        bus.emit(load("nobody"));
    }
}
