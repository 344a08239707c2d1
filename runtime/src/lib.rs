// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Geolens runtime: offline cache, background sync and layer orchestration
//! on top of the `geolens` aggregation core.

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod http;
pub mod layers;
pub mod metrics;
pub mod offline;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod strategy;
pub mod sync;

pub use config::GeoConfig;
pub use error::{
    ConfigError, FetchError, LayerError, OfflineError, ServiceError, StoreError,
};
pub use events::{EventBus, EventKind, LayerEvent, Subscription};
pub use layers::{LayerConfig, LayerGroup, LayerManager, LayerManagerConfig};
pub use offline::{FetchSource, Fetched, OfflineConfig, OfflineManager};
pub use services::GeoServices;
pub use store::{OfflineStore, ResourceKind};
pub use sync::{NewSyncTask, SyncOperation, SyncPriority, SyncReport, SyncTask};
