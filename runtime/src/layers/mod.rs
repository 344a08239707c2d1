// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layer orchestration: catalog, groups, visibility rules and refresh.

pub mod catalog;
pub mod config;
pub mod manager;

pub use catalog::{default_catalog, Catalog, BASEMAP_GROUP};
pub use config::{
    LayerConfig, LayerGroup, LayerKind, LayerSource, LayerStyle, LoadingStrategy, MAX_LAYER_ZOOM,
};
pub use manager::{LayerData, LayerDataSource, LayerManager, LayerManagerConfig};
