// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layer and layer-group definitions.

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, LayerResult};
use crate::strategy::StrategyKind;

/// Deepest zoom a layer may declare.
pub const MAX_LAYER_ZOOM: u8 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Vector,
    Raster,
    Heatmap,
    Geojson,
}

/// Where a layer's data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerSource {
    /// XYZ tile templates, optionally with `{s}` host rotation.
    Tiles {
        urls: Vec<String>,
        #[serde(default)]
        hosts: Vec<String>,
    },
    Api {
        url: String,
        #[serde(default, rename = "refreshIntervalMs")]
        refresh_interval_ms: u64,
    },
    Websocket { url: String },
    Geojson {
        url: String,
        #[serde(default, rename = "refreshIntervalMs")]
        refresh_interval_ms: u64,
    },
}

impl LayerSource {
    /// Endpoint fetched on refresh; tile and socket sources have none.
    pub fn data_url(&self) -> Option<&str> {
        match self {
            LayerSource::Api { url, .. } | LayerSource::Geojson { url, .. } => Some(url),
            LayerSource::Tiles { .. } | LayerSource::Websocket { .. } => None,
        }
    }
}

/// Opaque paint/layout description handed to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    #[serde(default)]
    pub paint: serde_json::Value,
    #[serde(default)]
    pub layout: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStrategy {
    #[default]
    Eager,
    Lazy,
    Viewport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    pub id: String,
    pub name: String,
    pub kind: LayerKind,
    pub source: LayerSource,
    #[serde(default)]
    pub style: LayerStyle,
    #[serde(default)]
    pub visible: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Stacking index; higher draws on top.
    #[serde(default)]
    pub z_index: i32,
    #[serde(default)]
    pub min_zoom: u8,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default)]
    pub interactive: bool,
    /// Refresh period in milliseconds; zero disables periodic refresh.
    #[serde(default)]
    pub update_frequency: u64,
    #[serde(default = "default_cache_strategy")]
    pub cache_strategy: StrategyKind,
    #[serde(default)]
    pub loading_strategy: LoadingStrategy,
}

fn default_opacity() -> f64 {
    1.0
}

fn default_max_zoom() -> u8 {
    MAX_LAYER_ZOOM
}

fn default_cache_strategy() -> StrategyKind {
    StrategyKind::NetworkFirst
}

impl LayerConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: LayerKind,
        source: LayerSource,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            source,
            style: LayerStyle::default(),
            visible: false,
            opacity: default_opacity(),
            z_index: 0,
            min_zoom: 0,
            max_zoom: MAX_LAYER_ZOOM,
            interactive: false,
            update_frequency: 0,
            cache_strategy: default_cache_strategy(),
            loading_strategy: LoadingStrategy::Eager,
        }
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn update_frequency(mut self, millis: u64) -> Self {
        self.update_frequency = millis;
        self
    }

    pub fn opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn cache_strategy(mut self, strategy: StrategyKind) -> Self {
        self.cache_strategy = strategy;
        self
    }

    pub fn style(mut self, style: LayerStyle) -> Self {
        self.style = style;
        self
    }

    pub fn zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Check the config and clamp opacity into `[0, 1]`.
    pub fn validate(&mut self) -> LayerResult<()> {
        let invalid = |reason: &str| LayerError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if !self.opacity.is_finite() {
            return Err(invalid("opacity is not a finite number"));
        }
        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_LAYER_ZOOM {
            return Err(invalid("zoom range out of order or beyond 22"));
        }
        if let LayerSource::Tiles { urls, .. } = &self.source {
            if urls.is_empty() {
                return Err(invalid("tile source without templates"));
            }
        }
        self.opacity = self.opacity.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn visible_at(&self, zoom: u8) -> bool {
        self.visible && (self.min_zoom..=self.max_zoom).contains(&zoom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerGroup {
    pub id: String,
    pub layers: Vec<String>,
    /// At most one member visible at a time.
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub default_layer: Option<String>,
    #[serde(default)]
    pub category: String,
}

impl LayerGroup {
    pub fn new(id: impl Into<String>, layers: &[&str]) -> Self {
        Self {
            id: id.into(),
            layers: layers.iter().map(|l| l.to_string()).collect(),
            exclusive: false,
            default_layer: None,
            category: String::new(),
        }
    }

    pub fn exclusive(mut self, default_layer: Option<&str>) -> Self {
        self.exclusive = true;
        self.default_layer = default_layer.map(str::to_string);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn contains(&self, layer_id: &str) -> bool {
        self.layers.iter().any(|l| l == layer_id)
    }
}
