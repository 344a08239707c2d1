// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Built-in layer catalog: base maps, real-time overlays, analytical layers.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::config::{LayerConfig, LayerGroup, LayerKind, LayerSource, LayerStyle};
use crate::strategy::StrategyKind;

/// Id of the exclusive base-map group.
pub const BASEMAP_GROUP: &str = "basemaps";

/// Layers plus the groups that reference them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub layers: Vec<LayerConfig>,
    pub groups: Vec<LayerGroup>,
}

fn tiles(template: &str, hosts: &[&str]) -> LayerSource {
    LayerSource::Tiles {
        urls: vec![template.to_string()],
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
    }
}

fn api(base: &str, path: &str, refresh_interval_ms: u64) -> LayerSource {
    LayerSource::Api {
        url: format!("{}{}", base.trim_end_matches('/'), path),
        refresh_interval_ms,
    }
}

/// The default catalog with data endpoints under `api_base`.
pub fn default_catalog(api_base: &str) -> Catalog {
    let layers = vec![
        // ── Base maps ─────────────────────
        LayerConfig::new(
            "osm-streets",
            "Streets",
            LayerKind::Raster,
            tiles("https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png", &["a", "b", "c"]),
        )
        .visible(true)
        .cache_strategy(StrategyKind::CacheFirst)
        .zoom_range(0, 19),
        LayerConfig::new(
            "satellite",
            "Satellite",
            LayerKind::Raster,
            tiles(
                "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}",
                &[],
            ),
        )
        .cache_strategy(StrategyKind::CacheFirst)
        .zoom_range(0, 19),
        LayerConfig::new(
            "terrain",
            "Terrain",
            LayerKind::Raster,
            tiles("https://{s}.tile.opentopomap.org/{z}/{x}/{y}.png", &["a", "b", "c"]),
        )
        .cache_strategy(StrategyKind::CacheFirst)
        .zoom_range(0, 17),
        // ── Real-time overlays ────────────
        LayerConfig::new(
            "traffic",
            "Traffic",
            LayerKind::Vector,
            api(api_base, "/api/traffic", 30_000),
        )
        .z_index(10)
        .update_frequency(30_000)
        .interactive(true)
        .style(LayerStyle {
            paint: json!({ "line-width": 3, "line-color": ["get", "congestionColor"] }),
            layout: json!({ "line-cap": "round" }),
        }),
        LayerConfig::new(
            "weather",
            "Weather",
            LayerKind::Raster,
            api(api_base, "/api/weather/tiles", 300_000),
        )
        .z_index(5)
        .opacity(0.6)
        .update_frequency(300_000),
        LayerConfig::new(
            "civic-issues",
            "Civic issues",
            LayerKind::Heatmap,
            api(api_base, "/api/civic/heatmap", 60_000),
        )
        .visible(true)
        .z_index(20)
        .update_frequency(60_000)
        .interactive(true)
        .style(LayerStyle {
            paint: json!({ "heatmap-radius": 20, "heatmap-intensity": ["get", "intensity"] }),
            layout: serde_json::Value::Null,
        }),
        // ── Analytical ────────────────────
        LayerConfig::new(
            "population-density",
            "Population density",
            LayerKind::Heatmap,
            api(api_base, "/api/demographics/population", 0),
        )
        .z_index(3)
        .opacity(0.7)
        .cache_strategy(StrategyKind::StaleWhileRevalidate),
        LayerConfig::new(
            "admin-boundaries",
            "Administrative boundaries",
            LayerKind::Geojson,
            LayerSource::Geojson {
                url: format!("{}/api/boundaries/admin", api_base.trim_end_matches('/')),
                refresh_interval_ms: 0,
            },
        )
        .z_index(15)
        .cache_strategy(StrategyKind::CacheFirst),
    ];

    let groups = vec![
        LayerGroup::new(BASEMAP_GROUP, &["osm-streets", "satellite", "terrain"])
            .exclusive(Some("osm-streets"))
            .category("base"),
        LayerGroup::new("realtime", &["traffic", "weather", "civic-issues"]).category("realtime"),
        LayerGroup::new("analytics", &["population-density", "admin-boundaries"])
            .category("analytical"),
    ];

    Catalog { layers, groups }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_groups_reference_known_layers() {
        let catalog = default_catalog("https://geo.example.org/");
        for group in &catalog.groups {
            for id in &group.layers {
                assert!(catalog.layers.iter().any(|l| &l.id == id), "{id}");
            }
        }
    }

    #[test]
    fn test_catalog_has_single_visible_basemap() {
        let catalog = default_catalog("https://geo.example.org");
        let basemaps = catalog
            .groups
            .iter()
            .find(|g| g.id == BASEMAP_GROUP)
            .unwrap();
        assert!(basemaps.exclusive);
        let visible = catalog
            .layers
            .iter()
            .filter(|l| basemaps.contains(&l.id) && l.visible)
            .count();
        assert_eq!(visible, 1);
    }

    #[test]
    fn test_api_base_is_joined() {
        let catalog = default_catalog("https://geo.example.org/");
        let traffic = catalog.layers.iter().find(|l| l.id == "traffic").unwrap();
        assert_eq!(
            traffic.source.data_url(),
            Some("https://geo.example.org/api/traffic")
        );
    }
}
