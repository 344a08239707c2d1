// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! One explicitly constructed instance of every service.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use geolens::{Bounds, GeoPoint, GeoResult, GridAggregator, GridResult, Tile, TileGenerator};

use crate::config::GeoConfig;
use crate::error::ServiceError;
use crate::layers::LayerManager;
use crate::offline::OfflineManager;
use crate::store::OfflineStore;

pub struct GeoServices {
    pub config: GeoConfig,
    pub offline: OfflineManager,
    pub layers: LayerManager,
    aggregator: Mutex<GridAggregator>,
    tiles: Mutex<TileGenerator>,
}

impl GeoServices {
    /// Open the store at the resolved path and wire every service to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: GeoConfig, db_path: Option<&Path>) -> Result<Self, ServiceError> {
        let path = config.resolve_db_path(db_path);
        let store = OfflineStore::open(&path, config.offline.storage_quota_bytes)?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: GeoConfig, store: OfflineStore) -> Result<Self, ServiceError> {
        let offline = OfflineManager::new(store, config.offline.clone())?;
        let layers = LayerManager::new(config.layers.clone(), Arc::new(offline.clone()))?;
        Ok(Self {
            aggregator: Mutex::new(GridAggregator::new(config.grid.clone())),
            tiles: Mutex::new(TileGenerator::new(config.tiles.clone())),
            config,
            offline,
            layers,
        })
    }

    /// Start the offline manager's timers and connectivity watcher.
    pub fn start(&self) -> Result<(), ServiceError> {
        self.offline.start()?;
        Ok(())
    }

    pub fn aggregate(
        &self,
        points: &[GeoPoint],
        bounds: &Bounds,
        resolution: Option<u8>,
    ) -> GeoResult<Arc<GridResult>> {
        lock(&self.aggregator).aggregate(points, bounds, resolution)
    }

    pub fn generate_tiles(
        &self,
        points: &[GeoPoint],
        zoom: u8,
        bounds: Option<Bounds>,
    ) -> GeoResult<Vec<Tile>> {
        lock(&self.tiles).generate(points, zoom, bounds)
    }

    /// Release every timer. Safe to call more than once.
    pub fn destroy(&self) {
        self.layers.destroy();
        self.offline.destroy();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_services_share_one_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GeoConfig::default();
        config.offline.start_online = false;
        let services = GeoServices::new(config, Some(&dir.path().join("geo.db"))).unwrap();

        services
            .offline
            .cache_response(
                "https://x/api/traffic",
                b"[]".to_vec(),
                crate::store::ResourceKind::ApiResponse,
            )
            .await
            .unwrap();
        assert_eq!(services.layers.layers().len(), 8);
        assert_eq!(services.layers.active_basemap().as_deref(), Some("osm-streets"));

        let points = vec![GeoPoint::new(37.77, -122.41, 5.0)];
        let grid = services.aggregate(&points, &Bounds::world(), Some(8)).unwrap();
        assert_eq!(grid.total_points, 1);
        let tiles = services.generate_tiles(&points, 12, None).unwrap();
        assert_eq!(tiles.len(), 1);

        services.start().unwrap();
        services.destroy();
        services.destroy();
        assert!(services.offline.is_destroyed());
    }
}
