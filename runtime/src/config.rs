// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration loading and resolution.
//!
//! Defaults, then an optional JSON file, then `GEOLENS_*` environment
//! overrides.

use std::path::{Path, PathBuf};

use geolens::{GridConfig, TileConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layers::LayerManagerConfig;
use crate::offline::OfflineConfig;

pub const ENV_CONFIG: &str = "GEOLENS_CONFIG";
pub const ENV_DB: &str = "GEOLENS_DB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub offline: OfflineConfig,
    pub grid: GridConfig,
    pub tiles: TileConfig,
    pub layers: LayerManagerConfig,
}

impl GeoConfig {
    /// Load from `explicit`, else `GEOLENS_CONFIG`, else defaults; then
    /// apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| read_env_string(ENV_CONFIG).filter(|s| !s.is_empty()).map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Apply `GEOLENS_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_string());
        let offline = &mut self.offline;

        if let Some(db) = read(ENV_DB).filter(|s| !s.is_empty()) {
            offline.db_path = Some(PathBuf::from(db));
        }
        offline.max_age_secs = parse_or(read("GEOLENS_MAX_AGE_SECS"), offline.max_age_secs);
        offline.sync_interval_secs =
            parse_or(read("GEOLENS_SYNC_INTERVAL_SECS"), offline.sync_interval_secs).max(1);
        offline.max_sync_attempts =
            parse_or(read("GEOLENS_MAX_SYNC_ATTEMPTS"), offline.max_sync_attempts).max(1);
        offline.storage_quota_bytes =
            parse_or(read("GEOLENS_STORAGE_QUOTA_BYTES"), offline.storage_quota_bytes);
        if let Some(flag) = read("GEOLENS_OFFLINE") {
            offline.start_online = !matches!(
                flag.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(base) = read("GEOLENS_API_BASE").filter(|s| !s.is_empty()) {
            self.layers.api_base = base;
        }
    }

    /// Database path: explicit flag, then config/env, then the home default.
    pub fn resolve_db_path(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Some(path) = &self.offline.db_path {
            return path.clone();
        }
        default_db_path()
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".geolens")
        .join("offline.db")
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default_value: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}
