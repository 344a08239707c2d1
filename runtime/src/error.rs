// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the runtime services.

/// Failures of the persistent store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("storage quota exceeded: {used} of {quota} bytes")]
    QuotaExceeded { used: u64, quota: u64 },

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("compression error: {0}")]
    Compression(String),
}

impl StoreError {
    /// Whether the store rejected a write for lack of space.
    pub fn is_quota(&self) -> bool {
        match self {
            StoreError::QuotaExceeded { .. } => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DiskFull
            }
            _ => false,
        }
    }
}

/// Network fetch failures. Cloneable so one result can be shared between
/// coalesced callers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("offline")]
    Offline,

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("cannot build HTTP client: {0}")]
    Client(String),
}

/// Errors surfaced by the offline/cache manager.
#[derive(thiserror::Error, Debug)]
pub enum OfflineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("no cached copy of {0}")]
    NotCached(String),

    #[error("invalid cache strategy pattern: {0}")]
    Strategy(#[from] regex::Error),

    #[error("offline manager has been destroyed")]
    Destroyed,
}

/// Errors surfaced by the layer orchestrator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("layer not found: {0}")]
    NotFound(String),

    #[error("layer already registered: {0}")]
    Duplicate(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("invalid layer config for {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("{0} is not a member of the basemap group")]
    NotABasemap(String),

    #[error("layer manager has been destroyed")]
    Destroyed,
}

/// Configuration loading failures.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Failures wiring the service bundle together.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Offline(#[from] OfflineError),

    #[error(transparent)]
    Layer(#[from] LayerError),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type OfflineResult<T> = Result<T, OfflineError>;
pub type LayerResult<T> = Result<T, LayerError>;
