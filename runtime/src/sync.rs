// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Background sync tasks: offline mutations replayed when connectivity returns.
//!
//! Tasks drain in priority order (high, medium, low), FIFO within a tier.
//! A failed attempt bumps the attempt counter; once `attempts >= max_attempts`
//! the task is dropped for good and a warning is logged. Callers that
//! must know should poll [`crate::offline::OfflineManager::pending_tasks`].

use serde::{Deserialize, Serialize};

/// Default attempt ceiling for a sync task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What the task does against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Upload,
    Download,
    Update,
    Delete,
}

impl SyncOperation {
    /// HTTP verb used for the operation.
    pub fn method(self) -> reqwest::Method {
        match self {
            SyncOperation::Upload => reqwest::Method::POST,
            SyncOperation::Download => reqwest::Method::GET,
            SyncOperation::Update => reqwest::Method::PUT,
            SyncOperation::Delete => reqwest::Method::DELETE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Upload => "upload",
            SyncOperation::Download => "download",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upload" => Some(Self::Upload),
            "download" => Some(Self::Download),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
    High,
    Medium,
    Low,
}

impl SyncPriority {
    /// Sort rank; lower drains first.
    pub fn rank(self) -> i64 {
        match self {
            SyncPriority::High => 0,
            SyncPriority::Medium => 1,
            SyncPriority::Low => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            0 => Self::High,
            1 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A queued, retryable network mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub id: String,
    pub operation: SyncOperation,
    pub url: String,
    pub payload: Option<serde_json::Value>,
    pub priority: SyncPriority,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt: Option<i64>,
    pub scheduled_at: i64,
}

impl SyncTask {
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Caller-facing request to enqueue a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSyncTask {
    pub operation: SyncOperation,
    pub url: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub priority: SyncPriority,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl NewSyncTask {
    pub fn new(operation: SyncOperation, url: impl Into<String>, priority: SyncPriority) -> Self {
        Self {
            operation,
            url: url.into(),
            payload: None,
            priority,
            max_attempts: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub(crate) fn into_task(self, default_max_attempts: u32, now: i64) -> SyncTask {
        SyncTask {
            id: uuid::Uuid::new_v4().to_string(),
            operation: self.operation,
            url: self.url,
            payload: self.payload,
            priority: self.priority,
            attempts: 0,
            max_attempts: self.max_attempts.unwrap_or(default_max_attempts).max(1),
            last_attempt: None,
            scheduled_at: now,
        }
    }
}

/// Outcome of one queue drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks removed after hitting their attempt ceiling.
    pub dropped: usize,
    /// The drain did nothing because the device was offline.
    pub skipped_offline: bool,
    /// Ids in the order they were attempted.
    pub order: Vec<String>,
}
