// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Durable offline store backed by SQLite.
//!
//! Four collections, one table each: `tiles`, `api_responses`, `sync_queue`
//! and `user_data`. Cache records are keyed by a deterministic FNV-1a hash of
//! their URL.
//!
//! Every operation runs on the blocking pool and resolves as a future with an
//! explicit error. Writes may carry the store *generation* observed when the
//! caller started its work; `clear_all` bumps the generation under the same
//! lock, so a write that started before a clear is discarded instead of
//! resurrecting cleared data.

use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::sync::{SyncOperation, SyncPriority, SyncTask};

/// Kind of cached resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Tiles,
    VectorData,
    ApiResponse,
    UserData,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Tiles => "tiles",
            ResourceKind::VectorData => "vector-data",
            ResourceKind::ApiResponse => "api-response",
            ResourceKind::UserData => "user-data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tiles" => Some(Self::Tiles),
            "vector-data" => Some(Self::VectorData),
            "api-response" => Some(Self::ApiResponse),
            "user-data" => Some(Self::UserData),
            _ => None,
        }
    }

    /// Collection a resource of this kind is persisted in.
    pub fn collection(self) -> Collection {
        match self {
            ResourceKind::Tiles | ResourceKind::VectorData => Collection::Tiles,
            ResourceKind::ApiResponse => Collection::ApiResponses,
            ResourceKind::UserData => Collection::UserData,
        }
    }
}

/// Logical collections of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collection {
    Tiles,
    ApiResponses,
    SyncQueue,
    UserData,
}

impl Collection {
    /// Collections holding cache records (everything but the sync queue).
    pub const RECORDS: [Collection; 3] =
        [Collection::Tiles, Collection::ApiResponses, Collection::UserData];

    pub const ALL: [Collection; 4] = [
        Collection::Tiles,
        Collection::ApiResponses,
        Collection::SyncQueue,
        Collection::UserData,
    ];

    fn table(self) -> &'static str {
        match self {
            Collection::Tiles => "tiles",
            Collection::ApiResponses => "api_responses",
            Collection::SyncQueue => "sync_queue",
            Collection::UserData => "user_data",
        }
    }
}

/// Deterministic storage key for a URL.
pub fn cache_key(url: &str) -> String {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(url.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// A persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub url: String,
    pub kind: ResourceKind,
    pub payload: Vec<u8>,
    /// Epoch milliseconds of the last successful write.
    pub timestamp: i64,
    pub version: u32,
    pub compressed: bool,
    pub metadata: serde_json::Value,
}

/// Enough of a record to decide whether it has expired.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHead {
    pub collection: Collection,
    pub key: String,
    pub url: String,
    pub timestamp: i64,
}

/// Bytes used versus the configured quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub used: u64,
    pub quota: u64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tiles (
    key TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    version INTEGER NOT NULL,
    compressed INTEGER NOT NULL,
    metadata TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS api_responses (
    key TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    version INTEGER NOT NULL,
    compressed INTEGER NOT NULL,
    metadata TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_data (
    key TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    version INTEGER NOT NULL,
    compressed INTEGER NOT NULL,
    metadata TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    operation TEXT NOT NULL,
    url TEXT NOT NULL,
    payload TEXT,
    priority INTEGER NOT NULL,
    attempts INTEGER NOT NULL,
    max_attempts INTEGER NOT NULL,
    last_attempt INTEGER,
    scheduled_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS sync_queue_order ON sync_queue (priority, seq);
";

/// Handle to the SQLite store. Cheap to clone.
#[derive(Clone)]
pub struct OfflineStore {
    conn: Arc<Mutex<Connection>>,
    generation: Arc<AtomicU64>,
    quota: u64,
    path: Option<PathBuf>,
}

impl OfflineStore {
    /// Open or create a store file.
    pub fn open(path: &Path, quota: u64) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!("offline store opened: {}", path.display());
        Self::init(conn, quota, Some(path.to_path_buf()))
    }

    /// A throwaway store for tests and ephemeral sessions.
    pub fn open_in_memory(quota: u64) -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, quota, None)
    }

    fn init(conn: Connection, quota: u64, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            generation: Arc::new(AtomicU64::new(0)),
            quota,
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current clear-generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &AtomicU64, u64) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let generation = Arc::clone(&self.generation);
        let quota = self.quota;
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn);
            f(&mut guard, &generation, quota)
        })
        .await?
    }

    /// Insert or refresh a cache record. Returns the stored version, or
    /// `None` when `expected_generation` is stale.
    ///
    /// A key lives in exactly one record collection: writing it under a new
    /// kind moves it, and the version keeps counting from the old copy.
    pub async fn put_record(
        &self,
        collection: Collection,
        record: CacheRecord,
        expected_generation: Option<u64>,
    ) -> StoreResult<Option<u32>> {
        self.run(move |conn, generation, quota| {
            if let Some(expected) = expected_generation {
                if generation.load(Ordering::SeqCst) != expected {
                    return Ok(None);
                }
            }
            // bytes of the copies this write replaces are reclaimed
            let replaced = stored_payload_bytes(conn, &record.key)?;
            let used = used_bytes(conn)?.saturating_sub(replaced);
            if quota > 0 && used + record.payload.len() as u64 > quota {
                return Err(StoreError::QuotaExceeded { used, quota });
            }

            let mut previous: Option<u32> = None;
            for c in Collection::RECORDS {
                let version: Option<u32> = conn
                    .query_row(
                        &format!("SELECT version FROM {} WHERE key = ?1", c.table()),
                        params![record.key],
                        |row| row.get(0),
                    )
                    .optional()?;
                previous = previous.max(version);
            }
            let version = previous.map(|v| v + 1).unwrap_or(1);

            let tx = conn.transaction()?;
            for other in Collection::RECORDS.into_iter().filter(|c| *c != collection) {
                tx.execute(
                    &format!("DELETE FROM {} WHERE key = ?1", other.table()),
                    params![record.key],
                )?;
            }
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {}
                     (key, url, kind, payload, timestamp, version, compressed, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    collection.table()
                ),
                params![
                    record.key,
                    record.url,
                    record.kind.as_str(),
                    record.payload,
                    record.timestamp,
                    version,
                    record.compressed,
                    serde_json::to_string(&record.metadata)?,
                ],
            )?;
            tx.commit()?;
            Ok(Some(version))
        })
        .await
    }

    pub async fn get_record(
        &self,
        collection: Collection,
        key: &str,
    ) -> StoreResult<Option<CacheRecord>> {
        let key = key.to_string();
        self.run(move |conn, _, _| read_record(conn, collection, &key))
            .await
    }

    /// Look a key up across every record collection.
    pub async fn find_record(&self, key: &str) -> StoreResult<Option<(Collection, CacheRecord)>> {
        let key = key.to_string();
        self.run(move |conn, _, _| {
            for collection in Collection::RECORDS {
                if let Some(record) = read_record(conn, collection, &key)? {
                    return Ok(Some((collection, record)));
                }
            }
            Ok(None)
        })
        .await
    }

    pub async fn delete_record(&self, collection: Collection, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.run(move |conn, _, _| {
            let rows = conn.execute(
                &format!("DELETE FROM {} WHERE key = ?1", collection.table()),
                params![key],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    /// Key, URL and timestamp of every cache record.
    pub async fn record_heads(&self) -> StoreResult<Vec<RecordHead>> {
        self.run(|conn, _, _| {
            let mut heads = Vec::new();
            for collection in Collection::RECORDS {
                let mut stmt = conn.prepare(&format!(
                    "SELECT key, url, timestamp FROM {} ORDER BY key",
                    collection.table()
                ))?;
                let rows = stmt.query_map([], |row| {
                    Ok(RecordHead {
                        collection,
                        key: row.get(0)?,
                        url: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                })?;
                for head in rows {
                    heads.push(head?);
                }
            }
            Ok(heads)
        })
        .await
    }

    /// Empty all four collections and advance the generation.
    pub async fn clear_all(&self) -> StoreResult<()> {
        self.run(|conn, generation, _| {
            generation.fetch_add(1, Ordering::SeqCst);
            let tx = conn.transaction()?;
            for collection in Collection::ALL {
                tx.execute(&format!("DELETE FROM {}", collection.table()), [])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn count(&self, collection: Collection) -> StoreResult<usize> {
        self.run(move |conn, _, _| {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", collection.table()),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    pub async fn insert_task(&self, task: SyncTask) -> StoreResult<()> {
        self.run(move |conn, _, _| {
            let seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue",
                [],
                |row| row.get(0),
            )?;
            let payload = task
                .payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                "INSERT INTO sync_queue
                 (id, seq, operation, url, payload, priority, attempts, max_attempts, last_attempt, scheduled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    task.id,
                    seq,
                    task.operation.as_str(),
                    task.url,
                    payload,
                    task.priority.rank(),
                    task.attempts,
                    task.max_attempts,
                    task.last_attempt,
                    task.scheduled_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Every queued task in drain order.
    pub async fn load_tasks(&self) -> StoreResult<Vec<SyncTask>> {
        self.run(|conn, _, _| {
            let mut stmt = conn.prepare(
                "SELECT id, operation, url, payload, priority, attempts, max_attempts,
                        last_attempt, scheduled_at
                 FROM sync_queue ORDER BY priority ASC, seq ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, u32>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            })?;
            let mut tasks = Vec::new();
            for row in rows {
                let (id, op, url, payload, priority, attempts, max_attempts, last, scheduled) =
                    row?;
                let operation = SyncOperation::parse(&op).ok_or_else(|| StoreError::Corrupt {
                    key: id.clone(),
                    reason: format!("unknown operation {op}"),
                })?;
                let payload = payload.map(|p| serde_json::from_str(&p)).transpose()?;
                tasks.push(SyncTask {
                    id,
                    operation,
                    url,
                    payload,
                    priority: SyncPriority::from_rank(priority),
                    attempts,
                    max_attempts,
                    last_attempt: last,
                    scheduled_at: scheduled,
                });
            }
            Ok(tasks)
        })
        .await
    }

    /// Persist the attempt bookkeeping of a task. Returns `false` when the
    /// generation moved on or the task no longer exists.
    pub async fn update_task(&self, task: SyncTask, expected_generation: u64) -> StoreResult<bool> {
        self.run(move |conn, generation, _| {
            if generation.load(Ordering::SeqCst) != expected_generation {
                return Ok(false);
            }
            let rows = conn.execute(
                "UPDATE sync_queue SET attempts = ?2, last_attempt = ?3 WHERE id = ?1",
                params![task.id, task.attempts, task.last_attempt],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    pub async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.run(move |conn, _, _| {
            let rows = conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
        .await
    }

    pub async fn estimate(&self) -> StoreResult<StorageEstimate> {
        self.run(|conn, _, quota| {
            Ok(StorageEstimate {
                used: used_bytes(conn)?,
                quota,
            })
        })
        .await
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn used_bytes(conn: &Connection) -> StoreResult<u64> {
    let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let free: i64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
    Ok(((pages - free).max(0) * size) as u64)
}

/// Payload bytes currently stored under `key` across the record collections.
fn stored_payload_bytes(conn: &Connection, key: &str) -> StoreResult<u64> {
    let mut total = 0u64;
    for c in Collection::RECORDS {
        let bytes: i64 = conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(length(payload)), 0) FROM {} WHERE key = ?1",
                c.table()
            ),
            params![key],
            |row| row.get(0),
        )?;
        total += bytes.max(0) as u64;
    }
    Ok(total)
}

fn read_record(
    conn: &Connection,
    collection: Collection,
    key: &str,
) -> StoreResult<Option<CacheRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT key, url, kind, payload, timestamp, version, compressed, metadata
                 FROM {} WHERE key = ?1",
                collection.table()
            ),
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((key, url, kind, payload, timestamp, version, compressed, metadata)) = row else {
        return Ok(None);
    };
    let kind = ResourceKind::parse(&kind).ok_or_else(|| StoreError::Corrupt {
        key: key.clone(),
        reason: format!("unknown kind {kind}"),
    })?;
    Ok(Some(CacheRecord {
        key,
        url,
        kind,
        payload,
        timestamp,
        version,
        compressed,
        metadata: serde_json::from_str(&metadata)?,
    }))
}
