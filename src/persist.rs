//! Run persistence for later retrieval and indexing.
//!
//! Completed runs are stored whole: summary, triaged units, and cost report,
//! keyed by job id. The upsert is idempotent so re-running a persist for the
//! same job never duplicates a record.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::cost::CostReport;
use crate::triage::Unit;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// One stored run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub job_id: Uuid,
    pub document_id: String,
    pub summary: String,
    pub units: Vec<Unit>,
    /// Absent on the first upsert; the cost node writes it with a second,
    /// idempotent upsert once the report exists.
    pub cost_report: Option<CostReport>,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the record for this job id.
    async fn upsert(&self, record: &RunRecord) -> Result<(), PersistError>;
    async fn get(&self, job_id: Uuid) -> Result<Option<RunRecord>, PersistError>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// Map-backed store for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct MemoryRunStore {
    records: Arc<Mutex<HashMap<Uuid, RunRecord>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn upsert(&self, record: &RunRecord) -> Result<(), PersistError> {
        let mut records = self.records.lock().map_err(|_| PersistError::Poisoned)?;
        records.insert(record.job_id, record.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<RunRecord>, PersistError> {
        let records = self.records.lock().map_err(|_| PersistError::Poisoned)?;
        Ok(records.get(&job_id).cloned())
    }
}

// =============================================================================
// SQLite store
// =============================================================================

/// SQLite-backed store. The connection is shared behind a mutex and all
/// statements run on the blocking pool.
#[derive(Clone)]
pub struct SqliteRunStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS runs (\
               job_id TEXT PRIMARY KEY,\
               document_id TEXT NOT NULL,\
               summary TEXT NOT NULL,\
               units_json TEXT NOT NULL,\
               cost_report_json TEXT NOT NULL,\
               created_at INTEGER NOT NULL,\
               updated_at INTEGER NOT NULL\
             );",
        )?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("VERDANT_DB_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".verdant_runs.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, PersistError>
    where
        F: FnOnce(&Connection) -> Result<R, PersistError>,
    {
        let guard = self.conn.lock().map_err(|_| PersistError::Poisoned)?;
        f(&guard)
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn upsert(&self, record: &RunRecord) -> Result<(), PersistError> {
        let record = record.clone();
        let units_json =
            serde_json::to_string(&record.units).map_err(|e| PersistError::Serde(e.to_string()))?;
        let cost_report_json = serde_json::to_string(&record.cost_report)
            .map_err(|e| PersistError::Serde(e.to_string()))?;
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let now = now_epoch();
                conn.execute(
                    "INSERT INTO runs (\
                        job_id, document_id, summary, units_json, cost_report_json,\
                        created_at, updated_at\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)\
                     ON CONFLICT(job_id) DO UPDATE SET \
                        document_id = excluded.document_id,\
                        summary = excluded.summary,\
                        units_json = excluded.units_json,\
                        cost_report_json = excluded.cost_report_json,\
                        updated_at = excluded.updated_at",
                    params![
                        record.job_id.to_string(),
                        record.document_id,
                        record.summary,
                        units_json,
                        cost_report_json,
                        now,
                        now,
                    ],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<RunRecord>, PersistError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT document_id, summary, units_json, cost_report_json \
                     FROM runs WHERE job_id = ?1",
                )?;
                let mut rows = stmt.query(params![job_id.to_string()])?;
                if let Some(row) = rows.next()? {
                    let units_json: String = row.get(2)?;
                    let cost_report_json: String = row.get(3)?;
                    let units = serde_json::from_str(&units_json)
                        .map_err(|e| PersistError::Serde(e.to_string()))?;
                    let cost_report = serde_json::from_str(&cost_report_json)
                        .map_err(|e| PersistError::Serde(e.to_string()))?;
                    Ok(Some(RunRecord {
                        job_id,
                        document_id: row.get(0)?,
                        summary: row.get(1)?,
                        units,
                        cost_report,
                    }))
                } else {
                    Ok(None)
                }
            })
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }
}
