//! Pollable job status registry.
//!
//! One [`JobStatusStore`] per service, shared by handle between the submitter,
//! the running pipelines, and the pollers. Snapshots are replaced whole under
//! the lock, so a reader never observes a partially-written record. Progress
//! only moves forward, and a terminal snapshot (complete or error) is never
//! overwritten.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::cost::CostReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

/// Final payload attached to a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub summary: String,
    pub cost_report: CostReport,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// 0..=100, monotonically non-decreasing.
    pub progress: f32,
    pub message: String,
    pub result: Option<JobOutcome>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe map of job id to snapshot. Cheap to clone; clones share state.
///
/// Entries persist for the process lifetime; there is no eviction.
#[derive(Debug, Clone, Default)]
pub struct JobStatusStore {
    inner: Arc<RwLock<HashMap<Uuid, JobStatusSnapshot>>>,
}

impl JobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly submitted job.
    pub fn create(&self, job_id: Uuid) {
        let now = Utc::now();
        let snapshot = JobStatusSnapshot {
            job_id,
            status: JobStatus::Processing,
            progress: 0.0,
            message: "Job accepted".to_string(),
            result: None,
            submitted_at: now,
            updated_at: now,
        };
        let mut map = self.write_lock();
        map.insert(job_id, snapshot);
    }

    /// Update progress and message for a running job.
    ///
    /// Progress is clamped so it never decreases; writes against a terminal
    /// snapshot are ignored.
    pub fn set_progress(&self, job_id: Uuid, progress: f32, message: impl Into<String>) {
        let mut map = self.write_lock();
        if let Some(snapshot) = map.get_mut(&job_id) {
            if snapshot.status.is_terminal() {
                return;
            }
            snapshot.progress = snapshot.progress.max(progress.clamp(0.0, 100.0));
            snapshot.message = message.into();
            snapshot.updated_at = Utc::now();
            debug!(%job_id, progress = snapshot.progress, "status updated");
        }
    }

    /// Mark a job complete with its outcome. First terminal write wins.
    pub fn complete(&self, job_id: Uuid, outcome: JobOutcome) {
        let mut map = self.write_lock();
        if let Some(snapshot) = map.get_mut(&job_id) {
            if snapshot.status.is_terminal() {
                return;
            }
            snapshot.status = JobStatus::Complete;
            snapshot.progress = 100.0;
            snapshot.message = "Complete".to_string();
            snapshot.result = Some(outcome);
            snapshot.updated_at = Utc::now();
        }
    }

    /// Mark a job failed. First terminal write wins.
    pub fn fail(&self, job_id: Uuid, message: impl Into<String>) {
        let mut map = self.write_lock();
        if let Some(snapshot) = map.get_mut(&job_id) {
            if snapshot.status.is_terminal() {
                return;
            }
            snapshot.status = JobStatus::Error;
            snapshot.message = message.into();
            snapshot.updated_at = Utc::now();
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobStatusSnapshot> {
        let map = self.read_lock();
        map.get(&job_id).cloned()
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, JobStatusSnapshot>> {
        // A poisoned lock only means a writer panicked mid-update of a single
        // snapshot; the map itself is still usable.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, JobStatusSnapshot>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
