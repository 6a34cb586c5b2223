//! Job submission and polling.
//!
//! [`JobService::submit`] registers the job, spawns the pipeline
//! fire-and-forget, and returns the id immediately; callers poll
//! [`JobService::get_status`] until the job turns terminal. The service is
//! the only writer of terminal status - the pipeline reports progress, and
//! whatever it returns (or fails with) is translated to `complete`/`error`
//! exactly once here.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::pipeline::Pipeline;
use crate::state::{JobMode, RunState};
use crate::status::{JobOutcome, JobStatus, JobStatusSnapshot, JobStatusStore};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} is still running")]
    NotReady(Uuid),

    #[error("job {0} failed: {1}")]
    Failed(Uuid, String),
}

pub struct JobService {
    pipeline: Arc<Pipeline>,
    status: JobStatusStore,
}

impl JobService {
    pub fn new(pipeline: Arc<Pipeline>, status: JobStatusStore) -> Self {
        Self { pipeline, status }
    }

    pub fn status_store(&self) -> &JobStatusStore {
        &self.status
    }

    /// Submit a document for processing. Returns the job id immediately; the
    /// run proceeds on its own task.
    pub fn submit(
        &self,
        document_id: impl Into<String>,
        file_path: impl Into<String>,
        mode: JobMode,
    ) -> Uuid {
        let job_id = Uuid::new_v4();
        let state = RunState::new(job_id, document_id, file_path, mode);
        self.status.create(job_id);
        info!(%job_id, document_id = %state.document_id, mode = mode.as_str(), "job submitted");

        let pipeline = self.pipeline.clone();
        let status = self.status.clone();
        tokio::spawn(async move {
            match pipeline.execute(state).await {
                Ok(final_state) => {
                    match (final_state.final_summary, final_state.cost_report) {
                        (Some(summary), Some(cost_report)) => {
                            status.complete(
                                job_id,
                                JobOutcome {
                                    summary,
                                    cost_report,
                                },
                            );
                            info!(%job_id, "job complete");
                        }
                        _ => {
                            // The pipeline returned Ok without its outputs;
                            // treat as a failure rather than a hollow result.
                            error!(%job_id, "pipeline finished without summary or report");
                            status.fail(job_id, "pipeline finished without a result");
                        }
                    }
                }
                Err(err) => {
                    error!(%job_id, error = %err, "job failed");
                    status.fail(job_id, err.to_string());
                }
            }
        });

        job_id
    }

    pub fn get_status(&self, job_id: Uuid) -> Result<JobStatusSnapshot, ServiceError> {
        self.status
            .get(job_id)
            .ok_or(ServiceError::NotFound(job_id))
    }

    /// Fetch the outcome of a finished job.
    pub fn get_result(&self, job_id: Uuid) -> Result<JobOutcome, ServiceError> {
        let snapshot = self.get_status(job_id)?;
        match snapshot.status {
            JobStatus::Complete => snapshot
                .result
                .ok_or_else(|| ServiceError::Failed(job_id, "missing result".to_string())),
            JobStatus::Error => Err(ServiceError::Failed(job_id, snapshot.message)),
            JobStatus::Queued | JobStatus::Processing => Err(ServiceError::NotReady(job_id)),
        }
    }
}
