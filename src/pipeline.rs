//! The run pipeline: a fixed graph of nodes driven over a [`RunState`].
//!
//! ```text
//! Start -> [eco]      -> CarbonRouteOnly -> End
//! Start -> [standard] -> Triage -> MapSummarizeLight -> AccuracyGate
//! AccuracyGate -> [rejects] -> EscalateMedium -> AccuracyGate
//! AccuracyGate -> [clean]   -> ReduceCompile -> StoreForIndex -> ComputeCost -> End
//! ```
//!
//! Nodes run strictly in sequence; only the map stages fan out internally.
//! Every transition pushes a progress update into the [`JobStatusStore`].
//! Fatal errors (empty triage, persistence failure, unreadable input) abort
//! the run; unit-level capability failures never do.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::capability::{
    AccuracyVerifier, CapabilityError, FinalCompiler, RetryPolicy, Summarizer, Tier,
};
use crate::carbon::{self, RouteError, ServerProfile};
use crate::cost::{compute_cost_report, GridIntensity};
use crate::gate::{AccuracyGate, ESCALATION_CEILING};
use crate::persist::{PersistError, RunRecord, RunStore};
use crate::stage::{ParallelMapStage, StageExecutor, ESCALATION_CONCURRENCY, LIGHT_MAP_CONCURRENCY};
use crate::state::{JobMode, RunState};
use crate::status::JobStatusStore;
use crate::triage::Triage;

/// Compile output when the large tier stayed rate-limited through every retry.
pub const RATE_LIMITED_SUMMARY: &str = "Summary failed due to Rate Limits.";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("triage produced no units for document {0}")]
    EmptyTriage(String),

    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),

    #[error("triage failed: {0}")]
    Triage(#[from] CapabilityError),

    #[error("carbon routing failed: {0}")]
    Route(#[from] RouteError),

    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub light_concurrency: usize,
    pub escalation_concurrency: usize,
    /// Applied only to the final compile, the one call known to rate-limit.
    pub compile_retry: RetryPolicy,
    /// Candidate regions for eco-mode routing.
    pub catalog: Vec<ServerProfile>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            light_concurrency: LIGHT_MAP_CONCURRENCY,
            escalation_concurrency: ESCALATION_CONCURRENCY,
            compile_retry: RetryPolicy::default(),
            catalog: carbon::default_catalog(),
        }
    }
}

/// Owns the capability handles and drives runs to completion.
pub struct Pipeline {
    triage: Arc<dyn Triage>,
    summarizer: Arc<dyn Summarizer>,
    verifier: Arc<dyn AccuracyVerifier>,
    compiler: Arc<dyn FinalCompiler>,
    store: Arc<dyn RunStore>,
    grid: Arc<dyn GridIntensity>,
    status: JobStatusStore,
    config: PipelineConfig,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        triage: Arc<dyn Triage>,
        summarizer: Arc<dyn Summarizer>,
        verifier: Arc<dyn AccuracyVerifier>,
        compiler: Arc<dyn FinalCompiler>,
        store: Arc<dyn RunStore>,
        grid: Arc<dyn GridIntensity>,
        status: JobStatusStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            triage,
            summarizer,
            verifier,
            compiler,
            store,
            grid,
            status,
            config,
        }
    }

    /// Execute the full graph for one run.
    ///
    /// Returns the final state on success. Terminal job status is written by
    /// the caller, not here; the pipeline only reports progress.
    #[instrument(skip_all, fields(job_id = %state.job_id, mode = state.mode.as_str()))]
    pub async fn execute(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        let job_id = state.job_id;
        self.status.set_progress(job_id, 5.0, "Starting job...");

        let text = tokio::fs::read_to_string(&state.file_path).await?;

        if state.mode == JobMode::Eco {
            return self.run_carbon_route(state, &text).await;
        }

        // Triage
        self.status.set_progress(
            job_id,
            15.0,
            "Step 1/4: Analyzing document layout (Triage)...",
        );
        let units = self.triage.triage(&state.document_id, &text).await?;
        if units.is_empty() {
            return Err(PipelineError::EmptyTriage(state.document_id.clone()));
        }
        info!(units = units.len(), "triage complete");
        state.escalation_rounds = vec![0; units.len()];
        state.units = units;

        // Map: light tier over every unit
        let total = state.total_units();
        self.status.set_progress(
            job_id,
            25.0,
            "Step 2/4: Running 'Light' summary on all units...",
        );
        let light_stage = ParallelMapStage::new(
            StageExecutor::new(self.summarizer.clone(), Tier::Light),
            self.config.light_concurrency,
        );
        let contents: Vec<String> = state.units.iter().map(|u| u.content.clone()).collect();
        let outcome = light_stage
            .run(&contents, |done, total| {
                let progress = 25.0 + (done as f32 / total as f32) * 30.0;
                self.status.set_progress(
                    job_id,
                    progress,
                    format!("Step 2/4: Running 'Light' summary... ({done}/{total})"),
                );
            })
            .await;
        state.usage.record(Tier::Light, outcome.chars_processed);
        state.summaries = outcome.outputs;

        // Gate / escalate loop. Terminates because the ceiling bounds rounds.
        let gate = AccuracyGate::new(self.verifier.clone());
        loop {
            self.status
                .set_progress(job_id, 55.0, "Step 3/4: Checking summary accuracy...");
            let gate_outcome = gate.evaluate(&state.units, &state.summaries).await;
            state.usage.record_named("verify", gate_outcome.verify_chars);
            self.status.set_progress(job_id, 70.0, "Accuracy check complete.");

            if gate_outcome.rejected.is_empty() {
                state.rejected.clear();
                break;
            }

            // Each unit escalates at most once; rejected units already at
            // the ceiling are force-accepted and flagged instead.
            let (to_escalate, exhausted): (Vec<usize>, Vec<usize>) = gate_outcome
                .rejected
                .into_iter()
                .partition(|&i| state.escalation_rounds[i] < ESCALATION_CEILING);

            if !exhausted.is_empty() {
                warn!(
                    still_uncertain = exhausted.len(),
                    "escalation ceiling reached, force-accepting remaining units"
                );
                state.still_uncertain.extend(exhausted);
            }

            if to_escalate.is_empty() {
                state.rejected.clear();
                break;
            }

            state.rejected = to_escalate;
            self.escalate(&mut state).await;
        }
        state.still_uncertain.sort_unstable();
        state.still_uncertain.dedup();

        // Reduce: one large-tier compile over the accepted summaries
        self.status.set_progress(
            job_id,
            85.0,
            "Step 4/4: Compiling final executive summary...",
        );
        let joined = state.summaries.join("\n\n");
        state.usage.record(Tier::Large, joined.len() as u64);
        let final_summary = match self
            .config
            .compile_retry
            .run_rate_limited(|| self.compiler.compile(&joined))
            .await
        {
            Ok(summary) => summary,
            Err(err) if err.is_rate_limit() => {
                warn!(error = %err, "final compile rate-limited through all retries");
                RATE_LIMITED_SUMMARY.to_string()
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "final compile failed");
                format!("Final summary generation failed: {err}")
            }
        };
        state.final_summary = Some(final_summary.clone());

        // Store for later retrieval/indexing
        self.status
            .set_progress(job_id, 90.0, "Indexing data for search...");
        self.store
            .upsert(&RunRecord {
                job_id,
                document_id: state.document_id.clone(),
                summary: final_summary.clone(),
                units: state.units.clone(),
                cost_report: None,
            })
            .await?;

        // Cost report, then re-upsert the record with it attached
        let report = compute_cost_report(
            state.total_units(),
            state.units_escalated,
            state.still_uncertain.clone(),
            self.grid.as_ref(),
        );
        self.store
            .upsert(&RunRecord {
                job_id,
                document_id: state.document_id.clone(),
                summary: final_summary,
                units: state.units.clone(),
                cost_report: Some(report.clone()),
            })
            .await?;
        self.status.set_progress(job_id, 100.0, report.message.clone());
        state.cost_report = Some(report);

        Ok(state)
    }

    /// Re-run the rejected units through the medium tier, writing results
    /// back into the same summary slots.
    async fn escalate(&self, state: &mut RunState) {
        let job_id = state.job_id;
        let rejected = std::mem::take(&mut state.rejected);
        let count = rejected.len();
        info!(count, "escalating rejected units");
        self.status.set_progress(
            job_id,
            70.0,
            format!("Step 3/4: Escalating {count} failed units to 'Medium' model..."),
        );

        let stage = ParallelMapStage::new(
            StageExecutor::new(self.summarizer.clone(), Tier::Medium),
            self.config.escalation_concurrency,
        );
        let contents: Vec<String> = rejected
            .iter()
            .map(|&i| state.units[i].content.clone())
            .collect();
        let outcome = stage
            .run(&contents, |done, total| {
                let progress = 70.0 + (done as f32 / total as f32) * 10.0;
                self.status.set_progress(
                    job_id,
                    progress,
                    format!("Step 3/4: Escalating failed units... ({done}/{total})"),
                );
            })
            .await;

        state.usage.record(Tier::Medium, outcome.chars_processed);
        for (slot, output) in rejected.iter().zip(outcome.outputs) {
            state.summaries[*slot] = output;
            state.escalation_rounds[*slot] += 1;
        }
        state.units_escalated += count;
    }

    /// Eco branch: score the catalog, recommend a region, and skip
    /// summarization entirely.
    async fn run_carbon_route(
        &self,
        mut state: RunState,
        text: &str,
    ) -> Result<RunState, PipelineError> {
        let job_id = state.job_id;
        self.status
            .set_progress(job_id, 50.0, "Analyzing carbon footprint & routing...");

        let analysis = carbon::analyze_route(text, &self.config.catalog, self.grid.as_ref())?;
        let summary = carbon::render_report(&analysis);
        let report = carbon::eco_cost_report(&analysis);

        self.store
            .upsert(&RunRecord {
                job_id,
                document_id: state.document_id.clone(),
                summary: summary.clone(),
                units: Vec::new(),
                cost_report: Some(report.clone()),
            })
            .await?;

        self.status
            .set_progress(job_id, 100.0, "Carbon routing analysis complete.");
        state.final_summary = Some(summary);
        state.cost_report = Some(report);
        Ok(state)
    }
}
