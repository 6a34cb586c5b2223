//! Per-run state threaded through the pipeline nodes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::Tier;
use crate::cost::CostReport;
use crate::triage::Unit;

/// How the job routes work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Full summarization pipeline.
    Standard,
    /// Carbon-routing analysis only; no summarization runs.
    Eco,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Standard => "standard",
            JobMode::Eco => "eco",
        }
    }
}

/// Characters pushed through each capability tier during a run.
///
/// Capability invocations count toward usage even when they fail; a failed
/// call still consumed the work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMeter {
    chars: HashMap<String, u64>,
}

impl UsageMeter {
    pub fn record(&mut self, tier: Tier, chars: u64) {
        self.record_named(tier.as_str(), chars);
    }

    /// Count usage for a non-tier capability (e.g. the verifier).
    pub fn record_named(&mut self, name: &str, chars: u64) {
        *self.chars.entry(name.to_string()).or_insert(0) += chars;
    }

    pub fn chars(&self, tier: Tier) -> u64 {
        self.named(tier.as_str())
    }

    pub fn named(&self, name: &str) -> u64 {
        self.chars.get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.chars.values().sum()
    }
}

/// Everything a run accumulates as it moves through the pipeline.
///
/// Created by [`RunState::new`], mutated node by node, and returned whole when
/// the pipeline finishes. `summaries` is index-aligned with `units`.
#[derive(Debug, Clone)]
pub struct RunState {
    pub job_id: Uuid,
    pub document_id: String,
    pub file_path: String,
    pub mode: JobMode,

    /// Triaged units in document order.
    pub units: Vec<Unit>,
    /// Current accepted summary per unit, aligned with `units`.
    pub summaries: Vec<String>,
    /// Indices of units whose summaries failed the accuracy gate this round.
    pub rejected: Vec<usize>,
    /// Escalation rounds per unit, aligned with `units`. Bounded by the
    /// ceiling: a unit whose count has reached it is never escalated again.
    pub escalation_rounds: Vec<u32>,
    /// Indices force-accepted at the escalation ceiling.
    pub still_uncertain: Vec<usize>,
    /// Cumulative count of units escalated to the medium tier.
    pub units_escalated: usize,

    pub usage: UsageMeter,
    pub final_summary: Option<String>,
    pub cost_report: Option<CostReport>,
}

impl RunState {
    pub fn new(
        job_id: Uuid,
        document_id: impl Into<String>,
        file_path: impl Into<String>,
        mode: JobMode,
    ) -> Self {
        Self {
            job_id,
            document_id: document_id.into(),
            file_path: file_path.into(),
            mode,
            units: Vec::new(),
            summaries: Vec::new(),
            rejected: Vec::new(),
            escalation_rounds: Vec::new(),
            still_uncertain: Vec::new(),
            units_escalated: 0,
            usage: UsageMeter::default(),
            final_summary: None,
            cost_report: None,
        }
    }

    pub fn total_units(&self) -> usize {
        self.units.len()
    }
}
