//! Accuracy gate: verify each unit's summary against its source text.
//!
//! Verification is fail-open. If the verifier capability errors, the unit is
//! accepted; a down verifier degrades checking, not availability.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capability::AccuracyVerifier;
use crate::triage::Unit;

/// Maximum escalation rounds per unit. A rejected unit escalates to the
/// medium tier at most once; if the gate rejects it again it is accepted
/// unconditionally, because the design does not buy a third opinion.
pub const ESCALATION_CEILING: u32 = 1;

/// Result of one gate pass.
pub struct GateOutcome {
    /// Indices (into the unit sequence) whose summaries failed verification.
    pub rejected: Vec<usize>,
    /// Characters submitted to the verifier across all checks.
    pub verify_chars: u64,
}

pub struct AccuracyGate {
    verifier: Arc<dyn AccuracyVerifier>,
}

impl AccuracyGate {
    pub fn new(verifier: Arc<dyn AccuracyVerifier>) -> Self {
        Self { verifier }
    }

    /// Check every summary against its unit, in index order.
    ///
    /// `outputs` must be aligned with `units`. Returns the rejected indices;
    /// accepted units need no bookkeeping because outputs stay in place.
    pub async fn evaluate(&self, units: &[Unit], outputs: &[String]) -> GateOutcome {
        let mut rejected = Vec::new();
        let mut verify_chars = 0u64;

        for (index, (unit, candidate)) in units.iter().zip(outputs.iter()).enumerate() {
            verify_chars += (unit.content.len() + candidate.len()) as u64;

            match self.verifier.verify(&unit.content, candidate).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(index, unit_id = %unit.id, "summary rejected by verifier");
                    rejected.push(index);
                }
                Err(err) => {
                    // Fail-open: assume accurate when the verifier is down.
                    warn!(
                        index,
                        code = err.code(),
                        error = %err,
                        "verifier unavailable, accepting summary unchecked"
                    );
                }
            }
        }

        debug!(
            checked = units.len(),
            rejected = rejected.len(),
            "accuracy gate pass complete"
        );

        GateOutcome {
            rejected,
            verify_chars,
        }
    }
}
