//! Bounded parallel map over units.
//!
//! [`StageExecutor`] isolates capability failures: a unit that fails gets a
//! sentinel output instead of aborting the batch. [`ParallelMapStage`] fans
//! the executor out over a set of units with a fixed concurrency limit,
//! writing each result into the slot matching the unit's position so output
//! order is independent of completion order.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::capability::{Summarizer, Tier};

/// Output recorded for a unit whose capability call failed.
pub const FAILED_OUTPUT: &str = "Summary generation failed.";

/// Worker limit for the initial light-tier map.
pub const LIGHT_MAP_CONCURRENCY: usize = 8;

/// Worker limit for the medium-tier escalation map. Lower on purpose: the
/// tier is 10x the cost, so burst size is bounded tighter.
pub const ESCALATION_CONCURRENCY: usize = 4;

/// One summarizer invocation, failure-isolated.
#[derive(Clone)]
pub struct StageExecutor {
    summarizer: Arc<dyn Summarizer>,
    tier: Tier,
}

impl StageExecutor {
    pub fn new(summarizer: Arc<dyn Summarizer>, tier: Tier) -> Self {
        Self { summarizer, tier }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Invoke the capability on one unit. Never fails: capability errors
    /// degrade to [`FAILED_OUTPUT`].
    pub async fn invoke(&self, text: &str) -> String {
        match self.summarizer.summarize(self.tier, text).await {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    tier = self.tier.as_str(),
                    code = err.code(),
                    error = %err,
                    "unit summarization failed, recording sentinel output"
                );
                FAILED_OUTPUT.to_string()
            }
        }
    }
}

/// Result of one map pass.
pub struct MapOutcome {
    /// One output per input item, in input order.
    pub outputs: Vec<String>,
    /// Characters submitted to the capability, counting failed attempts.
    pub chars_processed: u64,
}

/// Fixed-width fan-out of a [`StageExecutor`] over a batch of items.
pub struct ParallelMapStage {
    executor: StageExecutor,
    concurrency: usize,
}

impl ParallelMapStage {
    pub fn new(executor: StageExecutor, concurrency: usize) -> Self {
        Self {
            executor,
            concurrency: concurrency.max(1),
        }
    }

    /// Run the executor over `items`, at most `concurrency` in flight.
    ///
    /// `outputs[i]` corresponds to `items[i]` regardless of completion order:
    /// results land in a pre-sized slot vector indexed by item position, never
    /// appended as they arrive. `on_progress(done, total)` fires after each
    /// completion.
    pub async fn run<F>(&self, items: &[String], on_progress: F) -> MapOutcome
    where
        F: Fn(usize, usize),
    {
        let total = items.len();
        let chars_processed: u64 = items.iter().map(|s| s.len() as u64).sum();
        let mut slots: Vec<Option<String>> = vec![None; total];

        // Futures own their item so the whole run future stays spawnable.
        let mut results = stream::iter(items.to_vec().into_iter().enumerate().map(
            |(pos, content)| {
                let executor = self.executor.clone();
                async move { (pos, executor.invoke(&content).await) }
            },
        ))
        .buffer_unordered(self.concurrency);

        let mut done = 0usize;
        while let Some((pos, output)) = results.next().await {
            slots[pos] = Some(output);
            done += 1;
            on_progress(done, total);
        }
        drop(results);

        debug!(
            tier = self.executor.tier().as_str(),
            total, chars_processed, "map stage complete"
        );

        let outputs = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| FAILED_OUTPUT.to_string()))
            .collect();

        MapOutcome {
            outputs,
            chars_processed,
        }
    }
}
