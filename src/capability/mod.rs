//! Contracts for the external capabilities the pipeline coordinates.
//!
//! The orchestrator never runs model inference itself; it drives these traits.
//! [`http::HttpChatCapability`] is the production adapter (an OpenAI-compatible
//! chat-completions endpoint); tests substitute scripted implementations.

pub mod error;
pub mod http;
pub mod retry;

use async_trait::async_trait;

pub use error::CapabilityError;
pub use http::HttpChatCapability;
pub use retry::RetryPolicy;

/// Summarization capability tiers, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Low-cost, fast; runs on every unit in the initial map.
    Light,
    /// Mid-cost; escalation target for units that fail the accuracy gate.
    Medium,
    /// High-cost, highest quality; compiles the final summary once per run.
    Large,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Light => "light",
            Tier::Medium => "medium",
            Tier::Large => "large",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-unit summarization.
///
/// Implementations may fail; the stage executor is responsible for absorbing
/// the failure into a sentinel output so one unit can never abort a batch.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, tier: Tier, text: &str) -> Result<String, CapabilityError>;
}

/// Binary entailment check: is `candidate` factually supported by `original`?
///
/// An `Err` from the verifier is treated as "assume accurate" by the gate
/// (fail-open): pipeline availability is preferred over strict enforcement
/// when the checking capability is down.
#[async_trait]
pub trait AccuracyVerifier: Send + Sync {
    async fn verify(&self, original: &str, candidate: &str) -> Result<bool, CapabilityError>;
}

/// One-shot compile of the joined per-unit summaries into the final summary.
///
/// The only capability invocation wrapped in a [`RetryPolicy`]; the large
/// tier is the one path known to rate-limit.
#[async_trait]
pub trait FinalCompiler: Send + Sync {
    async fn compile(&self, joined_summaries: &str) -> Result<String, CapabilityError>;
}
