#![forbid(unsafe_code)]

//! # verdant
//!
//! Cost-aware document summarization, run as pollable asynchronous jobs.
//!
//! Instead of pushing every chunk of a document through the most expensive
//! model, verdant triages the document into units, summarizes everything with
//! a cheap light-tier capability in a bounded parallel map, checks each output
//! against an entailment verifier, and escalates only the units that fail to a
//! mid-cost tier (one round, then force-accept). A large-tier model compiles
//! the accepted summaries once at the end. The run's carbon cost is scored
//! against a "large model for everything" baseline, so each job ends with an
//! efficiency report alongside its summary.
//!
//! The pipeline is a small state machine ([`pipeline::Pipeline`]) driving a
//! strongly-typed [`state::RunState`]; jobs are submitted fire-and-forget via
//! [`service::JobService`] and polled through [`status::JobStatusStore`].

pub mod capability;
pub mod carbon;
pub mod cost;
pub mod gate;
pub mod persist;
pub mod pipeline;
pub mod service;
pub mod stage;
pub mod state;
pub mod status;
pub mod triage;

pub use capability::{
    AccuracyVerifier, CapabilityError, FinalCompiler, RetryPolicy, Summarizer, Tier,
};
pub use cost::{CostReport, GridIntensity, StaticGridIntensity};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use service::{JobService, ServiceError};
pub use state::{JobMode, RunState};
pub use status::{JobOutcome, JobStatus, JobStatusSnapshot, JobStatusStore};
pub use triage::{ParagraphTriage, Triage, Unit, UnitKind};
