//! End-to-end pipeline runs with scripted capabilities.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use verdant::capability::{
    AccuracyVerifier, CapabilityError, FinalCompiler, RetryPolicy, Summarizer, Tier,
};
use verdant::cost::StaticGridIntensity;
use verdant::persist::{MemoryRunStore, RunStore};
use verdant::stage::FAILED_OUTPUT;
use verdant::status::{JobStatus, JobStatusSnapshot};
use verdant::triage::ParagraphTriage;
use verdant::{JobMode, JobService, JobStatusStore, Pipeline, PipelineConfig, ServiceError};

// =============================================================================
// Scripted capabilities
// =============================================================================

/// Deterministic summarizer: wraps input in a tier-tagged envelope.
struct TaggedSummarizer {
    /// Inputs containing any of these fail at the light tier only.
    light_fails_on: Vec<&'static str>,
}

impl TaggedSummarizer {
    fn reliable() -> Self {
        Self {
            light_fails_on: vec![],
        }
    }
}

#[async_trait]
impl Summarizer for TaggedSummarizer {
    async fn summarize(&self, tier: Tier, text: &str) -> Result<String, CapabilityError> {
        if tier == Tier::Light && self.light_fails_on.iter().any(|m| text.contains(m)) {
            return Err(CapabilityError::unavailable("light model down"));
        }
        Ok(format!("{}({})", tier.as_str(), text))
    }
}

/// Rejects candidates whose source text contains any marker, but only while
/// they are still light-tier outputs. Escalated outputs pass.
struct MarkerVerifier {
    reject_sources: Vec<&'static str>,
    reject_everything: bool,
}

#[async_trait]
impl AccuracyVerifier for MarkerVerifier {
    async fn verify(&self, original: &str, candidate: &str) -> Result<bool, CapabilityError> {
        if self.reject_everything {
            return Ok(false);
        }
        let suspect = self.reject_sources.iter().any(|m| original.contains(m));
        Ok(!(suspect && candidate.starts_with("light(")))
    }
}

struct JoinCompiler;

#[async_trait]
impl FinalCompiler for JoinCompiler {
    async fn compile(&self, joined: &str) -> Result<String, CapabilityError> {
        Ok(format!("FINAL[{joined}]"))
    }
}

struct RateLimitedCompiler;

#[async_trait]
impl FinalCompiler for RateLimitedCompiler {
    async fn compile(&self, _joined: &str) -> Result<String, CapabilityError> {
        Err(CapabilityError::rate_limited(Duration::from_millis(0)))
    }
}

/// Rate-limits the first `fail_first` attempts, then succeeds.
struct FlakyCompiler {
    fail_first: u32,
    calls: std::sync::atomic::AtomicU32,
}

#[async_trait]
impl FinalCompiler for FlakyCompiler {
    async fn compile(&self, joined: &str) -> Result<String, CapabilityError> {
        let n = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if n < self.fail_first {
            Err(CapabilityError::rate_limited(Duration::from_millis(0)))
        } else {
            Ok(format!("THIRD_TRY[{joined}]"))
        }
    }
}

struct BrokenCompiler;

#[async_trait]
impl FinalCompiler for BrokenCompiler {
    async fn compile(&self, _joined: &str) -> Result<String, CapabilityError> {
        Err(CapabilityError::unavailable("compiler offline"))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    service: JobService,
    store: Arc<MemoryRunStore>,
    _file: tempfile::NamedTempFile,
    path: String,
}

fn write_doc(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp doc");
    file.write_all(text.as_bytes()).expect("write temp doc");
    file
}

fn harness(
    text: &str,
    summarizer: TaggedSummarizer,
    verifier: MarkerVerifier,
    compiler: Arc<dyn FinalCompiler>,
) -> Harness {
    let file = write_doc(text);
    let path = file.path().to_string_lossy().into_owned();
    let store = Arc::new(MemoryRunStore::new());
    let status = JobStatusStore::new();
    let config = PipelineConfig {
        compile_retry: RetryPolicy::new(3, Duration::from_millis(0)),
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(ParagraphTriage::new()),
        Arc::new(summarizer),
        Arc::new(verifier),
        compiler,
        store.clone(),
        Arc::new(StaticGridIntensity::new()),
        status.clone(),
        config,
    ));
    Harness {
        service: JobService::new(pipeline, status),
        store,
        _file: file,
        path,
    }
}

async fn wait_terminal(service: &JobService, job_id: Uuid) -> JobStatusSnapshot {
    for _ in 0..500 {
        let snapshot = service.get_status(job_id).expect("job registered");
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}

const THREE_PARAGRAPHS: &str = "The alpha release shipped on time and customers adopted it quickly across every region we serve.\n\n\
The beta program uncovered a regression in the billing flow that had to be patched within a week.\n\n\
The gamma milestone closed out the year with the platform handling double the traffic of January.";

const FIVE_PARAGRAPHS: &str = "The alpha release shipped on time and customers adopted it quickly across every region we serve.\n\n\
The beta program uncovered a regression in the billing flow that had to be patched within a week.\n\n\
The gamma milestone closed out the year with the platform handling double the traffic of January.\n\n\
The delta initiative consolidated three legacy services into one deployment with no customer downtime.\n\n\
The epsilon review confirmed the cost reductions held through the busiest quarter on record.";

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn clean_run_compiles_and_reports() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(JoinCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    let snapshot = wait_terminal(&h.service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Complete);
    assert_eq!(snapshot.progress, 100.0);

    let outcome = h.service.get_result(job_id).expect("result ready");
    assert!(outcome.summary.starts_with("FINAL["));
    assert!(outcome.summary.contains("light(The alpha release"));

    let report = &outcome.cost_report;
    assert_eq!(report.total_units, 3);
    assert_eq!(report.units_escalated, 0);
    assert!(report.still_uncertain.is_empty());
    assert!(report.carbon_saved_grams > 0.0);

    let record = h.store.get(job_id).await.unwrap().expect("run persisted");
    assert_eq!(record.units.len(), 3);
    assert!(record.cost_report.is_some());
}

#[tokio::test]
async fn rejected_unit_is_escalated_once_and_passes() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec!["beta"],
            reject_everything: false,
        },
        Arc::new(JoinCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    wait_terminal(&h.service, job_id).await;

    let outcome = h.service.get_result(job_id).expect("result ready");
    // Only the beta unit was re-summarized, in place, at the medium tier.
    assert!(outcome.summary.contains("light(The alpha release"));
    assert!(outcome.summary.contains("medium(The beta program"));
    assert!(outcome.summary.contains("light(The gamma milestone"));

    assert_eq!(outcome.cost_report.units_escalated, 1);
    assert!(outcome.cost_report.still_uncertain.is_empty());
}

#[tokio::test]
async fn always_rejecting_verifier_terminates_with_uncertain_units() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: true,
        },
        Arc::new(JoinCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    let snapshot = wait_terminal(&h.service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Complete);

    let outcome = h.service.get_result(job_id).expect("result ready");
    // One escalation round, then force-accept: outputs are medium-tier and
    // every unit is flagged as never having passed.
    assert!(outcome.summary.contains("medium(The alpha release"));
    assert_eq!(outcome.cost_report.units_escalated, 3);
    assert_eq!(outcome.cost_report.still_uncertain, vec![0, 1, 2]);
}

#[tokio::test]
async fn two_rejected_units_escalate_together_then_force_accept() {
    // Units 1 and 3 fail verification at both tiers: one escalation pass
    // rewrites exactly those two slots in place, the next gate pass
    // force-accepts them.
    struct PairVerifier;

    #[async_trait]
    impl AccuracyVerifier for PairVerifier {
        async fn verify(&self, original: &str, _candidate: &str) -> Result<bool, CapabilityError> {
            Ok(!(original.contains("beta") || original.contains("delta")))
        }
    }

    let file = write_doc(FIVE_PARAGRAPHS);
    let path = file.path().to_string_lossy().into_owned();
    let store = Arc::new(MemoryRunStore::new());
    let status = JobStatusStore::new();
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(ParagraphTriage::new()),
        Arc::new(TaggedSummarizer::reliable()),
        Arc::new(PairVerifier),
        Arc::new(JoinCompiler),
        store,
        Arc::new(StaticGridIntensity::new()),
        status.clone(),
        PipelineConfig::default(),
    ));
    let service = JobService::new(pipeline, status);

    let job_id = service.submit("doc", path, JobMode::Standard);
    wait_terminal(&service, job_id).await;

    let outcome = service.get_result(job_id).expect("result ready");
    assert!(outcome.summary.contains("light(The alpha release"));
    assert!(outcome.summary.contains("medium(The beta program"));
    assert!(outcome.summary.contains("light(The gamma milestone"));
    assert!(outcome.summary.contains("medium(The delta initiative"));
    assert!(outcome.summary.contains("light(The epsilon review"));

    assert_eq!(outcome.cost_report.total_units, 5);
    assert_eq!(outcome.cost_report.units_escalated, 2);
    assert_eq!(outcome.cost_report.still_uncertain, vec![1, 3]);
}

#[tokio::test]
async fn late_rejection_still_escalates_that_unit() {
    // The verifier changes its mind between passes: unit 0 is rejected on
    // the first pass, unit 1 only on the second. Unit 1 has not used its
    // escalation round yet, so it must reach the medium tier rather than
    // being force-accepted with its light-tier output.
    struct FlipVerifier {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl AccuracyVerifier for FlipVerifier {
        async fn verify(&self, original: &str, _candidate: &str) -> Result<bool, CapabilityError> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Three units per gate pass.
            match n / 3 {
                0 => Ok(!original.contains("alpha")),
                _ => Ok(!original.contains("beta")),
            }
        }
    }

    let file = write_doc(THREE_PARAGRAPHS);
    let path = file.path().to_string_lossy().into_owned();
    let store = Arc::new(MemoryRunStore::new());
    let status = JobStatusStore::new();
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(ParagraphTriage::new()),
        Arc::new(TaggedSummarizer::reliable()),
        Arc::new(FlipVerifier {
            calls: std::sync::atomic::AtomicU32::new(0),
        }),
        Arc::new(JoinCompiler),
        store,
        Arc::new(StaticGridIntensity::new()),
        status.clone(),
        PipelineConfig::default(),
    ));
    let service = JobService::new(pipeline, status);

    let job_id = service.submit("doc", path, JobMode::Standard);
    wait_terminal(&service, job_id).await;

    let outcome = service.get_result(job_id).expect("result ready");
    // Both rejected units reached the medium tier, in separate rounds.
    assert!(outcome.summary.contains("medium(The alpha release"));
    assert!(outcome.summary.contains("medium(The beta program"));
    assert!(outcome.summary.contains("light(The gamma milestone"));
    assert_eq!(outcome.cost_report.units_escalated, 2);
    // Beta keeps failing after its one escalation round and is flagged.
    assert_eq!(outcome.cost_report.still_uncertain, vec![1]);
}

#[tokio::test]
async fn failed_light_unit_degrades_to_sentinel() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer {
            light_fails_on: vec!["gamma"],
        },
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(JoinCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    wait_terminal(&h.service, job_id).await;

    let outcome = h.service.get_result(job_id).expect("result ready");
    // The run completed despite the unit failure; the sentinel flowed through.
    assert!(outcome.summary.contains(FAILED_OUTPUT));
    assert_eq!(outcome.cost_report.total_units, 3);
}

#[tokio::test]
async fn empty_document_fails_the_job() {
    let h = harness(
        "",
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(JoinCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    let snapshot = wait_terminal(&h.service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Error);
    assert!(snapshot.message.contains("no units"));

    // The run aborted before the store node; nothing was persisted.
    assert!(h.store.get(job_id).await.unwrap().is_none());

    match h.service.get_result(job_id) {
        Err(ServiceError::Failed(_, _)) => {}
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn persistent_rate_limit_degrades_summary_but_completes() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(RateLimitedCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    let snapshot = wait_terminal(&h.service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Complete);

    let outcome = h.service.get_result(job_id).expect("result ready");
    assert_eq!(outcome.summary, verdant::pipeline::RATE_LIMITED_SUMMARY);
}

#[tokio::test]
async fn transient_rate_limit_recovers_on_third_attempt() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(FlakyCompiler {
            fail_first: 2,
            calls: std::sync::atomic::AtomicU32::new(0),
        }),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    let snapshot = wait_terminal(&h.service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Complete);

    let outcome = h.service.get_result(job_id).expect("result ready");
    assert!(outcome.summary.starts_with("THIRD_TRY["));
}

#[tokio::test]
async fn persistently_rejected_unit_is_flagged_not_looped() {
    // The beta unit fails verification at both tiers: one escalation round,
    // then force-accept with the flag set. No infinite gate loop.
    struct StubbornVerifier;

    #[async_trait]
    impl AccuracyVerifier for StubbornVerifier {
        async fn verify(&self, original: &str, _candidate: &str) -> Result<bool, CapabilityError> {
            Ok(!original.contains("beta"))
        }
    }

    let file = write_doc(THREE_PARAGRAPHS);
    let path = file.path().to_string_lossy().into_owned();
    let store = Arc::new(MemoryRunStore::new());
    let status = JobStatusStore::new();
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(ParagraphTriage::new()),
        Arc::new(TaggedSummarizer::reliable()),
        Arc::new(StubbornVerifier),
        Arc::new(JoinCompiler),
        store,
        Arc::new(StaticGridIntensity::new()),
        status.clone(),
        PipelineConfig::default(),
    ));
    let service = JobService::new(pipeline, status);

    let job_id = service.submit("doc", path, JobMode::Standard);
    wait_terminal(&service, job_id).await;

    let outcome = service.get_result(job_id).expect("result ready");
    assert!(outcome.summary.contains("medium(The beta program"));
    assert_eq!(outcome.cost_report.units_escalated, 1);
    assert_eq!(outcome.cost_report.still_uncertain, vec![1]);
}

#[tokio::test]
async fn non_rate_limit_compile_failure_embeds_error_message() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(BrokenCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);
    let snapshot = wait_terminal(&h.service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Complete);

    let outcome = h.service.get_result(job_id).expect("result ready");
    assert!(outcome.summary.starts_with("Final summary generation failed:"));
}

#[tokio::test]
async fn eco_mode_skips_summarization_and_reports_routing() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(JoinCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Eco);
    let snapshot = wait_terminal(&h.service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Complete);

    let outcome = h.service.get_result(job_id).expect("result ready");
    assert!(outcome.summary.contains("CARBON ROUTER ANALYSIS"));
    // Cleanest grid in the built-in catalog.
    assert_eq!(outcome.cost_report.compute_location, "US-OR");

    let record = h.store.get(job_id).await.unwrap().expect("run persisted");
    assert!(record.units.is_empty());
}

#[tokio::test]
async fn progress_observed_by_pollers_never_decreases() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec!["alpha", "beta", "gamma"],
            reject_everything: false,
        },
        Arc::new(JoinCompiler),
    );

    let job_id = h.service.submit("doc", h.path.clone(), JobMode::Standard);

    let mut last = 0.0f32;
    loop {
        let snapshot = h.service.get_status(job_id).expect("job registered");
        assert!(
            snapshot.progress >= last,
            "progress went backwards: {last} -> {}",
            snapshot.progress
        );
        last = snapshot.progress;
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(last, 100.0);
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let h = harness(
        THREE_PARAGRAPHS,
        TaggedSummarizer::reliable(),
        MarkerVerifier {
            reject_sources: vec![],
            reject_everything: false,
        },
        Arc::new(JoinCompiler),
    );

    match h.service.get_status(Uuid::new_v4()) {
        Err(ServiceError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}
