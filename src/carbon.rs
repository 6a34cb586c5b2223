//! Eco-mode carbon routing.
//!
//! Instead of summarizing, an eco job estimates the work the document
//! represents and scores a catalog of candidate compute regions by the carbon
//! cost of running that work there, recommending the cleanest one. The result
//! is rendered as the job's "summary" plus a [`CostReport`] scored against the
//! catalog average.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cost::{CostReport, GridIntensity};

/// Rough conversion: 4 chars per token, plus fixed prompt overhead.
const CHARS_PER_TOKEN: f64 = 4.0;
const TOKEN_OVERHEAD: u64 = 100;

/// Assumed inference throughput used for the energy estimate.
const TOKENS_PER_SECOND: f64 = 1000.0;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no compute servers configured")]
    NoServers,
}

/// A candidate compute location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    pub id: String,
    pub name: String,
    /// Grid region code, used for the intensity lookup.
    pub region: String,
    pub base_power_watts: f64,
    pub cost_per_1k_tokens: f64,
}

/// Built-in catalog of candidate regions.
pub fn default_catalog() -> Vec<ServerProfile> {
    vec![
        ServerProfile {
            id: "us-east-dc".into(),
            name: "US East (Virginia)".into(),
            region: "US-VA".into(),
            base_power_watts: 350.0,
            cost_per_1k_tokens: 0.0020,
        },
        ServerProfile {
            id: "eu-west-dc".into(),
            name: "EU West (Ireland)".into(),
            region: "IE".into(),
            base_power_watts: 320.0,
            cost_per_1k_tokens: 0.0024,
        },
        ServerProfile {
            id: "us-west-dc".into(),
            name: "US West (Oregon)".into(),
            region: "US-OR".into(),
            base_power_watts: 340.0,
            cost_per_1k_tokens: 0.0022,
        },
    ]
}

/// One scored routing option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOption {
    pub server_id: String,
    pub server_name: String,
    pub region: String,
    pub carbon_grams: f64,
    pub carbon_intensity: f64,
    pub energy_kwh: f64,
    pub processing_time_seconds: f64,
    pub cost_estimate: f64,
}

/// Result of a routing analysis: all options scored, cheapest-carbon first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteAnalysis {
    pub estimated_tokens: u64,
    pub recommended: ServerOption,
    /// All options, sorted ascending by carbon.
    pub all_options: Vec<ServerOption>,
    pub explanation: String,
}

/// Estimate the token load a document represents.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as f64 / CHARS_PER_TOKEN) as u64 + TOKEN_OVERHEAD
}

fn score_server(tokens: u64, server: &ServerProfile, intensity: f64) -> ServerOption {
    let processing_time_seconds = tokens as f64 / TOKENS_PER_SECOND;
    let energy_kwh = (server.base_power_watts * processing_time_seconds) / 3_600_000.0;
    let carbon_grams = energy_kwh * intensity;
    ServerOption {
        server_id: server.id.clone(),
        server_name: server.name.clone(),
        region: server.region.clone(),
        carbon_grams,
        carbon_intensity: intensity,
        energy_kwh,
        processing_time_seconds,
        cost_estimate: (tokens as f64 / 1000.0) * server.cost_per_1k_tokens,
    }
}

fn explain(best: &ServerOption, sorted: &[ServerOption]) -> String {
    let Some(second) = sorted.iter().find(|o| o.server_id != best.server_id) else {
        return "Selected the only available server based on current grid intensity.".to_string();
    };
    let saved = second.carbon_grams - best.carbon_grams;
    format!(
        "{} has lower current grid carbon intensity ({:.0} gCO2/kWh) than {} ({:.0} gCO2/kWh), \
         saving ~{:.4} g CO2 for this job.",
        best.server_name, best.carbon_intensity, second.server_name, second.carbon_intensity, saved
    )
}

/// Score every catalog server for this document and pick the lowest-carbon one.
pub fn analyze_route(
    text: &str,
    catalog: &[ServerProfile],
    grid: &dyn GridIntensity,
) -> Result<RouteAnalysis, RouteError> {
    if catalog.is_empty() {
        return Err(RouteError::NoServers);
    }

    let tokens = estimate_tokens(text);
    let mut options: Vec<ServerOption> = catalog
        .iter()
        .map(|server| score_server(tokens, server, grid.for_region(&server.region)))
        .collect();

    options.sort_by(|a, b| {
        a.carbon_grams
            .partial_cmp(&b.carbon_grams)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let recommended = options[0].clone();
    let explanation = explain(&recommended, &options);
    info!(
        tokens,
        recommended = %recommended.server_name,
        carbon_grams = recommended.carbon_grams,
        "carbon route selected"
    );

    Ok(RouteAnalysis {
        estimated_tokens: tokens,
        recommended,
        all_options: options,
        explanation,
    })
}

/// Render the analysis as the human-readable text that stands in for a
/// summary on eco runs.
pub fn render_report(analysis: &RouteAnalysis) -> String {
    format!(
        "CARBON ROUTER ANALYSIS\n\
         ----------------------------------------\n\
         Recommended Server: {}\n\
         Carbon Saved: {}\n\
         Estimated Tokens: {}\n",
        analysis.recommended.server_name, analysis.explanation, analysis.estimated_tokens
    )
}

/// Derive a [`CostReport`] for an eco run.
///
/// Baseline is the catalog average (or 1.5x the recommendation when there is
/// only one option); actual is the recommended server's footprint.
pub fn eco_cost_report(analysis: &RouteAnalysis) -> CostReport {
    let actual = analysis.recommended.carbon_grams;
    let baseline = if analysis.all_options.len() > 1 {
        analysis.all_options.iter().map(|o| o.carbon_grams).sum::<f64>()
            / analysis.all_options.len() as f64
    } else {
        actual * 1.5
    };

    let saved = (baseline - actual).max(0.0);
    let efficiency = if baseline > 0.0 {
        ((baseline - actual) / baseline) * 100.0
    } else {
        0.0
    };

    CostReport {
        carbon_saved_grams: saved,
        baseline_cost_gco2e: baseline,
        actual_cost_gco2e: actual,
        efficiency_percent: efficiency,
        message: analysis.explanation.clone(),
        local_grid_gco2_kwh: analysis.recommended.carbon_intensity,
        compute_location: analysis.recommended.region.clone(),
        total_units: 1,
        units_escalated: 0,
        still_uncertain: Vec::new(),
    }
}
