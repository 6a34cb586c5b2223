//! Carbon cost model.
//!
//! Per-unit gCO2e estimates for each capability tier, scored against a
//! baseline that assumes the large tier was run on every unit. The point of
//! the tiered pipeline is the gap between the two numbers.

use serde::{Deserialize, Serialize};
use tracing::info;

// Per-unit gCO2e estimates. The ratios are what matter: medium is 10x light,
// large is 100x light.
pub const PARSE_GCO2E: f64 = 0.05;
pub const SUMMARIZE_LIGHT_GCO2E: f64 = 0.005;
pub const SUMMARIZE_MEDIUM_GCO2E: f64 = 0.05;
pub const SUMMARIZE_LARGE_GCO2E: f64 = 0.5;
pub const VERIFY_GCO2E: f64 = 0.005;

/// What a single-tier system would spend per unit: parse it, then run the
/// large model on it.
pub const BASELINE_GCO2E_PER_UNIT: f64 = PARSE_GCO2E + SUMMARIZE_LARGE_GCO2E;

/// Grid carbon intensity lookup, in gCO2eq per kWh.
pub trait GridIntensity: Send + Sync {
    /// Intensity for a named region.
    fn for_region(&self, region: &str) -> f64;

    /// Intensity of the grid the pipeline itself runs on.
    fn local(&self) -> f64;
}

/// Fixed intensity table. Stands in for a live grid-data API; regions not in
/// the table get a moderate default.
#[derive(Debug, Clone)]
pub struct StaticGridIntensity {
    local: f64,
}

impl StaticGridIntensity {
    pub const DEFAULT_REGION_INTENSITY: f64 = 350.0;
    pub const DEFAULT_LOCAL_INTENSITY: f64 = 700.0;

    pub fn new() -> Self {
        Self {
            local: Self::DEFAULT_LOCAL_INTENSITY,
        }
    }

    pub fn with_local(local: f64) -> Self {
        Self { local }
    }
}

impl Default for StaticGridIntensity {
    fn default() -> Self {
        Self::new()
    }
}

impl GridIntensity for StaticGridIntensity {
    fn for_region(&self, region: &str) -> f64 {
        match region {
            "US-VA" => 420.0,
            "IE" => 300.0,
            "US-OR" => 250.0,
            _ => Self::DEFAULT_REGION_INTENSITY,
        }
    }

    fn local(&self) -> f64 {
        self.local
    }
}

/// Carbon accounting for one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    pub carbon_saved_grams: f64,
    pub baseline_cost_gco2e: f64,
    pub actual_cost_gco2e: f64,
    pub efficiency_percent: f64,
    pub message: String,
    pub local_grid_gco2_kwh: f64,
    pub compute_location: String,
    pub total_units: usize,
    pub units_escalated: usize,
    /// Unit indices force-accepted at the escalation ceiling. Non-empty means
    /// parts of the summary never passed verification.
    pub still_uncertain: Vec<usize>,
}

/// Score a completed summarization run against the all-large baseline.
///
/// Deterministic in its inputs: unit count, escalated count, and the grid
/// lookup. Concurrency and completion order never affect the numbers.
pub fn compute_cost_report(
    total_units: usize,
    units_escalated: usize,
    still_uncertain: Vec<usize>,
    grid: &dyn GridIntensity,
) -> CostReport {
    let local_grid_gco2_kwh = grid.local();

    let baseline_cost_gco2e = BASELINE_GCO2E_PER_UNIT * total_units as f64;

    // Every unit is parsed, light-summarized, and verified; only escalated
    // units pay the medium tier; the large tier runs once for the compile.
    let cost_parse_and_verify = (PARSE_GCO2E + VERIFY_GCO2E) * total_units as f64;
    let cost_light = SUMMARIZE_LIGHT_GCO2E * total_units as f64;
    let cost_medium = SUMMARIZE_MEDIUM_GCO2E * units_escalated as f64;
    let cost_final_compile = SUMMARIZE_LARGE_GCO2E;

    let actual_cost_gco2e = cost_parse_and_verify + cost_light + cost_medium + cost_final_compile;

    let carbon_saved_grams = baseline_cost_gco2e - actual_cost_gco2e;
    let efficiency_percent = if baseline_cost_gco2e > 0.0 {
        (carbon_saved_grams / baseline_cost_gco2e) * 100.0
    } else {
        0.0
    };

    let message = format!(
        "Saved {carbon_saved_grams:.2}g CO2e ({efficiency_percent:.0}% more efficient) by using 'Light' models first."
    );
    info!(
        total_units,
        units_escalated, carbon_saved_grams, efficiency_percent, "cost report computed"
    );

    CostReport {
        carbon_saved_grams,
        baseline_cost_gco2e,
        actual_cost_gco2e,
        efficiency_percent,
        message,
        local_grid_gco2_kwh,
        compute_location: "local_hybrid".to_string(),
        total_units,
        units_escalated,
        still_uncertain,
    }
}
