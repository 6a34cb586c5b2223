#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use verdant::capability::HttpChatCapability;
use verdant::carbon;
use verdant::cost::StaticGridIntensity;
use verdant::persist::SqliteRunStore;
use verdant::triage::ParagraphTriage;
use verdant::{JobMode, JobService, JobStatusStore, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "verdant", version, about = "Cost-aware document summarization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a document, polling the job until it finishes
    Run {
        file: PathBuf,
        /// Carbon-routing analysis only; skips summarization
        #[arg(long)]
        eco: bool,
        /// SQLite database path for stored runs
        #[arg(long)]
        db: Option<PathBuf>,
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
    /// Score candidate compute regions for a document without submitting a job
    Route { file: PathBuf },
}

fn document_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            eco,
            db,
            poll_ms,
        } => {
            let capability = Arc::new(HttpChatCapability::from_env()?);
            let store = Arc::new(SqliteRunStore::new(
                db.unwrap_or_else(SqliteRunStore::default_path),
            )?);
            let status = JobStatusStore::new();
            let pipeline = Arc::new(Pipeline::new(
                Arc::new(ParagraphTriage::new()),
                capability.clone(),
                capability.clone(),
                capability,
                store,
                Arc::new(StaticGridIntensity::new()),
                status.clone(),
                PipelineConfig::default(),
            ));
            let service = JobService::new(pipeline, status);

            let mode = if eco { JobMode::Eco } else { JobMode::Standard };
            let document_id = document_id_for(&file);
            let job_id = service.submit(document_id, file.to_string_lossy(), mode);
            println!("job {job_id} submitted");

            let mut last_message = String::new();
            loop {
                tokio::time::sleep(Duration::from_millis(poll_ms)).await;
                let snapshot = service.get_status(job_id)?;
                if snapshot.message != last_message {
                    println!("[{:>5.1}%] {}", snapshot.progress, snapshot.message);
                    last_message = snapshot.message.clone();
                }
                if snapshot.status.is_terminal() {
                    break;
                }
            }

            let outcome = service.get_result(job_id)?;
            println!("\n{}\n", outcome.summary);
            println!("{}", outcome.cost_report.message);
            println!(
                "baseline {:.2}g, actual {:.2}g, escalated {}/{} units",
                outcome.cost_report.baseline_cost_gco2e,
                outcome.cost_report.actual_cost_gco2e,
                outcome.cost_report.units_escalated,
                outcome.cost_report.total_units,
            );
            if !outcome.cost_report.still_uncertain.is_empty() {
                println!(
                    "warning: units {:?} never passed verification",
                    outcome.cost_report.still_uncertain
                );
            }
        }
        Commands::Route { file } => {
            let text = tokio::fs::read_to_string(&file).await?;
            let grid = StaticGridIntensity::new();
            let analysis = carbon::analyze_route(&text, &carbon::default_catalog(), &grid)?;
            println!("{}", carbon::render_report(&analysis));
            for option in &analysis.all_options {
                println!(
                    "  {:<22} {:>8.4} g CO2  ({:.0} gCO2/kWh, ${:.4})",
                    option.server_name,
                    option.carbon_grams,
                    option.carbon_intensity,
                    option.cost_estimate,
                );
            }
        }
    }

    Ok(())
}
