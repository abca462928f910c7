//! Drive Sparing Engine - scenario runner
//!
//! Builds an in-memory array from a YAML scenario, runs the listed jobs
//! through one engine instance and prints every job report, event and
//! notification as JSON.

use anyhow::{bail, Context};
use clap::Parser;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drive_sparing_engine::domain::types::{
    DriveLocation, EdgeIndex, JobNotification, LifecycleState, Lba, PvdConfigType,
};
use drive_sparing_engine::sparing::event_log::EventRecord;
use drive_sparing_engine::{
    ArrayPorts, ConfigUpdateRequest, DriveType, InMemoryArray, JobReport, ObjectId, SparingConfig,
    SparingEngine, SwapCommand, SwapRequest, TokioClock,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Drive Sparing Engine - runs swap and copy jobs against a simulated array
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario file (YAML)
    #[arg(long, env = "SPARING_SCENARIO")]
    scenario: PathBuf,

    /// Engine configuration file (YAML); overrides the scenario's config
    #[arg(long, env = "SPARING_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print engine metrics in Prometheus text format after the run
    #[arg(long, env = "PRINT_METRICS")]
    print_metrics: bool,
}

// =============================================================================
// Scenario
// =============================================================================

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    config: Option<SparingConfig>,
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    virtual_drives: Vec<ScenarioVirtualDrive>,
    #[serde(default)]
    drives: Vec<ScenarioDrive>,
    #[serde(default)]
    steps: Vec<ScenarioStep>,
}

#[derive(Debug, Deserialize)]
struct ScenarioVirtualDrive {
    object_id: ObjectId,
    original: ObjectId,
    #[serde(default = "default_drive_type")]
    drive_type: DriveType,
}

#[derive(Debug, Deserialize)]
struct ScenarioDrive {
    object_id: ObjectId,
    #[serde(default = "default_drive_type")]
    drive_type: DriveType,
    capacity: Lba,
    #[serde(default)]
    spare: bool,
    #[serde(default)]
    pool_id: Option<u32>,
    #[serde(default)]
    location: Option<DriveLocation>,
    #[serde(default)]
    lifecycle_state: Option<LifecycleState>,
    #[serde(default)]
    config_type: Option<PvdConfigType>,
    #[serde(default)]
    end_of_life: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ScenarioSwap {
    command: SwapCommand,
    vd_object_id: ObjectId,
    #[serde(default)]
    original: Option<ObjectId>,
    #[serde(default)]
    spare: Option<ObjectId>,
    #[serde(default)]
    edge: Option<EdgeIndex>,
}

impl ScenarioSwap {
    fn request(&self) -> SwapRequest {
        let mut request = SwapRequest::new(self.command, self.vd_object_id);
        request.orig_pvd_object_id = self.original;
        request.spare_object_id = self.spare;
        request.swap_edge_index = self.edge;
        request
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScenarioStep {
    /// One drive swap job
    Swap(ScenarioSwap),
    /// Drive swap jobs on different virtual drives, run concurrently
    Batch(Vec<ScenarioSwap>),
    /// Tunables update
    Config(ConfigUpdateRequest),
}

fn default_drive_type() -> DriveType {
    DriveType::Sas
}

/// Everything the run produced
#[derive(Debug, Serialize)]
struct Outcome {
    reports: Vec<JobReport>,
    events: Vec<EventRecord>,
    notifications: Vec<JobNotification>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Drive Sparing Engine");
    info!("  Version: {}", drive_sparing_engine::VERSION);
    info!("  Scenario: {}", args.scenario.display());

    let text = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("reading scenario {}", args.scenario.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing scenario {}", args.scenario.display()))?;

    let config = match &args.config {
        Some(path) => SparingConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => scenario.config.clone().unwrap_or_default(),
    };

    let array = build_array(&scenario)?;
    let engine = SparingEngine::new(config, ArrayPorts::from_shared(array.clone()), TokioClock::new())
        .context("starting engine")?;

    let mut reports = Vec::new();
    for (index, step) in scenario.steps.iter().enumerate() {
        match step {
            ScenarioStep::Swap(swap) => {
                reports.push(engine.submit_swap(swap.request()).await?);
            }
            ScenarioStep::Batch(swaps) => {
                let mut vds: Vec<ObjectId> = swaps.iter().map(|s| s.vd_object_id).collect();
                vds.sort_unstable();
                vds.dedup();
                if vds.len() != swaps.len() {
                    bail!("step {}: a batch may hold one job per virtual drive", index);
                }
                let jobs = swaps.iter().map(|swap| engine.submit_swap(swap.request()));
                for result in join_all(jobs).await {
                    reports.push(result?);
                }
            }
            ScenarioStep::Config(command) => {
                reports.push(engine.update_config(command.clone()).await?);
            }
        }
    }

    let committed = reports.iter().filter(|r| r.committed()).count();
    info!(
        "Scenario complete: {} jobs, {} committed, {} rolled back",
        reports.len(),
        committed,
        reports.len() - committed
    );

    let outcome = Outcome {
        reports,
        events: array.events(),
        notifications: array.notifications(),
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if args.print_metrics {
        println!("{}", engine.metrics().to_prometheus_text()?);
    }

    Ok(())
}

fn build_array(scenario: &Scenario) -> anyhow::Result<Arc<InMemoryArray>> {
    let array = InMemoryArray::new();
    array.set_encrypted(scenario.encrypted);

    for drive in &scenario.drives {
        let mut profile = InMemoryArray::drive(drive.object_id, drive.drive_type, drive.capacity);
        profile.pool_id = drive.pool_id;
        profile.end_of_life = drive.end_of_life;
        if let Some(location) = drive.location {
            profile.location = location;
        }
        if let Some(state) = drive.lifecycle_state {
            profile.lifecycle_state = state;
        }
        if let Some(config_type) = drive.config_type {
            profile.config_type = config_type;
        }
        if drive.spare {
            array.add_spare(profile);
        } else {
            array.add_drive(profile);
        }
    }

    for vd in &scenario.virtual_drives {
        if scenario.drives.iter().any(|d| d.object_id == vd.object_id) {
            bail!("object {:#x} is both a drive and a virtual drive", vd.object_id);
        }
        array.add_virtual_drive(vd.object_id, vd.original, vd.drive_type);
    }

    if scenario.virtual_drives.is_empty() {
        warn!("Scenario defines no virtual drives; every swap job will fail validation");
    }
    Ok(array)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout carries only the JSON outcome
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
