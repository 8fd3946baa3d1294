//! brake-pipeline: brake point consistency for one race session.
//!
//! Reads wide telemetry, zone definitions and optionally the official results,
//! then writes brake events, track geometry, per-zone dispersion and the
//! driver summary into an output directory.

mod pipeline;

use std::path::PathBuf;
use std::process::ExitCode;

use analysis::band::BandPolicy;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::pipeline::{run, RunError, RunInputs};

#[derive(Parser, Debug)]
#[command(name = "brake-pipeline", version, about = "Brake point consistency analysis for a race session")]
struct Cli {
    /// Wide telemetry CSV (vehicle_number, lap, timestamp, pbrake_f, pbrake_r, x_meters, y_meters, speed)
    #[arg(long)]
    telemetry: PathBuf,

    /// Ordered zone definitions (JSON list)
    #[arg(long)]
    zones: PathBuf,

    /// Results table with fastest lap times
    #[arg(long)]
    results: Option<PathBuf>,

    /// Double-apex split table (JSON list); overrides the config file
    #[arg(long)]
    splits: Option<PathBuf>,

    /// Pipeline tuning (JSON)
    #[arg(long, env = "BRAKE_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "out")]
    outdir: PathBuf,

    /// Directory for cached track geometry; without it geometry is rebuilt every run
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long, default_value = "track")]
    track: String,

    #[arg(long, default_value = "session")]
    session: String,

    /// Reference vehicle for the centerline
    #[arg(long)]
    vehicle: Option<u32>,

    /// Reference lap for the centerline
    #[arg(long)]
    lap: Option<u32>,

    /// Use a constant band width in meters instead of the data-driven band
    #[arg(long)]
    band_width: Option<f64>,

    /// Rebuild track geometry even when cached
    #[arg(long)]
    force: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{level},brake_pipeline={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut config = iox::load_config(cli.config.as_deref())?;
    if cli.vehicle.is_some() {
        config.reference_vehicle = cli.vehicle;
    }
    if cli.lap.is_some() {
        config.reference_lap = cli.lap;
    }
    if let Some(width_m) = cli.band_width {
        config.band = Some(BandPolicy::Fixed { width_m });
    }
    config.validate()?;

    let inputs = RunInputs {
        telemetry: cli.telemetry,
        zones: cli.zones,
        results: cli.results,
        splits: cli.splits,
        outdir: cli.outdir,
        cache_dir: cli.cache_dir,
        track: cli.track,
        session: cli.session,
        force: cli.force,
    };
    let manifest = run(&inputs, &config)?;
    println!(
        "run {}: {} brake events, {} drivers, outputs in {}",
        manifest.run_id,
        manifest.counts.events_racing_laps,
        manifest.counts.drivers,
        inputs.outdir.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            if let Some(ae) = e.downcast_ref::<analysis::AnalysisError>() {
                eprintln!("failed in stage `{}`: {ae}", ae.stage());
                return ExitCode::from(2);
            }
            if e.downcast_ref::<RunError>().is_some() {
                return ExitCode::from(3);
            }
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
