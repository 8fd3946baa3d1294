use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use analysis::band::build_band;
use analysis::brakes::{detect_brake_onsets, filter_by_pressure, lap_path_lengths, pressure_threshold, retain_racing_laps};
use analysis::cache::{compute_or_load, CacheOutcome, CenterlineStore, MemoryStore, TrackKey};
use analysis::centerline::build_reference_centerline;
use analysis::config::PipelineConfig;
use analysis::dispersion::{driver_summary, zone_centroids, zone_dispersion};
use analysis::summary::{consistency_check, merge_lap_times, ConsistencyCheck};
use analysis::zones::{assign_zones, assignment_stats, split_zones, zone_bounds, ZoneAssignmentStats};
use model::{BandStats, TelemetrySample, TrackGeometry};

pub const BRAKE_EVENTS_CSV: &str = "brake_events.csv";
pub const CENTERLINE_CSV: &str = "track_centerline.csv";
pub const BAND_CSV: &str = "track_band.csv";
pub const DISPERSION_CSV: &str = "dispersion_by_zone.csv";
pub const CENTROIDS_CSV: &str = "zone_centroids.csv";
pub const ZONE_BOUNDS_JSON: &str = "zone_bounds.json";
pub const DRIVER_SUMMARY_CSV: &str = "driver_summary.csv";
pub const MANIFEST_JSON: &str = "manifest.json";

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("telemetry {0} has no usable rows")]
    EmptyTelemetry(PathBuf),
    #[error("zone file {0} defines no zones")]
    NoZones(PathBuf),
}

#[derive(Clone, Debug)]
pub struct RunInputs {
    pub telemetry: PathBuf,
    pub zones: PathBuf,
    pub results: Option<PathBuf>,
    pub splits: Option<PathBuf>,
    pub outdir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub track: String,
    pub session: String,
    pub force: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct StageCounts {
    pub samples: usize,
    pub vehicles: usize,
    pub events_detected: usize,
    pub events_after_pressure_filter: usize,
    pub events_racing_laps: usize,
    pub dispersion_rows: usize,
    pub centroids: usize,
    pub drivers: usize,
}

#[derive(Debug, Serialize)]
pub struct CenterlineInfo {
    pub key: String,
    pub outcome: CacheOutcome,
    pub reference_vehicle: u32,
    pub stations: usize,
    pub length_m: f64,
    pub band: Option<BandStats>,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub telemetry: PathBuf,
    pub zones: PathBuf,
    pub results: Option<PathBuf>,
    pub threshold_bar: f64,
    pub counts: StageCounts,
    pub centerline: CenterlineInfo,
    pub zone_assignment: ZoneAssignmentStats,
    pub consistency: Option<ConsistencyCheck>,
    pub outputs: Vec<String>,
}

fn reference_vehicle(samples: &[TelemetrySample], config: &PipelineConfig) -> Option<u32> {
    config.reference_vehicle.or_else(|| samples.first().map(|s| s.vehicle_number))
}

fn track_geometry(
    store: &dyn CenterlineStore,
    key: &TrackKey,
    force: bool,
    samples: &[TelemetrySample],
    vehicle: u32,
    config: &PipelineConfig,
) -> Result<(TrackGeometry, CacheOutcome)> {
    Ok(compute_or_load(store, key, force, || {
        let centerline = build_reference_centerline(samples, vehicle, config.reference_lap, &config.centerline)?;
        let band = config.band.as_ref().map(|policy| {
            let _band = info_span!("stage", name = "band").entered();
            build_band(&centerline, samples, policy)
        });
        Ok(TrackGeometry { centerline, band })
    })?)
}

/// Run every stage once and write all outputs plus the manifest into `outdir`.
pub fn run(inputs: &RunInputs, config: &PipelineConfig) -> Result<Manifest> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let _run = info_span!("run", %run_id).entered();
    std::fs::create_dir_all(&inputs.outdir)
        .with_context(|| format!("creating output directory {}", inputs.outdir.display()))?;
    let mut counts = StageCounts::default();

    let (samples, zones, results, splits) = {
        let _s = info_span!("stage", name = "load").entered();
        let samples = iox::read_telemetry_csv(&inputs.telemetry)?;
        if samples.is_empty() {
            return Err(RunError::EmptyTelemetry(inputs.telemetry.clone()).into());
        }
        let zones = iox::read_zones_json(&inputs.zones)?;
        if zones.is_empty() {
            return Err(RunError::NoZones(inputs.zones.clone()).into());
        }
        let results = inputs.results.as_deref().map(iox::read_lap_results).transpose()?;
        let splits = match inputs.splits.as_deref() {
            Some(p) => iox::read_splits_json(p)?,
            None => config.splits.clone(),
        };
        (samples, zones, results, splits)
    };
    counts.samples = samples.len();
    counts.vehicles = {
        let mut v: Vec<u32> = samples.iter().map(|s| s.vehicle_number).collect();
        v.dedup();
        v.len()
    };

    let threshold = {
        let _s = info_span!("stage", name = "threshold").entered();
        match config.detection.threshold_bar {
            Some(t) => {
                info!(threshold_bar = t, "using configured brake threshold");
                t
            }
            None => pressure_threshold(&samples, config.detection.threshold_percentile)?,
        }
    };

    let events = {
        let _s = info_span!("stage", name = "detection").entered();
        let events = detect_brake_onsets(&samples, threshold);
        counts.events_detected = events.len();
        let events = filter_by_pressure(events, config.detection.min_pressure, config.detection.max_pressure);
        counts.events_after_pressure_filter = events.len();
        let events = match config.detection.lap_length_range_m {
            Some((lo, hi)) => retain_racing_laps(events, &lap_path_lengths(&samples), lo, hi),
            None => events,
        };
        counts.events_racing_laps = events.len();
        events
    };

    let key = TrackKey::new(inputs.track.clone(), inputs.session.clone());
    let vehicle = reference_vehicle(&samples, config).context("no reference vehicle")?;
    let (geometry, outcome) = {
        let _s = info_span!("stage", name = "centerline", vehicle).entered();
        match &inputs.cache_dir {
            Some(dir) => {
                let store = iox::FileStore::new(dir);
                track_geometry(&store, &key, inputs.force, &samples, vehicle, config)?
            }
            None => track_geometry(&MemoryStore::new(), &key, inputs.force, &samples, vehicle, config)?,
        }
    };
    if !geometry.centerline.is_closed() {
        warn!(%key, "cached centerline is not closed");
    }

    let (events, bounds, zone_stats) = {
        let _s = info_span!("stage", name = "zones").entered();
        let events = assign_zones(&events, &geometry.centerline, &zones);
        let events = split_zones(events, &splits);
        let bounds = zone_bounds(&events, config.zone_bounds_padding_m);
        let stats = assignment_stats(&events);
        (events, bounds, stats)
    };

    let (dispersion, centroids) = {
        let _s = info_span!("stage", name = "dispersion").entered();
        (zone_dispersion(&events), zone_centroids(&events))
    };
    counts.dispersion_rows = dispersion.len();
    counts.centroids = centroids.len();

    let (summary, consistency) = {
        let _s = info_span!("stage", name = "summary").entered();
        let summary = driver_summary(&dispersion);
        match &results {
            Some(r) => {
                let merged = merge_lap_times(summary, r);
                let check = consistency_check(&merged);
                (merged, Some(check))
            }
            None => (summary, None),
        }
    };
    counts.drivers = summary.len();

    let out = |name: &str| -> PathBuf { inputs.outdir.join(name) };
    let mut outputs = Vec::new();
    {
        let _s = info_span!("stage", name = "write").entered();
        iox::write_brake_events(&events, &out(BRAKE_EVENTS_CSV))?;
        outputs.push(BRAKE_EVENTS_CSV);
        iox::write_centerline_csv(&geometry.centerline, &out(CENTERLINE_CSV))?;
        outputs.push(CENTERLINE_CSV);
        if let Some(band) = &geometry.band {
            iox::write_band_csv(band, &out(BAND_CSV))?;
            outputs.push(BAND_CSV);
        }
        iox::write_dispersion(&dispersion, &out(DISPERSION_CSV))?;
        outputs.push(DISPERSION_CSV);
        iox::write_centroids(&centroids, &out(CENTROIDS_CSV))?;
        outputs.push(CENTROIDS_CSV);
        iox::write_json(&bounds, &out(ZONE_BOUNDS_JSON))?;
        outputs.push(ZONE_BOUNDS_JSON);
        iox::write_driver_summary(&summary, &out(DRIVER_SUMMARY_CSV))?;
        outputs.push(DRIVER_SUMMARY_CSV);
    }
    outputs.push(MANIFEST_JSON);

    let manifest = Manifest {
        run_id,
        started_at,
        finished_at: Utc::now(),
        telemetry: inputs.telemetry.clone(),
        zones: inputs.zones.clone(),
        results: inputs.results.clone(),
        threshold_bar: threshold,
        counts,
        centerline: CenterlineInfo {
            key: key.to_string(),
            outcome,
            reference_vehicle: vehicle,
            stations: geometry.centerline.stations().len(),
            length_m: geometry.centerline.length(),
            band: geometry.band.as_ref().and_then(|b| b.stats.clone()),
        },
        zone_assignment: zone_stats,
        consistency,
        outputs: outputs.into_iter().map(String::from).collect(),
    };
    iox::write_json(&manifest, &out(MANIFEST_JSON))?;
    info!(
        outdir = %inputs.outdir.display(),
        events = events.len(),
        drivers = manifest.counts.drivers,
        "pipeline finished"
    );
    Ok(manifest)
}
