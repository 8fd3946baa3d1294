use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, path::Path};
use tracing::{debug, info, warn};

use analysis::config::PipelineConfig;
use model::*;

mod store;
pub use store::FileStore;

#[derive(Deserialize)]
struct TelemetryRow {
    vehicle_number: u32,
    lap: u32,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    pbrake_f: Option<f64>,
    #[serde(default)]
    pbrake_r: Option<f64>,
    #[serde(default)]
    x_meters: Option<f64>,
    #[serde(default)]
    y_meters: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
}

impl TelemetryRow {
    fn into_sample(self) -> Option<TelemetrySample> {
        let x = self.x_meters.filter(|v| v.is_finite())?;
        let y = self.y_meters.filter(|v| v.is_finite())?;
        Some(TelemetrySample {
            vehicle_number: self.vehicle_number,
            lap: self.lap,
            timestamp: self.timestamp,
            pbrake_f: self.pbrake_f,
            pbrake_r: self.pbrake_r,
            x_meters: x,
            y_meters: y,
            speed: self.speed,
        })
    }
}

/// Wide telemetry table, sorted by (vehicle, lap, timestamp).
///
/// Rows that fail to parse or lack a finite position are dropped; of several
/// rows sharing a (vehicle, lap, timestamp) key the first one read is kept.
pub fn read_telemetry_csv(path: &Path) -> Result<Vec<TelemetrySample>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening telemetry {}", path.display()))?;
    let mut samples = Vec::new();
    let (mut bad_rows, mut no_position) = (0usize, 0usize);
    for (i, rec) in rdr.deserialize::<TelemetryRow>().enumerate() {
        match rec {
            Ok(row) => match row.into_sample() {
                Some(s) => samples.push(s),
                None => no_position += 1,
            },
            Err(e) => {
                if bad_rows == 0 {
                    warn!(row = i + 1, error = %e, "skipping unparseable telemetry row");
                }
                bad_rows += 1;
            }
        }
    }

    // stable sort keeps file order within equal keys, so dedup keeps the first
    samples.sort_by_key(|s| (s.vehicle_number, s.lap, s.timestamp));
    let before = samples.len();
    samples.dedup_by_key(|s| (s.vehicle_number, s.lap, s.timestamp));
    let duplicates = before - samples.len();

    if bad_rows > 0 || no_position > 0 || duplicates > 0 {
        warn!(bad_rows, no_position, duplicates, "dropped telemetry rows");
    }
    info!(path = %path.display(), samples = samples.len(), "loaded telemetry");
    Ok(samples)
}

/// Ordered zone list; order is significant for overlapping zones.
pub fn read_zones_json(path: &Path) -> Result<Vec<ZoneDefinition>> {
    let f = File::open(path).with_context(|| format!("opening zones {}", path.display()))?;
    let zones: Vec<ZoneDefinition> = serde_json::from_reader(std::io::BufReader::new(f))
        .with_context(|| format!("parsing zones {}", path.display()))?;
    for w in zones.windows(2) {
        if w[1].start_distance_m < w[0].end_distance_m {
            debug!(first = w[0].zone_id, second = w[1].zone_id, "zones overlap, first listed wins");
        }
    }
    info!(zones = zones.len(), "loaded zone definitions");
    Ok(zones)
}

pub fn read_splits_json(path: &Path) -> Result<Vec<ZoneSplit>> {
    let f = File::open(path).with_context(|| format!("opening zone splits {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(f))
        .with_context(|| format!("parsing zone splits {}", path.display()))
}

fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

/// Results table with `NUMBER`/`FL_TIME` or `vehicle_number`/`fastest_lap_time`
/// columns, `;` or `,` delimited.
pub fn read_lap_results(path: &Path) -> Result<Vec<LapResult>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading lap results {}", path.display()))?;
    let header_line = raw.lines().next().unwrap_or_default();
    let delimiter = if header_line.contains(';') { b';' } else { b',' };

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());
    let headers = rdr.headers().context("reading lap results header")?.clone();
    let Some(vehicle_col) = column(&headers, &["NUMBER", "vehicle_number"]) else {
        bail!("lap results {} have no NUMBER or vehicle_number column", path.display());
    };
    let time_col = column(&headers, &["FL_TIME", "fastest_lap_time"]);
    if time_col.is_none() {
        warn!(path = %path.display(), "lap results have no fastest lap column, lap times will be missing");
    }

    let mut out = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("lap results row {}", i + 1))?;
        let Some(vehicle) = rec.get(vehicle_col).and_then(|v| v.parse::<u32>().ok()) else {
            warn!(row = i + 1, value = rec.get(vehicle_col).unwrap_or_default(), "skipping result row without vehicle number");
            continue;
        };
        let time = time_col
            .and_then(|c| rec.get(c))
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        out.push(LapResult { vehicle_number: vehicle, fastest_lap_time: time });
    }
    info!(results = out.len(), "loaded lap results");
    Ok(out)
}

/// Pipeline tuning from JSON. No path, or a path that does not exist, gives defaults.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        None => PipelineConfig::default(),
        Some(p) if !p.exists() => {
            warn!(path = %p.display(), "config file not found, using defaults");
            PipelineConfig::default()
        }
        Some(p) => {
            let f = File::open(p).with_context(|| format!("opening config {}", p.display()))?;
            serde_json::from_reader(std::io::BufReader::new(f))
                .with_context(|| format!("parsing config {}", p.display()))?
        }
    };
    config.validate()?;
    Ok(config)
}

fn write_rows<T: Serialize>(rows: &[T], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for r in rows {
        w.serialize(r)?;
    }
    w.flush()?;
    debug!(path = %path.display(), rows = rows.len(), "wrote csv");
    Ok(())
}

pub fn write_brake_events(events: &[BrakeOnsetEvent], path: &Path) -> Result<()> {
    write_rows(events, path)
}

pub fn write_dispersion(rows: &[DriverZoneDispersion], path: &Path) -> Result<()> {
    write_rows(rows, path)
}

pub fn write_centroids(rows: &[ZoneCentroid], path: &Path) -> Result<()> {
    write_rows(rows, path)
}

pub fn write_driver_summary(rows: &[DriverSummary], path: &Path) -> Result<()> {
    write_rows(rows, path)
}

/// Closed centerline as `x_meters,y_meters` rows.
pub fn write_centerline_csv(centerline: &Centerline, path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    w.write_record(["x_meters", "y_meters"])?;
    for p in &centerline.points {
        w.write_record([p.x.to_string(), p.y.to_string()])?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_centerline_csv(path: &Path) -> Result<Centerline> {
    #[derive(Deserialize)]
    struct Row {
        x_meters: f64,
        y_meters: f64,
    }
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("opening centerline {}", path.display()))?;
    let mut points = Vec::new();
    for rec in rdr.deserialize() {
        let r: Row = rec.with_context(|| format!("parsing centerline {}", path.display()))?;
        points.push(Point2::new(r.x_meters, r.y_meters));
    }
    Ok(Centerline { points })
}

/// One row per station: left and right edge points.
pub fn write_band_csv(band: &TrackBand, path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    w.write_record(["station", "left_x", "left_y", "right_x", "right_y"])?;
    for (i, (l, r)) in band.left.iter().zip(&band.right).enumerate() {
        w.write_record([i.to_string(), l.x.to_string(), l.y.to_string(), r.x.to_string(), r.y.to_string()])?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = std::io::BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, value)?;
    writeln!(w)?;
    w.flush()?;
    Ok(())
}
