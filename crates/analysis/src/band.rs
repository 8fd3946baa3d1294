//! Track-surface band: left/right edges offset along the centerline normal.

use model::{BandStats, Centerline, Point2, TelemetrySample, TrackBand};
use rstar::{primitives::GeomWithData, RTree};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::geometry::{savgol_filter, tangents_normals};
use crate::stats::percentile;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BandPolicy {
    Fixed { width_m: f64 },
    DataDriven(BandParams),
}

impl Default for BandPolicy {
    fn default() -> Self {
        BandPolicy::DataDriven(BandParams::default())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BandParams {
    /// Fraction of telemetry positions used for the width estimate.
    pub sample_fraction: f64,
    /// Per-side quantile of lateral offsets, in [0, 1].
    pub quantile: f64,
    pub min_width_m: f64,
    pub max_width_m: f64,
    /// Slower samples (pit lane, spins) are ignored; missing speed counts as fast.
    pub min_speed: f64,
    pub max_smoothing_window: usize,
    pub seed: u64,
}

impl Default for BandParams {
    fn default() -> Self {
        Self {
            sample_fraction: 0.25,
            quantile: 0.90,
            min_width_m: 6.0,
            max_width_m: 16.0,
            min_speed: 30.0,
            max_smoothing_window: 51,
            seed: 42,
        }
    }
}

pub const DEFAULT_FIXED_WIDTH_M: f64 = 12.0;

pub fn build_band(centerline: &Centerline, samples: &[TelemetrySample], policy: &BandPolicy) -> TrackBand {
    match policy {
        BandPolicy::Fixed { width_m } => fixed_width_band(centerline, *width_m),
        BandPolicy::DataDriven(params) => data_driven_band(centerline, samples, params),
    }
}

fn offset_edges(stations: &[Point2], normals: &[Point2], left: &[f64], right: &[f64]) -> (Vec<Point2>, Vec<Point2>) {
    let mut l = Vec::with_capacity(stations.len());
    let mut r = Vec::with_capacity(stations.len());
    for (i, (s, n)) in stations.iter().zip(normals).enumerate() {
        l.push(Point2::new(s.x + left[i] * n.x, s.y + left[i] * n.y));
        r.push(Point2::new(s.x - right[i] * n.x, s.y - right[i] * n.y));
    }
    (l, r)
}

/// Constant half-width on both sides.
pub fn fixed_width_band(centerline: &Centerline, width_m: f64) -> TrackBand {
    let stations = centerline.stations();
    let (_, normals) = tangents_normals(stations, true);
    let half = vec![width_m / 2.0; stations.len()];
    let (left, right) = offset_edges(stations, &normals, &half, &half);
    TrackBand { left, right, stats: None }
}

/// Linear interpolation over missing entries, ends held at the nearest known value.
fn fill_gaps(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let (&(first_i, first_v), &(last_i, last_v)) = (known.first()?, known.last()?);
    let mut out = Vec::with_capacity(values.len());
    let mut k = 0usize;
    for i in 0..values.len() {
        let v = if i <= first_i {
            first_v
        } else if i >= last_i {
            last_v
        } else {
            while known[k + 1].0 < i {
                k += 1;
            }
            let (i0, v0) = known[k];
            let (i1, v1) = known[k + 1];
            v0 + (v1 - v0) * ((i - i0) as f64) / ((i1 - i0) as f64)
        };
        out.push(v);
    }
    Some(out)
}

fn smooth_profile(values: Vec<f64>, max_window: usize) -> Vec<f64> {
    let window = max_window.min((values.len() / 3) | 1) | 1;
    match savgol_filter(&values, window, 3) {
        Some(s) => s,
        None => values,
    }
}

/// Width estimated from where the field actually drove.
///
/// A seeded random subset of all telemetry positions is projected onto the
/// nearest station; the signed offset along the local normal feeds a per-side
/// high quantile. Stations without data are interpolated, total width is
/// clamped to `[min_width_m, max_width_m]` keeping each side's share, and the
/// half-width profiles are smoothed.
pub fn data_driven_band(centerline: &Centerline, samples: &[TelemetrySample], params: &BandParams) -> TrackBand {
    let stations = centerline.stations();
    let n = stations.len();
    if n == 0 {
        return TrackBand { left: Vec::new(), right: Vec::new(), stats: None };
    }
    let (_, normals) = tangents_normals(stations, true);

    let tree = RTree::bulk_load(
        stations
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.x, p.y], i))
            .collect(),
    );

    let mut rng = fastrand::Rng::with_seed(params.seed);
    let mut left_offsets: Vec<Vec<f64>> = vec![Vec::new(); n];
    let mut right_offsets: Vec<Vec<f64>> = vec![Vec::new(); n];
    let mut used = 0usize;
    for s in samples {
        if !(s.x_meters.is_finite() && s.y_meters.is_finite()) {
            continue;
        }
        if params.sample_fraction < 1.0 && rng.f64() >= params.sample_fraction {
            continue;
        }
        if s.speed.unwrap_or(f64::INFINITY) <= params.min_speed {
            continue;
        }
        let Some(nearest) = tree.nearest_neighbor(&[s.x_meters, s.y_meters]) else {
            continue;
        };
        let i = nearest.data;
        let st = stations[i];
        let d = (s.x_meters - st.x) * normals[i].x + (s.y_meters - st.y) * normals[i].y;
        if d > 0.0 {
            left_offsets[i].push(d);
        } else if d < 0.0 {
            right_offsets[i].push(-d);
        }
        used += 1;
    }

    let q = params.quantile.clamp(0.0, 1.0) * 100.0;
    let per_station = |offsets: &[Vec<f64>]| -> Vec<Option<f64>> {
        offsets.iter().map(|o| percentile(o, q)).collect()
    };
    let fallback_half = params.min_width_m / 2.0;
    let wl = fill_gaps(&per_station(&left_offsets)).unwrap_or_else(|| {
        warn!("no left-side offsets, using minimum width");
        vec![fallback_half; n]
    });
    let wr = fill_gaps(&per_station(&right_offsets)).unwrap_or_else(|| {
        warn!("no right-side offsets, using minimum width");
        vec![fallback_half; n]
    });

    let mut total = Vec::with_capacity(n);
    let mut left = Vec::with_capacity(n);
    let mut right = Vec::with_capacity(n);
    for i in 0..n {
        let sum = wl[i] + wr[i];
        let ratio = if sum > 0.0 { wl[i] / sum } else { 0.5 };
        let w = sum.clamp(params.min_width_m, params.max_width_m);
        total.push(w);
        left.push(ratio * w);
        right.push((1.0 - ratio) * w);
    }
    let left = smooth_profile(left, params.max_smoothing_window);
    let right = smooth_profile(right, params.max_smoothing_window);
    let (left_edge, right_edge) = offset_edges(stations, &normals, &left, &right);

    let pct = |p: f64| percentile(&total, p).unwrap_or(f64::NAN);
    let stats = BandStats {
        width_p05: pct(5.0),
        width_p50: pct(50.0),
        width_p95: pct(95.0),
        min_width: total.iter().copied().fold(f64::INFINITY, f64::min),
        max_width: total.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        stations: n,
        samples_used: used,
    };
    debug!(samples = samples.len(), used, "projected telemetry onto centerline");
    info!(
        p05 = stats.width_p05,
        p50 = stats.width_p50,
        p95 = stats.width_p95,
        "built data-driven track band"
    );

    TrackBand { left: left_edge, right: right_edge, stats: Some(stats) }
}
