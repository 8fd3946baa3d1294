//! Reference centerline: one clean lap resampled, smoothed and closed.

use std::collections::BTreeMap;

use model::{Centerline, Point2, TelemetrySample};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AnalysisError, Result, Stage};
use crate::geometry::{resample_by_distance, smooth_periodic, ResampleParams, SmoothingParams};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CenterlineParams {
    pub resample: ResampleParams,
    pub smoothing: SmoothingParams,
}

/// The lap to build from: `lap` when given, otherwise the vehicle's lap with
/// the most samples (lowest lap number on ties).
pub fn select_reference_lap(samples: &[TelemetrySample], vehicle: u32, lap: Option<u32>) -> Result<u32> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for s in samples.iter().filter(|s| s.vehicle_number == vehicle) {
        *counts.entry(s.lap).or_default() += 1;
    }
    if counts.is_empty() {
        return Err(AnalysisError::VehicleNotFound { stage: Stage::Centerline, vehicle });
    }
    match lap {
        Some(l) if counts.contains_key(&l) => Ok(l),
        Some(l) => Err(AnalysisError::Lap {
            stage: Stage::Centerline,
            vehicle,
            lap: l,
            reason: "lap not present in telemetry".into(),
        }),
        None => {
            let mut best: Option<(u32, usize)> = None;
            for (l, n) in counts {
                if best.map_or(true, |(_, bn)| n > bn) {
                    best = Some((l, n));
                }
            }
            best.map(|(l, _)| l).ok_or(AnalysisError::VehicleNotFound {
                stage: Stage::Centerline,
                vehicle,
            })
        }
    }
}

/// Raw positions of one lap in timestamp order.
pub fn lap_trace(samples: &[TelemetrySample], vehicle: u32, lap: u32) -> Vec<Point2> {
    let mut lap_samples: Vec<&TelemetrySample> = samples
        .iter()
        .filter(|s| s.vehicle_number == vehicle && s.lap == lap)
        .collect();
    lap_samples.sort_by_key(|s| s.timestamp);
    lap_samples.iter().map(|s| s.position()).collect()
}

/// Resample, smooth periodically and close a raw lap trace.
pub fn build_centerline(trace: &[Point2], params: &CenterlineParams) -> Result<Centerline> {
    let resampled = resample_by_distance(trace, &params.resample)?;
    if resampled.points.len() < 3 {
        return Err(AnalysisError::Degenerate {
            stage: Stage::Centerline,
            reason: format!(
                "{} raw points left {} stations after cleaning",
                trace.len(),
                resampled.points.len()
            ),
        });
    }
    let mut points = smooth_periodic(&resampled.points, &params.smoothing);
    if let Some(first) = points.first().copied() {
        points.push(first);
    }
    Ok(Centerline { points })
}

/// Select the reference lap and build its centerline, reporting the lap key on failure.
pub fn build_reference_centerline(
    samples: &[TelemetrySample],
    vehicle: u32,
    lap: Option<u32>,
    params: &CenterlineParams,
) -> Result<Centerline> {
    let lap = select_reference_lap(samples, vehicle, lap)?;
    let trace = lap_trace(samples, vehicle, lap);
    let centerline = build_centerline(&trace, params).map_err(|e| match e {
        AnalysisError::Degenerate { stage, reason } => AnalysisError::Lap { stage, vehicle, lap, reason },
        other => other,
    })?;
    info!(
        vehicle,
        lap,
        raw_points = trace.len(),
        stations = centerline.points.len(),
        length_m = centerline.length(),
        "built reference centerline"
    );
    Ok(centerline)
}
