//! Brake onset detection: rising edges of "is braking" per (vehicle, lap).

use std::collections::BTreeMap;

use model::{BrakeOnsetEvent, BrakeType, TelemetrySample};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, Result};
use crate::stats::percentile;

/// Groups shorter than this are partial laps (pit entry, red flag) and are skipped.
pub const MIN_GROUP_SAMPLES: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionParams {
    /// Percentile of strictly positive pressures used as the onset threshold.
    pub threshold_percentile: f64,
    /// Fixed threshold in bar; overrides the percentile when set.
    pub threshold_bar: Option<f64>,
    /// Keep only laps whose raw path length lies in this range.
    pub lap_length_range_m: Option<(f64, f64)>,
    pub min_pressure: Option<f64>,
    pub max_pressure: Option<f64>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold_percentile: 5.0,
            threshold_bar: None,
            lap_length_range_m: Some((3500.0, 4000.0)),
            min_pressure: None,
            max_pressure: None,
        }
    }
}

/// Percentile of every strictly positive front or rear reading in the session.
pub fn pressure_threshold(samples: &[TelemetrySample], pct: f64) -> Result<f64> {
    let mut total = 0usize;
    let positive: Vec<f64> = samples
        .iter()
        .flat_map(|s| [s.pbrake_f, s.pbrake_r])
        .flatten()
        .inspect(|_| total += 1)
        .filter(|p| *p > 0.0)
        .collect();
    let threshold = percentile(&positive, pct).ok_or_else(|| {
        AnalysisError::NoBrakePressure(format!("no positive brake pressure among {total} readings"))
    })?;
    info!(
        percentile = pct,
        threshold_bar = threshold,
        readings = total,
        positive = positive.len(),
        "computed brake threshold"
    );
    Ok(threshold)
}

/// Combined pressure and leading channel for one sample; missing channels never win.
fn combined_pressure(s: &TelemetrySample) -> Option<(f64, BrakeType)> {
    let front = s.pbrake_f.filter(|p| !p.is_nan());
    let rear = s.pbrake_r.filter(|p| !p.is_nan());
    match (front, rear) {
        (None, None) => None,
        (Some(f), None) => Some((f, BrakeType::Front)),
        (None, Some(r)) => Some((r, BrakeType::Rear)),
        (Some(f), Some(r)) if f >= r => Some((f, BrakeType::Front)),
        (Some(_), Some(r)) => Some((r, BrakeType::Rear)),
    }
}

fn group_by_lap(samples: &[TelemetrySample]) -> BTreeMap<(u32, u32), Vec<&TelemetrySample>> {
    let mut groups: BTreeMap<(u32, u32), Vec<&TelemetrySample>> = BTreeMap::new();
    for s in samples {
        groups.entry((s.vehicle_number, s.lap)).or_default().push(s);
    }
    for g in groups.values_mut() {
        g.sort_by_key(|s| s.timestamp);
    }
    groups
}

/// Onset events of one time-ordered group. The first sample never counts as an edge.
fn onsets_in_group(group: &[&TelemetrySample], threshold: f64) -> Vec<BrakeOnsetEvent> {
    let mut out = Vec::new();
    let mut was_braking = false;
    for (i, s) in group.iter().enumerate() {
        let combined = combined_pressure(s);
        let braking = combined.map_or(false, |(p, _)| p >= threshold);
        if braking && !was_braking && i > 0 {
            if let Some((pressure, brake_type)) = combined {
                out.push(BrakeOnsetEvent {
                    vehicle_number: s.vehicle_number,
                    lap: s.lap,
                    timestamp: s.timestamp,
                    x_meters: s.x_meters,
                    y_meters: s.y_meters,
                    brake_pressure: pressure,
                    brake_type,
                    pbrake_f: s.pbrake_f,
                    pbrake_r: s.pbrake_r,
                    track_distance: None,
                    zone_id: None,
                    zone_offset_m: None,
                });
            }
        }
        was_braking = braking;
    }
    out
}

/// Rising-edge onset detection over every (vehicle, lap) group.
///
/// A sample is braking when `max(front, rear) >= threshold`. Groups with fewer
/// than [`MIN_GROUP_SAMPLES`] samples yield nothing.
pub fn detect_brake_onsets(samples: &[TelemetrySample], threshold: f64) -> Vec<BrakeOnsetEvent> {
    let groups = group_by_lap(samples);
    let mut events = Vec::new();
    let mut skipped = 0usize;
    for ((vehicle, lap), group) in &groups {
        if group.len() < MIN_GROUP_SAMPLES {
            debug!(vehicle, lap, samples = group.len(), "skipping short lap");
            skipped += 1;
            continue;
        }
        events.extend(onsets_in_group(group, threshold));
    }

    if events.is_empty() {
        warn!(threshold_bar = threshold, groups = groups.len(), "no brake events detected");
        return events;
    }
    let front = events.iter().filter(|e| e.brake_type == BrakeType::Front).count();
    info!(
        events = events.len(),
        groups = groups.len(),
        skipped,
        front_led = front,
        rear_led = events.len() - front,
        "detected brake onsets"
    );
    events
}

/// Keep events whose pressure lies inside the inclusive bounds.
pub fn filter_by_pressure(events: Vec<BrakeOnsetEvent>, min: Option<f64>, max: Option<f64>) -> Vec<BrakeOnsetEvent> {
    let before = events.len();
    let kept: Vec<BrakeOnsetEvent> = events
        .into_iter()
        .filter(|e| min.map_or(true, |m| e.brake_pressure >= m))
        .filter(|e| max.map_or(true, |m| e.brake_pressure <= m))
        .collect();
    if kept.len() != before {
        debug!(before, after = kept.len(), ?min, ?max, "filtered events by pressure");
    }
    kept
}

/// Raw polyline length of every (vehicle, lap) group in timestamp order.
pub fn lap_path_lengths(samples: &[TelemetrySample]) -> BTreeMap<(u32, u32), f64> {
    group_by_lap(samples)
        .into_iter()
        .map(|(key, group)| {
            let len = group
                .windows(2)
                .map(|w| w[0].position().distance(&w[1].position()))
                .sum::<f64>();
            (key, len)
        })
        .collect()
}

/// Keep events from laps whose path length lies in `[min_m, max_m]`.
pub fn retain_racing_laps(
    events: Vec<BrakeOnsetEvent>,
    lengths: &BTreeMap<(u32, u32), f64>,
    min_m: f64,
    max_m: f64,
) -> Vec<BrakeOnsetEvent> {
    let racing = lengths.values().filter(|l| (min_m..=max_m).contains(*l)).count();
    let before = events.len();
    let kept: Vec<BrakeOnsetEvent> = events
        .into_iter()
        .filter(|e| {
            lengths
                .get(&(e.vehicle_number, e.lap))
                .map_or(false, |l| (min_m..=max_m).contains(l))
        })
        .collect();
    info!(laps = lengths.len(), racing_laps = racing, before, after = kept.len(), "filtered to racing laps");
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{pressure_trace, sample};

    #[test]
    fn test_counts_rising_edges_at_right_samples() {
        let trace = pressure_trace(7, 1, &[0.0, 1.0, 20.0, 30.0, 2.0, 0.0, 25.0, 5.0, 40.0, 40.0]);
        let events = detect_brake_onsets(&trace, 10.0);
        assert_eq!(events.len(), 3);
        let xs: Vec<f64> = events.iter().map(|e| e.x_meters).collect();
        assert_eq!(xs, vec![2.0, 6.0, 8.0]);
        assert_eq!(events[0].brake_pressure, 20.0);
        assert_eq!(events[0].brake_type, BrakeType::Front);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let trace = pressure_trace(7, 1, &[0.0, 0.0, 10.0, 0.0, 0.0]);
        assert_eq!(detect_brake_onsets(&trace, 10.0).len(), 1);
        assert_eq!(detect_brake_onsets(&trace, 10.000_1).len(), 0);
    }

    #[test]
    fn test_first_sample_is_never_an_edge() {
        let trace = pressure_trace(7, 1, &[50.0, 50.0, 0.0, 0.0, 0.0]);
        assert!(detect_brake_onsets(&trace, 10.0).is_empty());
    }

    #[test]
    fn test_short_and_empty_groups_yield_nothing() {
        let trace = pressure_trace(7, 1, &[0.0, 50.0, 0.0, 50.0]);
        assert!(detect_brake_onsets(&trace, 10.0).is_empty());
        assert!(detect_brake_onsets(&[], 10.0).is_empty());
    }

    #[test]
    fn test_edges_do_not_leak_across_laps() {
        let mut trace = pressure_trace(7, 1, &[0.0, 0.0, 0.0, 0.0, 50.0]);
        // lap 2 starts already braking: its first sample is not an edge
        trace.extend(pressure_trace(7, 2, &[50.0, 50.0, 0.0, 0.0, 0.0]));
        let events = detect_brake_onsets(&trace, 10.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].lap, 1);
    }

    #[test]
    fn test_unsorted_input_is_ordered_by_timestamp() {
        let mut trace = pressure_trace(7, 1, &[0.0, 0.0, 30.0, 30.0, 0.0]);
        trace.reverse();
        let events = detect_brake_onsets(&trace, 10.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].x_meters, 2.0);
    }

    #[test]
    fn test_rear_channel_alone_can_brake() {
        let mut trace = pressure_trace(3, 1, &[0.0; 6]);
        for s in trace.iter_mut() {
            s.pbrake_f = None;
        }
        trace[3].pbrake_r = Some(15.0);
        let events = detect_brake_onsets(&trace, 10.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].brake_type, BrakeType::Rear);
        assert_eq!(events[0].brake_pressure, 15.0);
    }

    #[test]
    fn test_brake_type_picks_larger_channel() {
        let mut trace = pressure_trace(3, 1, &[0.0, 0.0, 12.0, 0.0, 0.0]);
        trace[2].pbrake_r = Some(30.0);
        let events = detect_brake_onsets(&trace, 10.0);
        assert_eq!(events[0].brake_type, BrakeType::Rear);
        assert_eq!(events[0].brake_pressure, 30.0);
    }

    #[test]
    fn test_threshold_from_positive_pressures() {
        let mut trace = pressure_trace(1, 1, &[0.0, 1.0, 2.0, 0.0]);
        trace[0].pbrake_r = Some(3.0);
        trace[3].pbrake_r = Some(4.0);
        let t = pressure_threshold(&trace, 5.0).unwrap_or(f64::NAN);
        assert!((t - 1.15).abs() < 1e-12);
        let none = pressure_trace(1, 1, &[0.0, 0.0]);
        assert!(matches!(pressure_threshold(&none, 5.0), Err(AnalysisError::NoBrakePressure(_))));
    }

    #[test]
    fn test_pressure_filter_bounds_inclusive() {
        let trace = pressure_trace(1, 1, &[0.0, 20.0, 0.0, 30.0, 0.0, 40.0]);
        let events = detect_brake_onsets(&trace, 10.0);
        let kept = filter_by_pressure(events, Some(20.0), Some(30.0));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_racing_lap_filter() {
        let mut s: Vec<TelemetrySample> = (0..5).map(|i| sample(1, 1, i, i as f64 * 10.0, 0.0)).collect();
        s.extend((0..5).map(|i| sample(1, 2, i, i as f64 * 1.0, 0.0)));
        let lengths = lap_path_lengths(&s);
        assert_eq!(lengths.get(&(1, 1)).copied(), Some(40.0));
        assert_eq!(lengths.get(&(1, 2)).copied(), Some(4.0));

        let mut trace = pressure_trace(1, 1, &[0.0, 20.0, 0.0, 0.0, 0.0]);
        trace.extend(pressure_trace(1, 2, &[0.0, 20.0, 0.0, 0.0, 0.0]));
        let events = detect_brake_onsets(&trace, 10.0);
        let kept = retain_racing_laps(events, &lengths, 30.0, 50.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].lap, 1);
    }
}
