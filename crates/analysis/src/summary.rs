//! Lap-time merge and the lap-time vs consistency sanity report.

use std::collections::HashMap;

use model::{DriverSummary, LapResult};
use serde::Serialize;
use tracing::{info, warn};

use crate::stats::pearson;

/// `"M:SS.mmm"` to seconds, split on the first colon. Anything else is `None`.
pub fn parse_lap_time(raw: &str) -> Option<f64> {
    let (minutes, seconds) = raw.trim().split_once(':')?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(f64::from(minutes) * 60.0 + seconds)
}

/// Left-join fastest lap times by vehicle number; the first result row per vehicle wins.
pub fn merge_lap_times(summary: Vec<DriverSummary>, results: &[LapResult]) -> Vec<DriverSummary> {
    let mut by_vehicle: HashMap<u32, &LapResult> = HashMap::new();
    for r in results {
        by_vehicle.entry(r.vehicle_number).or_insert(r);
    }
    let merged: Vec<DriverSummary> = summary
        .into_iter()
        .map(|mut s| {
            if let Some(r) = by_vehicle.get(&s.vehicle_number) {
                s.fastest_lap_time = r.fastest_lap_time.clone();
                s.fastest_lap_seconds = r.fastest_lap_time.as_deref().and_then(parse_lap_time);
            }
            s
        })
        .collect();
    let timed = merged.iter().filter(|s| s.fastest_lap_seconds.is_some()).count();
    info!(drivers = merged.len(), with_lap_time = timed, "merged lap times");
    merged
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DriverRef {
    pub vehicle_number: u32,
    pub fastest_lap_seconds: f64,
    pub avg_dispersion_meters: f64,
}

/// Whether faster drivers brake more consistently. Informational only.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ConsistencyCheck {
    pub drivers_with_time: usize,
    /// Pearson correlation of lap seconds against mean dispersion.
    pub correlation: Option<f64>,
    pub fastest: Option<DriverRef>,
    pub slowest: Option<DriverRef>,
    pub fastest_more_consistent: Option<bool>,
}

impl ConsistencyCheck {
    /// Positive correlation and a tighter fastest driver.
    pub fn holds(&self) -> bool {
        self.correlation.map_or(false, |c| c > 0.0) && self.fastest_more_consistent == Some(true)
    }
}

pub fn consistency_check(summary: &[DriverSummary]) -> ConsistencyCheck {
    let mut timed: Vec<DriverRef> = summary
        .iter()
        .filter_map(|s| {
            Some(DriverRef {
                vehicle_number: s.vehicle_number,
                fastest_lap_seconds: s.fastest_lap_seconds?,
                avg_dispersion_meters: s.avg_dispersion_meters,
            })
        })
        .collect();
    timed.sort_by(|a, b| a.fastest_lap_seconds.total_cmp(&b.fastest_lap_seconds));

    let secs: Vec<f64> = timed.iter().map(|d| d.fastest_lap_seconds).collect();
    let disp: Vec<f64> = timed.iter().map(|d| d.avg_dispersion_meters).collect();
    let fastest = timed.first().cloned();
    let slowest = timed.last().cloned();
    let fastest_more_consistent = match (&fastest, &slowest) {
        (Some(f), Some(s)) if timed.len() > 1 => Some(f.avg_dispersion_meters < s.avg_dispersion_meters),
        _ => None,
    };
    let check = ConsistencyCheck {
        drivers_with_time: timed.len(),
        correlation: pearson(&secs, &disp),
        fastest,
        slowest,
        fastest_more_consistent,
    };

    if check.drivers_with_time == 0 {
        warn!("no drivers with a parseable lap time, consistency check skipped");
    } else if check.holds() {
        info!(correlation = ?check.correlation, "faster drivers brake more consistently");
    } else {
        warn!(
            correlation = ?check.correlation,
            fastest_more_consistent = ?check.fastest_more_consistent,
            "lap time vs dispersion relation not as expected"
        );
    }
    check
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(vehicle: u32, disp: f64) -> DriverSummary {
        DriverSummary {
            vehicle_number: vehicle,
            avg_dispersion_meters: disp,
            zone_count: 1,
            total_brake_count: 2,
            fastest_lap_time: None,
            fastest_lap_seconds: None,
        }
    }

    fn result(vehicle: u32, time: Option<&str>) -> LapResult {
        LapResult { vehicle_number: vehicle, fastest_lap_time: time.map(String::from) }
    }

    #[test]
    fn test_parse_lap_time() {
        let t = parse_lap_time("1:37.428").unwrap_or(f64::NAN);
        assert!((t - 97.428).abs() < 1e-9);
        assert_eq!(parse_lap_time("0:59.5"), Some(59.5));
        assert_eq!(parse_lap_time("DNF"), None);
        assert_eq!(parse_lap_time(""), None);
        assert_eq!(parse_lap_time("1:xx"), None);
        assert_eq!(parse_lap_time("1:02:03"), None);
    }

    #[test]
    fn test_merge_keeps_unmatched_and_unparseable() {
        let s = vec![summary(13, 2.0), summary(7, 3.0), summary(99, 1.0)];
        let results = vec![result(13, Some("1:37.428")), result(7, Some("DNF")), result(13, Some("2:00.000"))];
        let m = merge_lap_times(s, &results);
        assert_eq!(m.len(), 3);
        assert_eq!(m[0].fastest_lap_time.as_deref(), Some("1:37.428"));
        assert!((m[0].fastest_lap_seconds.unwrap_or(0.0) - 97.428).abs() < 1e-9);
        assert_eq!(m[1].fastest_lap_time.as_deref(), Some("DNF"));
        assert_eq!(m[1].fastest_lap_seconds, None);
        assert_eq!(m[2].fastest_lap_time, None);
    }

    #[test]
    fn test_consistency_check_reports_sign() {
        let mut s = vec![summary(1, 1.0), summary(2, 2.0), summary(3, 3.5), summary(4, 9.0)];
        for (i, d) in s.iter_mut().enumerate() {
            d.fastest_lap_seconds = Some(90.0 + i as f64);
        }
        s[3].fastest_lap_seconds = None;
        let c = consistency_check(&s);
        assert_eq!(c.drivers_with_time, 3);
        assert!(c.holds());
        assert_eq!(c.fastest.as_ref().map(|d| d.vehicle_number), Some(1));
        assert_eq!(c.slowest.as_ref().map(|d| d.vehicle_number), Some(3));

        s[0].avg_dispersion_meters = 10.0;
        let c = consistency_check(&s);
        assert!(!c.holds());
        assert_eq!(c.fastest_more_consistent, Some(false));
    }

    #[test]
    fn test_consistency_check_without_times() {
        let c = consistency_check(&[summary(1, 1.0)]);
        assert_eq!(c.drivers_with_time, 0);
        assert_eq!(c.correlation, None);
        assert!(!c.holds());
    }
}
