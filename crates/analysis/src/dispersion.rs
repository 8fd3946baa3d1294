//! Per-driver brake point consistency.

use std::collections::BTreeMap;

use model::{BrakeOnsetEvent, DriverSummary, DriverZoneDispersion, ZoneCentroid};
use tracing::{debug, info};

use crate::stats::{mean, stddev};

/// Fewer events than this carry no spread information.
pub const MIN_ZONE_EVENTS: usize = 2;

fn group_by_zone(events: &[BrakeOnsetEvent]) -> BTreeMap<(u32, u32), Vec<&BrakeOnsetEvent>> {
    let mut groups: BTreeMap<(u32, u32), Vec<&BrakeOnsetEvent>> = BTreeMap::new();
    for e in events {
        if let Some(zone) = e.zone_id {
            groups.entry((e.vehicle_number, zone)).or_default().push(e);
        }
    }
    groups
}

/// Dispersion `sqrt(std_x² + std_y²)` per (vehicle, zone), population std.
///
/// Unassigned events are ignored and pairs with fewer than
/// [`MIN_ZONE_EVENTS`] events are dropped, not zero-filled.
pub fn zone_dispersion(events: &[BrakeOnsetEvent]) -> Vec<DriverZoneDispersion> {
    let mut out = Vec::new();
    for ((vehicle, zone), group) in group_by_zone(events) {
        if group.len() < MIN_ZONE_EVENTS {
            debug!(vehicle, zone, events = group.len(), "too few events for dispersion");
            continue;
        }
        let xs: Vec<f64> = group.iter().map(|e| e.x_meters).collect();
        let ys: Vec<f64> = group.iter().map(|e| e.y_meters).collect();
        let (Some(std_x), Some(std_y)) = (stddev(&xs), stddev(&ys)) else {
            continue;
        };
        out.push(DriverZoneDispersion {
            vehicle_number: vehicle,
            zone_id: zone,
            dispersion_meters: std_x.hypot(std_y),
            brake_count: group.len(),
            std_x,
            std_y,
        });
    }
    info!(rows = out.len(), "computed zone dispersion");
    out
}

/// Mean brake position per (vehicle, zone); single events are kept.
pub fn zone_centroids(events: &[BrakeOnsetEvent]) -> Vec<ZoneCentroid> {
    group_by_zone(events)
        .into_iter()
        .filter_map(|((vehicle, zone), group)| {
            let xs: Vec<f64> = group.iter().map(|e| e.x_meters).collect();
            let ys: Vec<f64> = group.iter().map(|e| e.y_meters).collect();
            Some(ZoneCentroid {
                vehicle_number: vehicle,
                zone_id: zone,
                centroid_x: mean(&xs)?,
                centroid_y: mean(&ys)?,
                brake_count: group.len(),
            })
        })
        .collect()
}

/// Unweighted mean of each vehicle's zone dispersions, with zone and event totals.
pub fn driver_summary(rows: &[DriverZoneDispersion]) -> Vec<DriverSummary> {
    let mut by_vehicle: BTreeMap<u32, Vec<&DriverZoneDispersion>> = BTreeMap::new();
    for r in rows {
        by_vehicle.entry(r.vehicle_number).or_default().push(r);
    }
    by_vehicle
        .into_iter()
        .filter_map(|(vehicle, zones)| {
            let values: Vec<f64> = zones.iter().map(|z| z.dispersion_meters).collect();
            Some(DriverSummary {
                vehicle_number: vehicle,
                avg_dispersion_meters: mean(&values)?,
                zone_count: zones.len(),
                total_brake_count: zones.iter().map(|z| z.brake_count).sum(),
                fastest_lap_time: None,
                fastest_lap_seconds: None,
            })
        })
        .collect()
}
