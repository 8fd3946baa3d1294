//! Zone assignment: centerline projection, interval lookup, double-apex splits.

use std::collections::{BTreeMap, HashMap};

use model::{BBox, BrakeOnsetEvent, Centerline, Point2, ZoneBounds, ZoneDefinition, ZoneSplit};
use serde::Serialize;
use tracing::{debug, info};

use crate::geometry::project_to_polyline;

/// First zone, in definition order, whose closed interval holds `distance`.
pub fn classify(distance: f64, zones: &[ZoneDefinition]) -> Option<&ZoneDefinition> {
    zones.iter().find(|z| z.contains(distance))
}

/// Project every event onto the centerline and label it with its zone.
///
/// Every returned event carries a `track_distance`; events outside all zones
/// keep `zone_id = None`. `zone_offset_m` is the distance past the zone start.
pub fn assign_zones(
    events: &[BrakeOnsetEvent],
    centerline: &Centerline,
    zones: &[ZoneDefinition],
) -> Vec<BrakeOnsetEvent> {
    let positions: Vec<Point2> = events.iter().map(|e| e.position()).collect();
    let distances = project_to_polyline(&centerline.points, &positions);

    let out: Vec<BrakeOnsetEvent> = events
        .iter()
        .zip(distances)
        .map(|(e, d)| {
            let zone = classify(d, zones);
            BrakeOnsetEvent {
                track_distance: Some(d),
                zone_id: zone.map(|z| z.zone_id),
                zone_offset_m: zone.map(|z| d - z.start_distance_m),
                ..e.clone()
            }
        })
        .collect();

    let stats = assignment_stats(&out);
    info!(
        total = stats.total,
        in_zone = stats.in_zone,
        unassigned = stats.unassigned,
        "assigned brake events to zones"
    );
    for (zone, count) in &stats.per_zone {
        debug!(zone, count, "zone event count");
    }
    out
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ZoneAssignmentStats {
    pub total: usize,
    pub in_zone: usize,
    pub unassigned: usize,
    pub per_zone: BTreeMap<u32, usize>,
}

pub fn assignment_stats(events: &[BrakeOnsetEvent]) -> ZoneAssignmentStats {
    let mut stats = ZoneAssignmentStats { total: events.len(), ..Default::default() };
    for e in events {
        match e.zone_id {
            Some(z) => {
                stats.in_zone += 1;
                *stats.per_zone.entry(z).or_default() += 1;
            }
            None => stats.unassigned += 1,
        }
    }
    stats
}

/// Relabel double-apex zones into their two configured halves.
///
/// Within a split zone, events whose zone offset is below `split_distance_m`
/// take `before_id`, the rest `after_id`. Each (vehicle, half) then has its
/// offsets re-zeroed at its own minimum. Zones absent from `splits` and events
/// without an offset are left alone.
pub fn split_zones(mut events: Vec<BrakeOnsetEvent>, splits: &[ZoneSplit]) -> Vec<BrakeOnsetEvent> {
    if splits.is_empty() {
        return events;
    }
    let table: HashMap<u32, &ZoneSplit> = splits.iter().map(|s| (s.zone_id, s)).collect();
    let mut halves: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();

    for (i, e) in events.iter_mut().enumerate() {
        let Some(split) = e.zone_id.and_then(|z| table.get(&z)) else {
            continue;
        };
        let Some(offset) = e.zone_offset_m else {
            debug!(vehicle = e.vehicle_number, zone = split.zone_id, "event without zone offset, not split");
            continue;
        };
        let new_id = if offset < split.split_distance_m { split.before_id } else { split.after_id };
        e.zone_id = Some(new_id);
        halves.entry((e.vehicle_number, new_id)).or_default().push(i);
    }

    for ((vehicle, zone), idxs) in &halves {
        let min = idxs
            .iter()
            .filter_map(|i| events[*i].zone_offset_m)
            .fold(f64::INFINITY, f64::min);
        for i in idxs {
            if let Some(off) = events[*i].zone_offset_m.as_mut() {
                *off -= min;
            }
        }
        debug!(vehicle, zone, events = idxs.len(), "split zone half");
    }
    events
}

/// Padded bounding box of each zone's member events, ordered by zone id.
pub fn zone_bounds(events: &[BrakeOnsetEvent], padding_m: f64) -> Vec<ZoneBounds> {
    let mut members: BTreeMap<u32, Vec<Point2>> = BTreeMap::new();
    for e in events {
        if let Some(z) = e.zone_id {
            members.entry(z).or_default().push(e.position());
        }
    }
    members
        .into_iter()
        .filter_map(|(zone_id, pts)| {
            let bbox: BBox = BBox::of(&pts)?.padded(padding_m);
            Some(ZoneBounds { zone_id, bbox, center: bbox.center() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{event, zoned};

    fn zones() -> Vec<ZoneDefinition> {
        vec![
            ZoneDefinition { zone_id: 1, start_distance_m: 0.0, end_distance_m: 10.0 },
            ZoneDefinition { zone_id: 2, start_distance_m: 5.0, end_distance_m: 15.0 },
        ]
    }

    fn straight() -> Centerline {
        Centerline { points: (0..=30).map(|i| Point2::new(i as f64, 0.0)).collect() }
    }

    #[test]
    fn test_first_listed_zone_wins_overlap() {
        assert_eq!(classify(7.0, &zones()).map(|z| z.zone_id), Some(1));
        assert_eq!(classify(12.0, &zones()).map(|z| z.zone_id), Some(2));
        assert_eq!(classify(15.0, &zones()).map(|z| z.zone_id), Some(2));
        assert!(classify(20.0, &zones()).is_none());
    }

    #[test]
    fn test_assign_is_total_and_pure() {
        let events = vec![event(1, 7.0, 2.0), event(1, 20.0, -1.0)];
        let defs = zones();
        let out = assign_zones(&events, &straight(), &defs);
        assert_eq!(defs, zones());
        assert_eq!(events[0].track_distance, None);
        assert_eq!(out[0].track_distance, Some(7.0));
        assert_eq!(out[0].zone_id, Some(1));
        assert_eq!(out[0].zone_offset_m, Some(7.0));
        assert_eq!(out[1].track_distance, Some(20.0));
        assert_eq!(out[1].zone_id, None);
        assert_eq!(out[1].zone_offset_m, None);
    }

    #[test]
    fn test_assignment_stats() {
        let events = vec![zoned(1, 3, 0.0, 0.0), zoned(2, 3, 0.0, 0.0), event(1, 0.0, 0.0)];
        let s = assignment_stats(&events);
        assert_eq!((s.total, s.in_zone, s.unassigned), (3, 2, 1));
        assert_eq!(s.per_zone.get(&3), Some(&2));
    }

    #[test]
    fn test_split_relabels_and_rezeroes() {
        let mk = |vehicle, offset| BrakeOnsetEvent {
            zone_offset_m: Some(offset),
            ..zoned(vehicle, 4, 0.0, 0.0)
        };
        let events = vec![mk(1, 3.0), mk(1, 5.0), mk(1, 42.0), mk(1, 55.0), mk(2, 60.0), zoned(1, 5, 0.0, 0.0)];
        let splits = vec![ZoneSplit { zone_id: 4, before_id: 4, after_id: 9, split_distance_m: 40.0 }];
        let out = split_zones(events, &splits);
        let ids: Vec<Option<u32>> = out.iter().map(|e| e.zone_id).collect();
        assert_eq!(ids, vec![Some(4), Some(4), Some(9), Some(9), Some(9), Some(5)]);
        let offs: Vec<Option<f64>> = out.iter().map(|e| e.zone_offset_m).collect();
        assert_eq!(offs, vec![Some(0.0), Some(2.0), Some(0.0), Some(13.0), Some(0.0), None]);
    }

    #[test]
    fn test_split_boundary_goes_after() {
        let e = BrakeOnsetEvent { zone_offset_m: Some(40.0), ..zoned(1, 6, 0.0, 0.0) };
        let splits = vec![ZoneSplit { zone_id: 6, before_id: 6, after_id: 10, split_distance_m: 40.0 }];
        assert_eq!(split_zones(vec![e], &splits)[0].zone_id, Some(10));
    }

    #[test]
    fn test_zone_bounds_padded() {
        let events = vec![zoned(1, 2, 0.0, 0.0), zoned(1, 2, 10.0, 4.0), event(1, 100.0, 100.0)];
        let b = zone_bounds(&events, 20.0);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].bbox.minx, -20.0);
        assert_eq!(b[0].bbox.maxy, 24.0);
        assert_eq!(b[0].center, Point2::new(5.0, 2.0));
    }
}
