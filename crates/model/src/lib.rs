use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One (vehicle, lap, timestamp) observation with positions already in planar meters.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TelemetrySample {
    pub vehicle_number: u32,
    pub lap: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pbrake_f: Option<f64>,
    #[serde(default)]
    pub pbrake_r: Option<f64>,
    pub x_meters: f64,
    pub y_meters: f64,
    #[serde(default)]
    pub speed: Option<f64>,
}

impl TelemetrySample {
    pub fn position(&self) -> Point2 {
        Point2 { x: self.x_meters, y: self.y_meters }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BrakeType {
    Front,
    Rear,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct BrakeOnsetEvent {
    pub vehicle_number: u32,
    pub lap: u32,
    pub timestamp: DateTime<Utc>,
    pub x_meters: f64,
    pub y_meters: f64,
    pub brake_pressure: f64,
    pub brake_type: BrakeType,
    #[serde(default)]
    pub pbrake_f: Option<f64>,
    #[serde(default)]
    pub pbrake_r: Option<f64>,
    #[serde(default)]
    pub track_distance: Option<f64>,
    #[serde(default)]
    pub zone_id: Option<u32>,
    /// Distance from the start of the assigned zone, re-zeroed after a split.
    #[serde(default)]
    pub zone_offset_m: Option<f64>,
}

impl BrakeOnsetEvent {
    pub fn position(&self) -> Point2 {
        Point2 { x: self.x_meters, y: self.y_meters }
    }
}

/// Closed reference path. The last point repeats the first.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Centerline {
    #[serde(default)]
    pub points: Vec<Point2>,
}

impl Centerline {
    /// Stations without the closing duplicate.
    pub fn stations(&self) -> &[Point2] {
        match self.points.split_last() {
            Some((last, rest)) if rest.first() == Some(last) => rest,
            _ => &self.points,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.points.len() > 1 && self.points.first() == self.points.last()
    }

    /// Cumulative arc length at every point, starting at 0.
    pub fn cumulative_distances(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.points.len());
        let mut acc = 0.0_f64;
        let mut prev: Option<&Point2> = None;
        for p in &self.points {
            if let Some(q) = prev {
                acc += p.distance(q);
            }
            out.push(acc);
            prev = Some(p);
        }
        out
    }

    pub fn length(&self) -> f64 {
        self.cumulative_distances().last().copied().unwrap_or(0.0)
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::of(&self.points)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TrackBand {
    #[serde(default)]
    pub left: Vec<Point2>,
    #[serde(default)]
    pub right: Vec<Point2>,
    #[serde(default)]
    pub stats: Option<BandStats>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct BandStats {
    pub width_p05: f64,
    pub width_p50: f64,
    pub width_p95: f64,
    pub min_width: f64,
    pub max_width: f64,
    pub stations: usize,
    pub samples_used: usize,
}

/// What the centerline cache stores per track/session.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TrackGeometry {
    pub centerline: Centerline,
    #[serde(default)]
    pub band: Option<TrackBand>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ZoneDefinition {
    pub zone_id: u32,
    pub start_distance_m: f64,
    pub end_distance_m: f64,
}

impl ZoneDefinition {
    pub fn contains(&self, distance: f64) -> bool {
        self.start_distance_m <= distance && distance <= self.end_distance_m
    }
}

/// Relabels one historical zone into two once its brake points are known.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ZoneSplit {
    pub zone_id: u32,
    pub before_id: u32,
    pub after_id: u32,
    pub split_distance_m: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ZoneBounds {
    pub zone_id: u32,
    pub bbox: BBox,
    pub center: Point2,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DriverZoneDispersion {
    pub vehicle_number: u32,
    pub zone_id: u32,
    pub dispersion_meters: f64,
    pub brake_count: usize,
    pub std_x: f64,
    pub std_y: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ZoneCentroid {
    pub vehicle_number: u32,
    pub zone_id: u32,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub brake_count: usize,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DriverSummary {
    pub vehicle_number: u32,
    pub avg_dispersion_meters: f64,
    pub zone_count: usize,
    pub total_brake_count: usize,
    #[serde(default)]
    pub fastest_lap_time: Option<String>,
    #[serde(default)]
    pub fastest_lap_seconds: Option<f64>,
}

/// One row of the external results table.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LapResult {
    pub vehicle_number: u32,
    #[serde(default)]
    pub fastest_lap_time: Option<String>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct BBox {
    pub minx: f64,
    pub maxx: f64,
    pub miny: f64,
    pub maxy: f64,
}

impl BBox {
    pub fn of(points: &[Point2]) -> Option<BBox> {
        let first = points.first()?;
        let mut b = BBox { minx: first.x, maxx: first.x, miny: first.y, maxy: first.y };
        for p in points {
            if p.x < b.minx { b.minx = p.x; }
            if p.x > b.maxx { b.maxx = p.x; }
            if p.y < b.miny { b.miny = p.y; }
            if p.y > b.maxy { b.maxy = p.y; }
        }
        Some(b)
    }

    pub fn padded(&self, pad: f64) -> BBox {
        BBox {
            minx: self.minx - pad,
            maxx: self.maxx + pad,
            miny: self.miny - pad,
            maxy: self.maxy + pad,
        }
    }

    pub fn center(&self) -> Point2 {
        Point2 { x: (self.minx + self.maxx) / 2.0, y: (self.miny + self.maxy) / 2.0 }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
