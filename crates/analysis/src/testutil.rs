use chrono::{DateTime, Duration, TimeZone, Utc};
use model::{BrakeOnsetEvent, BrakeType, TelemetrySample};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 18, 0, 0).single().unwrap_or_default()
}

pub fn sample(vehicle: u32, lap: u32, i: usize, x: f64, y: f64) -> TelemetrySample {
    TelemetrySample {
        vehicle_number: vehicle,
        lap,
        timestamp: t0() + Duration::milliseconds(100 * i as i64),
        pbrake_f: None,
        pbrake_r: None,
        x_meters: x,
        y_meters: y,
        speed: Some(120.0),
    }
}

/// `n` samples around an ellipse of 300 x 150 m.
pub fn oval_samples(vehicle: u32, lap: u32, n: usize) -> Vec<TelemetrySample> {
    (0..n)
        .map(|i| {
            let a = std::f64::consts::TAU * (i as f64) / (n as f64);
            sample(vehicle, lap, i, 300.0 * a.cos(), 150.0 * a.sin())
        })
        .collect()
}

/// Samples along the x axis with the given front pressures (rear absent).
pub fn pressure_trace(vehicle: u32, lap: u32, front: &[f64]) -> Vec<TelemetrySample> {
    front
        .iter()
        .enumerate()
        .map(|(i, p)| TelemetrySample {
            pbrake_f: Some(*p),
            ..sample(vehicle, lap, i, i as f64, 0.0)
        })
        .collect()
}

pub fn event(vehicle: u32, x: f64, y: f64) -> BrakeOnsetEvent {
    BrakeOnsetEvent {
        vehicle_number: vehicle,
        lap: 1,
        timestamp: t0(),
        x_meters: x,
        y_meters: y,
        brake_pressure: 40.0,
        brake_type: BrakeType::Front,
        pbrake_f: Some(40.0),
        pbrake_r: Some(10.0),
        track_distance: None,
        zone_id: None,
        zone_offset_m: None,
    }
}

pub fn zoned(vehicle: u32, zone: u32, x: f64, y: f64) -> BrakeOnsetEvent {
    BrakeOnsetEvent { zone_id: Some(zone), ..event(vehicle, x, y) }
}
