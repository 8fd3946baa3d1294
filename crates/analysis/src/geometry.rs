//! Generic 2-D polyline operations: distance resampling, periodic smoothing,
//! tangent/normal estimation and nearest-station projection.

use model::Point2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result, Stage};

/// Segments shorter than this are treated as duplicate fixes.
const DUPLICATE_EPS_M: f64 = 1e-6;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResampleParams {
    pub step_m: f64,
    pub spike_threshold_m: f64,
}

impl Default for ResampleParams {
    fn default() -> Self {
        Self { step_m: 2.0, spike_threshold_m: 10.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmoothingParams {
    pub window: usize,
    pub poly_order: usize,
    pub wrap_count: usize,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self { window: 31, poly_order: 3, wrap_count: 25 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resampled {
    pub points: Vec<Point2>,
    /// Arc length of every output station.
    pub distances: Vec<f64>,
    pub spikes_removed: usize,
    pub duplicates_removed: usize,
}

/// Cumulative arc length along `points`, starting at 0.
pub fn cumulative_distances(points: &[Point2]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    let mut acc = 0.0_f64;
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            acc += p.distance(&points[i - 1]);
        }
        out.push(acc);
    }
    out
}

/// Drops the successor of every segment selected by `reject`, measured on the
/// input as given (one pass, not iterated).
fn drop_successors(points: Vec<Point2>, reject: impl Fn(f64) -> bool) -> (Vec<Point2>, usize) {
    let mut keep = vec![true; points.len()];
    let mut dropped = 0usize;
    for i in 1..points.len() {
        if reject(points[i].distance(&points[i - 1])) {
            keep[i] = false;
            dropped += 1;
        }
    }
    if dropped == 0 {
        return (points, 0);
    }
    let kept = points
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect();
    (kept, dropped)
}

/// Resample a noisy trace at uniform arc-length spacing.
///
/// GPS spikes (segments longer than `spike_threshold_m`) and duplicate fixes
/// lose their successor point before the arc length is recomputed; the
/// cleaned path is then linearly interpolated at
/// `ceil(total / step) + 1` evenly spaced stations.
pub fn resample_by_distance(points: &[Point2], params: &ResampleParams) -> Result<Resampled> {
    if !(params.step_m.is_finite() && params.step_m > 0.0) {
        return Err(AnalysisError::InvalidParameter {
            stage: Stage::Centerline,
            name: "step_m",
            reason: format!("must be a positive number, got {}", params.step_m),
        });
    }
    if !(params.spike_threshold_m > 0.0) {
        return Err(AnalysisError::InvalidParameter {
            stage: Stage::Centerline,
            name: "spike_threshold_m",
            reason: format!("must be positive, got {}", params.spike_threshold_m),
        });
    }

    let threshold = params.spike_threshold_m;
    let (cleaned, spikes_removed) = drop_successors(points.to_vec(), |d| d > threshold);
    if spikes_removed > 0 {
        warn!(spikes = spikes_removed, threshold_m = threshold, "removed gps spikes");
    }
    let (cleaned, duplicates_removed) = drop_successors(cleaned, |d| d < DUPLICATE_EPS_M);
    if duplicates_removed > 0 {
        debug!(duplicates = duplicates_removed, "removed duplicate points");
    }

    let cum = cumulative_distances(&cleaned);
    let total = cum.last().copied().unwrap_or(0.0);
    if cleaned.len() < 2 || total <= 0.0 {
        let distances = vec![0.0; cleaned.len().min(1)];
        return Ok(Resampled {
            points: cleaned.into_iter().take(1).collect(),
            distances,
            spikes_removed,
            duplicates_removed,
        });
    }

    // Tiny slack so an already-uniform trace keeps its station count despite rounding.
    let stations = ((total / params.step_m) - 1e-9).ceil().max(1.0) as usize + 1;
    let mut out = Vec::with_capacity(stations);
    let mut distances = Vec::with_capacity(stations);
    let mut seg = 0usize;
    for k in 0..stations {
        let d = total * (k as f64) / ((stations - 1) as f64);
        while seg + 2 < cum.len() && cum[seg + 1] < d {
            seg += 1;
        }
        let (d0, d1) = (cum[seg], cum[seg + 1]);
        let (p0, p1) = (cleaned[seg], cleaned[seg + 1]);
        let t = if d1 > d0 { (d - d0) / (d1 - d0) } else { 0.0 };
        out.push(Point2::new(p0.x + (p1.x - p0.x) * t, p0.y + (p1.y - p0.y) * t));
        distances.push(d);
    }

    debug!(
        input = points.len(),
        output = out.len(),
        length_m = total,
        step_m = params.step_m,
        "resampled by distance"
    );

    Ok(Resampled { points: out, distances, spikes_removed, duplicates_removed })
}

/// Least-squares smoothing coefficients for a centred window.
fn savgol_coefficients(window: usize, order: usize) -> Option<Vec<f64>> {
    if window % 2 == 0 || order >= window {
        return None;
    }
    let half = (window / 2) as f64;
    let zs: Vec<f64> = (0..window).map(|i| i as f64 - half).collect();
    let n = order + 1;

    // normal equations (AᵀA) b = e0
    let mut m = vec![vec![0.0_f64; n + 1]; n];
    for (j, row) in m.iter_mut().enumerate() {
        for k in 0..n {
            row[k] = zs.iter().map(|z| z.powi((j + k) as i32)).sum();
        }
        row[n] = if j == 0 { 1.0 } else { 0.0 };
    }
    for col in 0..n {
        let pivot = (col..n).max_by(|a, b| m[*a][col].abs().total_cmp(&m[*b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        for r in 0..n {
            if r == col {
                continue;
            }
            let f = m[r][col] / m[col][col];
            for c in col..=n {
                let v = m[col][c];
                m[r][c] -= f * v;
            }
        }
    }
    let b: Vec<f64> = (0..n).map(|j| m[j][n] / m[j][j]).collect();

    Some(
        zs.iter()
            .map(|z| b.iter().enumerate().map(|(j, bj)| bj * z.powi(j as i32)).sum())
            .collect(),
    )
}

/// Savitzky-Golay smoothing with edge samples repeated past both ends.
///
/// Returns `None` when `window` is even or not larger than `order`.
pub fn savgol_filter(values: &[f64], window: usize, order: usize) -> Option<Vec<f64>> {
    let coeffs = savgol_coefficients(window, order)?;
    let n = values.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let half = (window / 2) as isize;
    let last = (n - 1) as isize;
    Some(
        (0..n as isize)
            .map(|i| {
                coeffs
                    .iter()
                    .enumerate()
                    .map(|(k, c)| c * values[(i + k as isize - half).clamp(0, last) as usize])
                    .sum()
            })
            .collect(),
    )
}

/// Smooth a closed loop without introducing a kink at the seam.
///
/// `wrap_count` points from each end are copied onto the opposite end before
/// filtering and discarded afterwards. The window is forced odd and shrunk to
/// about a third of the input when too long; loops too short to smooth are
/// returned unchanged.
pub fn smooth_periodic(points: &[Point2], params: &SmoothingParams) -> Vec<Point2> {
    let n = points.len();
    let mut window = params.window | 1;
    if window >= n {
        let reduced = (n / 3) | 1;
        warn!(window, points = n, reduced, "smoothing window longer than input");
        if reduced < 5 {
            warn!(points = n, "too few points to smooth, leaving input as is");
            return points.to_vec();
        }
        window = reduced;
    }
    if params.poly_order >= window {
        warn!(window, order = params.poly_order, "polynomial order too high for window, skipping smoothing");
        return points.to_vec();
    }

    let wrap = params.wrap_count.min(n);
    let mut wrapped = Vec::with_capacity(n + 2 * wrap);
    wrapped.extend_from_slice(&points[n - wrap..]);
    wrapped.extend_from_slice(points);
    wrapped.extend_from_slice(&points[..wrap]);

    let xs: Vec<f64> = wrapped.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = wrapped.iter().map(|p| p.y).collect();
    let (Some(sx), Some(sy)) = (
        savgol_filter(&xs, window, params.poly_order),
        savgol_filter(&ys, window, params.poly_order),
    ) else {
        return points.to_vec();
    };

    debug!(window, order = params.poly_order, wrap, "applied periodic smoothing");

    sx[wrap..wrap + n]
        .iter()
        .zip(&sy[wrap..wrap + n])
        .map(|(x, y)| Point2::new(*x, *y))
        .collect()
}

/// Unit tangents and left-hand unit normals at every point.
///
/// Central differences; with `closed` the neighbours wrap around the seam,
/// otherwise the ends use one-sided differences. Zero-length tangents fall
/// back to +x.
pub fn tangents_normals(points: &[Point2], closed: bool) -> (Vec<Point2>, Vec<Point2>) {
    let n = points.len();
    let mut tangents = Vec::with_capacity(n);
    let mut normals = Vec::with_capacity(n);
    for i in 0..n {
        let (dx, dy) = if n < 2 {
            (0.0, 0.0)
        } else if closed {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            ((next.x - prev.x) / 2.0, (next.y - prev.y) / 2.0)
        } else if i == 0 {
            (points[1].x - points[0].x, points[1].y - points[0].y)
        } else if i == n - 1 {
            (points[i].x - points[i - 1].x, points[i].y - points[i - 1].y)
        } else {
            ((points[i + 1].x - points[i - 1].x) / 2.0, (points[i + 1].y - points[i - 1].y) / 2.0)
        };
        let mag = dx.hypot(dy);
        let t = if mag > 0.0 && mag.is_finite() {
            Point2::new(dx / mag, dy / mag)
        } else {
            Point2::new(1.0, 0.0)
        };
        tangents.push(t);
        normals.push(Point2::new(-t.y, t.x));
    }
    (tangents, normals)
}

/// Index of the station closest to `q`; the lowest index wins ties.
pub fn nearest_station(stations: &[Point2], q: &Point2) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in stations.iter().enumerate() {
        let d = s.distance(q);
        match best {
            Some((_, bd)) if !(d < bd) => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}

/// Track distance of each query: cumulative arc length of its nearest station.
///
/// Brute force over every station per query. An empty polyline maps everything to 0.
pub fn project_to_polyline(polyline: &[Point2], queries: &[Point2]) -> Vec<f64> {
    let cum = cumulative_distances(polyline);
    queries
        .iter()
        .map(|q| nearest_station(polyline, q).and_then(|i| cum.get(i).copied()).unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, step: f64) -> Vec<Point2> {
        (0..n).map(|i| Point2::new(i as f64 * step, 0.0)).collect()
    }

    fn circle(n: usize, r: f64) -> Vec<Point2> {
        (0..n)
            .map(|i| {
                let a = std::f64::consts::TAU * (i as f64) / (n as f64);
                Point2::new(r * a.cos(), r * a.sin())
            })
            .collect()
    }

    #[test]
    fn test_resample_uniform_line_is_idempotent() {
        let pts = line(11, 2.0);
        let r = resample_by_distance(&pts, &ResampleParams::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(r.points.len(), pts.len());
        for (a, b) in r.points.iter().zip(&pts) {
            assert!(a.distance(b) < 1e-9);
        }
    }

    #[test]
    fn test_resample_drops_spike_successor() {
        let mut pts = line(6, 1.0);
        pts[3] = Point2::new(3.0, 50.0);
        let r = resample_by_distance(&pts, &ResampleParams { step_m: 1.0, spike_threshold_m: 10.0 })
            .unwrap_or_else(|e| panic!("{e}"));
        // both the jump out to the spike and the jump back exceed the threshold
        assert_eq!(r.spikes_removed, 2);
        assert!(r.points.iter().all(|p| p.y.abs() < 1e-9));
    }

    #[test]
    fn test_resample_drops_duplicates_and_no_consecutive_coincide() {
        let pts = vec![
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(1.5, 0.0),
            Point2::new(1.5, 0.0),
            Point2::new(3.0, 0.0),
        ];
        let r = resample_by_distance(&pts, &ResampleParams { step_m: 0.5, spike_threshold_m: 10.0 })
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(r.duplicates_removed, 2);
        assert_eq!(r.points.len(), 7);
        for w in r.points.windows(2) {
            assert!(w[0].distance(&w[1]) > 1e-9);
        }
        for w in r.distances.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn test_resample_rejects_bad_step() {
        let err = resample_by_distance(&line(3, 1.0), &ResampleParams { step_m: 0.0, spike_threshold_m: 10.0 });
        assert!(matches!(err, Err(AnalysisError::InvalidParameter { name: "step_m", .. })));
    }

    #[test]
    fn test_resample_degenerate_input() {
        let r = resample_by_distance(&[Point2::new(1.0, 1.0)], &ResampleParams::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(r.points.len(), 1);
        let r = resample_by_distance(&[], &ResampleParams::default()).unwrap_or_else(|e| panic!("{e}"));
        assert!(r.points.is_empty());
    }

    #[test]
    fn test_savgol_preserves_cubic() {
        let xs: Vec<f64> = (0..21).map(|i| {
            let t = i as f64 - 10.0;
            0.5 * t * t * t - t * t + 3.0
        }).collect();
        let s = savgol_filter(&xs, 7, 3).unwrap_or_default();
        // interior points of a cubic are reproduced exactly
        for i in 3..18 {
            assert!((s[i] - xs[i]).abs() < 1e-6, "i={i} {} vs {}", s[i], xs[i]);
        }
    }

    #[test]
    fn test_savgol_order_zero_is_moving_average() {
        let s = savgol_filter(&[0.0, 0.0, 3.0, 0.0, 0.0], 3, 0).unwrap_or_default();
        assert!((s[1] - 1.0).abs() < 1e-12);
        assert!((s[2] - 1.0).abs() < 1e-12);
        assert!(savgol_filter(&[1.0], 4, 1).is_none());
    }

    #[test]
    fn test_smooth_periodic_keeps_circle_on_circle() {
        let pts = circle(200, 100.0);
        let s = smooth_periodic(&pts, &SmoothingParams::default());
        assert_eq!(s.len(), pts.len());
        for p in &s {
            assert!((p.x.hypot(p.y) - 100.0).abs() < 0.05);
        }
        // no seam kink: first and last stay adjacent
        assert!(s[0].distance(&s[s.len() - 1]) < 4.0);
    }

    #[test]
    fn test_smooth_periodic_short_input_unchanged() {
        let pts = circle(10, 5.0);
        let s = smooth_periodic(&pts, &SmoothingParams::default());
        assert_eq!(s, pts);
    }

    #[test]
    fn test_smooth_periodic_reduces_window() {
        let pts = circle(30, 5.0);
        let s = smooth_periodic(&pts, &SmoothingParams::default());
        assert_eq!(s.len(), 30);
    }

    #[test]
    fn test_normals_on_closed_square_corner_wrap() {
        let sq = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let (t, n) = tangents_normals(&sq, true);
        // first point uses the last as previous neighbour
        let expect = std::f64::consts::FRAC_1_SQRT_2;
        assert!((t[0].x - expect).abs() < 1e-12 && (t[0].y + expect).abs() < 1e-12);
        assert!((n[0].x - expect).abs() < 1e-12 && (n[0].y - expect).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_tangent_falls_back_to_unit() {
        let pts = vec![Point2::new(2.0, 2.0); 3];
        let (t, n) = tangents_normals(&pts, false);
        assert!(t.iter().all(|v| (v.x - 1.0).abs() < 1e-12 && v.y == 0.0));
        assert!(n.iter().all(|v| v.x == 0.0 && (v.y - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_nearest_station_ties_lowest_index() {
        let stations = vec![Point2::new(-1.0, 0.0), Point2::new(1.0, 0.0)];
        assert_eq!(nearest_station(&stations, &Point2::new(0.0, 5.0)), Some(0));
        assert_eq!(nearest_station(&[], &Point2::new(0.0, 0.0)), None);
    }

    #[test]
    fn test_projection_within_length() {
        let pl = line(11, 1.0);
        let d = project_to_polyline(&pl, &[Point2::new(3.2, 4.0), Point2::new(-50.0, 0.0), Point2::new(99.0, 0.0)]);
        assert_eq!(d, vec![3.0, 0.0, 10.0]);
        assert_eq!(project_to_polyline(&[], &[Point2::new(1.0, 1.0)]), vec![0.0]);
    }
}
