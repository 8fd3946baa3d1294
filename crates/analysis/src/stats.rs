//! Small descriptive statistics used across the pipeline.
//!
//! Standard deviations are population (ddof = 0) everywhere so values computed
//! in different stages stay comparable.

pub fn mean(v: &[f64]) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    Some(v.iter().sum::<f64>() / (v.len() as f64))
}

/// Population standard deviation.
pub fn stddev(v: &[f64]) -> Option<f64> {
    let m = mean(v)?;
    let var = v
        .iter()
        .map(|x| {
            let d = *x - m;
            d * d
        })
        .sum::<f64>()
        / (v.len() as f64);
    Some(var.sqrt())
}

/// Linear-interpolated percentile, `q` in [0, 100]. NaNs are ignored.
pub fn percentile(v: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = v.iter().copied().filter(|x| !x.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, q))
}

/// Same as [`percentile`] for an already sorted, NaN-free, non-empty slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (q.clamp(0.0, 100.0) / 100.0) * ((n - 1) as f64);
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - (lo as f64);
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Pearson correlation; `None` with fewer than two pairs or zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let ma = mean(a)?;
    let mb = mean(b)?;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - ma;
        let dy = y - mb;
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    let den = (va * vb).sqrt();
    if den <= 0.0 || !den.is_finite() {
        return None;
    }
    Some(cov / den)
}
