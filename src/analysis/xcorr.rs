//! Pairwise cross-correlation.
//!
//! Correlates every station pair of an array (or of a tremor network) over a
//! bounded shift range and keeps the best-aligned lag of the pairs that
//! correlate well enough and pass a physical plausibility gate.

use crate::geometry::ArrayGeometry;
use crate::model::PairwiseMeasurement;

/// Normalized, demeaned cross-correlation for shifts `-max_shift..=max_shift`.
///
/// Index `k` holds shift `s = k - max_shift` with
/// `cc(s) = Σ a[n+s]·b[n] / sqrt(Σa²·Σb²)`, so a positive shift means `a`
/// lags `b`. The output always has `2·max_shift + 1` entries; series with no
/// energy correlate to all zeros.
pub fn correlate(a: &[f64], b: &[f64], max_shift: usize) -> Vec<f64> {
    let mut cc = vec![0.0; 2 * max_shift + 1];
    let n = a.len().min(b.len());
    if n == 0 {
        return cc;
    }
    let a = demeaned(&a[..n]);
    let b = demeaned(&b[..n]);
    let norm = (a.iter().map(|v| v * v).sum::<f64>() * b.iter().map(|v| v * v).sum::<f64>()).sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return cc;
    }

    for (k, slot) in cc.iter_mut().enumerate() {
        let s = k as isize - max_shift as isize;
        let shift = s.unsigned_abs();
        if shift >= n {
            continue;
        }
        let sum: f64 = if s >= 0 {
            (0..n - shift).map(|i| a[i + shift] * b[i]).sum()
        } else {
            (0..n - shift).map(|i| a[i] * b[i + shift]).sum()
        };
        *slot = sum / norm;
    }
    cc
}

fn demeaned(x: &[f64]) -> Vec<f64> {
    let mean = x.iter().sum::<f64>() / x.len() as f64;
    x.iter().map(|v| v - mean).collect()
}

/// Peak of a correlation function as `(index, value)`.
///
/// Takes the largest |cc|; if that extremum is negative, the largest positive
/// correlation is taken instead. Ties resolve to the first index.
pub fn best_peak(cc: &[f64]) -> Option<(usize, f64)> {
    let first_max_by = |key: &dyn Fn(f64) -> f64| {
        cc.iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
                Some((_, bv)) if key(*v) <= key(bv) => best,
                _ => Some((i, *v)),
            })
    };
    let (idx, value) = first_max_by(&|v: f64| v.abs())?;
    if value < 0.0 {
        return first_max_by(&|v: f64| v);
    }
    Some((idx, value))
}

/// Index of a peak converted to a lag in seconds.
pub fn peak_lag_seconds(index: usize, max_shift: usize, sampling_rate: f64) -> f64 {
    (index as f64 - max_shift as f64) / sampling_rate
}

/// Correlates all pairs `i < j` and keeps those with `coefficient > min_cc`
/// whose lag the gate accepts.
pub fn measure_pairs<G>(
    series: &[Vec<f64>],
    sampling_rate: f64,
    max_shift: usize,
    min_cc: f64,
    gate: G,
) -> Vec<PairwiseMeasurement>
where
    G: Fn(usize, usize, f64) -> bool,
{
    let mut out = Vec::new();
    for i in 0..series.len() {
        for j in (i + 1)..series.len() {
            let cc = correlate(&series[i], &series[j], max_shift);
            let Some((idx, coefficient)) = best_peak(&cc) else {
                continue;
            };
            let lag_seconds = peak_lag_seconds(idx, max_shift, sampling_rate);
            if coefficient > min_cc && gate(i, j, lag_seconds) {
                out.push(PairwiseMeasurement {
                    i,
                    j,
                    lag_seconds,
                    coefficient,
                });
            }
        }
    }
    out
}

/// Gate for acoustic arrays: the lag must be shorter than the interstation
/// travel time at the slowest admissible velocity.
pub fn velocity_gate(geometry: &ArrayGeometry, vmin_km_s: f64) -> impl Fn(usize, usize, f64) -> bool + '_ {
    move |i, j, lag| lag.abs() < geometry.distance_km(i, j) / vmin_km_s
}

/// Aligns every series to the first by its correlation peak and averages
/// them. Samples shifted in from outside a series count as zero.
pub fn align_and_stack(series: &[Vec<f64>], max_shift: usize) -> Vec<f64> {
    let Some(reference) = series.first() else {
        return Vec::new();
    };
    let n = reference.len();
    let mut stack = vec![0.0; n];
    for s in series {
        let cc = correlate(s, reference, max_shift);
        let shift = best_peak(&cc).map(|(idx, _)| idx as isize - max_shift as isize).unwrap_or(0);
        for (t, slot) in stack.iter_mut().enumerate() {
            let src = t as isize + shift;
            if src >= 0 && (src as usize) < s.len() {
                *slot += s[src as usize];
            }
        }
    }
    let count = series.len() as f64;
    stack.iter_mut().for_each(|v| *v /= count);
    stack
}
