//! Trace preprocessing.
//!
//! Everything the detectors do to a raw trace before correlating it: demean,
//! cosine taper, Butterworth filtering (causal or zero-phase), decimation,
//! FFT resampling, Hilbert envelopes and trimming. All routines mutate the
//! trace in place.
//!
//! Butterworth filters are designed from the analog prototype poles, mapped
//! to band/high/low-pass in the analog domain, moved to the z-plane with the
//! bilinear transform and run as a cascade of second-order sections.

use std::f64::consts::PI;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

use crate::model::{AlarmError, Trace, seconds};

// ---------------------------------------------------------------------------
// Second-order sections
// ---------------------------------------------------------------------------

/// Direct-form-II transposed biquad, `a0` normalized to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    fn from_roots(zeros: &[Complex64], poles: &[Complex64]) -> Self {
        let (b1, b2) = poly2(zeros);
        let (a1, a2) = poly2(poles);
        Biquad { b0: 1.0, b1, b2, a1, a2 }
    }

    fn response(&self, omega: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        (self.b0 + self.b1 * z1 + self.b2 * z2) / (1.0 + self.a1 * z1 + self.a2 * z2)
    }

    fn scale(&mut self, gain: f64) {
        self.b0 *= gain;
        self.b1 *= gain;
        self.b2 *= gain;
    }

    fn run(&self, data: &mut [f64]) {
        let (mut s1, mut s2) = (0.0, 0.0);
        for x in data.iter_mut() {
            let input = *x;
            let y = self.b0 * input + s1;
            s1 = self.b1 * input - self.a1 * y + s2;
            s2 = self.b2 * input - self.a2 * y;
            *x = y;
        }
    }
}

/// Coefficients `(c1, c2)` of `(1 - r1 z^-1)(1 - r2 z^-1)`; a single root
/// gives a first-order section.
fn poly2(roots: &[Complex64]) -> (f64, f64) {
    match roots {
        [] => (0.0, 0.0),
        [r] => (-r.re, 0.0),
        [r1, r2, ..] => (-(r1 + r2).re, (r1 * r2).re),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterKind {
    Lowpass(f64),
    Highpass(f64),
    Bandpass(f64, f64),
}

/// A designed Butterworth filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Butterworth {
    pub sections: Vec<Biquad>,
}

impl Butterworth {
    /// Designs an order-`corners` Butterworth filter for `sampling_rate` Hz.
    ///
    /// A bandpass whose upper corner reaches Nyquist becomes a highpass.
    pub fn design(kind: FilterKind, corners: usize, sampling_rate: f64) -> Result<Self, AlarmError> {
        if corners == 0 {
            return Err(AlarmError::Computation("filter needs at least one corner".into()));
        }
        let nyquist = sampling_rate / 2.0;
        let kind = match kind {
            FilterKind::Bandpass(f1, f2) if f2 >= nyquist => FilterKind::Highpass(f1),
            k => k,
        };
        let check = |f: f64| {
            if f > 0.0 && f < nyquist {
                Ok(())
            } else {
                Err(AlarmError::Computation(format!(
                    "corner frequency {} Hz outside (0, {}) Hz",
                    f, nyquist
                )))
            }
        };

        let fs2 = 2.0 * sampling_rate;
        let warp = |f: f64| fs2 * (PI * f / sampling_rate).tan();
        let prototype: Vec<Complex64> = (0..corners)
            .map(|k| {
                let theta = PI * (2 * k + corners + 1) as f64 / (2 * corners) as f64;
                Complex64::from_polar(1.0, theta)
            })
            .collect();

        // analog poles plus the z-plane zero positions and reference frequency
        let (analog_poles, zeros_per_section, omega_ref): (Vec<Complex64>, Vec<Complex64>, f64) = match kind {
            FilterKind::Lowpass(f) => {
                check(f)?;
                let wc = warp(f);
                (prototype.iter().map(|p| *p * wc).collect(), vec![Complex64::new(-1.0, 0.0); 2], 0.0)
            }
            FilterKind::Highpass(f) => {
                check(f)?;
                let wc = warp(f);
                (prototype.iter().map(|p| Complex64::new(wc, 0.0) / *p).collect(), vec![Complex64::new(1.0, 0.0); 2], PI)
            }
            FilterKind::Bandpass(f1, f2) => {
                check(f1)?;
                check(f2)?;
                if f1 >= f2 {
                    return Err(AlarmError::Computation(format!("bandpass {}-{} Hz is empty", f1, f2)));
                }
                let (w1, w2) = (warp(f1), warp(f2));
                let bw = w2 - w1;
                let w0 = (w1 * w2).sqrt();
                let mut poles = Vec::with_capacity(2 * corners);
                for p in &prototype {
                    let half = *p * (bw / 2.0);
                    let disc = (half * half - w0 * w0).sqrt();
                    poles.push(half + disc);
                    poles.push(half - disc);
                }
                let omega = 2.0 * (w0 / fs2).atan();
                (poles, vec![Complex64::new(1.0, 0.0), Complex64::new(-1.0, 0.0)], omega)
            }
        };

        let z_poles: Vec<Complex64> = analog_poles.iter().map(|s| (fs2 + *s) / (fs2 - *s)).collect();
        let mut sections = pair_poles(&z_poles)
            .into_iter()
            .map(|poles| {
                let zeros = &zeros_per_section[..poles.len().min(zeros_per_section.len())];
                Biquad::from_roots(zeros, &poles)
            })
            .collect::<Vec<_>>();

        for section in sections.iter_mut() {
            let gain = section.response(omega_ref).norm();
            if gain > 0.0 && gain.is_finite() {
                section.scale(1.0 / gain);
            }
        }
        Ok(Butterworth { sections })
    }

    /// Single forward pass.
    pub fn apply(&self, data: &mut [f64]) {
        for section in &self.sections {
            section.run(data);
        }
    }

    /// Forward then backward pass: zero phase, doubled order.
    pub fn apply_zero_phase(&self, data: &mut [f64]) {
        self.apply(data);
        data.reverse();
        self.apply(data);
        data.reverse();
    }

    /// Magnitude response at `freq` Hz.
    pub fn gain_at(&self, freq: f64, sampling_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq / sampling_rate;
        self.sections.iter().map(|s| s.response(omega).norm()).product()
    }
}

/// Groups z-plane poles into conjugate pairs, then real pairs, then a lone
/// real pole for odd orders.
fn pair_poles(poles: &[Complex64]) -> Vec<Vec<Complex64>> {
    const TOL: f64 = 1e-10;
    let mut groups = Vec::new();
    let mut reals = Vec::new();
    for p in poles {
        if p.im > TOL {
            groups.push(vec![*p, p.conj()]);
        } else if p.im.abs() <= TOL {
            reals.push(Complex64::new(p.re, 0.0));
        }
    }
    for chunk in reals.chunks(2) {
        groups.push(chunk.to_vec());
    }
    groups
}

// ---------------------------------------------------------------------------
// Trace operations
// ---------------------------------------------------------------------------

pub fn demean(trace: &mut Trace) {
    if trace.data.is_empty() {
        return;
    }
    let mean = trace.data.iter().sum::<f64>() / trace.data.len() as f64;
    trace.data.iter_mut().for_each(|v| *v -= mean);
}

/// Cosine (Hann) taper over `length_s` seconds at both ends, capped at half
/// the trace.
pub fn taper(trace: &mut Trace, length_s: f64) {
    let n = trace.npts();
    let width = ((length_s * trace.sampling_rate).round() as usize).min(n / 2);
    if width < 2 {
        return;
    }
    for i in 0..width {
        let w = 0.5 * (1.0 - (PI * i as f64 / (width - 1) as f64).cos());
        trace.data[i] *= w;
        trace.data[n - 1 - i] *= w;
    }
}

/// Butterworth filter on a trace, causal or zero-phase.
pub fn filter(trace: &mut Trace, kind: FilterKind, corners: usize, zerophase: bool) -> Result<(), AlarmError> {
    let design = Butterworth::design(kind, corners, trace.sampling_rate)?;
    if zerophase {
        design.apply_zero_phase(&mut trace.data);
    } else {
        design.apply(&mut trace.data);
    }
    Ok(())
}

/// Integer-factor decimation with an anti-alias lowpass at 0.8 of the new
/// Nyquist.
pub fn decimate(trace: &mut Trace, factor: usize) -> Result<(), AlarmError> {
    if factor <= 1 {
        return Ok(());
    }
    let new_rate = trace.sampling_rate / factor as f64;
    filter(trace, FilterKind::Lowpass(0.4 * new_rate), 4, true)?;
    trace.data = trace.data.iter().step_by(factor).copied().collect();
    trace.sampling_rate = new_rate;
    Ok(())
}

/// Fourier-domain resampling to `new_rate` Hz. Start time is kept.
pub fn resample(trace: &mut Trace, new_rate: f64) {
    if (trace.sampling_rate - new_rate).abs() < 1e-9 || trace.data.is_empty() {
        trace.sampling_rate = new_rate;
        return;
    }
    let n = trace.npts();
    let m = ((n as f64 * new_rate / trace.sampling_rate).round() as usize).max(1);

    let mut planner = FftPlanner::<f64>::new();
    let mut spectrum: Vec<Complex64> = trace.data.iter().map(|v| Complex64::new(*v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut spectrum);

    let mut out = vec![Complex64::new(0.0, 0.0); m];
    let keep = n.min(m);
    let half = keep / 2;
    for k in 0..=half {
        out[k] = spectrum[k];
    }
    let negative = if keep % 2 == 0 { half } else { half + 1 };
    for k in 1..negative {
        out[m - k] = spectrum[n - k];
    }
    // a Nyquist bin shared by both halves
    if keep % 2 == 0 && keep > 0 {
        if m > n {
            out[half] = spectrum[half] * 0.5;
            out[m - half] = spectrum[half] * 0.5;
        } else {
            out[half] = Complex64::new(spectrum[half].re, 0.0);
        }
    }

    planner.plan_fft_inverse(m).process(&mut out);
    trace.data = out.iter().map(|c| c.re / n as f64).collect();
    trace.sampling_rate = new_rate;
}

/// Magnitude of the analytic signal.
pub fn envelope(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let mut buf: Vec<Complex64> = data.iter().map(|v| Complex64::new(*v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buf);
    for (k, c) in buf.iter_mut().enumerate() {
        let h = if k == 0 || (n % 2 == 0 && k == n / 2) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *c *= h;
    }
    planner.plan_fft_inverse(n).process(&mut buf);
    buf.iter().map(|c| c.norm() / n as f64).collect()
}

/// Removes `seconds_each_side` from both ends.
pub fn trim(trace: &mut Trace, seconds_each_side: f64) {
    let cut = (seconds_each_side * trace.sampling_rate).round() as usize;
    if 2 * cut >= trace.npts() {
        trace.data.clear();
        return;
    }
    let end = trace.npts() - cut;
    trace.data = trace.data[cut..end].to_vec();
    trace.starttime += seconds(cut as f64 / trace.sampling_rate);
}

pub fn rms(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
}

pub fn max_abs(data: &[f64]) -> f64 {
    data.iter().fold(0.0, |m, v| m.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scnl;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / rate).sin()).collect()
    }

    fn trace(data: Vec<f64>, rate: f64) -> Trace {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Trace::new(Scnl::new("AKS", "HDF", "AV", "01"), rate, t0, data)
    }

    #[test]
    fn test_bandpass_passes_centre_and_rejects_outside() {
        let bp = Butterworth::design(FilterKind::Bandpass(0.5, 4.0), 4, 50.0).unwrap();
        assert_eq!(bp.sections.len(), 4, "order-4 bandpass is four biquads");
        assert_abs_diff_eq!(bp.gain_at((0.5f64 * 4.0).sqrt(), 50.0), 1.0, epsilon = 0.02);
        assert!(bp.gain_at(0.05, 50.0) < 0.01);
        assert!(bp.gain_at(20.0, 50.0) < 0.01);
    }

    #[test]
    fn test_butterworth_is_3db_at_corner() {
        let lp = Butterworth::design(FilterKind::Lowpass(2.0), 4, 100.0).unwrap();
        assert_abs_diff_eq!(lp.gain_at(2.0, 100.0), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-3);
        let hp = Butterworth::design(FilterKind::Highpass(2.0), 3, 100.0).unwrap();
        assert_eq!(hp.sections.len(), 2, "odd order adds a first-order section");
        assert_abs_diff_eq!(hp.gain_at(2.0, 100.0), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-3);
    }

    #[test]
    fn test_design_rejects_bad_corners() {
        assert!(Butterworth::design(FilterKind::Lowpass(30.0), 4, 50.0).is_err());
        assert!(Butterworth::design(FilterKind::Bandpass(3.0, 1.0), 4, 50.0).is_err());
        // upper corner at Nyquist falls back to a highpass
        assert!(Butterworth::design(FilterKind::Bandpass(1.0, 25.0), 4, 50.0).is_ok());
    }

    #[test]
    fn test_zero_phase_filter_keeps_peak_position() {
        let mut data = vec![0.0; 1000];
        data[500] = 1.0;
        let lp = Butterworth::design(FilterKind::Lowpass(5.0), 2, 100.0).unwrap();
        lp.apply_zero_phase(&mut data);
        let peak = data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 500);
    }

    #[test]
    fn test_demean_and_taper() {
        let mut tr = trace(vec![2.0; 100], 10.0);
        demean(&mut tr);
        assert!(tr.data.iter().all(|v| v.abs() < 1e-12));

        let mut tr = trace(vec![1.0; 100], 10.0);
        taper(&mut tr, 1.0);
        assert_eq!(tr.data[0], 0.0);
        assert_eq!(tr.data[99], 0.0);
        assert_eq!(tr.data[50], 1.0, "middle untouched");
    }

    #[test]
    fn test_resample_preserves_low_frequency_sine() {
        let mut tr = trace(sine(1.0, 100.0, 1000), 100.0);
        resample(&mut tr, 50.0);
        assert_eq!(tr.npts(), 500);
        assert_eq!(tr.sampling_rate, 50.0);
        let expected = sine(1.0, 50.0, 500);
        for (got, want) in tr.data.iter().zip(&expected).skip(50).take(400) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_decimate_halves_rate() {
        let mut tr = trace(sine(1.0, 100.0, 2000), 100.0);
        decimate(&mut tr, 2).unwrap();
        assert_eq!(tr.sampling_rate, 50.0);
        assert_eq!(tr.npts(), 1000);
        assert!((max_abs(&tr.data[100..900]) - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_envelope_of_sine_is_flat() {
        let env = envelope(&sine(2.0, 50.0, 500));
        for v in &env[50..450] {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_trim_moves_starttime() {
        let mut tr = trace(vec![1.0; 100], 10.0);
        let start = tr.starttime;
        trim(&mut tr, 2.0);
        assert_eq!(tr.npts(), 60);
        assert_eq!(tr.starttime, start + chrono::Duration::seconds(2));
    }

    #[test]
    fn test_rms_of_unit_sine() {
        assert_abs_diff_eq!(rms(&sine(1.0, 100.0, 1000)), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-9);
    }
}
