//! FFT plumbing shared by the estimators and filters.

use crate::manifold::C64;
use rustfft::FftPlanner;

/// Forward DFT of a real signal, keeping bins `0..len/2`.
pub fn half_spectrum(planner: &mut FftPlanner<f64>, signal: &[f64]) -> Vec<C64> {
    let mut buf: Vec<C64> = signal.iter().map(|&v| C64::new(v, 0.0)).collect();
    let fft = planner.plan_fft_forward(buf.len());
    fft.process(&mut buf);
    buf.truncate(signal.len() / 2);
    buf
}

/// Magnitude of the analytic signal, built the usual way: zero the negative
/// frequencies, double the positive ones, invert.
pub fn analytic_envelope(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let mut buf: Vec<C64> = signal.iter().map(|&v| C64::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buf);

    let half = n / 2;
    for (i, v) in buf.iter_mut().enumerate() {
        let h = if i == 0 || (n % 2 == 0 && i == half) {
            1.0
        } else if i < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *v *= h;
    }

    planner.plan_fft_inverse(n).process(&mut buf);
    buf.iter().map(|v| v.norm() / n as f64).collect()
}

/// Full linear convolution of `a` and `b` (length `a.len() + b.len() - 1`).
pub fn fft_convolve(planner: &mut FftPlanner<f64>, a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let out_len = a.len() + b.len() - 1;
    let n = out_len.next_power_of_two();

    let pad = |x: &[f64]| -> Vec<C64> {
        let mut v: Vec<C64> = x.iter().map(|&s| C64::new(s, 0.0)).collect();
        v.resize(n, C64::new(0.0, 0.0));
        v
    };
    let mut fa = pad(a);
    let mut fb = pad(b);

    let fwd = planner.plan_fft_forward(n);
    fwd.process(&mut fa);
    fwd.process(&mut fb);
    for (x, y) in fa.iter_mut().zip(&fb) {
        *x *= *y;
    }
    planner.plan_fft_inverse(n).process(&mut fa);

    fa.iter().take(out_len).map(|v| v.re / n as f64).collect()
}
