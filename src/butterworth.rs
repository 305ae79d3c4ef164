//! Butterworth band-pass design and zero-phase application.
//!
//! The design goes analog low-pass prototype → band-pass transform →
//! bilinear transform, with the band edges prewarped so they land where they
//! were asked for. The result is a cascade of second-order sections.
//!
//! Filtering is always forward-backward: the multichannel estimators depend
//! on every channel keeping its phase, and a single causal pass would skew
//! them differently per frequency.

use crate::error::{DoaError, Result};
use crate::manifold::C64;
use ndarray::{Array2, ArrayView1};
use std::f64::consts::PI;

/// A single second-order section,
/// `H(z) = (b0 + b1 z⁻¹ + b2 z⁻²) / (1 + a1 z⁻¹ + a2 z⁻²)`,
/// run in Direct Form II Transposed.
#[derive(Debug, Clone, PartialEq)]
pub struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    state: [f64; 2],
}

impl Biquad {
    /// Create a section from numerator `b` and denominator `[a1, a2]`.
    pub fn new(b: [f64; 3], a: [f64; 2]) -> Self {
        Self {
            b,
            a,
            state: [0.0; 2],
        }
    }

    /// Process a single sample.
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b[0] * input + self.state[0];
        self.state[0] = self.b[1] * input - self.a[0] * output + self.state[1];
        self.state[1] = self.b[2] * input - self.a[1] * output;
        output
    }

    /// Clears the filter state.
    pub fn reset(&mut self) {
        self.state = [0.0; 2];
    }

    /// Gain at DC.
    fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (1.0 + self.a[0] + self.a[1])
    }

    /// State that a unit step settles to.
    fn step_state(&self) -> [f64; 2] {
        let y = self.dc_gain();
        let s1 = self.b[2] - self.a[1] * y;
        [self.b[1] - self.a[0] * y + s1, s1]
    }

    /// Complex response at `z`.
    fn response(&self, z: C64) -> C64 {
        let zi = z.inv();
        let num = self.b[0] + zi * (self.b[1] + zi * self.b[2]);
        let den = 1.0 + zi * (self.a[0] + zi * self.a[1]);
        num / den
    }

    /// Whether both poles lie inside the unit circle.
    pub fn is_stable(&self) -> bool {
        let [a1, a2] = self.a;
        a2.abs() < 1.0 && a1.abs() < 1.0 + a2
    }

    /// Numerator coefficients.
    pub fn numerator(&self) -> &[f64; 3] {
        &self.b
    }

    /// Denominator coefficients `[a1, a2]`.
    pub fn denominator(&self) -> &[f64; 2] {
        &self.a
    }
}

/// A designed band-pass filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthBandpass {
    sections: Vec<Biquad>,
    low: f64,
    high: f64,
    sample_rate: f64,
}

impl ButterworthBandpass {
    /// Designs a band-pass passing `low..high` Hz. `order` is the order of
    /// the low-pass prototype, so the filter has `2·order` poles.
    pub fn design(low: f64, high: f64, sample_rate: f64, order: usize) -> Result<Self> {
        let nyquist = sample_rate / 2.0;
        if order == 0 {
            return Err(DoaError::config("filter order must be at least 1"));
        }
        if !(low > 0.0 && low < high && high < nyquist) {
            return Err(DoaError::config(format!(
                "band {}..{} Hz must lie strictly inside 0..{} Hz",
                low, high, nyquist
            )));
        }

        let k = 2.0 * sample_rate;
        let w_low = k * (PI * low / sample_rate).tan();
        let w_high = k * (PI * high / sample_rate).tan();
        let w0 = (w_low * w_high).sqrt();
        let bw = w_high - w_low;

        let bilinear = |s: C64| (k + s) / (k - s);
        let to_section = |p1: C64, p2: C64| {
            let (z1, z2) = (bilinear(p1), bilinear(p2));
            Biquad::new([1.0, 0.0, -1.0], [-(z1 + z2).re, (z1 * z2).re])
        };

        let mut sections = Vec::with_capacity(order);
        for m in 0..order {
            let p = C64::from_polar(1.0, PI * (2 * m + order + 1) as f64 / (2 * order) as f64);
            if p.im < -1e-12 {
                // its conjugate already produced these sections
                continue;
            }
            // s² − p·B·s + w0² = 0
            let disc = (p * p * bw * bw - 4.0 * w0 * w0).sqrt();
            let s1 = (p * bw + disc) / 2.0;
            let s2 = (p * bw - disc) / 2.0;
            if p.im.abs() <= 1e-12 {
                sections.push(to_section(s1, s2));
            } else {
                sections.push(to_section(s1, s1.conj()));
                sections.push(to_section(s2, s2.conj()));
            }
        }

        let centre = C64::from_polar(1.0, 2.0 * (w0 / k).atan());
        let gain = sections
            .iter()
            .fold(C64::new(1.0, 0.0), |acc, s| acc * s.response(centre))
            .norm();
        if !(gain.is_finite() && gain > 0.0) {
            return Err(DoaError::NumericDegeneracy(format!(
                "band {}..{} Hz has no usable passband",
                low, high
            )));
        }
        let per_section = gain.powf(-1.0 / sections.len() as f64);
        for s in sections.iter_mut() {
            for b in s.b.iter_mut() {
                *b *= per_section;
            }
        }

        Ok(Self {
            sections,
            low,
            high,
            sample_rate,
        })
    }

    /// Second-order sections, in cascade order.
    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Passband edges in Hz.
    pub fn band(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    /// Sample rate the filter was designed for, Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Samples of odd extension added to each end before filtering. The
    /// signal has to be longer than this.
    pub fn padlen(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Magnitude response at `freq` Hz for a single pass.
    pub fn magnitude(&self, freq: f64) -> f64 {
        let z = C64::from_polar(1.0, 2.0 * PI * freq / self.sample_rate);
        self.sections
            .iter()
            .fold(C64::new(1.0, 0.0), |acc, s| acc * s.response(z))
            .norm()
    }

    /// Runs the cascade once over `signal`, starting every section from its
    /// settled state scaled to the first sample.
    fn run(&self, signal: &[f64]) -> Vec<f64> {
        let x0 = signal.first().copied().unwrap_or(0.0);
        let mut scale = 1.0;
        let mut sections: Vec<Biquad> = self
            .sections
            .iter()
            .map(|s| {
                let mut s = s.clone();
                let [z0, z1] = s.step_state();
                s.state = [z0 * scale * x0, z1 * scale * x0];
                scale *= s.dc_gain();
                s
            })
            .collect();
        signal
            .iter()
            .map(|&x| sections.iter_mut().fold(x, |acc, s| s.process(acc)))
            .collect()
    }

    /// Zero-phase filtering of one channel.
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>> {
        let n = signal.len();
        let pad = self.padlen();
        if n <= pad {
            return Err(DoaError::InsufficientData {
                needed: pad + 1,
                got: n,
            });
        }

        let first = signal[0];
        let last = signal[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut y = self.run(&ext);
        y.reverse();
        let mut y = self.run(&y);
        y.reverse();

        Ok(y[pad..pad + n].to_vec())
    }

    /// Zero-phase filtering of one channel held in an ndarray view.
    pub fn filtfilt_view(&self, signal: ArrayView1<f64>) -> Result<Vec<f64>> {
        match signal.as_slice() {
            Some(s) => self.filtfilt(s),
            None => self.filtfilt(&signal.to_vec()),
        }
    }
}

/// Zero-phase Butterworth band-pass of every row of a channels × samples
/// matrix.
pub fn bandpass(
    signal: &Array2<f64>,
    low: f64,
    high: f64,
    sample_rate: f64,
    order: usize,
) -> Result<Array2<f64>> {
    let filter = ButterworthBandpass::design(low, high, sample_rate, order)?;
    let mut out = Array2::zeros(signal.raw_dim());
    for (src, mut dst) in signal.rows().into_iter().zip(out.rows_mut()) {
        let y = filter.filtfilt_view(src)?;
        dst.assign(&ArrayView1::from(&y));
    }
    Ok(out)
}
