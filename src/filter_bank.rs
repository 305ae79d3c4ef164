//! Splitting a multichannel buffer into frequency bands.
//!
//! A [FilterBank] hands back band-limited copies of every channel of an
//! [AudioBuffer], one band at a time, so that each band can be sent off to
//! its own estimator thread. Two banks are provided:
//!
//! - [ButterworthBank], zero-phase IIR band-passes of `fc ± bw/2`.
//! - [TaperedFirBank], long sinusoidal FIR kernels with a raised-cosine
//!   taper, also applied forward and backward.

use crate::audio::AudioBuffer;
use crate::butterworth::ButterworthBandpass;
use crate::error::{DoaError, Result};
use crate::spectral::fft_convolve;
use ndarray::{Array1, Array2, ArrayView1};
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Centre frequencies `lower, lower + d, …` strictly below `upper`, and the
/// shared bandwidth `d`. Every band has to fit between 0 Hz and Nyquist.
pub fn generate_filter_bank(
    band_distance: f64,
    sample_rate: f64,
    lower_freq: f64,
    upper_freq: f64,
) -> Result<(Vec<f64>, f64)> {
    if !(band_distance.is_finite() && band_distance > 0.0) {
        return Err(DoaError::config(format!(
            "band distance must be positive, got {}",
            band_distance
        )));
    }
    if !(lower_freq.is_finite() && upper_freq.is_finite() && lower_freq < upper_freq) {
        return Err(DoaError::config(format!(
            "lower frequency {} must be below upper frequency {}",
            lower_freq, upper_freq
        )));
    }
    let n = ((upper_freq - lower_freq) / band_distance).ceil() as usize;
    let centers: Vec<f64> = (0..n)
        .map(|i| lower_freq + i as f64 * band_distance)
        .filter(|&fc| fc < upper_freq)
        .collect();
    check_bands(&centers, band_distance, sample_rate)?;
    Ok((centers, band_distance))
}

/// `total` centre frequencies evenly spaced from `lower` to `upper`
/// inclusive.
pub fn linspace_centers(total: usize, lower_freq: f64, upper_freq: f64) -> Result<Vec<f64>> {
    if total == 0 || !(lower_freq < upper_freq) {
        return Err(DoaError::config(format!(
            "cannot lay out {} bands over {}..{} Hz",
            total, lower_freq, upper_freq
        )));
    }
    Ok(Array1::linspace(lower_freq, upper_freq, total).to_vec())
}

fn check_bands(centers: &[f64], bandwidth: f64, sample_rate: f64) -> Result<()> {
    let nyquist = sample_rate / 2.0;
    if centers.is_empty() {
        return Err(DoaError::config("band layout produced no bands"));
    }
    for &fc in centers {
        let (lo, hi) = (fc - bandwidth / 2.0, fc + bandwidth / 2.0);
        if lo <= 0.0 || hi >= nyquist {
            return Err(DoaError::config(format!(
                "band {}..{} Hz crosses 0 Hz or Nyquist ({} Hz)",
                lo, hi, nyquist
            )));
        }
    }
    Ok(())
}

/// Anything that can produce band-limited copies of a buffer.
pub trait FilterBank: Send + Sync {
    /// Centre frequency of every band, in Hz.
    fn centers(&self) -> &[f64];

    /// Filters every channel of `audio` into band `band`.
    fn filter_band(&self, audio: &AudioBuffer, band: usize) -> Result<AudioBuffer>;

    /// Shortest buffer the bank accepts.
    fn min_samples(&self) -> usize;

    /// Number of bands.
    fn len(&self) -> usize {
        self.centers().len()
    }

    /// True if the bank has no bands.
    fn is_empty(&self) -> bool {
        self.centers().is_empty()
    }
}

fn check_input(
    audio: &AudioBuffer,
    band: usize,
    n_bands: usize,
    sample_rate: f64,
    min_samples: usize,
) -> Result<()> {
    if band >= n_bands {
        return Err(DoaError::config(format!(
            "band {} requested from a bank of {}",
            band, n_bands
        )));
    }
    if (audio.sample_rate() - sample_rate).abs() > 1e-6 {
        return Err(DoaError::config(format!(
            "bank designed for {} Hz, buffer is {} Hz",
            sample_rate,
            audio.sample_rate()
        )));
    }
    if audio.n_samples() < min_samples {
        return Err(DoaError::InsufficientData {
            needed: min_samples,
            got: audio.n_samples(),
        });
    }
    Ok(())
}

fn map_channels(
    audio: &AudioBuffer,
    mut f: impl FnMut(ArrayView1<f64>) -> Result<Vec<f64>>,
) -> Result<AudioBuffer> {
    let mut out = Array2::zeros((audio.n_channels(), audio.n_samples()));
    for (ch, mut row) in out.rows_mut().into_iter().enumerate() {
        let y = f(audio.channel(ch))?;
        row.assign(&ArrayView1::from(&y));
    }
    AudioBuffer::from_matrix(out, audio.sample_rate())
}

/// Zero-phase Butterworth band-passes, one per centre frequency.
#[derive(Debug, Clone)]
pub struct ButterworthBank {
    centers: Vec<f64>,
    bandwidth: f64,
    sample_rate: f64,
    filters: Vec<ButterworthBandpass>,
}

impl ButterworthBank {
    /// Designs `[fc − bw/2, fc + bw/2]` for each centre.
    pub fn new(centers: Vec<f64>, bandwidth: f64, sample_rate: f64, order: usize) -> Result<Self> {
        check_bands(&centers, bandwidth, sample_rate)?;
        let filters = centers
            .iter()
            .map(|&fc| {
                ButterworthBandpass::design(
                    fc - bandwidth / 2.0,
                    fc + bandwidth / 2.0,
                    sample_rate,
                    order,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            centers,
            bandwidth,
            sample_rate,
            filters,
        })
    }

    /// Width of every band, Hz.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }
}

impl FilterBank for ButterworthBank {
    fn centers(&self) -> &[f64] {
        &self.centers
    }

    fn filter_band(&self, audio: &AudioBuffer, band: usize) -> Result<AudioBuffer> {
        check_input(
            audio,
            band,
            self.centers.len(),
            self.sample_rate,
            self.min_samples(),
        )?;
        let filter = &self.filters[band];
        map_channels(audio, |ch| filter.filtfilt_view(ch))
    }

    fn min_samples(&self) -> usize {
        self.filters.first().map(|f| f.padlen() + 1).unwrap_or(1)
    }
}

/// FIR kernels `sin(2π f i / fs)`, optionally shaped by
/// `0.55 − 0.45·cos(2π i / W)`.
#[derive(Debug, Clone)]
pub struct TaperedFirBank {
    centers: Vec<f64>,
    sample_rate: f64,
    taps: Vec<Vec<f64>>,
}

impl TaperedFirBank {
    /// Builds one kernel of `window_size` taps per centre frequency.
    pub fn new(
        centers: Vec<f64>,
        sample_rate: f64,
        window_size: usize,
        tapered: bool,
    ) -> Result<Self> {
        if window_size < 2 {
            return Err(DoaError::config("FIR window needs at least 2 taps"));
        }
        let nyquist = sample_rate / 2.0;
        if centers.is_empty() || centers.iter().any(|&f| !(f > 0.0 && f < nyquist)) {
            return Err(DoaError::config(format!(
                "FIR centre frequencies must lie inside 0..{} Hz",
                nyquist
            )));
        }
        let taps = centers
            .iter()
            .map(|&f| fir_taps(f, sample_rate, window_size, tapered))
            .collect();
        Ok(Self {
            centers,
            sample_rate,
            taps,
        })
    }

    /// Kernel for band `band`.
    pub fn taps(&self, band: usize) -> Option<&[f64]> {
        self.taps.get(band).map(|t| t.as_slice())
    }
}

fn fir_taps(freq: f64, sample_rate: f64, window_size: usize, tapered: bool) -> Vec<f64> {
    let w = window_size as f64;
    (0..window_size)
        .map(|i| {
            let i = i as f64;
            let carrier = (2.0 * PI * freq * i / sample_rate).sin();
            if tapered {
                carrier * (0.55 - 0.45 * (2.0 * PI * i / w).cos())
            } else {
                carrier
            }
        })
        .collect()
}

/// One causal pass of `taps` over `x`, as if `x[0]` had been held forever
/// before the buffer started.
fn fir_pass(planner: &mut FftPlanner<f64>, taps: &[f64], x: &[f64]) -> Vec<f64> {
    let mut y = fft_convolve(planner, x, taps);
    y.truncate(x.len());
    let x0 = x.first().copied().unwrap_or(0.0);
    let mut tail: f64 = taps.iter().skip(1).sum();
    for (n, out) in y.iter_mut().enumerate().take(taps.len() - 1) {
        *out += x0 * tail;
        tail -= taps[n + 1];
    }
    y
}

impl FilterBank for TaperedFirBank {
    fn centers(&self) -> &[f64] {
        &self.centers
    }

    fn filter_band(&self, audio: &AudioBuffer, band: usize) -> Result<AudioBuffer> {
        check_input(
            audio,
            band,
            self.centers.len(),
            self.sample_rate,
            self.min_samples(),
        )?;
        let taps = &self.taps[band];
        let mut planner = FftPlanner::new();
        map_channels(audio, |ch| {
            let x = ch.to_vec();
            let mut y = fir_pass(&mut planner, taps, &x);
            y.reverse();
            let mut y = fir_pass(&mut planner, taps, &y);
            y.reverse();
            Ok(y)
        })
    }

    fn min_samples(&self) -> usize {
        self.taps.first().map(|t| t.len()).unwrap_or(1)
    }
}
