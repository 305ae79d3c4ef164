//! Time-domain beamformers that turn the array into a directional
//! microphone: delay-multiply-and-sum (DMAS) and plain delay-and-sum.

use crate::audio::AudioBuffer;
use crate::butterworth::ButterworthBandpass;
use crate::error::{DoaError, Result};
use crate::geometry::ArrayGeometry;
use crate::spectral::analytic_envelope;
use log::debug;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Post-processing applied to a DMAS trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmasOptions {
    /// Optional zero-phase band-pass `(low, high)` in Hz on the envelope
    pub band: Option<(f64, f64)>,
    /// Order of that band-pass
    pub order: usize,
}

impl Default for DmasOptions {
    fn default() -> Self {
        Self {
            band: None,
            order: 5,
        }
    }
}

/// Per-microphone delay, in seconds, that lines every channel up on a plane
/// wave from (`theta`, `phi`). The smallest delay is 0.
pub fn steering_delays(geometry: &ArrayGeometry, theta: f64, phi: f64) -> Vec<f64> {
    let theta = theta - geometry.theta_offset();
    let u = [theta.cos() * phi.sin(), theta.sin() * phi.sin(), phi.cos()];
    let lead: Vec<f64> = geometry
        .mic_positions()
        .iter()
        .map(|p| (p[0] * u[0] + p[1] * u[1] + p[2] * u[2]) / geometry.speed_of_sound)
        .collect();
    let min = lead.iter().cloned().fold(f64::INFINITY, f64::min);
    lead.iter().map(|d| d - min).collect()
}

fn delay_samples(delays: &[f64], sample_rate: f64) -> Vec<usize> {
    delays
        .iter()
        .map(|d| (d * sample_rate).floor().max(0.0) as usize)
        .collect()
}

/// Ring microphone facing `theta` and its two neighbours on the ring.
pub fn reference_mics(geometry: &ArrayGeometry, theta: f64) -> Vec<usize> {
    let n_ring = geometry.n_ring();
    let theta = theta - geometry.theta_offset();
    let angular_distance = |k: usize| {
        let d = (theta - geometry.mic_angle(k)).rem_euclid(2.0 * PI);
        d.min(2.0 * PI - d)
    };
    let nearest = (0..n_ring)
        .min_by(|&a, &b| angular_distance(a).total_cmp(&angular_distance(b)))
        .unwrap_or(0);

    let mut refs = vec![
        nearest,
        (nearest + 1) % n_ring,
        (nearest + n_ring - 1) % n_ring,
    ];
    refs.sort_unstable();
    refs.dedup();
    refs
}

fn check_audio(audio: &AudioBuffer, geometry: &ArrayGeometry) -> Result<()> {
    geometry.validate()?;
    if audio.n_channels() != geometry.n_mics {
        return Err(DoaError::shape(format!(
            "{} channels for a {} microphone array",
            audio.n_channels(),
            geometry.n_mics
        )));
    }
    Ok(())
}

/// Channel `ch` shifted right by `shift` samples, zero-filled at the start.
fn aligned(audio: &AudioBuffer, ch: usize, shift: usize) -> Vec<f64> {
    let n = audio.n_samples();
    let src = audio.channel(ch);
    (0..n)
        .map(|i| if i >= shift { src[i - shift] } else { 0.0 })
        .collect()
}

/// Delay-multiply-and-sum towards (`theta`, `phi`), followed by the
/// analytic-signal envelope.
pub fn dmas_beamform(
    audio: &AudioBuffer,
    theta: f64,
    phi: f64,
    geometry: &ArrayGeometry,
    options: &DmasOptions,
) -> Result<Vec<f64>> {
    check_audio(audio, geometry)?;
    let n = audio.n_samples();
    let shifts = delay_samples(&steering_delays(geometry, theta, phi), audio.sample_rate());
    let channels: Vec<Vec<f64>> = shifts
        .iter()
        .enumerate()
        .map(|(ch, &s)| aligned(audio, ch, s))
        .collect();

    let refs = reference_mics(geometry, theta);
    let mut sum = vec![0.0; n];
    let mut count = 0usize;
    for &i in &refs {
        for j in (0..geometry.n_mics).filter(|&j| j != i) {
            for ((acc, a), b) in sum.iter_mut().zip(&channels[i]).zip(&channels[j]) {
                let p = a * b;
                *acc += p.signum() * p.abs().sqrt();
            }
            count += 1;
        }
    }
    for v in sum.iter_mut() {
        *v /= count as f64;
    }
    debug!(
        "dmas towards ({:.1}°, {:.1}°) over {} products from references {:?}",
        theta.to_degrees(),
        phi.to_degrees(),
        count,
        refs
    );

    let envelope = analytic_envelope(&sum);
    match options.band {
        Some((low, high)) => {
            ButterworthBandpass::design(low, high, audio.sample_rate(), options.order)?
                .filtfilt(&envelope)
        }
        None => Ok(envelope),
    }
}

/// Delay-and-sum towards (`theta`, `phi`). Channels are first brought to a
/// common RMS level so one hot microphone cannot dominate.
pub fn delay_and_sum(
    audio: &AudioBuffer,
    theta: f64,
    phi: f64,
    geometry: &ArrayGeometry,
) -> Result<Vec<f64>> {
    check_audio(audio, geometry)?;
    let n = audio.n_samples();
    let rms = audio.channel_rms();
    let target = rms.iter().sum::<f64>() / rms.len() as f64;
    let shifts = delay_samples(&steering_delays(geometry, theta, phi), audio.sample_rate());

    let mut out = vec![0.0; n];
    for (ch, &s) in shifts.iter().enumerate() {
        let gain = if rms[ch] > 0.0 { target / rms[ch] } else { 0.0 };
        for (acc, v) in out.iter_mut().zip(aligned(audio, ch, s)) {
            *acc += gain * v;
        }
    }
    let m = geometry.n_mics as f64;
    Ok(out.into_iter().map(|v| v / m).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::{Distribution, Uniform};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn broadside_mics_share_a_delay() {
        let g = ArrayGeometry::new(4, 0.05, 340.0);
        let d = steering_delays(&g, PI / 2.0, PI / 2.0);
        assert!((d[0] - d[2]).abs() < 1e-15);
        assert_eq!(d.iter().cloned().fold(f64::INFINITY, f64::min), 0.0);
    }

    #[test]
    fn delays_favour_the_far_side() {
        let g = ArrayGeometry::new(4, 0.05, 340.0);
        let d = steering_delays(&g, 0.0, PI / 2.0);
        // mic 0 hears it first, so waits the longest
        assert!((d[0] - 0.1 / 340.0).abs() < 1e-12);
        assert!(d[2].abs() < 1e-12);
    }

    #[test]
    fn references_wrap_around_the_ring() {
        let g = ArrayGeometry::new(8, 0.05, 340.0);
        assert_eq!(reference_mics(&g, 0.0), vec![0, 1, 7]);
        // mic 2 sits at -90°
        assert_eq!(reference_mics(&g, f64::to_radians(270.0)), vec![1, 2, 3]);

        let tiny = ArrayGeometry::new(2, 0.05, 340.0);
        assert_eq!(reference_mics(&tiny, 0.0), vec![0, 1]);

        let odd = ArrayGeometry::new(5, 0.05, 340.0);
        assert!(reference_mics(&odd, 1.0).iter().all(|&k| k < 4));
    }

    fn noise_array(geometry: &ArrayGeometry, theta: f64, fs: f64, n: usize) -> AudioBuffer {
        let shifts = delay_samples(&steering_delays(geometry, theta, PI / 2.0), fs);
        let max = *shifts.iter().max().unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let dist = Uniform::new(-1.0, 1.0);
        let s: Vec<f64> = dist.sample_iter(&mut rng).take(n + max).collect();
        // the mic with the largest shift hears the wavefront first
        let channels = shifts
            .iter()
            .map(|&d| s[d..d + n].to_vec())
            .collect();
        AudioBuffer::from_channels(channels, fs).unwrap()
    }

    fn energy(x: &[f64]) -> f64 {
        x.iter().map(|v| v * v).sum()
    }

    #[test]
    fn dmas_prefers_the_true_direction() {
        let g = ArrayGeometry::new(8, 0.5, 340.0);
        let fs = 48000.0;
        let theta = f64::to_radians(45.0);
        let audio = noise_array(&g, theta, fs, 4800);
        let opts = DmasOptions::default();

        let on = dmas_beamform(&audio, theta, PI / 2.0, &g, &opts).unwrap();
        let off = dmas_beamform(&audio, theta + PI, PI / 2.0, &g, &opts).unwrap();
        assert_eq!(on.len(), 4800);
        assert!(energy(&on) > energy(&off));
    }

    #[test]
    fn dmas_with_band() {
        let g = ArrayGeometry::new(4, 0.05, 340.0);
        let audio = noise_array(&g, 0.0, 16000.0, 1600);
        let opts = DmasOptions {
            band: Some((100.0, 2000.0)),
            order: 3,
        };
        let y = dmas_beamform(&audio, 0.0, PI / 2.0, &g, &opts).unwrap();
        assert_eq!(y.len(), 1600);
        assert!(y.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn delay_and_sum_reinforces_the_true_direction() {
        let g = ArrayGeometry::new(8, 0.5, 340.0);
        let fs = 48000.0;
        let theta = f64::to_radians(200.0);
        let audio = noise_array(&g, theta, fs, 4800);
        let on = delay_and_sum(&audio, theta, PI / 2.0, &g).unwrap();
        let off = delay_and_sum(&audio, theta + PI, PI / 2.0, &g).unwrap();
        assert!(energy(&on) > 2.0 * energy(&off));
    }

    #[test]
    fn channel_count_must_match() {
        let g = ArrayGeometry::new(4, 0.05, 340.0);
        let audio = AudioBuffer::from_channels(vec![vec![0.0; 100]; 3], 8000.0).unwrap();
        assert!(matches!(
            dmas_beamform(&audio, 0.0, 0.0, &g, &DmasOptions::default()),
            Err(DoaError::ShapeMismatch(_))
        ));
        assert!(delay_and_sum(&audio, 0.0, 0.0, &g).is_err());
    }
}
