//! A synthetic point source, for exercising the locator without hardware.
//!
//! A source is a sum of tones, either far away in a given direction (every
//! microphone sees the same plane wave, shifted) or at a point in space
//! (spherical wave, optionally with 1/r spreading). Delays are applied
//! exactly to each tone rather than rounded to whole samples, so the
//! rendered buffers match the steering models to floating-point precision.

use crate::audio::AudioBuffer;
use crate::error::{DoaError, Result};
use crate::geometry::{ArrayGeometry, Position};
use crate::source::AudioSource;
use log::warn;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::f64::consts::PI;

/// Where the simulated source sits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceLocation {
    /// A distant source, azimuth and elevation in radians
    Direction {
        /// Azimuth
        theta: f64,
        /// Elevation from the array normal
        phi: f64,
    },
    /// A nearby source at a position relative to the array centre
    Point(Position),
}

/// A sum of tones radiating from one location.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSource {
    location: SourceLocation,
    tones: Vec<(f64, f64)>,
    noise: f64,
    seed: u64,
    attenuate: bool,
}

impl PointSource {
    /// A noiseless source of `(frequency, amplitude)` tones.
    pub fn new(location: SourceLocation, tones: Vec<(f64, f64)>) -> Self {
        Self {
            location,
            tones,
            noise: 0.0,
            seed: 0,
            attenuate: false,
        }
    }

    /// Adds independent uniform noise of ±`level` to every sample.
    pub fn with_noise(self, level: f64, seed: u64) -> Self {
        Self {
            noise: level,
            seed,
            ..self
        }
    }

    /// Scales each microphone by `reference / local` range, for point
    /// sources.
    pub fn with_attenuation(self, attenuate: bool) -> Self {
        Self { attenuate, ..self }
    }

    /// Where the source sits.
    pub fn location(&self) -> SourceLocation {
        self.location
    }

    /// How far ahead of the array centre each microphone hears the source,
    /// in seconds, and the gain it hears it with.
    pub fn arrivals(&self, geometry: &ArrayGeometry) -> Result<Vec<(f64, f64)>> {
        geometry.validate()?;
        let c = geometry.speed_of_sound;
        let mics = geometry.mic_positions();
        match self.location {
            SourceLocation::Direction { theta, phi } => {
                let u = [theta.cos() * phi.sin(), theta.sin() * phi.sin(), phi.cos()];
                Ok(mics
                    .iter()
                    .map(|p| ((p[0] * u[0] + p[1] * u[1] + p[2] * u[2]) / c, 1.0))
                    .collect())
            }
            SourceLocation::Point(s) => {
                let reference = (s[0] * s[0] + s[1] * s[1] + s[2] * s[2]).sqrt();
                mics.iter()
                    .map(|p| {
                        let d = [s[0] - p[0], s[1] - p[1], s[2] - p[2]];
                        let local = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
                        if local <= f64::EPSILON {
                            return Err(DoaError::config("source sits on a microphone"));
                        }
                        let gain = if self.attenuate {
                            reference / local
                        } else {
                            1.0
                        };
                        Ok(((reference - local) / c, gain))
                    })
                    .collect()
            }
        }
    }

    /// Renders `n_samples` of every microphone.
    pub fn render(
        &self,
        geometry: &ArrayGeometry,
        sample_rate: f64,
        n_samples: usize,
    ) -> Result<AudioBuffer> {
        self.render_from(geometry, sample_rate, 0, n_samples)
    }

    /// Renders `n_samples` starting at sample `start`, so consecutive calls
    /// join up seamlessly.
    pub fn render_from(
        &self,
        geometry: &ArrayGeometry,
        sample_rate: f64,
        start: usize,
        n_samples: usize,
    ) -> Result<AudioBuffer> {
        if n_samples == 0 {
            return Err(DoaError::InsufficientData { needed: 1, got: 0 });
        }
        let nyquist = sample_rate / 2.0;
        if let Some((f, _)) = self.tones.iter().find(|(f, _)| !(*f > 0.0 && *f < nyquist)) {
            return Err(DoaError::config(format!(
                "tone at {} Hz does not fit below Nyquist ({} Hz)",
                f, nyquist
            )));
        }
        let arrivals = self.arrivals(geometry)?;

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(start as u64));
        let noise = if self.noise > 0.0 {
            Some(Uniform::new_inclusive(-self.noise, self.noise))
        } else {
            None
        };

        let channels = arrivals
            .iter()
            .map(|&(lead, gain)| {
                (0..n_samples)
                    .map(|i| {
                        let t = (start + i) as f64 / sample_rate + lead;
                        let clean: f64 = self
                            .tones
                            .iter()
                            .map(|(f, a)| a * (2.0 * PI * f * t).cos())
                            .sum();
                        let n = noise.map(|d| d.sample(&mut rng)).unwrap_or(0.0);
                        gain * clean + n
                    })
                    .collect()
            })
            .collect();
        AudioBuffer::from_channels(channels, sample_rate)
    }
}

/// An endless stream of simulated cycle buffers.
#[derive(Debug, Clone)]
pub struct SimulatedArray {
    source: PointSource,
    geometry: ArrayGeometry,
    sample_rate: f64,
    cycle_samples: usize,
    position: usize,
}

impl SimulatedArray {
    /// Streams `source` in cycles of `cycle_samples`.
    pub fn new(
        source: PointSource,
        geometry: ArrayGeometry,
        sample_rate: f64,
        cycle_samples: usize,
    ) -> Self {
        Self {
            source,
            geometry,
            sample_rate,
            cycle_samples,
            position: 0,
        }
    }

    /// Moves the source for subsequent cycles.
    pub fn set_location(&mut self, location: SourceLocation) {
        self.source.location = location;
    }
}

impl Iterator for SimulatedArray {
    type Item = AudioBuffer;

    fn next(&mut self) -> Option<Self::Item> {
        match self.source.render_from(
            &self.geometry,
            self.sample_rate,
            self.position,
            self.cycle_samples,
        ) {
            Ok(buf) => {
                self.position += self.cycle_samples;
                Some(buf)
            }
            Err(e) => {
                warn!("simulated array stopped: {}", e);
                None
            }
        }
    }
}

impl AudioSource for SimulatedArray {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn n_channels(&self) -> usize {
        self.geometry.n_mics
    }
}
