//! The configured localisation cycle: band-split, per-band MUSIC, fusion,
//! and steered listening towards any cell of the resulting map.

use crate::audio::AudioBuffer;
use crate::config::{FilterDesign, LocatorConfig};
use crate::dmas::dmas_beamform;
use crate::error::{DoaError, Result};
use crate::filter_bank::{ButterworthBank, FilterBank, TaperedFirBank};
use crate::fusion::{band_intensities, fuse_bands, normalize_map};
use crate::geometry::{GridCache, TargetGrid};
use crate::music::music_spectrum;
use crate::sphericalizer::cell_direction;
use log::{debug, info, warn};
use ndarray::Array2;
use std::sync::Arc;
use std::thread;

/// One cycle's worth of maps.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapFrame {
    /// Fused map rescaled to `[0, 1]`
    pub composite: Array2<f64>,
    /// Fused map as the policy produced it
    pub raw_composite: Array2<f64>,
    /// Every band that produced a map, rescaled to `[0, 1]`
    pub band_maps: Vec<Array2<f64>>,
    /// Centre frequency of each entry of `band_maps`
    pub band_centers: Vec<f64>,
}

impl HeatmapFrame {
    /// Per-band intensity of one cell, in band order.
    pub fn intensities(&self, row: usize, col: usize) -> Vec<f64> {
        band_intensities(&self.band_maps, row, col)
    }

    /// Cell holding the largest composite value.
    pub fn peak_cell(&self) -> (usize, usize) {
        let mut best = (0, 0);
        let mut best_v = f64::NEG_INFINITY;
        for ((r, c), &v) in self.composite.indexed_iter() {
            if v > best_v {
                best = (r, c);
                best_v = v;
            }
        }
        best
    }
}

/// Built once per configuration; every method is read-only, so one engine
/// can serve several threads.
pub struct DoaEngine {
    config: LocatorConfig,
    sample_rate: f64,
    grid: Arc<TargetGrid>,
    bank: Box<dyn FilterBank>,
}

impl DoaEngine {
    /// Validates `config` and builds the grid and filter bank for audio at
    /// `sample_rate`.
    pub fn new(config: LocatorConfig, sample_rate: f64) -> Result<Self> {
        Self::with_cache(config, sample_rate, &GridCache::new())
    }

    /// Same as [DoaEngine::new], reusing grids from `cache`.
    pub fn with_cache(config: LocatorConfig, sample_rate: f64, cache: &GridCache) -> Result<Self> {
        config.validate()?;
        let grid = cache.get_or_build(&config.surface, &config.array)?;
        config.steering.check_grid(&grid)?;

        let (centers, bandwidth) = config.bands.centers(sample_rate)?;
        let bank: Box<dyn FilterBank> = match config.bands.filter {
            FilterDesign::Butterworth { order } => Box::new(ButterworthBank::new(
                centers,
                bandwidth,
                sample_rate,
                order,
            )?),
            FilterDesign::TaperedFir {
                window_size,
                tapered,
            } => Box::new(TaperedFirBank::new(
                centers,
                sample_rate,
                window_size,
                tapered,
            )?),
        };
        Ok(Self::with_bank(config, sample_rate, grid, bank))
    }

    /// Assembles an engine around an already validated configuration.
    pub(crate) fn with_bank(
        config: LocatorConfig,
        sample_rate: f64,
        grid: Arc<TargetGrid>,
        bank: Box<dyn FilterBank>,
    ) -> Self {
        info!(
            "engine ready: {} mics, {}x{} grid, {} bands, {} fusion",
            config.array.n_mics,
            grid.shape().0,
            grid.shape().1,
            bank.len(),
            config.fusion
        );
        Self {
            config,
            sample_rate,
            grid,
            bank,
        }
    }

    /// Configuration the engine was built from.
    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Shared target grid every map is laid out on.
    pub fn grid(&self) -> &Arc<TargetGrid> {
        &self.grid
    }

    /// Centre frequency of every configured band.
    pub fn band_centers(&self) -> &[f64] {
        self.bank.centers()
    }

    /// Shortest cycle the engine will accept.
    pub fn min_samples(&self) -> usize {
        self.bank.min_samples().max(2 * self.config.array.n_mics)
    }

    fn check_audio(&self, audio: &AudioBuffer) -> Result<()> {
        if audio.n_channels() != self.config.array.n_mics {
            return Err(DoaError::shape(format!(
                "{} channels for a {} microphone array",
                audio.n_channels(),
                self.config.array.n_mics
            )));
        }
        if (audio.sample_rate() - self.sample_rate).abs() > 1e-6 {
            return Err(DoaError::config(format!(
                "engine configured for {} Hz, buffer is {} Hz",
                self.sample_rate,
                audio.sample_rate()
            )));
        }
        if audio.n_samples() < self.min_samples() {
            return Err(DoaError::InsufficientData {
                needed: self.min_samples(),
                got: audio.n_samples(),
            });
        }
        Ok(())
    }

    fn band_spectrum(&self, audio: &AudioBuffer, band: usize) -> Result<Array2<f64>> {
        let filtered = self.bank.filter_band(audio, band)?;
        music_spectrum(
            &filtered,
            self.bank.centers()[band],
            &self.grid,
            &self.config.array,
            &self.config.steering,
            &self.config.music,
        )
    }

    /// Runs one localisation cycle. Bands are processed in parallel; a band
    /// that fails is logged and left out, and the cycle only fails if every
    /// band does.
    pub fn heatmap(&self, audio: &AudioBuffer) -> Result<HeatmapFrame> {
        self.check_audio(audio)?;
        let n_bands = self.bank.len();
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(n_bands)
            .max(1);
        let per_worker = ((n_bands + workers - 1) / workers).max(1);

        let results: Vec<(usize, Result<Array2<f64>>)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..n_bands)
                .collect::<Vec<_>>()
                .chunks(per_worker)
                .map(|bands| {
                    let bands = bands.to_vec();
                    scope.spawn(move || {
                        bands
                            .into_iter()
                            .map(|b| (b, self.band_spectrum(audio, b)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(r) => r,
                    Err(_) => {
                        warn!("a band worker panicked");
                        Vec::new()
                    }
                })
                .collect()
        });

        let mut maps = Vec::with_capacity(n_bands);
        let mut centers = Vec::with_capacity(n_bands);
        let mut last_error = None;
        for (band, result) in results {
            match result {
                Ok(map) => {
                    maps.push(map);
                    centers.push(self.bank.centers()[band]);
                }
                Err(e) => {
                    warn!(
                        "skipping band {} ({} Hz): {}",
                        band,
                        self.bank.centers()[band],
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        if maps.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| DoaError::config("no bands configured")));
        }

        let (raw_composite, band_maps) = fuse_bands(&maps, self.config.fusion)?;
        let composite = normalize_map(&raw_composite);
        debug!("fused {} of {} bands", band_maps.len(), n_bands);
        Ok(HeatmapFrame {
            composite,
            raw_composite,
            band_maps,
            band_centers: centers,
        })
    }

    /// DMAS trace towards (`theta`, `phi`) in radians.
    pub fn steer(&self, audio: &AudioBuffer, theta: f64, phi: f64) -> Result<Vec<f64>> {
        self.check_audio(audio)?;
        dmas_beamform(audio, theta, phi, &self.config.array, &self.config.dmas)
    }

    /// DMAS trace towards the centre of cell (`row`, `col`).
    pub fn steer_cell(&self, audio: &AudioBuffer, row: usize, col: usize) -> Result<Vec<f64>> {
        let dir = cell_direction(&self.grid, row, col)?;
        self.steer(audio, dir.theta, dir.phi)
    }

    /// Steered trace towards a cell, re-weighted so every band is as loud as
    /// that cell was in `frame`'s band maps.
    pub fn listen(
        &self,
        audio: &AudioBuffer,
        frame: &HeatmapFrame,
        row: usize,
        col: usize,
    ) -> Result<Vec<f64>> {
        let trace = self.steer_cell(audio, row, col)?;
        let intensities = frame.intensities(row, col);
        let mono = AudioBuffer::mono(trace, audio.sample_rate())?;

        let mut out = vec![0.0; mono.n_samples()];
        for (fc, weight) in frame.band_centers.iter().zip(intensities) {
            let band = self
                .bank
                .centers()
                .iter()
                .position(|c| c == fc)
                .ok_or_else(|| DoaError::shape(format!("frame band {} Hz is not configured", fc)))?;
            let filtered = self.bank.filter_band(&mono, band)?;
            for (acc, v) in out.iter_mut().zip(filtered.channel(0).iter()) {
                *acc += weight * v;
            }
        }
        Ok(out)
    }
}
