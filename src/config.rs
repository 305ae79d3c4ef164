//! Locator configuration, read from RON.
//!
//! Every section has a default matching the deployed pipe rig, so a config
//! file only needs to name what differs:
//!
//! ```text
//! (
//!     array: (n_mics: 8, radius: 0.06),
//!     surface: Plane(length: 2.0, height: 1.5, cells: 41),
//!     steering: NearField(Planar),
//!     fusion: "lin",
//! )
//! ```

use crate::dmas::DmasOptions;
use crate::error::{DoaError, Result};
use crate::filter_bank::{generate_filter_bank, linspace_centers};
use crate::fusion::FusionPolicy;
use crate::geometry::{ArrayGeometry, Surface};
use crate::manifold::SteeringModel;
use crate::music::MusicOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Filter used to split the buffer into bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FilterDesign {
    /// Zero-phase Butterworth band-passes
    Butterworth {
        /// Order of the low-pass prototype
        order: usize,
    },
    /// Sinusoidal FIR kernels
    TaperedFir {
        /// Kernel length in taps
        window_size: usize,
        /// Whether the raised-cosine taper is applied
        tapered: bool,
    },
}

impl Default for FilterDesign {
    fn default() -> Self {
        FilterDesign::Butterworth { order: 5 }
    }
}

/// Layout of the analysis bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    /// First centre frequency, Hz
    pub lower_freq: f64,
    /// Centres stay strictly below this, Hz
    pub upper_freq: f64,
    /// Spacing between centres, and the width of every band, Hz
    pub band_distance: f64,
    /// If set, lay out exactly this many centres from lower to upper
    /// inclusive instead of stepping by `band_distance`.
    pub total_bands: Option<usize>,
    /// Filter used for every band
    pub filter: FilterDesign,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            lower_freq: 1000.0,
            upper_freq: 7000.0,
            band_distance: 400.0,
            total_bands: None,
            filter: FilterDesign::default(),
        }
    }
}

impl BandConfig {
    /// Centre frequencies and the shared bandwidth at `sample_rate`.
    pub fn centers(&self, sample_rate: f64) -> Result<(Vec<f64>, f64)> {
        match self.total_bands {
            None => generate_filter_bank(
                self.band_distance,
                sample_rate,
                self.lower_freq,
                self.upper_freq,
            ),
            Some(total) => Ok((
                linspace_centers(total, self.lower_freq, self.upper_freq)?,
                self.band_distance,
            )),
        }
    }
}

/// Everything needed to build a [crate::engine::DoaEngine].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LocatorConfig {
    /// Microphone layout
    pub array: ArrayGeometry,
    /// Surface the maps cover
    pub surface: Surface,
    /// Manifold MUSIC is evaluated with
    pub steering: SteeringModel,
    /// Band layout and filter design
    pub bands: BandConfig,
    /// MUSIC tuning
    pub music: MusicOptions,
    /// How band maps are combined
    pub fusion: FusionPolicy,
    /// Beamformer tuning
    pub dmas: DmasOptions,
}

impl LocatorConfig {
    /// Reads and validates a RON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    /// Parses a RON config without validating it.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        Ok(ron::de::from_str(text)?)
    }

    /// Pretty RON representation.
    pub fn to_ron_string(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Checks everything that can be checked without audio.
    pub fn validate(&self) -> Result<()> {
        self.array.validate()?;
        if self.music.assumed_source_count >= self.array.n_mics {
            return Err(DoaError::config(format!(
                "cannot assume {} sources with {} microphones",
                self.music.assumed_source_count, self.array.n_mics
            )));
        }
        if let Some(eps) = self.music.epsilon {
            if !(eps.is_finite() && eps > 0.0) {
                return Err(DoaError::config("music epsilon must be positive"));
            }
        }
        match self.bands.filter {
            FilterDesign::Butterworth { order } if order == 0 => {
                return Err(DoaError::config("filter order must be at least 1"))
            }
            FilterDesign::TaperedFir { window_size, .. } if window_size < 2 => {
                return Err(DoaError::config("FIR window needs at least 2 taps"))
            }
            _ => {}
        }
        if matches!(self.steering, SteeringModel::NearField(_)) && !self.surface.is_near_field() {
            return Err(DoaError::config(
                "near-field steering needs a plane, pipe, or cylinder surface",
            ));
        }
        Ok(())
    }
}
