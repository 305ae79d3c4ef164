//! The multichannel buffer that one localisation cycle works on.

use crate::error::{DoaError, Result};
use crate::TransposableIter;
use ndarray::{s, Array2, ArrayView1, Axis};

/// A channels × samples block of audio at a fixed sample rate. Built once per
/// cycle and never mutated afterwards; conditioning methods hand back a new
/// buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    data: Array2<f64>,
    sample_rate: f64,
}

impl AudioBuffer {
    /// Builds a buffer from one vector per channel. All channels must be the
    /// same, non-zero, length.
    pub fn from_channels(channels: Vec<Vec<f64>>, sample_rate: f64) -> Result<Self> {
        let n_channels = channels.len();
        if n_channels == 0 {
            return Err(DoaError::shape("audio buffer has no channels"));
        }
        let n_samples = channels[0].len();
        if channels.iter().any(|c| c.len() != n_samples) {
            return Err(DoaError::shape("audio channels have unequal lengths"));
        }
        let flat: Vec<f64> = channels.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((n_channels, n_samples), flat)
            .map_err(|e| DoaError::shape(e.to_string()))?;
        Self::from_matrix(data, sample_rate)
    }

    /// Builds a buffer from interleaved frames, as they come out of a WAV
    /// file or a DAQ.
    pub fn from_interleaved(samples: &[f64], n_channels: usize, sample_rate: f64) -> Result<Self> {
        if n_channels == 0 {
            return Err(DoaError::shape("audio buffer has no channels"));
        }
        if samples.len() < n_channels {
            return Err(DoaError::InsufficientData {
                needed: n_channels,
                got: samples.len(),
            });
        }
        if samples.len() % n_channels != 0 {
            return Err(DoaError::shape(format!(
                "{} interleaved samples do not split into {} channels",
                samples.len(),
                n_channels
            )));
        }
        let channels: Vec<Vec<f64>> = samples
            .chunks_exact(n_channels)
            .transpose()
            .take(n_channels)
            .map(|c| c.into_iter().copied().collect())
            .collect();
        Self::from_channels(channels, sample_rate)
    }

    /// Wraps an existing channels × samples matrix.
    pub fn from_matrix(data: Array2<f64>, sample_rate: f64) -> Result<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DoaError::config(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if data.nrows() == 0 {
            return Err(DoaError::shape("audio buffer has no channels"));
        }
        Ok(Self { data, sample_rate })
    }

    /// A single channel buffer, used for steered traces.
    pub fn mono(samples: Vec<f64>, sample_rate: f64) -> Result<Self> {
        Self::from_channels(vec![samples], sample_rate)
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    /// Samples per channel.
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Duration of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        self.n_samples() as f64 / self.sample_rate
    }

    /// A view on one channel.
    pub fn channel(&self, index: usize) -> ArrayView1<f64> {
        self.data.row(index)
    }

    /// The underlying channels × samples matrix.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.data
    }

    /// Copies each channel out into its own vector.
    pub fn to_channels(&self) -> Vec<Vec<f64>> {
        self.data.rows().into_iter().map(|r| r.to_vec()).collect()
    }

    /// Frames interleaved channel by channel, ready for a WAV writer.
    pub fn to_interleaved(&self) -> Vec<f64> {
        self.data.t().iter().copied().collect()
    }

    /// Subtracts each channel's mean.
    pub fn remove_dc(&self) -> Self {
        let mut data = self.data.clone();
        for mut row in data.rows_mut() {
            let mean = row.mean().unwrap_or(0.0);
            row.mapv_inplace(|v| v - mean);
        }
        Self {
            data,
            sample_rate: self.sample_rate,
        }
    }

    /// A copy of `len` samples of every channel starting at `start`.
    pub fn window(&self, start: usize, len: usize) -> Result<Self> {
        let end = start + len;
        if len == 0 || end > self.n_samples() {
            return Err(DoaError::InsufficientData {
                needed: end.max(1),
                got: self.n_samples(),
            });
        }
        Ok(Self {
            data: self.data.slice(s![.., start..end]).to_owned(),
            sample_rate: self.sample_rate,
        })
    }

    /// Root mean square of each channel.
    pub fn channel_rms(&self) -> Vec<f64> {
        self.data
            .map_axis(Axis(1), |row| {
                (row.iter().map(|v| v * v).sum::<f64>() / row.len().max(1) as f64).sqrt()
            })
            .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_round_trip() {
        let frames = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let buf = AudioBuffer::from_interleaved(&frames, 2, 48000.0).unwrap();
        assert_eq!(buf.n_channels(), 2);
        assert_eq!(buf.n_samples(), 3);
        assert_eq!(buf.channel(1).to_vec(), vec![10.0, 20.0, 30.0]);
        assert_eq!(buf.to_interleaved(), frames.to_vec());
    }

    #[test]
    fn rejects_ragged_channels() {
        let res = AudioBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 8000.0);
        assert!(matches!(res, Err(DoaError::ShapeMismatch(_))));
    }

    #[test]
    fn rejects_partial_frame() {
        let res = AudioBuffer::from_interleaved(&[0.0; 5], 2, 8000.0);
        assert!(matches!(res, Err(DoaError::ShapeMismatch(_))));
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let res = AudioBuffer::from_channels(vec![vec![0.0; 4]], 0.0);
        assert!(matches!(res, Err(DoaError::ConfigurationError(_))));
    }

    #[test]
    fn remove_dc_centres_channels() {
        let buf =
            AudioBuffer::from_channels(vec![vec![1.0, 3.0], vec![-2.0, 0.0]], 100.0).unwrap();
        let centred = buf.remove_dc();
        assert_eq!(centred.channel(0).to_vec(), vec![-1.0, 1.0]);
        assert_eq!(centred.channel(1).to_vec(), vec![-1.0, 1.0]);
    }

    #[test]
    fn window_bounds() {
        let buf = AudioBuffer::from_channels(vec![(0..10).map(f64::from).collect()], 10.0).unwrap();
        let w = buf.window(2, 3).unwrap();
        assert_eq!(w.channel(0).to_vec(), vec![2.0, 3.0, 4.0]);
        assert!(buf.window(8, 3).is_err());
    }
}
