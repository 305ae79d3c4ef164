//! Where cycle buffers come from.
//!
//! Acquisition hardware lives outside this crate; anything that can hand
//! over fixed-length multichannel buffers implements [AudioSource]. A
//! recorded WAV file ([WavSource]) and the point-source simulator in
//! [crate::simulator] are the two sources shipped here.

use crate::audio::AudioBuffer;
use crate::error::{DoaError, Result};
use crate::wav::read_wav;
use log::debug;
use std::path::Path;

/// A typed iterator over cycle buffers, all sharing one sample rate and
/// channel count.
pub trait AudioSource: Iterator<Item = AudioBuffer> {
    /// Sample rate of every cycle, Hz.
    fn sample_rate(&self) -> f64;

    /// Channels in every cycle.
    fn n_channels(&self) -> usize;
}

/// Replays a multichannel recording in cycle-sized chunks. A trailing chunk
/// shorter than a cycle is dropped.
#[derive(Debug, Clone)]
pub struct WavSource {
    audio: AudioBuffer,
    cycle_samples: usize,
    position: usize,
}

impl WavSource {
    /// Chunks an in-memory recording.
    pub fn new(audio: AudioBuffer, cycle_samples: usize) -> Result<Self> {
        if cycle_samples == 0 {
            return Err(DoaError::config("cycle length must be at least one sample"));
        }
        if audio.n_samples() < cycle_samples {
            return Err(DoaError::InsufficientData {
                needed: cycle_samples,
                got: audio.n_samples(),
            });
        }
        Ok(Self {
            audio,
            cycle_samples,
            position: 0,
        })
    }

    /// Reads the recording at `path` and chunks it into cycles of
    /// `cycle_seconds`.
    pub fn from_path(path: impl AsRef<Path>, cycle_seconds: f64) -> Result<Self> {
        let audio = read_wav(path)?;
        let cycle_samples = (cycle_seconds * audio.sample_rate()).round() as usize;
        debug!(
            "replaying {} channels at {} Hz in cycles of {} samples",
            audio.n_channels(),
            audio.sample_rate(),
            cycle_samples
        );
        Self::new(audio, cycle_samples)
    }

    /// Number of whole cycles in the recording.
    pub fn cycles(&self) -> usize {
        self.audio.n_samples() / self.cycle_samples
    }
}

impl Iterator for WavSource {
    type Item = AudioBuffer;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.audio.window(self.position, self.cycle_samples).ok()?;
        self.position += self.cycle_samples;
        Some(chunk)
    }
}

impl AudioSource for WavSource {
    fn sample_rate(&self) -> f64 {
        self.audio.sample_rate()
    }

    fn n_channels(&self) -> usize {
        self.audio.n_channels()
    }
}
