//! A small wrapper for the hound library suited to multichannel array
//! recordings and mono steered traces.

use crate::audio::AudioBuffer;
use crate::error::Result;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Read, Seek, Write};
use std::path::Path;

/// Spec used for everything this crate writes: 32-bit float samples.
pub fn float_spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Opens a WAV file and de-interleaves it into an [AudioBuffer]. Integer
/// samples are scaled to ±1.
pub fn read_wav(path: impl AsRef<Path>) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)?;
    decode(reader)
}

/// Same as [read_wav], from any reader.
pub fn read_wav_from<R: Read>(reader: R) -> Result<AudioBuffer> {
    decode(WavReader::new(reader)?)
}

fn decode<R: Read>(mut reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let samples: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    AudioBuffer::from_interleaved(&samples, spec.channels as usize, spec.sample_rate as f64)
}

/// Writes every channel of `audio` as a float WAV file.
pub fn write_wav(path: impl AsRef<Path>, audio: &AudioBuffer) -> Result<()> {
    let spec = float_spec(audio.n_channels() as u16, audio.sample_rate().round() as u32);
    let mut writer = WavWriter::create(path, spec)?;
    write_samples(&mut writer, &audio.to_interleaved())?;
    writer.finalize()?;
    Ok(())
}

/// Writes a single steered trace as a mono float WAV file.
pub fn write_mono(path: impl AsRef<Path>, samples: &[f64], sample_rate: f64) -> Result<()> {
    let mut writer = WavWriter::create(path, float_spec(1, sample_rate.round() as u32))?;
    write_samples(&mut writer, samples)?;
    writer.finalize()?;
    Ok(())
}

/// Appends interleaved samples to an open writer.
pub fn write_samples<W: Write + Seek>(writer: &mut WavWriter<W>, samples: &[f64]) -> Result<()> {
    for &s in samples {
        writer.write_sample(s as f32)?;
    }
    Ok(())
}
