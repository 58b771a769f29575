use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

pub fn write_silence(path: &Path, seconds: f64, sample_rate: u32) -> Result<(), hound::Error> {
    let samples = (f64::from(sample_rate) * seconds.max(0.0)).round() as u64;
    let mut writer = WavWriter::create(path, mono_spec(sample_rate))?;
    for _ in 0..samples {
        writer.write_sample(0i16)?;
    }
    writer.finalize()
}

/// Wraps raw little-endian 16-bit mono PCM in a WAV container.
pub fn write_pcm(path: &Path, pcm: &[u8], sample_rate: u32) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, mono_spec(sample_rate))?;
    for chunk in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize()
}

pub fn duration_seconds(path: &Path) -> Result<f64, hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let frames = f64::from(reader.len()) / f64::from(spec.channels.max(1));
    Ok(frames / f64::from(spec.sample_rate))
}
