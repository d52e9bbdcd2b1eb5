//! Decoded PCM audio handling.
//!
//! Every backend normalizes its output into an [`AudioBuffer`] — 16-bit
//! interleaved samples at a fixed rate — so the export pipeline never has
//! to care which engine produced the audio.

use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Context};

/// Ordered, decoded audio samples with a fixed sample rate and channel
/// count. Fragments are concatenated in arrival order; order is temporal
/// and must be preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
        }
    }

    pub fn from_samples(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Build a mono buffer from a raw float waveform, clipping samples to
    /// `[-1.0, 1.0]` before 16-bit quantization.
    pub fn from_f32_mono(waveform: &[f32], sample_rate: u32) -> Self {
        Self::from_f32_interleaved(waveform, sample_rate, 1)
    }

    /// Build a buffer from a channel-interleaved float waveform, clipping
    /// samples to `[-1.0, 1.0]` before 16-bit quantization.
    pub fn from_f32_interleaved(waveform: &[f32], sample_rate: u32, channels: u16) -> Self {
        let samples = waveform
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Interpret raw little-endian signed 16-bit bytes as samples. A
    /// trailing odd byte is rejected rather than silently dropped.
    pub fn from_pcm_s16le(bytes: &[u8], sample_rate: u32, channels: u16) -> anyhow::Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(anyhow!("PCM payload has odd length {}", bytes.len()));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Decode a WAV file from disk.
    pub fn from_wav_file(path: &Path) -> anyhow::Result<Self> {
        let reader = hound::WavReader::open(path)
            .with_context(|| format!("opening WAV file {}", path.display()))?;
        Self::from_wav_reader(reader)
    }

    /// Decode WAV data held in memory.
    pub fn from_wav_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes)).context("parsing WAV data")?;
        Self::from_wav_reader(reader)
    }

    fn from_wav_reader<R: std::io::Read>(reader: hound::WavReader<R>) -> anyhow::Result<Self> {
        let spec = reader.spec();
        let samples: Result<Vec<i16>, _> = match spec.sample_format {
            hound::SampleFormat::Int => reader.into_samples::<i16>().collect(),
            hound::SampleFormat::Float => {
                return reader
                    .into_samples::<f32>()
                    .collect::<Result<Vec<f32>, _>>()
                    .map(|floats| {
                        Self::from_f32_interleaved(&floats, spec.sample_rate, spec.channels)
                    })
                    .context("reading float WAV samples");
            }
        };
        Ok(Self {
            samples: samples.context("reading WAV samples")?,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }

    /// Write the buffer to disk as a 16-bit PCM WAV file.
    pub fn write_wav(&self, path: &Path) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("creating WAV file {}", path.display()))?;
        for sample in &self.samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize().context("finalizing WAV file")?;
        Ok(())
    }

    /// Append another buffer's samples after this buffer's. Formats must
    /// match — mixing sample rates would silently change playback speed.
    pub fn append(&mut self, other: &AudioBuffer) -> anyhow::Result<()> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            return Err(anyhow!(
                "cannot concatenate {} Hz/{}ch audio onto {} Hz/{}ch buffer",
                other.sample_rate,
                other.channels,
                self.sample_rate,
                self.channels
            ));
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Append a raw float fragment, clipping and quantizing on the way in.
    pub fn extend_from_f32(&mut self, waveform: &[f32]) {
        self.samples.extend(
            waveform
                .iter()
                .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
        );
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Playback duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_f32_clips_out_of_range_samples() {
        let buf = AudioBuffer::from_f32_mono(&[2.0, -3.0, 0.0], 24000);
        assert_eq!(buf.samples()[0], i16::MAX);
        assert_eq!(buf.samples()[1], -i16::MAX);
        assert_eq!(buf.samples()[2], 0);
    }

    #[test]
    fn append_preserves_order() {
        let mut a = AudioBuffer::from_samples(vec![1, 2], 24000, 1);
        let b = AudioBuffer::from_samples(vec![3, 4], 24000, 1);
        a.append(&b).unwrap();
        assert_eq!(a.samples(), &[1, 2, 3, 4]);
    }

    #[test]
    fn append_rejects_mismatched_rate() {
        let mut a = AudioBuffer::from_samples(vec![1], 24000, 1);
        let b = AudioBuffer::from_samples(vec![2], 22050, 1);
        assert!(a.append(&b).is_err(), "Mismatched rates must not concat");
    }

    #[test]
    fn pcm_s16le_round_trip() {
        let bytes = [0x01, 0x00, 0xFF, 0x7F];
        let buf = AudioBuffer::from_pcm_s16le(&bytes, 24000, 1).unwrap();
        assert_eq!(buf.samples(), &[1, i16::MAX]);
    }

    #[test]
    fn pcm_s16le_rejects_odd_length() {
        assert!(AudioBuffer::from_pcm_s16le(&[0x01], 24000, 1).is_err());
    }

    #[test]
    fn wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let original = AudioBuffer::from_samples(vec![0, 100, -100, 32000], 22050, 1);
        original.write_wav(&path).unwrap();
        let decoded = AudioBuffer::from_wav_file(&path).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn stereo_float_wav_keeps_its_channel_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for sample in [0.5f32, -0.5, 1.0, -1.0] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let buf = AudioBuffer::from_wav_file(&path).unwrap();
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.sample_rate(), 48000);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.samples()[2], i16::MAX);
    }

    #[test]
    fn duration_accounts_for_channels() {
        let buf = AudioBuffer::from_samples(vec![0; 48000], 24000, 2);
        assert!((buf.duration_seconds() - 1.0).abs() < 1e-9);
    }
}
