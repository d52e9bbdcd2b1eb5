//! Voice-reference preprocessing.
//!
//! Reference-conditioned backends need each voice's sample clip encoded
//! into a token artifact before synthesis. Encoding is expensive, so the
//! artifact is computed once per clip and persisted next to it; clips that
//! are empty or shorter than one second carry too little voice identity
//! and are skipped.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::TtsError;

/// Minimum usable reference-clip duration.
const MIN_REFERENCE_SECONDS: f64 = 1.0;

/// File extension of the persisted token artifact.
pub const TOKEN_EXTENSION: &str = "tokens";

/// Precomputed encoding of a reference clip, conditioning synthesis on
/// the target voice's characteristics. Opaque to everything but the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTokens(pub Vec<i64>);

/// The opaque encoder turning a raw waveform into reference tokens.
pub trait ReferenceEncoder: Send + Sync {
    fn encode(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<ReferenceTokens>;
}

/// Path of the token artifact paired with `voice_id` in `voices_dir`.
pub fn token_path(voices_dir: &Path, voice_id: &str) -> PathBuf {
    voices_dir.join(format!("{voice_id}.{TOKEN_EXTENSION}"))
}

/// Encode every `.wav` clip in `voices_dir` that does not already have a
/// token artifact. Returns how many artifacts were written.
///
/// Unreadable, empty, or under-one-second clips are skipped with a log
/// line; they never fail the whole pass. Encoder failures do fail it —
/// they indicate a broken model, not a bad clip.
pub fn prepare_reference_files(
    voices_dir: &Path,
    encoder: &dyn ReferenceEncoder,
) -> Result<usize, TtsError> {
    let entries = std::fs::read_dir(voices_dir)
        .with_context(|| format!("scanning voices directory {}", voices_dir.display()))
        .map_err(TtsError::VoiceDiscovery)?;

    let mut written = 0;
    for entry in entries {
        let entry = entry
            .context("reading voices directory entry")
            .map_err(TtsError::VoiceDiscovery)?;
        let wav_path = entry.path();
        if wav_path.extension().and_then(|e| e.to_str()) != Some("wav") {
            continue;
        }
        let Some(stem) = wav_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let artifact = token_path(voices_dir, stem);
        if artifact.exists() {
            continue;
        }

        let (samples, sample_rate) = match read_clip(&wav_path) {
            Ok(clip) => clip,
            Err(e) => {
                tracing::warn!(clip = %wav_path.display(), error = %e, "skipping unreadable reference clip");
                continue;
            }
        };
        if samples.is_empty() {
            tracing::warn!(clip = %wav_path.display(), "skipping empty reference clip");
            continue;
        }
        let duration = samples.len() as f64 / sample_rate as f64;
        if duration < MIN_REFERENCE_SECONDS {
            tracing::warn!(
                clip = %wav_path.display(),
                duration_secs = duration,
                "skipping reference clip shorter than one second"
            );
            continue;
        }

        let tokens = encoder
            .encode(&samples, sample_rate)
            .with_context(|| format!("encoding reference clip {}", wav_path.display()))
            .map_err(TtsError::Synthesis)?;
        let payload = bincode::serialize(&tokens)
            .context("serializing reference tokens")
            .map_err(TtsError::Synthesis)?;
        std::fs::write(&artifact, payload)
            .with_context(|| format!("writing token artifact {}", artifact.display()))
            .map_err(TtsError::Synthesis)?;
        tracing::info!(artifact = %artifact.display(), "generated reference tokens");
        written += 1;
    }
    Ok(written)
}

/// Load the token artifact for `voice_id`, or `None` when preprocessing
/// never produced one (short clip, unreadable clip, unknown voice).
pub fn load_reference_tokens(voices_dir: &Path, voice_id: &str) -> Option<ReferenceTokens> {
    let artifact = token_path(voices_dir, voice_id);
    let payload = match std::fs::read(&artifact) {
        Ok(payload) => payload,
        Err(_) => {
            tracing::warn!(voice = voice_id, "reference tokens not found");
            return None;
        }
    };
    match bincode::deserialize(&payload) {
        Ok(tokens) => Some(tokens),
        Err(e) => {
            tracing::warn!(voice = voice_id, error = %e, "reference token artifact is corrupt");
            None
        }
    }
}

/// Read a clip as a normalized mono-interleaved `f32` waveform.
fn read_clip(path: &Path) -> anyhow::Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<f32>, _>>()?
        }
    };
    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingEncoder {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl CountingEncoder {
        fn new() -> Self {
            Self {
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl ReferenceEncoder for CountingEncoder {
        fn encode(&self, samples: &[f32], _sample_rate: u32) -> anyhow::Result<ReferenceTokens> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(ReferenceTokens(vec![samples.len() as i64]))
        }
    }

    fn write_clip(dir: &Path, name: &str, seconds: f64, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(dir.join(name), spec).unwrap();
        let count = (seconds * sample_rate as f64) as usize;
        for i in 0..count {
            writer.write_sample((i % 64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn encodes_long_clips_and_skips_short_ones() {
        let dir = tempfile::tempdir().unwrap();
        write_clip(dir.path(), "alice.wav", 2.0, 16000);
        write_clip(dir.path(), "blip.wav", 0.4, 16000);

        let encoder = CountingEncoder::new();
        let written = prepare_reference_files(dir.path(), &encoder).unwrap();

        assert_eq!(written, 1);
        assert!(token_path(dir.path(), "alice").exists());
        assert!(!token_path(dir.path(), "blip").exists(), "short clip must be skipped");
    }

    #[test]
    fn existing_artifacts_are_not_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        write_clip(dir.path(), "alice.wav", 1.5, 16000);

        let encoder = CountingEncoder::new();
        assert_eq!(prepare_reference_files(dir.path(), &encoder).unwrap(), 1);
        assert_eq!(prepare_reference_files(dir.path(), &encoder).unwrap(), 0);
        assert_eq!(encoder.calls(), 1, "second pass must reuse the artifact");
    }

    #[test]
    fn load_round_trips_through_bincode() {
        let dir = tempfile::tempdir().unwrap();
        write_clip(dir.path(), "alice.wav", 1.2, 8000);
        prepare_reference_files(dir.path(), &CountingEncoder::new()).unwrap();

        let tokens = load_reference_tokens(dir.path(), "alice").unwrap();
        assert_eq!(tokens.0, vec![(1.2f64 * 8000.0) as i64]);
    }

    #[test]
    fn missing_artifact_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_reference_tokens(dir.path(), "ghost").is_none());
    }

    #[test]
    fn missing_directory_is_a_discovery_error() {
        let err = prepare_reference_files(Path::new("/nonexistent/voices"), &CountingEncoder::new())
            .unwrap_err();
        assert!(matches!(err, TtsError::VoiceDiscovery(_)));
    }
}
