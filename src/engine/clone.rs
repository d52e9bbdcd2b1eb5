//! Native in-process voice-cloning engine.
//!
//! Wraps a synchronous cloning model (reference clip + its transcript +
//! target text in, raw waveform out). Inference is blocking and runs on
//! the blocking thread pool; the raw float waveform is clipped to the
//! representable range before 16-bit quantization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;

use super::{validate_text, TtsEngine};
use crate::audio::AudioBuffer;
use crate::captions::CaptionTrack;
use crate::error::TtsError;

const DEFAULT_MAX_TEXT_LEN: usize = 100_000;

/// The opaque synchronous inference call. `infer` returns the sample rate
/// and the raw waveform; both are produced in one blocking call.
pub trait VoiceCloneModel: Send + Sync {
    fn infer(
        &self,
        reference_clip: &Path,
        reference_text: &str,
        text: &str,
    ) -> anyhow::Result<(u32, Vec<f32>)>;
}

/// Engine over a directory of reference clips. Each voice is a `.wav`
/// clip with a paired `.txt` transcript; the clip's stem is the voice id.
pub struct CloneEngine {
    model: Arc<dyn VoiceCloneModel>,
    voices_dir: PathBuf,
    engine_id: String,
    max_text_len: usize,
}

impl CloneEngine {
    pub fn new(model: Arc<dyn VoiceCloneModel>, voices_dir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            voices_dir: voices_dir.into(),
            engine_id: "clone".to_string(),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.engine_id = id.into();
        self
    }

    fn clip_path(&self, voice_id: &str) -> PathBuf {
        self.voices_dir.join(format!("{voice_id}.wav"))
    }

    fn transcript_path(&self, voice_id: &str) -> PathBuf {
        self.voices_dir.join(format!("{voice_id}.txt"))
    }
}

#[async_trait]
impl TtsEngine for CloneEngine {
    fn id(&self) -> String {
        self.engine_id.clone()
    }

    async fn available_voices(&self) -> Result<Vec<String>, TtsError> {
        let entries = std::fs::read_dir(&self.voices_dir)
            .with_context(|| format!("scanning voices directory {}", self.voices_dir.display()))
            .map_err(TtsError::VoiceDiscovery)?;

        let mut voices = Vec::new();
        for entry in entries {
            let path = entry
                .context("reading voices directory entry")
                .map_err(TtsError::VoiceDiscovery)?
                .path();
            if path.extension().and_then(|e| e.to_str()) == Some("wav") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    voices.push(stem.to_string());
                }
            }
        }
        voices.sort();
        tracing::info!(
            engine = %self.engine_id,
            count = voices.len(),
            dir = %self.voices_dir.display(),
            "found reference voices"
        );
        Ok(voices)
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<(AudioBuffer, Option<CaptionTrack>), TtsError> {
        validate_text(text, self.max_text_len)?;

        let clip = self.clip_path(voice_id);
        if !clip.exists() {
            return Err(TtsError::UnknownVoice(voice_id.to_string()));
        }
        let reference_text = std::fs::read_to_string(self.transcript_path(voice_id))
            .with_context(|| format!("reading transcript for voice {voice_id}"))
            .map_err(TtsError::Synthesis)?;

        let model = self.model.clone();
        let text = text.to_string();
        let (sample_rate, waveform) = tokio::task::spawn_blocking(move || {
            model.infer(&clip, reference_text.trim(), &text)
        })
        .await
        .map_err(|e| TtsError::synthesis(anyhow!("inference task failed: {e}")))?
        .map_err(TtsError::Synthesis)?;

        if waveform.is_empty() {
            return Err(TtsError::synthesis(anyhow!(
                "model returned no audio for voice {voice_id}"
            )));
        }

        let audio = AudioBuffer::from_f32_mono(&waveform, sample_rate);
        tracing::debug!(
            engine = %self.engine_id,
            voice = voice_id,
            seconds = audio.duration_seconds(),
            "generated audio"
        );
        Ok((audio, None))
    }
}
