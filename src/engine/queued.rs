//! Worker-backed token-LM engine.
//!
//! The underlying model holds an inference cache that is not safely
//! shareable, so all requests go through the [`WorkerHandle`] queue and
//! are served one at a time. Voices are reference clips whose token
//! artifacts were produced by preprocessing; a voice is only listed (and
//! only accepted) once its artifact exists.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use async_trait::async_trait;

use super::{validate_text, TtsEngine};
use crate::audio::AudioBuffer;
use crate::captions::CaptionTrack;
use crate::error::TtsError;
use crate::reference::{
    load_reference_tokens, prepare_reference_files, token_path, ReferenceEncoder,
};
use crate::worker::{GenerationModel, GenerationRequest, SamplingOptions, WorkerHandle};

const DEFAULT_MAX_TEXT_LEN: usize = 10_000;
const DEFAULT_MAX_NEW_TOKENS: usize = 2_048;

pub struct QueuedEngine {
    worker: WorkerHandle,
    voices_dir: PathBuf,
    engine_id: String,
    sample_rate: u32,
    max_text_len: usize,
    max_new_tokens: usize,
    sampling: SamplingOptions,
}

impl QueuedEngine {
    /// Run reference preprocessing over `voices_dir`, then load the model
    /// on its dedicated worker thread. Blocks until the model is ready,
    /// so this belongs in backend initialization, not the request path.
    pub fn initialize<M, F>(
        voices_dir: impl Into<PathBuf>,
        sample_rate: u32,
        encoder: &dyn ReferenceEncoder,
        load: F,
    ) -> Result<Self, TtsError>
    where
        M: GenerationModel,
        F: FnOnce() -> anyhow::Result<M> + Send + 'static,
    {
        let voices_dir = voices_dir.into();
        let prepared = prepare_reference_files(&voices_dir, encoder)?;
        tracing::info!(
            dir = %voices_dir.display(),
            prepared,
            "reference preprocessing complete"
        );
        let worker = WorkerHandle::spawn("queued", load)?;
        Ok(Self {
            worker,
            voices_dir,
            engine_id: "queued".to_string(),
            sample_rate,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            sampling: SamplingOptions::default(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.engine_id = id.into();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }

    fn clip_stem(path: &Path) -> Option<&str> {
        (path.extension().and_then(|e| e.to_str()) == Some("wav"))
            .then(|| path.file_stem().and_then(|s| s.to_str()))
            .flatten()
    }
}

#[async_trait]
impl TtsEngine for QueuedEngine {
    fn id(&self) -> String {
        self.engine_id.clone()
    }

    /// Clips whose token artifact exists. A clip skipped by preprocessing
    /// (too short, unreadable) is deliberately absent: listing it would
    /// advertise a voice no request can use.
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
            if let Some(stem) = Self::clip_stem(&path) {
                if token_path(&self.voices_dir, stem).exists() {
                    voices.push(stem.to_string());
                }
            }
        }
        voices.sort();
        Ok(voices)
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<(AudioBuffer, Option<CaptionTrack>), TtsError> {
        validate_text(text, self.max_text_len)?;

        let Some(prompt_tokens) = load_reference_tokens(&self.voices_dir, voice_id) else {
            return Err(TtsError::UnknownVoice(voice_id.to_string()));
        };

        let request = GenerationRequest {
            text: text.to_string(),
            prompt_tokens: Some(prompt_tokens),
            max_new_tokens: self.max_new_tokens,
            chunk_length: 0,
            sampling: self.sampling.clone(),
        };

        let fragments = self.worker.generate(request).await?;
        if fragments.iter().all(|f| f.is_empty()) {
            return Err(TtsError::synthesis(anyhow!("no audio generated")));
        }

        let mut audio = AudioBuffer::new(self.sample_rate, 1);
        for fragment in &fragments {
            audio.extend_from_f32(fragment);
        }
        tracing::debug!(
            engine = %self.engine_id,
            voice = voice_id,
            fragments = fragments.len(),
            seconds = audio.duration_seconds(),
            "generated audio"
        );
        Ok((audio, None))
    }
}
