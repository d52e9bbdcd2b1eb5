//! Segmented local-model engine.
//!
//! The wrapped model only accepts short inputs, so long text is split
//! into bounded segments, synthesized one by one in input order, and the
//! fragments concatenated into a single buffer. One voice, fixed by the
//! model. If any segment produces no audio the whole call fails — a
//! narration with silent holes is worse than no narration.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{validate_text, TtsEngine};
use crate::audio::AudioBuffer;
use crate::captions::CaptionTrack;
use crate::error::TtsError;
use crate::segment::split_text;

const DEFAULT_MAX_TEXT_LEN: usize = 150_000;
const DEFAULT_MAX_SEGMENT_LEN: usize = 400;

/// The opaque per-segment synchronous inference call.
pub trait SegmentSynth: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn synthesize(&self, segment: &str) -> anyhow::Result<Vec<f32>>;
}

pub struct SegmentedEngine {
    model: Arc<dyn SegmentSynth>,
    engine_id: String,
    max_text_len: usize,
    max_segment_len: usize,
}

impl SegmentedEngine {
    pub fn new(model: Arc<dyn SegmentSynth>) -> Self {
        Self {
            model,
            engine_id: "segmented".to_string(),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            max_segment_len: DEFAULT_MAX_SEGMENT_LEN,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.engine_id = id.into();
        self
    }

    pub fn with_max_segment_len(mut self, max_segment_len: usize) -> Self {
        self.max_segment_len = max_segment_len;
        self
    }

    fn default_voice(&self) -> String {
        format!("{}_default", self.engine_id)
    }
}

#[async_trait]
impl TtsEngine for SegmentedEngine {
    fn id(&self) -> String {
        self.engine_id.clone()
    }

    async fn available_voices(&self) -> Result<Vec<String>, TtsError> {
        // The model bakes in its single voice.
        Ok(vec![self.default_voice()])
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<(AudioBuffer, Option<CaptionTrack>), TtsError> {
        validate_text(text, self.max_text_len)?;
        if voice_id != self.default_voice() {
            return Err(TtsError::UnknownVoice(voice_id.to_string()));
        }

        let segments: Vec<String> = split_text(text, self.max_segment_len)
            .into_iter()
            .map(str::to_string)
            .collect();
        let count = segments.len();
        let model = self.model.clone();

        // One blocking task runs all segments so they stay serialized and
        // ordered; the model is not reentrant.
        let waveform = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<f32>> {
            let mut waveform = Vec::new();
            for (index, segment) in segments.iter().enumerate() {
                let fragment = model.synthesize(segment)?;
                if fragment.is_empty() {
                    return Err(anyhow!("segment {index} of {count} produced no audio"));
                }
                waveform.extend(fragment);
            }
            Ok(waveform)
        })
        .await
        .map_err(|e| TtsError::synthesis(anyhow!("segment task failed: {e}")))?
        .map_err(TtsError::Synthesis)?;

        tracing::debug!(engine = %self.engine_id, segments = count, "synthesized segments");
        Ok((
            AudioBuffer::from_f32_mono(&waveform, self.model.sample_rate()),
            None,
        ))
    }
}
