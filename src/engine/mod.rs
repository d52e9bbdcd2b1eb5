//! The shared synthesis contract and its backend variants.
//!
//! Every backend — network stream, native model, external binary, queued
//! worker — adapts its mechanism to the one [`TtsEngine`] trait. Callers
//! hold `Arc<dyn TtsEngine>` and never see a concrete variant.

pub mod clone;
pub mod cloud;
pub mod piper;
pub mod queued;
pub mod segmented;

use async_trait::async_trait;

use crate::audio::AudioBuffer;
use crate::captions::CaptionTrack;
use crate::error::TtsError;

/// Common contract implemented by every backend variant.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Stable identifier for this engine instance (e.g. "cloud", "piper").
    fn id(&self) -> String;

    /// Enumerate currently available voice ids. May perform I/O on every
    /// call; fails with `VoiceDiscovery` rather than returning a silently
    /// partial set.
    async fn available_voices(&self) -> Result<Vec<String>, TtsError>;

    /// Synthesize `text` with `voice_id`.
    ///
    /// All-or-nothing: on failure no partially populated buffer is ever
    /// returned. The caption track is present only for backends that
    /// produce timing metadata, and only when it ended up non-empty.
    async fn generate_audio(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<(AudioBuffer, Option<CaptionTrack>), TtsError>;
}

/// Reject empty or over-long text before any backend work happens.
pub(crate) fn validate_text(text: &str, max_len: usize) -> Result<(), TtsError> {
    if text.trim().is_empty() {
        return Err(TtsError::InvalidInput("text is empty".into()));
    }
    if text.len() > max_len {
        return Err(TtsError::InvalidInput(format!(
            "text is {} bytes, backend limit is {max_len}",
            text.len()
        )));
    }
    Ok(())
}
