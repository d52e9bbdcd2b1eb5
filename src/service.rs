//! Engine registry and narration entry point.
//!
//! [`TtsService`] holds the registered engines, remembers which voice
//! each engine used last so back-to-back narrations alternate, and hands
//! finished audio to the export pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{EngineConfig, SystemConfig};
use crate::engine::cloud::CloudStreamEngine;
use crate::engine::piper::PiperEngine;
use crate::engine::TtsEngine;
use crate::error::TtsError;
use crate::export::{ExportPipeline, ExportRequest};
use crate::voice::pick_random_voice;

/// Per-narration options; everything is optional.
#[derive(Debug, Clone, Default)]
pub struct NarrateOptions {
    /// Engine to use; the service default when absent.
    pub engine_id: Option<String>,
    /// Pin a voice instead of letting the selection policy pick one.
    pub voice_id: Option<String>,
    pub title: Option<String>,
    pub article_id: Option<String>,
    pub text_id: Option<i64>,
    pub podcast_id: Option<i64>,
}

/// What a finished narration produced.
#[derive(Debug, Clone)]
pub struct Narration {
    pub audio_path: std::path::PathBuf,
    pub voice_id: String,
    pub engine_id: String,
}

// ── TtsService ─────────────────────────────────────────

#[derive(Clone)]
pub struct TtsService {
    engines: Arc<RwLock<HashMap<String, Arc<dyn TtsEngine>>>>,
    default_engine: Arc<RwLock<Option<String>>>,
    /// Last voice used, per engine id.
    previous_voice: Arc<RwLock<HashMap<String, String>>>,
    export: Arc<ExportPipeline>,
}

impl TtsService {
    pub fn new(export: ExportPipeline) -> Self {
        Self {
            engines: Arc::new(RwLock::new(HashMap::new())),
            default_engine: Arc::new(RwLock::new(None)),
            previous_voice: Arc::new(RwLock::new(HashMap::new())),
            export: Arc::new(export),
        }
    }

    /// Build a service from config, registering every enabled engine it
    /// can construct. Engine types that need a model supplied in code are
    /// skipped with a warning; register those with [`register_engine`].
    ///
    /// [`register_engine`]: TtsService::register_engine
    pub async fn init_from_config(config: &SystemConfig, export: ExportPipeline) -> Self {
        let service = Self::new(export);

        for engine_config in &config.engines {
            if !engine_config.enabled {
                tracing::info!(id = %engine_config.id, "skipping disabled engine");
                continue;
            }
            match Self::build_engine(engine_config) {
                Some(engine) => {
                    tracing::info!(id = %engine_config.id, "registering engine");
                    service.register_engine(engine).await;
                }
                None => {
                    tracing::warn!(
                        id = %engine_config.id,
                        engine_type = %engine_config.engine_type,
                        "cannot build engine from config"
                    );
                }
            }
        }

        if let Some(default) = &config.default_engine {
            *service.default_engine.write().await = Some(default.clone());
        }
        service
    }

    fn build_engine(config: &EngineConfig) -> Option<Arc<dyn TtsEngine>> {
        match config.engine_type.as_str() {
            "cloud" => {
                let base_url = config.base_url.as_ref()?;
                let mut engine = CloudStreamEngine::new(base_url.clone()).with_id(config.id.clone());
                if let Some(max_text_len) = config.max_text_len {
                    engine = engine.with_max_text_len(max_text_len);
                }
                Some(Arc::new(engine))
            }
            "piper" => {
                let binary_dir = config.binary_dir.as_ref()?;
                let voices_dir = config.voices_dir.as_ref()?;
                let mut engine =
                    PiperEngine::new(binary_dir, voices_dir).with_id(config.id.clone());
                if let Some(max_text_len) = config.max_text_len {
                    engine = engine.with_max_text_len(max_text_len);
                }
                Some(Arc::new(engine))
            }
            _ => None,
        }
    }

    /// Register an engine under its own id. The first registered engine
    /// becomes the default unless one was already set.
    pub async fn register_engine(&self, engine: Arc<dyn TtsEngine>) {
        let id = engine.id();
        self.engines.write().await.insert(id.clone(), engine);

        let mut default = self.default_engine.write().await;
        if default.is_none() {
            *default = Some(id);
        }
    }

    pub async fn set_default_engine(&self, id: impl Into<String>) {
        *self.default_engine.write().await = Some(id.into());
    }

    pub async fn list_engines(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn engine(&self, id: Option<&str>) -> Result<Arc<dyn TtsEngine>, TtsError> {
        let engines = self.engines.read().await;
        let id = match id {
            Some(id) => id.to_string(),
            None => self
                .default_engine
                .read()
                .await
                .clone()
                .ok_or_else(|| TtsError::EngineNotFound("<no default engine>".to_string()))?,
        };
        engines
            .get(&id)
            .cloned()
            .ok_or(TtsError::EngineNotFound(id))
    }

    /// Narrate `text` end to end: select a voice, generate audio, export
    /// the result. Returns the exported MP3 path and the voice used.
    pub async fn narrate(&self, text: &str, opts: NarrateOptions) -> Result<Narration, TtsError> {
        let engine = self.engine(opts.engine_id.as_deref()).await?;
        let engine_id = engine.id();

        let voice_id = match opts.voice_id {
            Some(voice_id) => voice_id,
            None => {
                let voices = engine.available_voices().await?;
                let previous = self.previous_voice.read().await.get(&engine_id).cloned();
                pick_random_voice(&voices, previous.as_deref())?
            }
        };
        tracing::info!(engine = %engine_id, voice = %voice_id, "starting narration");

        let (audio, captions) = engine.generate_audio(text, &voice_id).await?;

        self.previous_voice
            .write()
            .await
            .insert(engine_id.clone(), voice_id.clone());

        let audio_path = self
            .export
            .export(
                &audio,
                ExportRequest {
                    text: text.to_string(),
                    title: opts.title,
                    captions,
                    article_id: opts.article_id,
                    text_id: opts.text_id,
                    podcast_id: opts.podcast_id,
                },
            )
            .await?;

        Ok(Narration {
            audio_path,
            voice_id,
            engine_id,
        })
    }
}
