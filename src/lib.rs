//! Multi-engine text-to-speech orchestration.
//!
//! Engines implement [`TtsEngine`] and plug into a [`TtsService`] that
//! picks voices, generates audio, and exports deliverable files. Five
//! engine shapes ship out of the box:
//!
//! - [`engine::cloud::CloudStreamEngine`] — streaming HTTP gateway with
//!   word-level captions
//! - [`engine::clone::CloneEngine`] — reference-clip voice cloning
//! - [`engine::piper::PiperEngine`] — external Piper process
//! - [`engine::segmented::SegmentedEngine`] — segment-splitting wrapper
//!   for short-input local models
//! - [`engine::queued::QueuedEngine`] — dedicated-worker token LM with
//!   preprocessed reference tokens

pub mod audio;
pub mod captions;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod reference;
pub mod segment;
pub mod service;
pub mod store;
pub mod voice;
pub mod worker;

pub use audio::AudioBuffer;
pub use captions::{CaptionCue, CaptionTrack};
pub use config::{load_config, save_config, EngineConfig, ExportConfig, SystemConfig};
pub use engine::TtsEngine;
pub use error::TtsError;
pub use export::{ExportPipeline, ExportRequest, FfmpegEncoder, HeuristicTitles};
pub use service::{NarrateOptions, Narration, TtsService};
pub use voice::{pick_random_voice, pick_voice};
pub use worker::WorkerHandle;
