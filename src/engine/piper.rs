//! External-process engine around the Piper binary.
//!
//! Each voice is a subdirectory holding an `.onnx` model and its `.json`
//! config. Synthesis spawns the platform-specific binary with a fixed
//! command line, pipes the text on stdin, and reads the WAV it writes.
//! A non-zero exit code fails the call.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{validate_text, TtsEngine};
use crate::audio::AudioBuffer;
use crate::captions::CaptionTrack;
use crate::error::TtsError;

const DEFAULT_MAX_TEXT_LEN: usize = 20_000;

pub struct PiperEngine {
    binary_dir: PathBuf,
    voices_dir: PathBuf,
    engine_id: String,
    max_text_len: usize,
    /// Speech-speed scale passed straight through to the binary.
    length_scale: f32,
}

impl PiperEngine {
    pub fn new(binary_dir: impl Into<PathBuf>, voices_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_dir: binary_dir.into(),
            voices_dir: voices_dir.into(),
            engine_id: "piper".to_string(),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            length_scale: 1.0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.engine_id = id.into();
        self
    }

    pub fn with_length_scale(mut self, length_scale: f32) -> Self {
        self.length_scale = length_scale;
        self
    }

    pub fn with_max_text_len(mut self, max_text_len: usize) -> Self {
        self.max_text_len = max_text_len;
        self
    }

    /// Platform-specific executable path.
    fn binary_path(&self) -> PathBuf {
        let name = if cfg!(windows) { "piper.exe" } else { "piper" };
        self.binary_dir.join(name)
    }

    /// First file with `extension` inside a voice directory.
    fn find_voice_file(voice_dir: &Path, extension: &str) -> anyhow::Result<PathBuf> {
        for entry in std::fs::read_dir(voice_dir)
            .with_context(|| format!("reading voice directory {}", voice_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                return Ok(path);
            }
        }
        Err(anyhow!(
            "no .{extension} file in voice directory {}",
            voice_dir.display()
        ))
    }
}

/// The fixed CLI contract: model, config, output file, voice index,
/// length scale. Text arrives on stdin.
fn build_args(model: &Path, config: &Path, output: &Path, length_scale: f32) -> Vec<String> {
    vec![
        "-m".to_string(),
        model.display().to_string(),
        "-c".to_string(),
        config.display().to_string(),
        "-f".to_string(),
        output.display().to_string(),
        "-s".to_string(),
        "0".to_string(),
        "--length_scale".to_string(),
        format!("{length_scale}"),
    ]
}

#[async_trait]
impl TtsEngine for PiperEngine {
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
            if !path.is_dir() {
                continue;
            }
            let has_model = Self::find_voice_file(&path, "onnx").is_ok();
            let has_config = Self::find_voice_file(&path, "json").is_ok();
            if has_model && has_config {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    voices.push(name.to_string());
                }
            }
        }
        voices.sort();
        tracing::info!(engine = %self.engine_id, count = voices.len(), "found piper voices");
        Ok(voices)
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<(AudioBuffer, Option<CaptionTrack>), TtsError> {
        validate_text(text, self.max_text_len)?;

        let voice_dir = self.voices_dir.join(voice_id);
        if !voice_dir.is_dir() {
            return Err(TtsError::UnknownVoice(voice_id.to_string()));
        }
        let model = Self::find_voice_file(&voice_dir, "onnx").map_err(TtsError::Synthesis)?;
        let config = Self::find_voice_file(&voice_dir, "json").map_err(TtsError::Synthesis)?;

        let output = tempfile::Builder::new()
            .prefix("piper-out-")
            .suffix(".wav")
            .tempfile()
            .context("creating temporary output file")
            .map_err(TtsError::Synthesis)?
            .into_temp_path();

        let binary = self.binary_path();
        let mut child = Command::new(&binary)
            .args(build_args(&model, &config, &output, self.length_scale))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", binary.display()))
            .map_err(TtsError::Synthesis)?;

        // Text goes in on stdin; closing it signals end of input.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .context("writing text to piper stdin")
                .map_err(TtsError::Synthesis)?;
        }

        let result = child
            .wait_with_output()
            .await
            .context("waiting for piper to exit")
            .map_err(TtsError::Synthesis)?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(TtsError::synthesis(anyhow!(
                "piper exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        let audio = AudioBuffer::from_wav_file(&output).map_err(TtsError::Synthesis)?;
        tracing::info!(engine = %self.engine_id, voice = voice_id, "generated piper audio");
        Ok((audio, None))
    }
}
