//! JSON configuration for engines and export.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ── Engine Config ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub id: String,
    /// "cloud", "piper" — model-backed engines ("clone", "segmented",
    /// "queued") need their models supplied in code and are registered
    /// directly on the service instead.
    pub engine_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub base_url: Option<String>,
    pub voices_dir: Option<PathBuf>,
    pub binary_dir: Option<PathBuf>,
    pub max_text_len: Option<usize>,

    /// Catch-all for engine-specific settings.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

// ── Export Config ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub cover_image: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cover_image: None,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

// ── Top-Level System Config ────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub default_engine: Option<String>,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

/// Load config from a JSON file. Falls back to defaults when the file is
/// missing or invalid — a broken config should not stop narration with
/// directly registered engines.
pub fn load_config(path: &Path) -> SystemConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                SystemConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config not readable, using defaults");
            SystemConfig::default()
        }
    }
}

/// Save config as pretty-printed JSON, creating parent directories.
pub fn save_config(path: &Path, config: &SystemConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(config)?;
    std::fs::write(path, raw)?;
    Ok(())
}
