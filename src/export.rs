//! Export pipeline: finished audio → deliverable files.
//!
//! Every export produces an MP3 with metadata tags and a markdown
//! transcript; captions become a `.vtt` next to them when the engine
//! produced timing data. Afterwards at most one database record is
//! updated — article, text, or podcast, first matching identifier wins.
//! Failures are logged and propagated; retrying is the caller's call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::process::Command;

use crate::audio::AudioBuffer;
use crate::captions::CaptionTrack;
use crate::error::TtsError;
use crate::store::{RecordStore, RecordUpdate};

/// Metadata written into the exported container.
#[derive(Debug, Clone)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub date: String,
    pub cover_image: Option<PathBuf>,
}

/// Opaque container encoder: buffer in, tagged MP3 on disk out.
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    async fn encode_mp3(
        &self,
        audio: &AudioBuffer,
        dest: &Path,
        tags: &TrackTags,
    ) -> anyhow::Result<()>;
}

/// Opaque title derivation for texts exported without one.
pub trait TitleProvider: Send + Sync {
    fn derive_title(&self, text: &str) -> anyhow::Result<String>;
}

/// Everything export needs besides the audio itself.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub text: String,
    pub title: Option<String>,
    pub captions: Option<CaptionTrack>,
    pub article_id: Option<String>,
    pub text_id: Option<i64>,
    pub podcast_id: Option<i64>,
}

pub struct ExportPipeline {
    output_dir: PathBuf,
    cover_image: Option<PathBuf>,
    encoder: Arc<dyn MediaEncoder>,
    titles: Arc<dyn TitleProvider>,
    records: Option<Arc<dyn RecordStore>>,
}

impl ExportPipeline {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        encoder: Arc<dyn MediaEncoder>,
        titles: Arc<dyn TitleProvider>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            cover_image: None,
            encoder,
            titles,
            records: None,
        }
    }

    pub fn with_cover_image(mut self, cover_image: impl Into<PathBuf>) -> Self {
        self.cover_image = Some(cover_image.into());
        self
    }

    pub fn with_record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Export `audio` and return the path of the MP3.
    pub async fn export(
        &self,
        audio: &AudioBuffer,
        request: ExportRequest,
    ) -> Result<PathBuf, TtsError> {
        match self.run(audio, request).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "exported audio");
                Ok(path)
            }
            Err(e) => {
                tracing::error!(error = %e, "error exporting audio");
                Err(TtsError::Export(e))
            }
        }
    }

    async fn run(&self, audio: &AudioBuffer, request: ExportRequest) -> anyhow::Result<PathBuf> {
        let title = match &request.title {
            Some(title) if !title.trim().is_empty() => title.clone(),
            _ => self.titles.derive_title(&request.text)?,
        };

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating output dir {}", self.output_dir.display()))?;
        let base = unique_base(&self.output_dir, &slugify(&title));
        let mp3_path = base.with_extension("mp3");
        let md_path = base.with_extension("md");

        let tags = TrackTags {
            title: title.clone(),
            artist: "voxcast".to_string(),
            date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            cover_image: self.cover_image.clone(),
        };
        self.encoder
            .encode_mp3(audio, &mp3_path, &tags)
            .await
            .context("encoding MP3")?;

        std::fs::write(&md_path, format!("# {title}\n\n{}\n", request.text))
            .with_context(|| format!("writing transcript {}", md_path.display()))?;

        if let Some(captions) = request.captions.as_ref().filter(|c| !c.is_empty()) {
            captions.save_vtt(&base.with_extension("vtt"))?;
        }

        self.update_record(&request, &mp3_path, &md_path).await?;
        Ok(mp3_path)
    }

    /// At most one record update per export; the first matching
    /// identifier wins and the rest are ignored.
    async fn update_record(
        &self,
        request: &ExportRequest,
        mp3_path: &Path,
        md_path: &Path,
    ) -> anyhow::Result<()> {
        let Some(records) = &self.records else {
            return Ok(());
        };
        let update = RecordUpdate {
            markdown_file: Some(md_path.to_path_buf()),
            audio_file: mp3_path.to_path_buf(),
            image_file: self.cover_image.clone(),
        };

        if let Some(article_id) = &request.article_id {
            records.update_article(article_id, &update).await?;
        } else if let Some(text_id) = request.text_id {
            records.update_text(text_id, &update).await?;
        } else if let Some(podcast_id) = request.podcast_id {
            let update = RecordUpdate {
                markdown_file: None,
                ..update
            };
            records.update_podcast(podcast_id, &update).await?;
        }
        Ok(())
    }
}

/// Filesystem-safe base name from a title.
fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// First base path under `dir` whose `.mp3`/`.md` siblings do not exist.
fn unique_base(dir: &Path, slug: &str) -> PathBuf {
    let mut counter = 0;
    loop {
        let name = if counter == 0 {
            slug.to_string()
        } else {
            format!("{slug}-{counter}")
        };
        let base = dir.join(name);
        if !base.with_extension("mp3").exists() && !base.with_extension("md").exists() {
            return base;
        }
        counter += 1;
    }
}

// ── Shipped boundary implementations ───────────────────

/// MP3 encoding via the ffmpeg binary: intermediate WAV, `libmp3lame`,
/// ID3 tags, optional attached cover art.
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary(mut self, ffmpeg: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn encode_mp3(
        &self,
        audio: &AudioBuffer,
        dest: &Path,
        tags: &TrackTags,
    ) -> anyhow::Result<()> {
        let wav = tempfile::Builder::new()
            .prefix("export-")
            .suffix(".wav")
            .tempfile()
            .context("creating intermediate WAV")?
            .into_temp_path();
        audio.write_wav(&wav)?;

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y").arg("-i").arg(&wav);
        if let Some(cover) = &tags.cover_image {
            cmd.arg("-i").arg(cover).args([
                "-map",
                "0:a",
                "-map",
                "1:v",
                "-c:v",
                "copy",
                "-disposition:v",
                "attached_pic",
            ]);
        }
        cmd.args(["-codec:a", "libmp3lame", "-qscale:a", "2"])
            .args(["-metadata", &format!("title={}", tags.title)])
            .args(["-metadata", &format!("artist={}", tags.artist)])
            .args(["-metadata", &format!("date={}", tags.date)])
            .args(["-id3v2_version", "3"])
            .arg(dest);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("spawning {}", self.ffmpeg.display()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// Title from the text's leading words. Good enough when no external
/// title source is wired in.
pub struct HeuristicTitles {
    max_words: usize,
}

impl HeuristicTitles {
    pub fn new() -> Self {
        Self { max_words: 8 }
    }
}

impl Default for HeuristicTitles {
    fn default() -> Self {
        Self::new()
    }
}

impl TitleProvider for HeuristicTitles {
    fn derive_title(&self, text: &str) -> anyhow::Result<String> {
        let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let title: Vec<&str> = first_line.split_whitespace().take(self.max_words).collect();
        if title.is_empty() {
            return Err(anyhow!("cannot derive a title from empty text"));
        }
        Ok(title.join(" "))
    }
}
