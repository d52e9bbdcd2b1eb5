//! Streaming cloud TTS engine.
//!
//! Talks to a speech gateway that streams synthesis results as NDJSON:
//! `audio` events carrying base64 PCM frames interleaved with
//! `word_boundary` timing events. The caption track is rebuilt as timing
//! events arrive, so a partial track exists mid-stream, but callers only
//! ever see its state at stream completion.
//!
//! Gateway contract:
//!   GET  /voices  — JSON catalog of available voices
//!   POST /stream  — NDJSON event stream; audio is 24 kHz mono s16le

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{validate_text, TtsEngine};
use crate::audio::AudioBuffer;
use crate::captions::CaptionTrack;
use crate::error::TtsError;

/// Sample rate of the gateway's PCM frames.
const GATEWAY_SAMPLE_RATE: u32 = 24_000;

const DEFAULT_MAX_TEXT_LEN: usize = 8_192;

pub struct CloudStreamEngine {
    client: Client,
    base_url: String,
    engine_id: String,
    max_text_len: usize,
}

#[derive(Deserialize)]
struct VoiceEntry {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Audio {
        /// Base64-encoded little-endian 16-bit PCM.
        data: String,
    },
    WordBoundary {
        offset_ms: u64,
        duration_ms: u64,
        text: String,
    },
}

impl CloudStreamEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            engine_id: "cloud".to_string(),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.engine_id = id.into();
        self
    }

    pub fn with_max_text_len(mut self, max_text_len: usize) -> Self {
        self.max_text_len = max_text_len;
        self
    }

    async fn fetch_voices(&self) -> Result<Vec<String>, TtsError> {
        let url = format!("{}/voices", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("requesting voice catalog")
            .map_err(TtsError::VoiceDiscovery)?;

        if !response.status().is_success() {
            return Err(TtsError::discovery(anyhow!(
                "voice catalog returned {}",
                response.status()
            )));
        }

        let entries: Vec<VoiceEntry> = response
            .json()
            .await
            .context("parsing voice catalog")
            .map_err(TtsError::VoiceDiscovery)?;

        // Multilingual US-English voices only, matching the narration
        // voices the rest of the pipeline is tuned for.
        Ok(entries
            .into_iter()
            .map(|v| v.name)
            .filter(|name| name.contains("MultilingualNeural") && name.contains("en-US"))
            .collect())
    }
}

fn parse_event(line: &str) -> anyhow::Result<StreamEvent> {
    serde_json::from_str(line).with_context(|| format!("malformed stream event: {line}"))
}

fn decode_frame(data: &str) -> anyhow::Result<Vec<u8>> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("decoding audio frame")
}

#[async_trait]
impl TtsEngine for CloudStreamEngine {
    fn id(&self) -> String {
        self.engine_id.clone()
    }

    async fn available_voices(&self) -> Result<Vec<String>, TtsError> {
        let voices = self.fetch_voices().await?;
        tracing::info!(engine = %self.engine_id, count = voices.len(), "fetched voice catalog");
        Ok(voices)
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<(AudioBuffer, Option<CaptionTrack>), TtsError> {
        validate_text(text, self.max_text_len)?;
        if !self.fetch_voices().await?.iter().any(|v| v == voice_id) {
            return Err(TtsError::UnknownVoice(voice_id.to_string()));
        }

        let url = format!("{}/stream", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&StreamRequest {
                text,
                voice: voice_id,
            })
            .send()
            .await
            .context("starting synthesis stream")
            .map_err(TtsError::Synthesis)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::synthesis(anyhow!(
                "gateway returned {status}: {body}"
            )));
        }

        let mut pcm: Vec<u8> = Vec::new();
        let mut captions = CaptionTrack::new();
        let mut line_buf: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .context("reading synthesis stream")
                .map_err(TtsError::Synthesis)?;
            line_buf.extend_from_slice(&chunk);

            while let Some(newline) = line_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = line_buf.drain(..=newline).collect();
                handle_line(&line[..newline], &mut pcm, &mut captions)
                    .map_err(TtsError::Synthesis)?;
            }
        }
        if !line_buf.is_empty() {
            handle_line(&line_buf, &mut pcm, &mut captions).map_err(TtsError::Synthesis)?;
        }

        let audio = AudioBuffer::from_pcm_s16le(&pcm, GATEWAY_SAMPLE_RATE, 1)
            .map_err(TtsError::Synthesis)?;
        if audio.is_empty() {
            return Err(TtsError::synthesis(anyhow!("gateway produced no audio")));
        }

        let captions = (!captions.is_empty()).then_some(captions);
        Ok((audio, captions))
    }
}

fn handle_line(
    line: &[u8],
    pcm: &mut Vec<u8>,
    captions: &mut CaptionTrack,
) -> anyhow::Result<()> {
    let line = std::str::from_utf8(line).context("stream event is not UTF-8")?;
    if line.trim().is_empty() {
        return Ok(());
    }
    match parse_event(line)? {
        StreamEvent::Audio { data } => {
            pcm.extend_from_slice(&decode_frame(&data)?);
        }
        StreamEvent::WordBoundary {
            offset_ms,
            duration_ms,
            text,
        } => {
            captions.push(
                Duration::from_millis(offset_ms),
                Duration::from_millis(duration_ms),
                text,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VOICE: &str = "en-US-AvaMultilingualNeural";

    fn catalog() -> serde_json::Value {
        json!([
            { "Name": VOICE },
            { "Name": "en-US-EmmaMultilingualNeural" },
            { "Name": "en-GB-AdaMultilingualNeural" },
            { "Name": "en-US-JennyNeural" },
        ])
    }

    fn pcm_event(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        json!({ "type": "audio", "data": data }).to_string()
    }

    async fn mount_catalog(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/voices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn catalog_is_filtered_to_multilingual_us_voices() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;

        let engine = CloudStreamEngine::new(server.uri());
        let voices = engine.available_voices().await.unwrap();
        assert_eq!(
            voices,
            vec![VOICE.to_string(), "en-US-EmmaMultilingualNeural".to_string()]
        );
    }

    #[tokio::test]
    async fn catalog_failure_is_a_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/voices"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = CloudStreamEngine::new(server.uri())
            .available_voices()
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::VoiceDiscovery(_)));
    }

    #[tokio::test]
    async fn stream_accumulates_audio_and_captions_in_order() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;

        let body = format!(
            "{}\n{}\n{}\n{}\n",
            pcm_event(&[1, 2]),
            json!({ "type": "word_boundary", "offset_ms": 0, "duration_ms": 250, "text": "Hello" }),
            pcm_event(&[3, 4]),
            json!({ "type": "word_boundary", "offset_ms": 250, "duration_ms": 300, "text": "world" }),
        );
        Mock::given(method("POST"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let engine = CloudStreamEngine::new(server.uri());
        let (audio, captions) = engine.generate_audio("Hello world", VOICE).await.unwrap();

        assert_eq!(audio.samples(), &[1, 2, 3, 4]);
        assert_eq!(audio.sample_rate(), GATEWAY_SAMPLE_RATE);
        let captions = captions.expect("timing events must yield captions");
        assert_eq!(captions.len(), 2);
        assert_eq!(captions.cues()[0].text, "Hello");
        assert_eq!(captions.cues()[1].text, "world");
    }

    #[tokio::test]
    async fn audio_only_stream_returns_no_caption_track() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;

        let body = format!("{}\n", pcm_event(&[5, 6, 7]));
        Mock::given(method("POST"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let engine = CloudStreamEngine::new(server.uri());
        let (audio, captions) = engine.generate_audio("no timing", VOICE).await.unwrap();
        assert_eq!(audio.samples(), &[5, 6, 7]);
        assert!(captions.is_none());
    }

    #[tokio::test]
    async fn malformed_event_fails_the_whole_call() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;

        let body = format!("{}\nnot json at all\n", pcm_event(&[1]));
        Mock::given(method("POST"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let engine = CloudStreamEngine::new(server.uri());
        let err = engine.generate_audio("hello", VOICE).await.unwrap_err();
        assert!(matches!(err, TtsError::Synthesis(_)));
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        // No mocks mounted: a request would 404 and fail differently.
        let engine = CloudStreamEngine::new(server.uri());
        let err = engine.generate_audio("   ", VOICE).await.unwrap_err();
        assert!(matches!(err, TtsError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unlisted_voice_is_rejected() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;

        let engine = CloudStreamEngine::new(server.uri());
        let err = engine
            .generate_audio("hello", "en-US-JennyNeural")
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::UnknownVoice(_)));
    }
}
