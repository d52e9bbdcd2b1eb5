//! Time-aligned caption tracks.
//!
//! Backends that report word timing alongside audio build a [`CaptionTrack`]
//! incrementally during synthesis; the export pipeline renders it to WebVTT
//! next to the finished audio file.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One caption cue: where it starts, how long it lasts, what is said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCue {
    pub offset: Duration,
    pub duration: Duration,
    pub text: String,
}

/// Ordered sequence of caption cues for one synthesis call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptionTrack {
    cues: Vec<CaptionCue>,
}

impl CaptionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cue. Cues are kept in arrival order, which for every
    /// supported backend is also timeline order.
    pub fn push(&mut self, offset: Duration, duration: Duration, text: impl Into<String>) {
        self.cues.push(CaptionCue {
            offset,
            duration,
            text: text.into(),
        });
    }

    pub fn cues(&self) -> &[CaptionCue] {
        &self.cues
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    /// Render the track as a WebVTT document.
    pub fn to_vtt(&self) -> String {
        let mut out = String::from("WEBVTT\n");
        for cue in &self.cues {
            let start = cue.offset;
            let end = cue.offset + cue.duration;
            out.push('\n');
            out.push_str(&format!(
                "{} --> {}\n{}\n",
                format_timestamp(start),
                format_timestamp(end),
                cue.text
            ));
        }
        out
    }

    /// Write the WebVTT rendering to disk.
    pub fn save_vtt(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.to_vtt())
            .with_context(|| format!("writing captions to {}", path.display()))
    }
}

fn format_timestamp(t: Duration) -> String {
    let total_millis = t.as_millis();
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let seconds = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_track_renders_header_only() {
        let track = CaptionTrack::new();
        assert_eq!(track.to_vtt(), "WEBVTT\n");
        assert!(track.is_empty());
    }

    #[test]
    fn cues_render_in_order_with_timestamps() {
        let mut track = CaptionTrack::new();
        track.push(Duration::from_millis(0), Duration::from_millis(500), "Hello");
        track.push(Duration::from_millis(500), Duration::from_millis(750), "world");
        let vtt = track.to_vtt();
        let hello = vtt.find("00:00:00.000 --> 00:00:00.500\nHello").unwrap();
        let world = vtt.find("00:00:00.500 --> 00:00:01.250\nworld").unwrap();
        assert!(hello < world, "Cues must keep arrival order");
    }

    #[test]
    fn timestamps_roll_over_minutes_and_hours() {
        assert_eq!(
            format_timestamp(Duration::from_secs(3600 + 61) + Duration::from_millis(42)),
            "01:01:01.042"
        );
    }
}
