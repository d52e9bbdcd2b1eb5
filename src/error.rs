use thiserror::Error;

/// Errors surfaced by the synthesis and export pipeline.
///
/// Backend-internal faults are never swallowed: they are caught at the
/// nearest boundary (worker loop, process invocation, stream read) and
/// wrapped as `Synthesis` or `VoiceDiscovery` with the cause attached.
#[derive(Debug, Error)]
pub enum TtsError {
    /// The caller's request is malformed (empty text, over-length text).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested voice is not among the backend's available voices.
    #[error("unknown voice: {0}")]
    UnknownVoice(String),

    /// Enumerating voices failed (filesystem scan, catalog fetch).
    #[error("voice discovery failed: {0}")]
    VoiceDiscovery(#[source] anyhow::Error),

    /// The underlying backend failed mid-synthesis. The call returns no
    /// audio at all — partial output is discarded.
    #[error("synthesis failed: {0}")]
    Synthesis(#[source] anyhow::Error),

    /// Voice selection was asked to pick from an empty set.
    #[error("no available voices to select from")]
    EmptyCandidateSet,

    /// Voice selection could not avoid the previous voice because it was
    /// the only candidate.
    #[error("only one voice available, cannot pick a different one")]
    NoAlternativeVoice,

    /// Exporting the finished audio failed.
    #[error("export failed: {0}")]
    Export(#[source] anyhow::Error),

    /// No engine is registered under the requested id.
    #[error("engine not found: {0}")]
    EngineNotFound(String),
}

impl TtsError {
    /// Wrap an arbitrary backend fault as a synthesis failure.
    pub fn synthesis(err: impl Into<anyhow::Error>) -> Self {
        TtsError::Synthesis(err.into())
    }

    /// Wrap an arbitrary I/O fault as a voice-discovery failure.
    pub fn discovery(err: impl Into<anyhow::Error>) -> Self {
        TtsError::VoiceDiscovery(err.into())
    }
}
