use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Why a request was rejected before any engine or cache work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    #[error("text cannot be empty")]
    EmptyText,

    #[error("text too long ({len} characters, max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("format must be 'mp3' or 'wav', got '{0}'")]
    UnsupportedFormat(String),
}

/// Failures of the synthesis engine for an otherwise valid request.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown voice '{voice}'. Available voices: {available}")]
    UnknownVoice { voice: String, available: String },

    #[error("synthesis failed: {0:#}")]
    Synthesis(#[from] anyhow::Error),
}

/// Cache store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Internal miss signal; never surfaced to callers as an error response.
    #[error("no cache entry for {0}")]
    NotFound(String),

    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Transcoding failures. These never fail a request; they trigger the
/// canonical-format fallback.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoder unavailable: {0}")]
    ToolMissing(io::Error),

    #[error("transcoder I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transcoder failed (exit {exit_code:?}): {stderr}")]
    Tool {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("transcoder produced no output")]
    EmptyOutput,

    #[error("transcoder timed out after {0:?}")]
    Timeout(Duration),
}

/// Everything `SynthesisOrchestrator::handle` can fail with.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    #[error("synthesis engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("synthesis timed out after {} seconds", .0.as_secs())]
    EngineTimeout(Duration),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SynthesisError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SynthesisError::InvalidRequest(_) => "invalid_request",
            SynthesisError::EngineUnavailable(_) => "engine_unavailable",
            SynthesisError::Engine(_) => "engine_error",
            SynthesisError::EngineTimeout(_) => "engine_timeout",
            SynthesisError::Storage(_) => "storage_error",
            SynthesisError::Internal(_) => "internal_error",
        }
    }
}
