use std::sync::Arc;

use serde::Serialize;

use crate::error::{EngineError, SynthesisError};

/// Engine metadata reported by the capabilities endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineCapabilities {
    pub model: String,
    pub voices: Vec<String>,
    pub languages: Vec<String>,
}

/// Per-voice metadata for the detailed voice listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceDetail {
    pub id: String,
    pub language: String,
    pub display_name: Option<String>,
    pub gender: Option<String>,
    pub quality: Option<String>,
    pub speaker_id: Option<i64>,
}

/// The neural synthesis engine.
///
/// Implementations are blocking and are always driven from a blocking worker
/// thread. They must be deterministic for identical `(text, voice)` inputs
/// for cached results to be interchangeable with fresh ones.
pub trait SynthesisEngine: Send + Sync {
    /// Synthesize `text` and return canonical-format (WAV) bytes. `None`
    /// selects the engine's default voice.
    fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, EngineError>;

    fn capabilities(&self) -> EngineCapabilities;

    /// Map a requested voice to the voice the engine will actually use, so
    /// that aliases of one voice share a cache entry. Unknown voices fail
    /// here, before any synthesis work is scheduled.
    fn resolve_voice(&self, voice: Option<&str>) -> Result<Option<String>, EngineError> {
        Ok(voice.map(str::to_string))
    }

    fn voice_details(&self) -> Vec<VoiceDetail> {
        Vec::new()
    }
}

/// Engine as constructed at process start.
#[derive(Clone)]
pub enum EngineHandle {
    Ready(Arc<dyn SynthesisEngine>),
    /// Initialization failed; every synthesis request fails fast.
    Unavailable { model: String, reason: String },
}

impl EngineHandle {
    pub fn ready(engine: impl SynthesisEngine + 'static) -> Self {
        EngineHandle::Ready(Arc::new(engine))
    }

    pub fn unavailable(model: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineHandle::Unavailable {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EngineHandle::Ready(_))
    }

    pub fn get(&self) -> Result<Arc<dyn SynthesisEngine>, SynthesisError> {
        match self {
            EngineHandle::Ready(engine) => Ok(Arc::clone(engine)),
            EngineHandle::Unavailable { reason, .. } => {
                Err(SynthesisError::EngineUnavailable(reason.clone()))
            }
        }
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        match self {
            EngineHandle::Ready(engine) => engine.capabilities(),
            EngineHandle::Unavailable { model, .. } => EngineCapabilities {
                model: model.clone(),
                ..EngineCapabilities::default()
            },
        }
    }

    pub fn voice_details(&self) -> Vec<VoiceDetail> {
        match self {
            EngineHandle::Ready(engine) => engine.voice_details(),
            EngineHandle::Unavailable { .. } => Vec::new(),
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineHandle::Ready(_) => f.write_str("EngineHandle::Ready(<SynthesisEngine>)"),
            EngineHandle::Unavailable { model, reason } => f
                .debug_struct("EngineHandle::Unavailable")
                .field("model", model)
                .field("reason", reason)
                .finish(),
        }
    }
}
