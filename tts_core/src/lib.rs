//! Content-addressed synthesis cache.
//!
//! A request is reduced to a [`CacheKey`]; cached audio is streamed straight
//! from the [`CacheStore`]. On a miss the engine runs once per key (see
//! [`flight`]), the result is transcoded to the requested format if needed,
//! published atomically and then streamed back.

pub mod engine;
pub mod error;
pub mod flight;
pub mod format;
pub mod key;
pub mod orchestrator;
pub mod piper;
pub mod request;
pub mod store;
pub mod stream;
pub mod transcode;
mod wav;

pub use engine::{EngineCapabilities, EngineHandle, SynthesisEngine, VoiceDetail};
pub use error::{EngineError, InvalidRequest, StoreError, SynthesisError, TranscodeError};
pub use format::AudioFormat;
pub use key::CacheKey;
pub use orchestrator::{
    DeliverySource, OrchestratorConfig, SynthesisOrchestrator, SynthesisResponse,
};
pub use piper::{PiperEngine, VoiceCatalog};
pub use request::{SynthesisRequest, MAX_TEXT_CHARS};
pub use store::{CacheStore, CachedAudio, FsCacheStore};
pub use stream::AudioStream;
pub use transcode::{FfmpegTranscoder, Transcoder};
pub use wav::encode_wav;
