//! Test doubles shared by the orchestrator tests

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tts_core::{
    AudioFormat, EngineCapabilities, EngineError, EngineHandle, FsCacheStore,
    OrchestratorConfig, SynthesisEngine, SynthesisOrchestrator, SynthesisRequest,
    TranscodeError, Transcoder,
};

/// Engine that returns `RIFF|<text>|<voice>` and counts invocations.
#[derive(Default)]
pub struct FakeEngine {
    calls: AtomicUsize,
    delay: Duration,
    failures_left: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fail the next `n` invocations.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn output(text: &str, voice: Option<&str>) -> Vec<u8> {
        format!("RIFF|{text}|{}", voice.unwrap_or("default")).into_bytes()
    }
}

impl SynthesisEngine for FakeEngine {
    fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(EngineError::Synthesis(anyhow::anyhow!("model exploded")));
        }
        Ok(Self::output(text, voice))
    }

    /// `narrator` is an alias of `alt`; `ghost` is unknown.
    fn resolve_voice(&self, voice: Option<&str>) -> Result<Option<String>, EngineError> {
        match voice {
            Some("ghost") => Err(EngineError::UnknownVoice {
                voice: "ghost".into(),
                available: "default, alt".into(),
            }),
            Some("narrator") => Ok(Some("alt".into())),
            other => Ok(other.map(str::to_string)),
        }
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            model: "fake".into(),
            voices: vec!["default".into(), "alt".into()],
            languages: vec!["en_US".into()],
        }
    }
}

/// Transcoder that prefixes `MP3|`, or fails every call.
#[derive(Default)]
pub struct FakeTranscoder {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeTranscoder {
    pub fn working() -> Self {
        Self::default()
    }

    pub fn broken() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn convert(
        &self,
        audio: Bytes,
        source: AudioFormat,
        target: AudioFormat,
    ) -> Result<Bytes, TranscodeError> {
        assert_ne!(source, target, "transcoder called for identical formats");
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TranscodeError::Tool {
                exit_code: Some(1),
                stderr: "Unknown encoder 'libmp3lame'".into(),
            });
        }
        let mut out = b"MP3|".to_vec();
        out.extend_from_slice(&audio);
        Ok(Bytes::from(out))
    }
}

pub struct Harness {
    pub orchestrator: SynthesisOrchestrator,
    pub engine: Arc<FakeEngine>,
    pub transcoder: Arc<FakeTranscoder>,
    pub store: Arc<FsCacheStore>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(engine: FakeEngine, transcoder: FakeTranscoder) -> Self {
        Self::with_config(engine, transcoder, OrchestratorConfig::default())
    }

    pub fn with_config(
        engine: FakeEngine,
        transcoder: FakeTranscoder,
        config: OrchestratorConfig,
    ) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let engine = Arc::new(engine);
        let transcoder = Arc::new(transcoder);
        let store = Arc::new(FsCacheStore::new(dir.path().join("cache")));
        let orchestrator = SynthesisOrchestrator::new(
            EngineHandle::Ready(engine.clone()),
            store.clone(),
            transcoder.clone(),
            config,
        );
        Self {
            orchestrator,
            engine,
            transcoder,
            store,
            _dir: dir,
        }
    }

    /// Number of published entries (ignores in-progress `.part` files).
    pub fn entry_count(&self) -> usize {
        match std::fs::read_dir(self.store.root()) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
                .count(),
            Err(_) => 0,
        }
    }
}

pub fn request(text: &str, voice: Option<&str>, format: AudioFormat) -> SynthesisRequest {
    SynthesisRequest::new(text, voice.map(str::to_string), format)
}
