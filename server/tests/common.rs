//! Common utilities for integration tests

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use bytes::Bytes;
use tempfile::TempDir;
use tower::ServiceExt;
use tts_core::{
    AudioFormat, EngineCapabilities, EngineError, EngineHandle, FsCacheStore,
    OrchestratorConfig, SynthesisEngine, SynthesisOrchestrator, TranscodeError, Transcoder,
    VoiceDetail,
};

use server::{build_router, config::ServerConfig, AppState};

/// Engine that echoes its input as `RIFF|<text>|<voice>`.
#[derive(Default)]
pub struct EchoEngine {
    calls: AtomicUsize,
    delay: Duration,
}

impl EchoEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SynthesisEngine for EchoEngine {
    fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match voice {
            Some("ghost") => Err(EngineError::UnknownVoice {
                voice: "ghost".into(),
                available: "en_US".into(),
            }),
            _ => Ok(format!("RIFF|{text}|{}", voice.unwrap_or("en_US")).into_bytes()),
        }
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            model: "echo".into(),
            voices: vec!["en_US".into()],
            languages: vec!["en_US".into()],
        }
    }

    fn voice_details(&self) -> Vec<VoiceDetail> {
        vec![VoiceDetail {
            id: "en_US".into(),
            language: "en_US".into(),
            display_name: Some("Echo".into()),
            gender: None,
            quality: Some("low".into()),
            speaker_id: None,
        }]
    }
}

/// Transcoder that prefixes `ID3|`, or always fails when `broken`.
pub struct StubTranscoder {
    broken: bool,
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn convert(
        &self,
        audio: Bytes,
        _source: AudioFormat,
        _target: AudioFormat,
    ) -> Result<Bytes, TranscodeError> {
        if self.broken {
            return Err(TranscodeError::EmptyOutput);
        }
        let mut out = b"ID3|".to_vec();
        out.extend_from_slice(&audio);
        Ok(Bytes::from(out))
    }
}

pub struct TestApp {
    pub router: Router,
    pub engine: Arc<EchoEngine>,
    _cache: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(EchoEngine::default(), true, false, ServerConfig::default())
    }

    /// Server whose transcoder fails every conversion.
    pub fn without_transcoder() -> Self {
        Self::build(EchoEngine::default(), true, true, ServerConfig::default())
    }

    /// Server whose engine failed to initialize.
    pub fn without_engine() -> Self {
        Self::build(EchoEngine::default(), false, false, ServerConfig::default())
    }

    /// Server whose engine takes `delay` per call and is cut off after
    /// `engine_timeout`.
    pub fn with_slow_engine(
        delay: Duration,
        engine_timeout: Duration,
        config: ServerConfig,
    ) -> Self {
        let engine = EchoEngine {
            delay,
            ..EchoEngine::default()
        };
        Self::build_with(engine, true, false, config, OrchestratorConfig { engine_timeout })
    }

    fn build(
        engine: EchoEngine,
        engine_ready: bool,
        broken_transcoder: bool,
        config: ServerConfig,
    ) -> Self {
        let orchestrator_config = OrchestratorConfig {
            engine_timeout: config.engine_timeout(),
        };
        Self::build_with(engine, engine_ready, broken_transcoder, config, orchestrator_config)
    }

    fn build_with(
        engine: EchoEngine,
        engine_ready: bool,
        broken_transcoder: bool,
        config: ServerConfig,
        orchestrator_config: OrchestratorConfig,
    ) -> Self {
        let cache = TempDir::new().expect("temp dir");
        let engine = Arc::new(engine);
        let handle = if engine_ready {
            EngineHandle::Ready(engine.clone())
        } else {
            EngineHandle::unavailable("piper", "map file not found")
        };
        let orchestrator = SynthesisOrchestrator::new(
            handle,
            Arc::new(FsCacheStore::new(cache.path())),
            Arc::new(StubTranscoder {
                broken: broken_transcoder,
            }),
            orchestrator_config,
        );
        let config = ServerConfig {
            cache_dir: cache.path().to_path_buf(),
            ..config
        };
        Self {
            router: build_router(AppState::new(orchestrator, config)),
            engine,
            _cache: cache,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
