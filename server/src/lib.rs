pub mod config;
pub mod error;
pub mod metrics;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use tts_core::{
    AudioFormat, EngineCapabilities, EngineHandle, FfmpegTranscoder, FsCacheStore,
    OrchestratorConfig, PiperEngine, SynthesisEngine, SynthesisOrchestrator,
    SynthesisRequest, VoiceDetail,
};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::{AppMetrics, MetricsResponse};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SynthesisOrchestrator>,
    pub metrics: AppMetrics,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(orchestrator: SynthesisOrchestrator, config: ServerConfig) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            metrics: AppMetrics::new(),
            request_count: Arc::new(AtomicU64::new(0)),
            config,
        }
    }
}

#[derive(Deserialize)]
pub struct TtsRequest {
    pub text: String,
    pub voice: Option<String>,
    pub format: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub engine_ready: bool,
}

/// Wire up the engine, cache store and transcoder from configuration. An
/// engine that fails to load leaves the server up, answering synthesis
/// requests with `engine_unavailable`.
pub fn build_orchestrator(config: &ServerConfig) -> SynthesisOrchestrator {
    let engine = match PiperEngine::from_mapfile(
        &config.model,
        &config.model_map,
        config.default_voice.as_deref(),
    ) {
        Ok(engine) => {
            info!(
                "Loaded {} TTS voices from {} (default: {})",
                engine.capabilities().voices.len(),
                config.model_map.display(),
                engine.default_voice()
            );
            if let Err(e) = engine.preload(&[engine.default_voice()]) {
                warn!("Failed to preload default voice: {e:#}");
            }
            EngineHandle::ready(engine)
        }
        Err(e) => {
            warn!("Could not load TTS engine from {}: {e:#}", config.model_map.display());
            EngineHandle::unavailable(&config.model, format!("{e:#}"))
        }
    };

    let store = Arc::new(FsCacheStore::new(&config.cache_dir));
    let transcoder = Arc::new(FfmpegTranscoder::new(
        &config.ffmpeg_path,
        config.transcode_timeout(),
    ));

    SynthesisOrchestrator::new(
        engine,
        store,
        transcoder,
        OrchestratorConfig {
            engine_timeout: config.engine_timeout(),
        },
    )
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false);

    let Some(ref allowed_origins) = config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return base.allow_origin(tower_http::cors::Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(tower_http::cors::Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(tower_http::cors::AllowOrigin::list(origins))
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header_value.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header_value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub fn build_router(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .into_inner();

    // `/tts` is bounded by the engine and transcode timeouts instead, which
    // fail with a typed error body rather than a bare 408.
    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/voices", get(list_voices))
        .route("/voices/detail", get(list_voices_detail))
        .route("/metrics", get(metrics_endpoint))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .route("/tts", post(tts_endpoint));

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        engine_ready: state.orchestrator.is_ready(),
    })
}

pub async fn list_voices(State(state): State<AppState>) -> Json<EngineCapabilities> {
    Json(state.orchestrator.capabilities())
}

pub async fn list_voices_detail(State(state): State<AppState>) -> Json<Vec<VoiceDetail>> {
    Json(state.orchestrator.voice_details())
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let request_count = state.request_count.load(Ordering::Relaxed);
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: metrics::system_metrics(request_count),
        tts: state.metrics.tts.snapshot(),
        cache: state.metrics.cache.snapshot(),
        in_flight: state.orchestrator.in_flight(),
    })
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let started_at = Instant::now();

    let result = synthesize(&state, req).await;
    if result.is_err() {
        state.metrics.tts.record_error();
    }
    state
        .metrics
        .tts
        .record_request(started_at.elapsed().as_millis() as u64);
    result
}

async fn synthesize(state: &AppState, req: TtsRequest) -> Result<Response, ApiError> {
    // Missing or blank format means mp3.
    let format = match req.format.as_deref().map(str::trim) {
        None | Some("") => AudioFormat::default(),
        Some(f) => f.parse::<AudioFormat>()?,
    };

    let text_len = req.text.chars().count();
    let response = state
        .orchestrator
        .handle(SynthesisRequest::new(req.text, req.voice, format))
        .await?;

    info!(
        "TTS request served: text length={}, requested={}, delivered={}, cache={}",
        text_len,
        format,
        response.format,
        response.source.as_str()
    );
    state.metrics.cache.record(response.source, response.len);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, response.content_type())
        .header("x-cache", response.source.as_str());
    if let Some(len) = response.len {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    builder
        .body(Body::from_stream(response.body))
        .map_err(|e| ApiError::InternalError(format!("Failed to build response: {e}")))
}
