use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    engine::{EngineCapabilities, EngineHandle, SynthesisEngine, VoiceDetail},
    error::{StoreError, SynthesisError},
    flight::{Admission, FlightGuard, FlightOutcome, InFlight},
    format::AudioFormat,
    key::CacheKey,
    request::{CanonicalRequest, SynthesisRequest},
    store::CacheStore,
    stream::{self, AudioStream},
    transcode::Transcoder,
};

/// Where the delivered audio came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    /// Served from an existing cache entry.
    CacheHit,
    /// Synthesized (and published) by this request.
    Synthesized,
    /// Another request synthesized it while this one waited.
    Coalesced,
    /// Transcoding failed; canonical audio delivered uncached.
    Fallback,
}

impl DeliverySource {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliverySource::CacheHit => "hit",
            DeliverySource::Synthesized => "miss",
            DeliverySource::Coalesced => "coalesced",
            DeliverySource::Fallback => "fallback",
        }
    }
}

/// Audio ready to be streamed to the caller.
pub struct SynthesisResponse {
    /// Encoding of the bytes in `body`; may differ from the requested format
    /// after a transcoding fallback.
    pub format: AudioFormat,
    pub len: Option<u64>,
    pub source: DeliverySource,
    pub body: AudioStream,
}

impl SynthesisResponse {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    fn from_memory(format: AudioFormat, audio: Bytes, source: DeliverySource) -> Self {
        Self {
            format,
            len: Some(audio.len() as u64),
            source,
            body: stream::from_bytes(audio),
        }
    }
}

impl std::fmt::Debug for SynthesisResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisResponse")
            .field("format", &self.format)
            .field("len", &self.len)
            .field("source", &self.source)
            .field("body", &"<AudioStream>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on a single engine invocation.
    pub engine_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(120),
        }
    }
}

/// Composes key derivation, the cache store, the engine and the transcoder
/// into the request flow. Cheap to clone.
#[derive(Clone)]
pub struct SynthesisOrchestrator {
    engine: EngineHandle,
    store: Arc<dyn CacheStore>,
    transcoder: Arc<dyn Transcoder>,
    flights: InFlight,
    config: OrchestratorConfig,
}

impl SynthesisOrchestrator {
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn CacheStore>,
        transcoder: Arc<dyn Transcoder>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            engine,
            store,
            transcoder,
            flights: InFlight::new(),
            config,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.engine.capabilities()
    }

    pub fn voice_details(&self) -> Vec<VoiceDetail> {
        self.engine.voice_details()
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub async fn handle(
        &self,
        request: SynthesisRequest,
    ) -> Result<SynthesisResponse, SynthesisError> {
        let mut request = request.canonicalize()?;
        let engine = self.engine.get()?;
        request.voice = engine.resolve_voice(request.voice.as_deref())?;
        let key = CacheKey::derive(&request.text, request.voice.as_deref(), request.format);

        loop {
            if let Some(response) = self.open_cached(&key, DeliverySource::CacheHit).await? {
                debug!(
                    op = "synthesis::handle",
                    result = "cache_hit",
                    key = %key,
                    "Serving cached audio"
                );
                return Ok(response);
            }

            match self.flights.admit(&key) {
                Admission::Leader(guard) => {
                    // The attempt runs detached so that a caller going away
                    // doesn't abort a publish other callers are waiting for.
                    let this = self.clone();
                    let engine = Arc::clone(&engine);
                    let request = request.clone();
                    let attempt = tokio::spawn(async move {
                        this.run_attempt(guard, engine, request).await
                    });
                    let outcome = attempt.await.map_err(|e| {
                        SynthesisError::Internal(format!("synthesis task failed: {e}"))
                    })??;
                    return self.deliver(&key, outcome, DeliverySource::Synthesized).await;
                }
                Admission::Follower(waiter) => {
                    debug!(
                        op = "synthesis::handle",
                        result = "waiting",
                        key = %key,
                        "Waiting for in-flight synthesis"
                    );
                    match waiter.wait().await {
                        Some(outcome) => {
                            return self.deliver(&key, outcome, DeliverySource::Coalesced).await;
                        }
                        None => {
                            debug!(
                                op = "synthesis::handle",
                                result = "retry",
                                key = %key,
                                "In-flight synthesis failed; retrying"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn open_cached(
        &self,
        key: &CacheKey,
        source: DeliverySource,
    ) -> Result<Option<SynthesisResponse>, SynthesisError> {
        if !self.store.exists(key).await? {
            return Ok(None);
        }
        match self.store.open_for_read(key).await {
            Ok(cached) => Ok(Some(SynthesisResponse {
                format: key.format(),
                len: Some(cached.len),
                source,
                body: cached.stream,
            })),
            // Removed between the two calls by outside maintenance.
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn deliver(
        &self,
        key: &CacheKey,
        outcome: FlightOutcome,
        source: DeliverySource,
    ) -> Result<SynthesisResponse, SynthesisError> {
        match outcome {
            FlightOutcome::Published => self
                .open_cached(key, source)
                .await?
                .ok_or_else(|| StoreError::NotFound(key.to_string()).into()),
            FlightOutcome::Fallback { format, audio } => Ok(SynthesisResponse::from_memory(
                format,
                audio,
                DeliverySource::Fallback,
            )),
            FlightOutcome::EngineTimedOut(timeout) => Err(SynthesisError::EngineTimeout(timeout)),
        }
    }

    /// Leader side of a flight: synthesize, transcode if needed, publish.
    /// The guard is dropped on every exit path, releasing followers; after an
    /// engine timeout that happens once the stuck worker exits.
    async fn run_attempt(
        &self,
        guard: FlightGuard,
        engine: Arc<dyn SynthesisEngine>,
        request: CanonicalRequest,
    ) -> Result<FlightOutcome, SynthesisError> {
        let key = guard.key().clone();

        // A previous leader may have published between our miss and admission.
        if self.store.exists(&key).await? {
            guard.complete(FlightOutcome::Published);
            return Ok(FlightOutcome::Published);
        }

        let started_at = Instant::now();
        let (guard, canonical) = self.synthesize(guard, engine, &request).await?;
        let synth_ms = started_at.elapsed().as_millis() as u64;

        let audio = if request.format == AudioFormat::CANONICAL {
            canonical
        } else {
            match self
                .transcoder
                .convert(canonical.clone(), AudioFormat::CANONICAL, request.format)
                .await
            {
                Ok(converted) => converted,
                Err(err) => {
                    warn!(
                        op = "synthesis::transcode",
                        result = "fallback",
                        key = %key,
                        target = %request.format,
                        error = %err,
                        "Transcoding failed; delivering canonical audio uncached"
                    );
                    let outcome = FlightOutcome::Fallback {
                        format: AudioFormat::CANONICAL,
                        audio: canonical,
                    };
                    guard.complete(outcome.clone());
                    return Ok(outcome);
                }
            }
        };

        let bytes = self.store.publish(&key, stream::from_bytes(audio)).await?;
        guard.complete(FlightOutcome::Published);

        info!(
            op = "synthesis::publish",
            result = "published",
            key = %key,
            format = %request.format,
            bytes,
            synth_ms,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Synthesized audio cached"
        );
        Ok(FlightOutcome::Published)
    }

    /// Run the engine on a blocking worker, bounded by the engine timeout.
    ///
    /// A worker that overruns can't be stopped. The flight then stays open
    /// until it exits, so requests for the same key fail fast with the
    /// timeout instead of stacking more blocking workers behind a hung
    /// engine.
    async fn synthesize(
        &self,
        guard: FlightGuard,
        engine: Arc<dyn SynthesisEngine>,
        request: &CanonicalRequest,
    ) -> Result<(FlightGuard, Bytes), SynthesisError> {
        let text = request.text.clone();
        let voice = request.voice.clone();
        let timeout = self.config.engine_timeout;

        let mut worker =
            tokio::task::spawn_blocking(move || engine.synthesize(&text, voice.as_deref()));
        let joined = match tokio::time::timeout(timeout, &mut worker).await {
            Ok(joined) => joined,
            Err(_) => {
                let key = guard.key().clone();
                warn!(
                    op = "synthesis::engine",
                    result = "timeout",
                    key = %key,
                    timeout_secs = timeout.as_secs(),
                    "Synthesis timed out"
                );
                guard.complete(FlightOutcome::EngineTimedOut(timeout));
                tokio::spawn(async move {
                    let _ = worker.await;
                    debug!(
                        op = "synthesis::engine",
                        result = "worker_exited",
                        key = %key,
                        "Timed-out engine worker finished; releasing key"
                    );
                    drop(guard);
                });
                return Err(SynthesisError::EngineTimeout(timeout));
            }
        };

        let audio = joined
            .map_err(|e| SynthesisError::Internal(format!("synthesis worker failed: {e}")))?
            .map_err(|e| {
                warn!(op = "synthesis::engine", result = "error", error = %e, "Synthesis failed");
                SynthesisError::Engine(e)
            })?;

        Ok((guard, Bytes::from(audio)))
    }
}
