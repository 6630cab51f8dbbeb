use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use server::config::ServerConfig;
use server::{build_orchestrator, build_router, metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting TTS cache server...");
    metrics::mark_start();

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, cache_dir={}, engine_timeout={}s, transcode_timeout={}s",
        config.port,
        config.cache_dir.display(),
        config.engine_timeout_secs,
        config.transcode_timeout_secs
    );

    let orchestrator = build_orchestrator(&config);
    let state = AppState::new(orchestrator, config.clone());
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
