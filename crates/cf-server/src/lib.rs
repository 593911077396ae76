//! cf-server: HTTP API server, live ingestion and VOD packaging.
//!
//! This crate ties the cf-* crates together into a running server. It
//! provides:
//!
//! - WebSocket live ingestion feeding one supervised encoder per session
//! - HLS playlist and segment serving with byte-range support
//! - VOD upload packaging into single or multi-rendition assets
//! - Time-limited signed read URLs
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod routes;
pub mod signer;
pub mod store;
pub mod vod;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cf_av::{CommandTemplate, FfmpegTemplate, ToolRegistry};
use cf_core::config::Config;

use crate::context::AppContext;

/// How often finished jobs past their retention are swept.
const JOB_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the castforge server.
///
/// Discovers ffmpeg, opens the segment store, binds the listener and serves
/// until a shutdown signal arrives. Storage, signing and bind problems fail
/// here, before any request is accepted.
pub async fn start(config: Config) -> cf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    // Discover external tools.
    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; encoding will fail", info.name);
        }
    }

    let template: Arc<dyn CommandTemplate> = Arc::new(FfmpegTemplate::from_config(&config, &tools));
    let ctx = AppContext::new(config, template, tools)?;
    ctx.store.check_writable().await?;
    tracing::info!("Storage root {}", ctx.store.root().display());

    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .map_err(|e| cf_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| cf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("Starting server on {addr}");

    serve(listener, ctx, shutdown_signal()).await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Serve the router on an already-bound listener until `shutdown` resolves.
///
/// Live sessions are told to close when shutdown begins; this waits up to
/// the encoder stop grace period for them to deregister.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    ctx: AppContext,
    shutdown: F,
) -> cf_core::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router::build_router(ctx.clone());
    let sessions = ctx.shutdown.clone();
    jobs::start_cleanup_task(ctx.jobs.clone(), JOB_SWEEP_INTERVAL, ctx.shutdown.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            sessions.cancel();
        })
        .await?;

    ctx.shutdown.cancel();
    let grace = Duration::from_secs(ctx.config.live.stop_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while !ctx.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            remaining = ctx.registry.len(),
            "Live sessions still registered after shutdown grace period"
        );
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
