//! feedgate - resilient gateway for a generative-text API and a news API
//!
//! Serves sanitized insights and a filtered news feed over HTTP. Upstream
//! failures are retried and, for news, answered from the on-disk cache.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feedgate::api::{build_router, AppState};
use feedgate::cli::{Cli, GatewayConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("feedgate=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_cli(&cli)?;
    info!(
        bind = %config.bind,
        primary_cache = %config.primary_cache_dir.display(),
        mirror_cache = %config.mirror_cache_dir.display(),
        "starting feedgate v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        // Without a signal handler, run until killed
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
