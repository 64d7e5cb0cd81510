mod api;
mod auth;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod middleware;
mod notifications;
mod payments;
mod server;
mod settlement;
#[cfg(test)]
mod testing;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::Config, middleware::RateLimitLayer};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting POS settlement backend");

    let config = Config::from_env().context("invalid configuration")?;
    let shutdown = CancellationToken::new();

    let application = bootstrap::initialize_app_state(&config, shutdown.clone())
        .await
        .context("failed to initialize application")?;

    let app = server::create_app(
        application.state,
        &config.cors_allowed_origins,
        RateLimitLayer::new(config.callback_rate_per_sec, config.callback_rate_burst),
    );

    tokio::spawn(cancel_on_signal(shutdown.clone()));

    server::run_server(app, &config.bind_address, shutdown.clone())
        .await
        .context("HTTP server failed")?;

    // the server may also stop on its own; make sure the sweeps stop too
    shutdown.cancel();

    let grace = config.shutdown_grace();
    info!("⏳ Waiting up to {:?} for background sweeps", grace);
    let workers = futures::future::join_all(application.workers);
    if tokio::time::timeout(grace, workers).await.is_err() {
        warn!("Background sweeps did not finish within {:?}", grace);
    }

    info!("👋 Shutdown complete");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("🛑 Ctrl+C received, shutting down"),
        _ = terminate => info!("🛑 SIGTERM received, shutting down"),
    }
    shutdown.cancel();
}
