//! Notebook platform token broker
//!
//! Single-binary service that:
//! 1. Holds the on-disk credential store (the only writer)
//! 2. Accepts credential registrations from the platform at login time
//! 3. Resolves session tokens to access tokens for notebook environments
//! 4. Performs refresh grants against the identity provider on their behalf
//!
//! The OAuth client secret lives here and in the platform's login flow,
//! never inside a user's environment.

mod api;
mod config;
mod metrics;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notebook_auth::CredentialStore;

use crate::api::{AppState, BrokerMetrics, build_router};
use crate::config::Config;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting notebook-token-broker");

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.broker.listen_addr,
        store_path = %config.broker.store_path.display(),
        token_url = %config.provider.token_url,
        "configuration loaded"
    );

    let store = CredentialStore::init(config.broker.store_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to initialize credential store at {}",
                config.broker.store_path.display()
            )
        })?;

    let provider = config.provider_config();
    let manager_token = config
        .broker
        .manager_token
        .clone()
        .context("manager token missing after config load")?;

    let broker_metrics = BrokerMetrics::new();
    let requests_total = broker_metrics.requests_total.clone();

    let state = AppState {
        store: Arc::new(store),
        provider,
        client: reqwest::Client::new(),
        manager_token,
        write_lock: Arc::new(tokio::sync::Mutex::new(())),
        metrics: broker_metrics,
        prometheus,
    };

    let app = build_router(state, config.broker.max_connections);

    let listen_addr = config.broker.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds the drain so a stuck client cannot block exit
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                requests_served = requests_total.load(Ordering::Relaxed),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
