//! Wrike OAuth2 token daemon
//!
//! Single-binary service that:
//! 1. Accepts an authorization code over local HTTP
//! 2. Exchanges it for an access/refresh token pair
//! 3. Refreshes the pair ahead of expiry, for as long as it runs
//! 4. Serves the current token to local callers

mod cli;
mod config;
mod error;
mod http;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use token_manager::{TokenManager, spawn_scheduler};

use crate::cli::Cli;
use crate::config::Config;
use crate::http::{AppState, ReadRetry, build_router};

/// Upper bound on in-flight request drain and scheduler exit after a signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

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

    let cli = Cli::parse();
    info!("starting wriked");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder()?;

    let config = Config::from_cli(&cli).context("failed to load configuration")?;
    let listen_addr = config.listen_addr();

    info!(
        listen_addr = %listen_addr,
        token_url = %config.provider.token_url,
        refresh_margin_secs = config.refresh.margin_secs,
        "configuration loaded"
    );

    let http_client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let (manager, codes) = TokenManager::new(config.manager_config(), http_client);
    let manager = Arc::new(manager);

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = spawn_scheduler(Arc::clone(&manager), codes, stop_rx);

    let app = build_router(
        AppState {
            manager,
            read_retry: ReadRetry {
                retries: config.http.read_retries,
                interval: config.read_retry_interval(),
            },
            started_at: Instant::now(),
            prometheus,
        },
        config.http.max_connections,
    );

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests, waiting for authorization code");

    // The drain timeout starts when the signal fires, not when the server starts
    let (drain_tx, drain_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = drain_rx.await;
            })
            .await
    });

    supervise(server, scheduler, drain_tx, stop_tx, shutdown_signal()).await
}

/// Run until `shutdown` fires or either task ends, then stop the other.
///
/// A scheduler that ends on its own means no token will ever be installed
/// again, so that case drains the server and returns an error for the
/// process supervisor to act on.
async fn supervise(
    mut server: JoinHandle<std::io::Result<()>>,
    mut scheduler: JoinHandle<()>,
    drain_tx: oneshot::Sender<()>,
    stop_tx: watch::Sender<bool>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::select! {
        _ = shutdown => {}
        result = &mut server => {
            // Server exited on its own; stop the scheduler and report why
            let _ = stop_tx.send(true);
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("server error"),
                Err(e) => Err(e).context("server task panicked"),
            };
        }
        result = &mut scheduler => {
            match &result {
                Ok(()) => error!("token scheduler stopped unexpectedly"),
                Err(e) => error!(error = %e, "token scheduler task panicked"),
            }
            let _ = drain_tx.send(());
            drain_server(server).await;
            return match result {
                Ok(()) => Err(anyhow::anyhow!("token scheduler stopped unexpectedly")),
                Err(e) => Err(e).context("token scheduler task panicked"),
            };
        }
    }

    let _ = drain_tx.send(());
    let _ = stop_tx.send(true);
    drain_server(server).await;

    match tokio::time::timeout(DRAIN_TIMEOUT, scheduler).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "scheduler task panicked"),
        Err(_) => warn!("scheduler did not stop within drain timeout"),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait up to `DRAIN_TIMEOUT` for in-flight requests after draining starts.
async fn drain_server(server: JoinHandle<std::io::Result<()>>) {
    match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A handler that cannot be installed is logged and never fires, leaving the
/// other signal in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stand-in server task that finishes once draining starts.
    fn fake_server() -> (JoinHandle<std::io::Result<()>>, oneshot::Sender<()>) {
        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let _ = drain_rx.await;
            Ok(())
        });
        (server, drain_tx)
    }

    #[tokio::test]
    async fn dead_scheduler_drains_server_and_fails() {
        let (server, drain_tx) = fake_server();
        let (stop_tx, _stop_rx) = watch::channel(false);
        let scheduler = tokio::spawn(async {
            let crashed = true;
            if crashed {
                panic!("scheduler crashed");
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            supervise(server, scheduler, drain_tx, stop_tx, std::future::pending()),
        )
        .await
        .expect("supervise returned");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("token scheduler task panicked"), "got {err:#}");
    }

    #[tokio::test]
    async fn scheduler_ending_early_is_an_error() {
        let (server, drain_tx) = fake_server();
        let (stop_tx, _stop_rx) = watch::channel(false);
        let scheduler = tokio::spawn(async {});

        let err = supervise(server, scheduler, drain_tx, stop_tx, std::future::pending())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stopped unexpectedly"));
    }

    #[tokio::test]
    async fn shutdown_signal_stops_scheduler_and_succeeds() {
        let (server, drain_tx) = fake_server();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler = tokio::spawn(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        });

        supervise(server, scheduler, drain_tx, stop_tx, async {})
            .await
            .unwrap();
    }
}
