// crates/server/src/main.rs
//! Docflow server binary.
//!
//! Opens the result store, builds the broker, starts the reaper and serves
//! HTTP until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docflow_broker::{Broker, InMemoryResults};
use docflow_db::Database;
use docflow_server::pipeline::StubAnalyzer;
use docflow_server::{create_app, AppState, Cli};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "warn,docflow_broker=info,docflow_server=info,docflow_db=info".into()
        }))
        .init();

    let cli = Cli::parse();
    let broker_config = cli.broker_config();
    let server_config = cli.server_config();

    let broker = if cli.in_memory {
        tracing::warn!("Results kept in memory; they are lost on exit");
        let store = Arc::new(InMemoryResults::new());
        Broker::new(broker_config, store.clone(), store)
    } else {
        let db = match &cli.db {
            Some(path) => Database::new(path).await,
            None => Database::open_default().await,
        }
        .context("failed to open result database")?;
        let db = Arc::new(db);
        Broker::new(broker_config, db.clone(), db)
    };

    let shutdown = CancellationToken::new();
    let reaper = broker.spawn_reaper(shutdown.clone());

    let analyzer = Arc::new(StubAnalyzer::new(server_config.stub_latency));
    let state = AppState::new(broker, analyzer, server_config);
    let app = create_app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Docflow server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!(error = %e, "Reaper task ended abnormally");
    }
    tracing::info!("Docflow server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or when something else cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                // Without a signal handler, only the token can stop us.
                shutdown.cancelled().await;
            }
            tracing::info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
}
