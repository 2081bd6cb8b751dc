use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pagecraft_pipeline::{Pipeline, dispatch};
use pagecraft_server::config::ServerConfig;
use pagecraft_server::intake::{self, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before logging so PAGECRAFT_LOG_JSON and RUST_LOG can live there.
    let dotenv = dotenvy::dotenv();

    // JSON logs in production (PAGECRAFT_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("PAGECRAFT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("pagecraft_server=info".parse()?)
        .add_directive("pagecraft_pipeline=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
    match dotenv {
        Ok(path) => tracing::info!("Loaded environment from {}", path.display()),
        Err(e) => tracing::debug!("No .env file loaded: {e}"),
    }

    let config = ServerConfig::parse();
    if config.shared_secret.is_empty() {
        anyhow::bail!("MY_SECRET must not be empty");
    }

    let pipeline = Arc::new(Pipeline::from_config(&config.pipeline).context("pipeline configuration")?);
    if config.pipeline.serialize_targets {
        tracing::info!("Serializing runs per target repository");
    }

    let (dispatcher, jobs) = dispatch::queue(config.queue_capacity);
    let worker = tokio::spawn(dispatch::run_worker(jobs, pipeline));

    let app = intake::router(AppState::new(config.shared_secret.clone(), dispatcher));
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "pagecraft intake listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it the last dispatcher) is gone; let running jobs finish.
    tracing::info!("Intake stopped, waiting for running pipelines");
    worker.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
