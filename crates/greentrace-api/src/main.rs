//! # greentrace-api — Binary Entry Point
//!
//! Parses configuration, connects the optional database, hydrates the
//! in-memory stores, and serves until interrupted.

use anyhow::Context;
use clap::Parser;

use greentrace_api::config::Cli;
use greentrace_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.to_config().context("invalid configuration")?;
    let registry = cli.load_registry().context("failed to load role policy")?;
    tracing::info!(?config, "configuration loaded");

    let db_pool = greentrace_api::db::init_pool(cli.database_url.as_deref())
        .await
        .context("database initialization failed")?;

    let port = config.port;
    let state = AppState::with_config(config, registry, db_pool);
    state
        .hydrate_from_db()
        .await
        .context("database hydration failed")?;

    let app = greentrace_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("GreenTrace API listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
