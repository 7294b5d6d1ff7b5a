//! Leaflet Storage Server
//!
//! HTTP backend of a collaborative map editor: maps with permissions,
//! versioned GeoJSON datalayers, data import and export, and the tile layer
//! and licence catalogue the frontend offers.
//!
//! Uses SQLite (embedded) for rows and the filesystem for datalayer files.

mod app;
mod config;
mod error;
mod extractors;
mod handlers;
mod services;
mod storage;

use anyhow::{Context, Result};
use crate::config::{Settings, INSECURE_SECRET};
use std::net::SocketAddr;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    // Set up panic hook to log crashes
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("[PANIC] at {:?}: {}", location, payload);
        tracing::error!("PANIC at {:?}: {}", location, payload);
    }));

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("[FATAL] Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("[FATAL] Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(
        "Starting Leaflet Storage Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("PID: {}", std::process::id());

    if let Err(e) = run_server(settings).await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<()> {
    info!(
        "Config loaded: bind={}, data={}, anonymous maps={}",
        settings.bind_address,
        settings.data_dir.display(),
        settings.allow_anonymous
    );
    if settings.secret_key == INSECURE_SECRET {
        warn!("secret_key not set, using default (insecure for production)");
    }

    let addr: SocketAddr = settings
        .bind_address
        .parse()
        .context("Failed to parse bind address")?;

    let state = app::AppState::new(settings)
        .await
        .context("Failed to initialize application state")?;
    app::seed_catalog(&state)
        .await
        .context("Failed to seed tile layer and licence catalogue")?;
    info!(
        "SQLite database initialized at: {}",
        state.settings.database_path().display()
    );

    let router = app::router(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("Server ready to accept connections");
    axum::serve(listener, router).await.context("Server error")?;

    Ok(())
}
