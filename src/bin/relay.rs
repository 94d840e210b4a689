//! Relay server
//!
//! Serves dashboards, relays telemetry and signaling, and supervises the
//! capture process.
//!
//! Usage: `sdi-relay [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdi_loudness_relay::{
    capture::{CaptureState, TokioLauncher},
    config::AppConfig,
    constants::CAPTURE_OUTPUT_CAPACITY,
    stats::StatsReporter,
    ui::{AppState, WebServer},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SDI loudness relay");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref()).context("loading configuration")?;

    tracing::info!(
        capture = %config.capture.binary.display(),
        delivery = ?config.capture.delivery,
        static_dir = %config.server.static_dir.display(),
        "Configuration loaded"
    );

    let (output_tx, output_rx) = mpsc::channel(CAPTURE_OUTPUT_CAPACITY);
    let launcher = Arc::new(TokioLauncher::new(
        config.capture.binary.clone(),
        config.capture.delivery,
        output_tx,
    ));
    let auto_start = config.capture.auto_start;

    let state = Arc::new(AppState::new(config, launcher));
    tokio::spawn(state.output_sink().run(output_rx));

    if state.config.stats.enabled {
        tokio::spawn(StatsReporter::new(state.relay.clone(), state.config.stats.interval()).run());
    }

    if auto_start {
        state.supervisor.start()?;
    }

    let server = WebServer::new(state.clone()).start_background();

    tokio::select! {
        _ = server => {
            tracing::error!("Web server stopped");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            tracing::info!("Shutting down");
        }
    }

    state.supervisor.stop()?;
    let mut status = state.supervisor.subscribe();
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        status.wait_for(|s| s.state == CaptureState::Stopped),
    )
    .await;

    Ok(())
}
