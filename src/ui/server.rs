//! Web server: routes, shared application state, startup

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use super::{handlers, websocket};
use crate::capture::{CaptureOutputSink, CaptureSupervisor, ProcessLauncher};
use crate::config::AppConfig;
use crate::error::Result;
use crate::input_config::InputConfigProxy;
use crate::media::MjpegBroadcaster;
use crate::peers::{BackpressureGate, PeerRegistry};
use crate::relay::Relay;
use crate::settings::SettingsStore;

/// Everything request handlers and sessions share
pub struct AppState {
    pub config: AppConfig,
    pub relay: Arc<Relay>,
    pub settings: Arc<SettingsStore>,
    pub supervisor: CaptureSupervisor,
    pub mjpeg: Arc<MjpegBroadcaster>,
    pub input_config: InputConfigProxy,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl AppState {
    /// Wire the components for `config`. Must be called inside a tokio
    /// runtime since it spawns the supervisor actor.
    pub fn new(config: AppConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let settings = Arc::new(SettingsStore::open(config.settings_path(), config.capture.channel_count));
        let registry = Arc::new(PeerRegistry::new(BackpressureGate::new(config.fanout.backpressure_bytes)));
        let relay = Arc::new(Relay::new(registry, settings.clone()));
        let supervisor = CaptureSupervisor::spawn(launcher, settings.clone());

        Self {
            relay,
            supervisor,
            mjpeg: Arc::new(MjpegBroadcaster::new(&config.media)),
            input_config: InputConfigProxy::from_settings(&config.input_config),
            settings,
            config,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Sink for the capture process's stdout
    pub fn output_sink(&self) -> CaptureOutputSink {
        CaptureOutputSink::new(self.relay.clone(), self.mjpeg.clone(), self.config.media.max_dimension)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Build the full router
pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/", get(websocket::root))
        .route("/ws", get(websocket::upgrade))
        .route("/vectorscope.mjpeg", get(handlers::vectorscope_stream))
        .route("/api/status", get(handlers::get_status))
        .route("/api/settings", get(handlers::get_settings).post(handlers::update_settings))
        .route("/api/input-config/devices", get(handlers::list_input_devices))
        .route("/api/input-config/options", get(handlers::list_input_options))
        .route("/api/input-config/apply", post(handlers::apply_input_config))
        .fallback_service(static_files)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Web server
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.server.socket_addr();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Relay listening on http://{}", addr);

        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }

    /// Start in background
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Web server error: {}", e);
            }
        })
    }
}
