//! Application configuration
//!
//! Loaded from a TOML file. Every field has a default so a partial (or
//! missing) file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub fanout: FanoutConfig,
    pub media: MediaConfig,
    pub input_config: InputConfigSettings,
    pub stats: StatsConfig,
    /// Where the last-known capture settings are persisted
    pub settings_path: Option<PathBuf>,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub http_port: u16,
    /// Directory served for static dashboard assets
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            static_dir: PathBuf::from("web"),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }
}

/// How live video reaches dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Capture publishes WebRTC tracks; stdout carries telemetry lines
    #[default]
    Webrtc,
    /// Capture writes a raw PPM stream to stdout, served as MJPEG
    Mjpeg,
}

/// Capture process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub binary: PathBuf,
    pub channel_count: u32,
    pub delivery: DeliveryMode,
    /// Spawn the capture process when the server starts
    pub auto_start: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_CAPTURE_BINARY),
            channel_count: CAPTURE_CHANNEL_COUNT,
            delivery: DeliveryMode::default(),
            auto_start: true,
        }
    }
}

/// Telemetry fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Queued outbound bytes above which a peer starts losing telemetry
    pub backpressure_bytes: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            backpressure_bytes: DEFAULT_BACKPRESSURE_BYTES,
        }
    }
}

/// MJPEG transcoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub jpeg_quality: u8,
    pub max_dimension: u32,
    pub consumer_buffer: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_dimension: MAX_FRAME_DIMENSION,
            consumer_buffer: MJPEG_CONSUMER_BUFFER,
        }
    }
}

/// Device-configuration helper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfigSettings {
    pub binary: PathBuf,
    pub timeout_ms: u64,
}

impl Default for InputConfigSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_INPUT_CONFIG_BINARY),
            timeout_ms: 5_000,
        }
    }
}

impl InputConfigSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Host statistics reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_STATS_INTERVAL_MS,
        }
    }
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(100))
    }
}

impl AppConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from an explicit path, else the platform config directory, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/config.toml` for this application
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Settings file, defaulting to the platform data directory
    pub fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("settings.toml")))
            .unwrap_or_else(|| PathBuf::from("settings.toml"))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", "sdi-loudness-relay")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            http_port = 9000

            [capture]
            delivery = "mjpeg"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_port, 9000);
        assert_eq!(config.server.static_dir, PathBuf::from("web"));
        assert_eq!(config.capture.delivery, DeliveryMode::Mjpeg);
        assert_eq!(config.capture.channel_count, 16);
        assert_eq!(config.fanout.backpressure_bytes, 512 * 1024);
        assert!(config.stats.enabled);
        assert_eq!(config.stats.interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_stats_section() {
        let config = AppConfig::from_toml_str("[stats]\nenabled = false\ninterval_ms = 10\n").unwrap();
        assert!(!config.stats.enabled);
        assert_eq!(config.stats.interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            AppConfig::from_toml_str("server = 3"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_explicit_settings_path() {
        let config = AppConfig {
            settings_path: Some(PathBuf::from("/tmp/relay-settings.toml")),
            ..Default::default()
        };
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/relay-settings.toml"));
    }
}
