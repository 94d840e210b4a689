//! Error types for the relay

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Input configuration error: {0}")]
    InputConfig(#[from] InputConfigError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture process supervision errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill capture process: {0}")]
    KillFailed(String),

    #[error("Failed to wait on capture process: {0}")]
    WaitFailed(String),

    #[error("Supervisor is not running")]
    SupervisorGone,
}

/// Settings store errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Channel {channel} out of range (0..{count})")]
    ChannelOutOfRange { channel: u32, count: u32 },

    #[error("Failed to persist settings: {0}")]
    Persist(String),

    #[error("Failed to parse settings file: {0}")]
    Parse(String),
}

/// Raw frame parsing and transcoding errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Unexpected magic: {0:?}")]
    BadMagic(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Unsupported maxval: {0}")]
    UnsupportedMaxval(String),

    #[error("Frame body length {actual} does not match {width}x{height}")]
    BodyLength { width: u32, height: u32, actual: usize },

    #[error("JPEG encoding failed: {0}")]
    EncodeFailed(String),
}

/// Device-configuration helper errors
#[derive(Error, Debug)]
pub enum InputConfigError {
    #[error("Failed to run helper: {0}")]
    SpawnFailed(String),

    #[error("Helper timed out after {0} ms")]
    Timeout(u64),

    #[error("Helper exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
