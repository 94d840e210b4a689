//! # SDI Loudness Relay
//!
//! Relay core of a broadcast loudness-monitoring appliance. A native capture
//! process measures SDI audio/video and emits telemetry; browser dashboards
//! subscribe over WebSocket for live display and send control commands back.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          CAPTURE PROCESS (external)                      │
//! │    stdout (telemetry lines | PPM stream)      WebSocket ?role=pub        │
//! └───────────────┬───────────────────────────────────────┬──────────────────┘
//!                 │                                       │
//!                 ▼                                       ▼
//! ┌───────────────────────────────┐        ┌──────────────────────────────────┐
//! │ CaptureSupervisor (capture::) │        │      WebSocket session (ui::)    │
//! │  Stopped→Starting→Running     │        │  register → PeerRegistry         │
//! │  Stopping→Starting on restart │        │  text  → classify → Router/Fanout│
//! └──────┬────────────────────────┘        │  binary → vectorscope frame      │
//!        │ CaptureOutput                   └──────┬───────────────────┬───────┘
//!        ▼                                        ▼                   ▼
//! ┌────────────────────┐   ┌───────────────────────────────┐  ┌─────────────────┐
//! │ MJPEG pipeline     │   │ TelemetryFanout (relay::)     │  │ SignalingRouter │
//! │ PPM → JPEG → parts │   │ audience filter + last-frame  │  │ need-offer / to │
//! └─────────┬──────────┘   └───────────────┬───────────────┘  └────────┬────────┘
//!           │                              ▼                           ▼
//!           │              ┌──────────────────────────────────────────────────┐
//!           │              │  PeerRegistry (peers::) + BackpressureGate       │
//!           │              │  rooms {pubs, subs}, per-peer outbound queue     │
//!           ▼              └──────────────────────────────────────────────────┘
//!   GET /vectorscope.mjpeg                    ▼
//!                                     browser dashboards
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod input_config;
pub mod media;
pub mod peers;
pub mod protocol;
pub mod relay;
pub mod settings;
pub mod stats;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default HTTP/WebSocket port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Room used when a peer does not name one
    pub const DEFAULT_ROOM: &str = "default";

    /// Outbound bytes a peer may have queued before telemetry is dropped
    pub const DEFAULT_BACKPRESSURE_BYTES: usize = 512 * 1024;

    /// Audio channel count passed to the capture process (`-c`)
    pub const CAPTURE_CHANNEL_COUNT: u32 = 16;

    /// Default capture binary, relative to the working directory
    pub const DEFAULT_CAPTURE_BINARY: &str = "./Capture";

    /// Default device-configuration helper binary
    pub const DEFAULT_INPUT_CONFIG_BINARY: &str = "./InputConfig";

    /// Multipart boundary used by the MJPEG stream
    pub const MJPEG_BOUNDARY: &str = "frame";

    /// Default JPEG quality for transcoded frames
    pub const DEFAULT_JPEG_QUALITY: u8 = 80;

    /// Largest accepted raw frame edge, in pixels
    pub const MAX_FRAME_DIMENSION: u32 = 8192;

    /// Parts buffered per MJPEG consumer before it starts skipping
    pub const MJPEG_CONSUMER_BUFFER: usize = 8;

    /// Capacity of the capture stdout channel
    pub const CAPTURE_OUTPUT_CAPACITY: usize = 256;

    /// Period of the host CPU/memory report
    pub const DEFAULT_STATS_INTERVAL_MS: u64 = 2_000;
}
