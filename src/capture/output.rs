//! Capture process stdio
//!
//! Stdout is read by a pump task per process and forwarded over a bounded
//! channel to one long-lived [`CaptureOutputSink`], which outlives restarts.

use bytes::{Bytes, BytesMut};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DeliveryMode;
use crate::media::{MjpegBroadcaster, PpmParser};
use crate::protocol::{Inbound, TelemetryKind};
use crate::relay::Relay;

const READ_CHUNK: usize = 64 * 1024;

/// One unit of capture stdout
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// A telemetry line (webrtc delivery)
    Line(String),
    /// Raw PPM bytes (mjpeg delivery)
    Chunk(Bytes),
    /// Stdout of one process instance reached EOF
    Closed,
}

/// Read a process's stdout until EOF
pub async fn pump_stdout<R>(reader: R, delivery: DeliveryMode, tx: mpsc::Sender<CaptureEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    match delivery {
        DeliveryMode::Webrtc => {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(CaptureEvent::Line(line)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Capture stdout read failed: {}", e);
                        break;
                    }
                }
            }
        }
        DeliveryMode::Mjpeg => {
            let mut reader = reader;
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            loop {
                match reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(CaptureEvent::Chunk(buf.split().freeze())).await.is_err() {
                            return;
                        }
                        buf.reserve(READ_CHUNK);
                    }
                    Err(e) => {
                        tracing::warn!("Capture stdout read failed: {}", e);
                        break;
                    }
                }
            }
        }
    }
    let _ = tx.send(CaptureEvent::Closed).await;
}

/// Log stderr line by line until EOF
pub async fn log_stderr<R>(reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::warn!(target: "capture", "{}", line);
        }
    }
}

/// Interpret one stdout line.
///
/// JSON objects are classified like WebSocket messages. A bare number is a
/// momentary loudness reading.
pub fn parse_line(line: &str) -> Option<Inbound> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with('{') {
        return serde_json::from_str::<Value>(line).ok().map(Inbound::classify);
    }

    let value = line.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let Value::Object(body) = json!({ "type": "lkfs", "value": value }) else {
        return None;
    };
    Some(Inbound::Telemetry(TelemetryKind::MomentaryLkfs, body))
}

/// Consumes capture output for the lifetime of the server
pub struct CaptureOutputSink {
    relay: Arc<Relay>,
    mjpeg: Arc<MjpegBroadcaster>,
    parser: PpmParser,
    encoding: Option<JoinHandle<()>>,
    skipped: u64,
}

impl CaptureOutputSink {
    pub fn new(relay: Arc<Relay>, mjpeg: Arc<MjpegBroadcaster>, max_dimension: u32) -> Self {
        Self {
            relay,
            mjpeg,
            parser: PpmParser::new(max_dimension),
            encoding: None,
            skipped: 0,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<CaptureEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        tracing::debug!(skipped = self.skipped, "Capture output sink stopped");
    }

    fn handle(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Line(line) => match parse_line(&line) {
                Some(inbound) => self.relay.handle_capture(inbound),
                None => tracing::debug!(line = %line, "Unrecognised capture output"),
            },
            CaptureEvent::Chunk(chunk) => {
                for frame in self.parser.push(&chunk) {
                    // One encode in flight; frames arriving meanwhile are stale
                    if self.encoding.as_ref().is_some_and(|task| !task.is_finished()) {
                        self.skipped += 1;
                        continue;
                    }
                    let mjpeg = self.mjpeg.clone();
                    self.encoding = Some(tokio::spawn(async move {
                        mjpeg.publish(frame).await;
                    }));
                }
            }
            CaptureEvent::Closed => self.parser.reset(),
        }
    }
}
