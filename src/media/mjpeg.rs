//! JPEG encoding and multipart fan-out for `/vectorscope.mjpeg`

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::ppm::RawFrame;
use crate::config::MediaConfig;
use crate::constants::MJPEG_BOUNDARY;
use crate::error::MediaError;

/// Encodes frames once and hands the finished multipart part to every
/// open HTTP consumer
pub struct MjpegBroadcaster {
    tx: broadcast::Sender<Bytes>,
    quality: u8,
    encoded: AtomicU64,
    failed: AtomicU64,
}

impl MjpegBroadcaster {
    pub fn new(config: &MediaConfig) -> Self {
        let (tx, _) = broadcast::channel(config.consumer_buffer.max(1));
        Self {
            tx,
            quality: config.jpeg_quality.clamp(1, 100),
            encoded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// `Content-Type` of the streaming response
    pub fn content_type() -> String {
        format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    pub fn consumer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn encoded_count(&self) -> u64 {
        self.encoded.load(Ordering::Relaxed)
    }

    /// Encode and fan out one frame. Returns the number of consumers it
    /// reached; a frame that fails to encode is discarded.
    pub async fn publish(&self, frame: RawFrame) -> usize {
        if self.consumer_count() == 0 {
            return 0;
        }

        let quality = self.quality;
        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
            .await
            .map_err(|e| MediaError::EncodeFailed(e.to_string()))
            .and_then(|result| result);

        match encoded {
            Ok(jpeg) => {
                self.encoded.fetch_add(1, Ordering::Relaxed);
                self.tx.send(multipart_part(&jpeg)).unwrap_or(0)
            }
            Err(e) => {
                let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(failed, "{}", e);
                0
            }
        }
    }
}

/// Encode a packed RGB frame as JPEG
pub fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Bytes, MediaError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(MediaError::BodyLength {
            width: frame.width,
            height: frame.height,
            actual: frame.data.len(),
        });
    }

    let mut out = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&frame.data, frame.width, frame.height, ColorType::Rgb8)
        .map_err(|e| MediaError::EncodeFailed(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// One multipart part: boundary, headers, JPEG body
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
