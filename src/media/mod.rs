//! Raw video to MJPEG: PPM framing, JPEG encoding, multipart fan-out

pub mod mjpeg;
pub mod ppm;

pub use mjpeg::{encode_jpeg, multipart_part, MjpegBroadcaster};
pub use ppm::{PpmParser, RawFrame};
