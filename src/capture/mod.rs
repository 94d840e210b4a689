//! External capture process: launching, supervision and stdout handling

pub mod launcher;
pub mod output;
pub mod supervisor;

pub use launcher::{CaptureChild, ProcessLauncher, TokioLauncher};
pub use output::{parse_line, CaptureEvent, CaptureOutputSink};
pub use supervisor::{CaptureState, CaptureStatus, CaptureSupervisor};
