//! Spawning the capture process
//!
//! The supervisor only sees [`ProcessLauncher`] and [`CaptureChild`], so its
//! state machine runs unchanged against a fake in tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::output::{self, CaptureEvent};
use crate::config::DeliveryMode;
use crate::error::CaptureError;

/// A running capture process
#[async_trait]
pub trait CaptureChild: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit, returning its exit code if it had one
    async fn wait(&mut self) -> Result<Option<i32>, CaptureError>;

    /// Forcefully terminate the process
    async fn kill(&mut self) -> Result<(), CaptureError>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    async fn launch(&self, args: Vec<String>) -> Result<Box<dyn CaptureChild>, CaptureError>;
}

/// Launches the real capture binary with piped stdio
pub struct TokioLauncher {
    program: PathBuf,
    delivery: DeliveryMode,
    output: mpsc::Sender<CaptureEvent>,
}

impl TokioLauncher {
    pub fn new(program: impl Into<PathBuf>, delivery: DeliveryMode, output: mpsc::Sender<CaptureEvent>) -> Self {
        Self {
            program: program.into(),
            delivery,
            output,
        }
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, args: Vec<String>) -> Result<Box<dyn CaptureChild>, CaptureError> {
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::SpawnFailed {
                program: self.program.display().to_string(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(output::pump_stdout(stdout, self.delivery, self.output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(output::log_stderr(stderr));
        }

        Ok(Box::new(TokioChild(child)))
    }
}

struct TokioChild(Child);

#[async_trait]
impl CaptureChild for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.0.id()
    }

    async fn wait(&mut self) -> Result<Option<i32>, CaptureError> {
        self.0
            .wait()
            .await
            .map(|status| status.code())
            .map_err(|e| CaptureError::WaitFailed(e.to_string()))
    }

    async fn kill(&mut self) -> Result<(), CaptureError> {
        self.0.kill().await.map_err(|e| CaptureError::KillFailed(e.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let (tx, _rx) = mpsc::channel(4);
        let launcher = TokioLauncher::new("./definitely-not-a-capture-binary", DeliveryMode::Webrtc, tx);
        let result = launcher.launch(vec!["-d".into(), "0".into()]).await;
        assert!(matches!(result, Err(CaptureError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_stdout_lines_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let launcher = TokioLauncher::new("echo", DeliveryMode::Webrtc, tx);
        let mut child = launcher.launch(vec!["-23.5".into()]).await.unwrap();

        assert_eq!(child.wait().await.unwrap(), Some(0));
        match rx.recv().await {
            Some(CaptureEvent::Line(line)) => assert_eq!(line, "-23.5"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
