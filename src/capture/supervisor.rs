//! Capture process supervisor
//!
//! A single actor task owns the process handle. Commands arrive on one queue
//! and are always drained before exit events, so a burst of restarts while
//! a kill is pending collapses into a single respawn.
//!
//! ```text
//! Stopped ──start──► Starting ──spawned──► Running
//!    ▲                  │                    │ restart / stop
//!    │            spawn failed               ▼
//!    └──────────────────┴───── exit ◄─── Stopping ──exit + pending──► Starting
//! ```

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use super::launcher::{CaptureChild, ProcessLauncher};
use crate::error::CaptureError;
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Snapshot published on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub pid: Option<u32>,
    /// Incremented on every successful spawn
    pub generation: u64,
}

#[derive(Debug)]
enum Command {
    Start,
    Restart,
    Stop,
}

#[derive(Debug)]
struct Exited {
    generation: u64,
    code: Option<i32>,
}

/// Handle to the supervisor actor
#[derive(Clone)]
pub struct CaptureSupervisor {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<CaptureStatus>,
}

impl CaptureSupervisor {
    /// Spawn the actor on the current runtime. Nothing is launched until
    /// [`Self::start`] is called.
    pub fn spawn(launcher: Arc<dyn ProcessLauncher>, settings: Arc<SettingsStore>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CaptureStatus::default());

        let actor = Actor {
            launcher,
            settings,
            commands: commands_rx,
            events: events_rx,
            events_tx,
            status: status_tx,
            tracked: None,
            state: CaptureState::Stopped,
            generation: 0,
            respawn: false,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            status: status_rx,
        }
    }

    /// Spawn the process unless one is already tracked
    pub fn start(&self) -> Result<(), CaptureError> {
        self.send(Command::Start)
    }

    /// Kill the tracked process and spawn a new one once it has exited
    pub fn restart(&self) -> Result<(), CaptureError> {
        self.send(Command::Restart)
    }

    /// Kill the tracked process without respawning
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.send(Command::Stop)
    }

    pub fn status(&self) -> CaptureStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> Result<(), CaptureError> {
        self.commands.send(command).map_err(|_| CaptureError::SupervisorGone)
    }
}

struct Tracked {
    generation: u64,
    pid: Option<u32>,
    /// Taken when the kill is sent; a kill is never cancelled
    kill: Option<oneshot::Sender<()>>,
}

struct Actor {
    launcher: Arc<dyn ProcessLauncher>,
    settings: Arc<SettingsStore>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<Exited>,
    events_tx: mpsc::UnboundedSender<Exited>,
    status: watch::Sender<CaptureStatus>,
    tracked: Option<Tracked>,
    state: CaptureState,
    generation: u64,
    /// Spawn again once the tracked process has exited
    respawn: bool,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(exited) = self.events.recv() => self.on_exit(exited).await,
            }
        }

        // Every handle is gone: dropping the kill sender terminates the child
        self.tracked = None;
        tracing::debug!("Capture supervisor stopped");
    }

    async fn handle(&mut self, command: Command) {
        tracing::debug!(?command, state = ?self.state, "Capture command");
        match command {
            Command::Start => match &self.tracked {
                // Stop still in flight: come back up once it has exited
                Some(tracked) if tracked.kill.is_none() => self.respawn = true,
                Some(_) => tracing::debug!("Capture process already tracked"),
                None => self.spawn().await,
            },
            Command::Restart => {
                if self.tracked.is_some() {
                    self.respawn = true;
                    self.kill();
                } else {
                    self.spawn().await;
                }
            }
            Command::Stop => {
                self.respawn = false;
                if self.tracked.is_some() {
                    self.kill();
                }
            }
        }
    }

    fn kill(&mut self) {
        let Some(tracked) = self.tracked.as_mut() else {
            return;
        };
        if let Some(kill) = tracked.kill.take() {
            tracing::info!(pid = ?tracked.pid, generation = tracked.generation, "Stopping capture process");
            let _ = kill.send(());
            self.set_state(CaptureState::Stopping);
        }
    }

    async fn on_exit(&mut self, exited: Exited) {
        let Some(tracked) = self.tracked.as_ref() else {
            return;
        };
        if tracked.generation != exited.generation {
            return;
        }

        if self.state == CaptureState::Running {
            tracing::warn!(pid = ?tracked.pid, code = ?exited.code, "Capture process exited unexpectedly");
        } else {
            tracing::info!(pid = ?tracked.pid, code = ?exited.code, "Capture process exited");
        }
        self.tracked = None;

        if std::mem::take(&mut self.respawn) {
            self.spawn().await;
        } else {
            self.set_state(CaptureState::Stopped);
        }
    }

    async fn spawn(&mut self) {
        self.set_state(CaptureState::Starting);

        // Settings are read here so coalesced restarts use the latest value
        let args = self.settings.capture_args();
        let child = match self.launcher.launch(args.clone()).await {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(args = ?args, "{}", e);
                self.set_state(CaptureState::Stopped);
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let pid = child.pid();
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(monitor(child, generation, kill_rx, self.events_tx.clone()));

        self.tracked = Some(Tracked {
            generation,
            pid,
            kill: Some(kill_tx),
        });
        tracing::info!(pid = ?pid, generation, args = ?args, "Capture process started");
        self.set_state(CaptureState::Running);
    }

    fn set_state(&mut self, state: CaptureState) {
        self.state = state;
        let status = CaptureStatus {
            state,
            pid: self.tracked.as_ref().and_then(|t| t.pid),
            generation: self.generation,
        };
        self.status.send_replace(status);
    }
}

/// Wait for the child to exit, killing it first if asked to
async fn monitor(
    mut child: Box<dyn CaptureChild>,
    generation: u64,
    kill: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<Exited>,
) {
    let result = tokio::select! {
        result = child.wait() => result,
        _ = kill => {
            if let Err(e) = child.kill().await {
                tracing::warn!(generation, "{}", e);
            }
            child.wait().await
        }
    };

    let code = result.unwrap_or_else(|e| {
        tracing::warn!(generation, "{}", e);
        None
    });
    let _ = events.send(Exited { generation, code });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsPatch;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeLauncher {
        spawned: Mutex<Vec<Vec<String>>>,
        kills: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        fail: bool,
    }

    struct FakeChild {
        pid: u32,
        exit_tx: watch::Sender<bool>,
        exit_rx: watch::Receiver<bool>,
        kills: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(&self, args: Vec<String>) -> Result<Box<dyn CaptureChild>, CaptureError> {
            if self.fail {
                return Err(CaptureError::SpawnFailed {
                    program: "fake".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            let mut spawned = self.spawned.lock();
            spawned.push(args);
            self.live.fetch_add(1, Ordering::SeqCst);
            let (exit_tx, exit_rx) = watch::channel(false);
            Ok(Box::new(FakeChild {
                pid: 1000 + spawned.len() as u32,
                exit_tx,
                exit_rx,
                kills: self.kills.clone(),
                live: self.live.clone(),
            }))
        }
    }

    #[async_trait]
    impl CaptureChild for FakeChild {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        async fn wait(&mut self) -> Result<Option<i32>, CaptureError> {
            let _ = self.exit_rx.wait_for(|exited| *exited).await;
            Ok(None)
        }

        async fn kill(&mut self) -> Result<(), CaptureError> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if !self.exit_tx.send_replace(true) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn supervisor(launcher: &Arc<FakeLauncher>) -> (CaptureSupervisor, Arc<SettingsStore>) {
        let settings = Arc::new(SettingsStore::default());
        (CaptureSupervisor::spawn(launcher.clone(), settings.clone()), settings)
    }

    async fn wait_running(supervisor: &CaptureSupervisor, generation: u64) -> CaptureStatus {
        let mut rx = supervisor.subscribe();
        let status = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| s.state == CaptureState::Running && s.generation >= generation),
        )
        .await
        .expect("capture did not reach running")
        .unwrap();
        *status
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let launcher = Arc::new(FakeLauncher::default());
        let (supervisor, _) = supervisor(&launcher);

        supervisor.start().unwrap();
        supervisor.start().unwrap();
        let status = wait_running(&supervisor, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(status.pid, Some(1001));
        assert_eq!(supervisor.status().generation, 1);
        assert_eq!(launcher.spawned.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_restarts_leave_one_instance() {
        let launcher = Arc::new(FakeLauncher::default());
        let (supervisor, _) = supervisor(&launcher);

        supervisor.start().unwrap();
        wait_running(&supervisor, 1).await;

        supervisor.restart().unwrap();
        supervisor.restart().unwrap();
        wait_running(&supervisor, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(launcher.live.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.status().state, CaptureState::Running);
    }

    #[tokio::test]
    async fn test_settings_change_restart_uses_new_channels() {
        let launcher = Arc::new(FakeLauncher::default());
        let (supervisor, settings) = supervisor(&launcher);

        supervisor.start().unwrap();
        wait_running(&supervisor, 1).await;

        settings
            .update(&SettingsPatch {
                left_channel: Some(2),
                right_channel: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        supervisor.restart().unwrap();
        wait_running(&supervisor, 2).await;

        assert_eq!(launcher.kills.load(Ordering::SeqCst), 1);
        let spawned = launcher.spawned.lock();
        assert_eq!(spawned.len(), 2);
        assert!(spawned[1].join(" ").contains("-L 2 -R 3"));
        assert!(spawned[0].join(" ").contains("-L 0 -R 1"));
    }

    #[tokio::test]
    async fn test_restart_when_stopped_spawns_immediately() {
        let launcher = Arc::new(FakeLauncher::default());
        let (supervisor, _) = supervisor(&launcher);

        supervisor.restart().unwrap();
        wait_running(&supervisor, 1).await;
        assert_eq!(launcher.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_clears_handle() {
        let launcher = Arc::new(FakeLauncher::default());
        let (supervisor, _) = supervisor(&launcher);

        supervisor.start().unwrap();
        wait_running(&supervisor, 1).await;
        supervisor.stop().unwrap();

        let mut rx = supervisor.subscribe();
        let status = *rx.wait_for(|s| s.state == CaptureState::Stopped).await.unwrap();
        assert_eq!(status.pid, None);
        assert_eq!(launcher.live.load(Ordering::SeqCst), 0);

        supervisor.start().unwrap();
        wait_running(&supervisor, 2).await;
    }

    #[tokio::test]
    async fn test_spawn_failure_is_not_retried() {
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..Default::default()
        });
        let (supervisor, _) = supervisor(&launcher);

        supervisor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = supervisor.status();
        assert_eq!(status.state, CaptureState::Stopped);
        assert_eq!(status.generation, 0);
        assert!(launcher.spawned.lock().is_empty());
    }
}
