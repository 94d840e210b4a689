//! Telemetry fan-out with per-audience filtering
//!
//! | class        | audience                     | priority | cached |
//! |--------------|------------------------------|----------|--------|
//! | command      | every peer                   | control  | no     |
//! | telemetry    | audio pages                  | data     | no     |
//! | visual       | pages the category serves    | data     | yes    |
//! | binary frame | audio pages (vectorscope)    | data     | yes    |

use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::deliver;
use crate::peers::{Outbound, PeerConnection, PeerRegistry, Priority};
use crate::protocol::{self, CacheCategory, ControlCommand, Page, TelemetryKind};
use crate::settings::{Settings, SettingsStore};

/// Where a message entered the relay
#[derive(Debug, Clone, Copy)]
pub enum Origin<'a> {
    /// A WebSocket peer; it is excluded from its own fan-out
    Peer(&'a PeerConnection),
    /// The capture process's stdout
    Capture,
}

impl Origin<'_> {
    fn excludes(&self, peer: &PeerConnection) -> bool {
        match self {
            Origin::Peer(origin) => origin.id() == peer.id(),
            Origin::Capture => false,
        }
    }
}

pub struct TelemetryFanout {
    registry: Arc<PeerRegistry>,
    settings: Arc<SettingsStore>,
    integrating: AtomicBool,
}

impl TelemetryFanout {
    pub fn new(registry: Arc<PeerRegistry>, settings: Arc<SettingsStore>) -> Self {
        Self {
            registry,
            settings,
            integrating: AtomicBool::new(false),
        }
    }

    pub fn is_integrating(&self) -> bool {
        self.integrating.load(Ordering::SeqCst)
    }

    /// Apply a dashboard command
    pub fn command(&self, origin: Origin<'_>, command: ControlCommand) {
        let active = match command {
            ControlCommand::StartIntegration => true,
            ControlCommand::StopIntegration => false,
            ControlCommand::GetSettings => {
                if let Origin::Peer(peer) = origin {
                    deliver(&self.registry, peer, Outbound::Text(self.settings.get().to_message()), Priority::Control);
                }
                return;
            }
        };

        self.integrating.store(active, Ordering::SeqCst);
        tracing::info!(is_integrating = active, "Integration state changed");

        let relayed = self.broadcast(
            |peer| !origin.excludes(peer),
            Outbound::Text(command.to_message()),
            Priority::Control,
        );
        let notified = self.broadcast(
            |peer| *peer.page() == Page::Audio,
            Outbound::Text(protocol::integration_state(active)),
            Priority::Control,
        );
        tracing::debug!(relayed, notified, "Integration command fanned out");
    }

    /// Scalar telemetry goes to audio pages only
    pub fn telemetry(&self, origin: Origin<'_>, kind: TelemetryKind, body: Map<String, Value>) -> usize {
        let message = Outbound::Text(Value::Object(body).to_string());
        let delivered = self.broadcast(
            |peer| *peer.page() == Page::Audio && !origin.excludes(peer),
            message,
            Priority::Data,
        );
        tracing::trace!(?kind, delivered, "Telemetry");
        delivered
    }

    /// Visualization payload: cache for late joiners, then fan out
    pub fn visual(&self, origin: Origin<'_>, category: CacheCategory, body: Map<String, Value>) -> usize {
        self.cached_broadcast(origin, category, Outbound::Text(Value::Object(body).to_string()))
    }

    /// Opaque binary frame from a peer, treated as a vectorscope image
    pub fn binary_frame(&self, origin: Origin<'_>, frame: Bytes) -> usize {
        self.cached_broadcast(origin, CacheCategory::Vectorscope, Outbound::Binary(frame))
    }

    /// Initial push for a freshly registered peer
    pub fn greet(&self, peer: &PeerConnection) {
        let mut messages = vec![
            (Outbound::Text(protocol::integration_state(self.is_integrating())), Priority::Control),
            (Outbound::Text(self.settings.get().to_message()), Priority::Control),
        ];
        messages.extend(
            self.registry
                .cached_for(peer.page())
                .into_iter()
                .map(|payload| (payload, Priority::Data)),
        );

        for (message, priority) in messages {
            if !deliver(&self.registry, peer, message, priority) {
                break;
            }
        }
    }

    /// Push changed settings to every peer
    pub fn settings_changed(&self, settings: &Settings) -> usize {
        self.broadcast(|_| true, Outbound::Text(settings.to_message()), Priority::Control)
    }

    fn cached_broadcast(&self, origin: Origin<'_>, category: CacheCategory, message: Outbound) -> usize {
        self.registry.store_if_interested(category, message.clone());
        self.broadcast(
            |peer| category.serves(peer.page()) && !origin.excludes(peer),
            message,
            Priority::Data,
        )
    }

    /// Send to a snapshot of matching peers. Returns how many queued it.
    fn broadcast(&self, filter: impl Fn(&PeerConnection) -> bool, message: Outbound, priority: Priority) -> usize {
        self.registry
            .select(filter)
            .iter()
            .filter(|peer| deliver(&self.registry, peer, message.clone(), priority))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::{BackpressureGate, PeerHandle};
    use crate::protocol::Role;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Client {
        peer: PeerHandle,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<Outbound> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn types(&mut self) -> Vec<String> {
            self.drain()
                .iter()
                .filter_map(|m| m.as_text())
                .map(|t| serde_json::from_str::<Value>(t).unwrap())
                .map(|v| v["type"].as_str().or(v["command"].as_str()).unwrap_or_default().to_string())
                .collect()
        }
    }

    fn setup(threshold: usize) -> (Arc<PeerRegistry>, TelemetryFanout) {
        let registry = Arc::new(PeerRegistry::new(BackpressureGate::new(threshold)));
        let fanout = TelemetryFanout::new(registry.clone(), Arc::new(SettingsStore::default()));
        (registry, fanout)
    }

    fn join(registry: &PeerRegistry, role: Role, page: Page) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        Client {
            peer: registry.register(tx, role, "default", page),
            rx,
        }
    }

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_telemetry_only_reaches_audio_pages() {
        let (registry, fanout) = setup(1 << 20);
        let mut audio = join(&registry, Role::Sub, Page::Audio);
        let mut video = join(&registry, Role::Sub, Page::Video);

        let delivered = fanout.telemetry(
            Origin::Capture,
            TelemetryKind::MomentaryLkfs,
            body(json!({"type": "lkfs", "value": -23.0})),
        );
        assert_eq!(delivered, 1);
        assert_eq!(audio.types(), vec!["lkfs"]);
        assert!(video.drain().is_empty());
    }

    #[test]
    fn test_sender_excluded_from_own_telemetry() {
        let (registry, fanout) = setup(1 << 20);
        let mut capture = join(&registry, Role::Pub, Page::Audio);
        let mut dashboard = join(&registry, Role::Sub, Page::Audio);

        fanout.telemetry(
            Origin::Peer(&capture.peer),
            TelemetryKind::Levels,
            body(json!({"type": "levels", "left": -10.0, "right": -12.0})),
        );
        assert!(capture.drain().is_empty());
        assert_eq!(dashboard.types(), vec!["levels"]);
    }

    #[test]
    fn test_integration_command() {
        let (registry, fanout) = setup(1 << 20);
        let mut capture = join(&registry, Role::Pub, Page::Audio);
        let mut dashboard = join(&registry, Role::Sub, Page::Audio);
        let mut video = join(&registry, Role::Sub, Page::Video);

        fanout.command(Origin::Peer(&dashboard.peer), ControlCommand::StartIntegration);
        assert!(fanout.is_integrating());

        assert_eq!(capture.types(), vec!["start_integration", "integration_state"]);
        assert_eq!(dashboard.types(), vec!["integration_state"]);
        assert_eq!(video.types(), vec!["start_integration"]);

        fanout.command(Origin::Capture, ControlCommand::StopIntegration);
        assert!(!fanout.is_integrating());
    }

    #[test]
    fn test_get_settings_replies_to_sender_only() {
        let (registry, fanout) = setup(1 << 20);
        let mut asker = join(&registry, Role::Sub, Page::Audio);
        let mut other = join(&registry, Role::Sub, Page::Audio);

        fanout.command(Origin::Peer(&asker.peer), ControlCommand::GetSettings);
        assert_eq!(asker.types(), vec!["settings"]);
        assert!(other.drain().is_empty());
    }

    #[test]
    fn test_late_joiner_gets_cached_payload() {
        let (registry, fanout) = setup(1 << 20);
        let _first = join(&registry, Role::Sub, Page::Audio);

        fanout.visual(
            Origin::Capture,
            CacheCategory::Vectorscope,
            body(json!({"type": "vectorscope_samples", "samples": [[0.1, 0.2]]})),
        );

        let mut late = join(&registry, Role::Sub, Page::Audio);
        fanout.greet(&late.peer);
        assert_eq!(late.types(), vec!["integration_state", "settings", "vectorscope_samples"]);

        let mut video = join(&registry, Role::Sub, Page::Video);
        fanout.greet(&video.peer);
        assert_eq!(video.types(), vec!["integration_state", "settings"]);
    }

    #[test]
    fn test_cache_cleared_when_last_subscriber_leaves() {
        let (registry, fanout) = setup(1 << 20);
        let only = join(&registry, Role::Sub, Page::Audio);
        fanout.binary_frame(Origin::Capture, Bytes::from_static(b"\xff\xd8jpeg"));
        assert!(registry.cached(CacheCategory::Vectorscope).is_some());

        registry.unregister(only.peer.id(), "closed");
        assert!(registry.cached(CacheCategory::Vectorscope).is_none());

        let mut later = join(&registry, Role::Sub, Page::Audio);
        fanout.greet(&later.peer);
        assert!(later.drain().iter().all(|m| matches!(m, Outbound::Text(_))));
    }

    #[test]
    fn test_slow_consumer_loses_data_others_do_not() {
        let (registry, fanout) = setup(64);
        let mut slow = join(&registry, Role::Sub, Page::Audio);
        let mut fast = join(&registry, Role::Sub, Page::Audio);

        let level = || body(json!({"type": "levels", "left": -10.0, "right": -10.0, "pad": "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"}));
        for _ in 0..4 {
            fanout.telemetry(Origin::Capture, TelemetryKind::Levels, level());
            for msg in fast.drain() {
                fast.peer.mark_written(msg.len());
            }
        }

        assert!(slow.drain().len() < 4);
        assert!(slow.peer.dropped_count() > 0);
        assert_eq!(fast.peer.dropped_count(), 0);
    }

    #[test]
    fn test_write_failure_tears_down_peer() {
        let (registry, fanout) = setup(1 << 20);
        let gone = join(&registry, Role::Sub, Page::Audio);
        let mut alive = join(&registry, Role::Sub, Page::Audio);
        let Client { peer: gone_peer, rx } = gone;
        drop(rx);

        let delivered = fanout.telemetry(
            Origin::Capture,
            TelemetryKind::Correlation,
            body(json!({"type": "correlation", "value": 0.9})),
        );
        assert_eq!(delivered, 1);
        assert!(gone_peer.is_closed());
        assert_eq!(registry.len(), 1);
        assert_eq!(alive.types(), vec!["correlation"]);
    }
}
