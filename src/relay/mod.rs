//! Message relay between peers and the capture process
//!
//! [`Relay`] is the single entry point used by WebSocket sessions and by
//! the capture output reader. It classifies each inbound message and hands
//! it to the signaling router or the telemetry fan-out.

pub mod fanout;
pub mod signaling;

pub use fanout::{Origin, TelemetryFanout};
pub use signaling::SignalingRouter;

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::peers::{Delivery, Outbound, PeerConnection, PeerHandle, PeerRegistry, Priority};
use crate::protocol::{ConnectParams, Inbound, TelemetryKind};
use crate::settings::{Settings, SettingsStore};
use crate::stats::SystemStats;

/// Queue a message for one peer. A dead writer tears the peer down.
///
/// Returns whether the message was queued.
pub(crate) fn deliver(registry: &PeerRegistry, peer: &PeerConnection, message: Outbound, priority: Priority) -> bool {
    match peer.send(message, priority) {
        Ok(Delivery::Queued) => true,
        Ok(Delivery::Dropped) => false,
        Err(_) => {
            registry.disconnect(peer, "write failed");
            false
        }
    }
}

pub struct Relay {
    registry: Arc<PeerRegistry>,
    router: SignalingRouter,
    fanout: TelemetryFanout,
}

impl Relay {
    pub fn new(registry: Arc<PeerRegistry>, settings: Arc<SettingsStore>) -> Self {
        Self {
            router: SignalingRouter::new(registry.clone()),
            fanout: TelemetryFanout::new(registry.clone(), settings),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn is_integrating(&self) -> bool {
        self.fanout.is_integrating()
    }

    /// Register a new socket, send it the current state and, for a
    /// subscriber, ask the room's publishers for offers.
    pub fn connect(&self, tx: mpsc::UnboundedSender<Outbound>, params: &ConnectParams) -> PeerHandle {
        let peer = self.registry.register(tx, params.role(), params.room(), params.page());
        self.fanout.greet(&peer);
        self.router.announce_join(&peer);
        peer
    }

    pub fn disconnect(&self, peer: &PeerConnection, reason: &str) {
        self.registry.unregister(peer.id(), reason);
    }

    /// Handle a text frame from a peer
    pub fn handle_text(&self, peer: &PeerConnection, text: &str) {
        match Inbound::parse(text) {
            Ok(Inbound::Signal { to, body }) => {
                self.router.route(peer, to.as_deref(), body);
            }
            Ok(inbound) => self.dispatch(Origin::Peer(peer), inbound),
            Err(e) => {
                tracing::debug!(peer = %peer.id(), "Dropping malformed message: {}", e);
            }
        }
    }

    pub fn handle_binary(&self, peer: &PeerConnection, frame: Bytes) {
        self.fanout.binary_frame(Origin::Peer(peer), frame);
    }

    /// Handle a message emitted by the capture process. Capture output has
    /// no room, so signaling-shaped lines are not routable.
    pub fn handle_capture(&self, inbound: Inbound) {
        match inbound {
            Inbound::Signal { .. } => tracing::debug!("Ignoring signaling message from capture output"),
            inbound => self.dispatch(Origin::Capture, inbound),
        }
    }

    pub fn settings_changed(&self, settings: &Settings) -> usize {
        self.fanout.settings_changed(settings)
    }

    /// Host statistics sampled by the server itself
    pub fn system_stats(&self, stats: &SystemStats) -> usize {
        self.fanout.telemetry(Origin::Capture, TelemetryKind::SystemStats, stats.to_body())
    }

    fn dispatch(&self, origin: Origin<'_>, inbound: Inbound) {
        match inbound {
            Inbound::Command(command) => self.fanout.command(origin, command),
            Inbound::Telemetry(kind, body) => {
                self.fanout.telemetry(origin, kind, body);
            }
            Inbound::Visual(category, body) => {
                self.fanout.visual(origin, category, body);
            }
            Inbound::Signal { .. } => {}
            Inbound::Ignored(reason) => tracing::debug!(reason = %reason, "Ignoring message"),
        }
    }
}
