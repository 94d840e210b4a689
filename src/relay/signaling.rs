//! WebRTC signaling relay
//!
//! Payload-agnostic: the router never looks inside an SDP or candidate. It
//! stamps `from`, finds the target and forwards at most once.

use serde_json::{Map, Value};
use std::sync::Arc;

use super::deliver;
use crate::peers::{Outbound, PeerConnection, PeerRegistry, Priority};
use crate::protocol::{self, Role};

pub struct SignalingRouter {
    registry: Arc<PeerRegistry>,
}

impl SignalingRouter {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Ask every publisher in the room for an offer to a newly joined subscriber.
    /// Returns how many publishers were asked.
    pub fn announce_join(&self, peer: &PeerConnection) -> usize {
        if peer.role() != Role::Sub {
            return 0;
        }

        let directive = protocol::need_offer(peer.id().as_str(), peer.room());
        let publishers = self.registry.room_members(peer.room(), Role::Pub);
        let mut asked = 0;
        for publisher in &publishers {
            if deliver(&self.registry, publisher, Outbound::Text(directive.clone()), Priority::Control) {
                asked += 1;
            }
        }

        tracing::debug!(peer = %peer.id(), room = %peer.room(), publishers = asked, "Requested offers");
        asked
    }

    /// Relay a signaling message from `sender`.
    ///
    /// With a `to` the message goes to that single peer in the sender's room
    /// or nowhere. Without one it goes to every peer of the opposite role in
    /// the room. Returns the number of peers it was queued for.
    pub fn route(&self, sender: &PeerConnection, to: Option<&str>, body: Map<String, Value>) -> usize {
        let message = protocol::stamp_from(body, sender.id().as_str());

        match to {
            Some(target_id) => match self.registry.lookup(sender.room(), target_id) {
                Some(target) => {
                    usize::from(deliver(&self.registry, &target, Outbound::Text(message), Priority::Control))
                }
                None => {
                    tracing::debug!(
                        from = %sender.id(),
                        to = target_id,
                        room = %sender.room(),
                        "Dropping unroutable signaling message"
                    );
                    0
                }
            },
            None => self
                .registry
                .room_members(sender.room(), sender.role().opposite())
                .iter()
                .filter(|peer| deliver(&self.registry, peer, Outbound::Text(message.clone()), Priority::Control))
                .count(),
        }
    }
}
