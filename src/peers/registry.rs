//! Peer registry with room membership
//!
//! Owns every live peer. Rooms only hold ids. Membership and the last-frame
//! cache share one lock so joins, leaves and cache writes are atomic with
//! respect to each other.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::cache::LastFrameCache;
use super::connection::{Outbound, PeerConnection, PeerHandle, PeerId};
use super::gate::BackpressureGate;
use crate::protocol::{CacheCategory, Page, Role};

/// Publisher and subscriber ids sharing a signaling scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Room {
    pub pubs: HashSet<PeerId>,
    pub subs: HashSet<PeerId>,
}

impl Room {
    fn members_mut(&mut self, role: Role) -> &mut HashSet<PeerId> {
        match role {
            Role::Pub => &mut self.pubs,
            Role::Sub => &mut self.subs,
        }
    }

    pub fn members(&self, role: Role) -> &HashSet<PeerId> {
        match role {
            Role::Pub => &self.pubs,
            Role::Sub => &self.subs,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pubs.contains(id) || self.subs.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.pubs.is_empty() && self.subs.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    peers: HashMap<PeerId, PeerHandle>,
    rooms: HashMap<String, Room>,
    cache: LastFrameCache,
}

impl Inner {
    fn interested(&self, category: CacheCategory) -> usize {
        self.peers
            .values()
            .filter(|p| p.role() == Role::Sub && category.serves(p.page()))
            .count()
    }
}

/// Registry of live peers
pub struct PeerRegistry {
    inner: Mutex<Inner>,
    gate: BackpressureGate,
}

impl PeerRegistry {
    pub fn new(gate: BackpressureGate) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            gate,
        }
    }

    /// Register a connection and place it in its room
    pub fn register(
        &self,
        tx: mpsc::UnboundedSender<Outbound>,
        role: Role,
        room: impl Into<String>,
        page: Page,
    ) -> PeerHandle {
        let room = room.into();
        let id = PeerId::generate();
        let peer = Arc::new(PeerConnection::new(id.clone(), role, room.clone(), page, tx, self.gate));

        let (room_pubs, room_subs) = {
            let mut inner = self.inner.lock();
            inner.peers.insert(id.clone(), peer.clone());
            let entry = inner.rooms.entry(room.clone()).or_default();
            entry.members_mut(role).insert(id.clone());
            (entry.pubs.len(), entry.subs.len())
        };

        tracing::info!(
            peer = %id,
            role = %role,
            room = %room,
            page = %peer.page(),
            pubs = room_pubs,
            subs = room_subs,
            "Peer joined"
        );
        peer
    }

    /// Remove a peer. Idempotent: a second call returns `None`.
    ///
    /// Clears any cache category that no longer has an interested
    /// subscriber and deletes the room once it is empty.
    pub fn unregister(&self, id: &PeerId, reason: &str) -> Option<PeerHandle> {
        let mut cleared = Vec::new();
        let peer = {
            let mut inner = self.inner.lock();
            let peer = inner.peers.remove(id)?;

            if let Some(room) = inner.rooms.get_mut(peer.room()) {
                room.members_mut(peer.role()).remove(id);
                if room.is_empty() {
                    inner.rooms.remove(peer.room());
                }
            }

            for category in CacheCategory::ALL {
                if inner.interested(category) == 0 && inner.cache.clear(category) {
                    cleared.push(category);
                }
            }
            peer
        };

        tracing::info!(
            peer = %id,
            role = %peer.role(),
            room = %peer.room(),
            reason,
            cleared = ?cleared,
            "Peer left"
        );
        Some(peer)
    }

    /// Unregister and force the socket closed. Used on write failure.
    pub fn disconnect(&self, peer: &PeerConnection, reason: &str) {
        self.unregister(peer.id(), reason);
        peer.close();
    }

    /// Resolve a signaling target within a room, across pubs and subs
    pub fn lookup(&self, room: &str, id: &str) -> Option<PeerHandle> {
        let inner = self.inner.lock();
        let room = inner.rooms.get(room)?;
        if !room.contains(id) {
            return None;
        }
        inner.peers.get(id).cloned()
    }

    /// Snapshot of one role's members in a room
    pub fn room_members(&self, room: &str, role: Role) -> Vec<PeerHandle> {
        let inner = self.inner.lock();
        let Some(room) = inner.rooms.get(room) else {
            return Vec::new();
        };
        room.members(role)
            .iter()
            .filter_map(|id| inner.peers.get(id).cloned())
            .collect()
    }

    /// Snapshot of every peer matching `filter`
    pub fn select(&self, filter: impl Fn(&PeerConnection) -> bool) -> Vec<PeerHandle> {
        self.inner
            .lock()
            .peers
            .values()
            .filter(|p| filter(p))
            .cloned()
            .collect()
    }

    /// Cache a payload unless nobody is interested in its category
    pub fn store_if_interested(&self, category: CacheCategory, payload: Outbound) -> bool {
        let mut inner = self.inner.lock();
        if inner.interested(category) == 0 {
            return false;
        }
        inner.cache.store(category, payload);
        true
    }

    pub fn cached(&self, category: CacheCategory) -> Option<Outbound> {
        self.inner.lock().cache.get(category).cloned()
    }

    /// Cached payloads a peer on `page` should receive on join
    pub fn cached_for(&self, page: &Page) -> Vec<Outbound> {
        let inner = self.inner.lock();
        CacheCategory::ALL
            .iter()
            .filter(|category| category.serves(page))
            .filter_map(|category| inner.cache.get(*category).cloned())
            .collect()
    }

    pub fn room(&self, name: &str) -> Option<Room> {
        self.inner.lock().rooms.get(name).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(BackpressureGate::default())
    }
}
