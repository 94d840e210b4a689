//! A live peer connection as seen by the relay

use bytes::Bytes;
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::gate::{BackpressureGate, Delivery, Priority};
use crate::protocol::{Page, Role};

/// Opaque unique peer identifier, assigned at connect
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message queued for a socket writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
}

impl Outbound {
    pub fn len(&self) -> usize {
        match self {
            Outbound::Text(text) => text.len(),
            Outbound::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outbound::Text(text) => Some(text),
            Outbound::Binary(_) => None,
        }
    }
}

/// The writer side of the socket is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFailed;

/// Shared handle to a registered peer
pub type PeerHandle = Arc<PeerConnection>;

/// Identity plus the outbound queue of one socket
pub struct PeerConnection {
    id: PeerId,
    role: Role,
    room: String,
    page: Page,
    tx: mpsc::UnboundedSender<Outbound>,
    gate: BackpressureGate,
    /// Bytes handed to the queue but not yet written to the socket
    queued: AtomicUsize,
    dropped: AtomicU64,
    closed: AtomicBool,
    close_signal: Notify,
}

impl PeerConnection {
    pub(crate) fn new(
        id: PeerId,
        role: Role,
        room: String,
        page: Page,
        tx: mpsc::UnboundedSender<Outbound>,
        gate: BackpressureGate,
    ) -> Self {
        Self {
            id,
            role,
            room,
            page,
            tx,
            gate,
            queued: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Offer a message to this peer's queue.
    ///
    /// `Data` messages are dropped when the backlog exceeds the gate
    /// threshold. An error means the socket writer is gone and the caller
    /// must tear the peer down.
    pub fn send(&self, message: Outbound, priority: Priority) -> Result<Delivery, WriteFailed> {
        if self.is_closed() {
            return Err(WriteFailed);
        }

        let len = message.len();
        if !self.gate.admit(self.queued_bytes(), priority) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(peer = %self.id, queued = self.queued_bytes(), dropped, "Backpressure drop");
            return Ok(Delivery::Dropped);
        }

        self.queued.fetch_add(len, Ordering::Relaxed);
        if self.tx.send(message).is_err() {
            self.queued.fetch_sub(len, Ordering::Relaxed);
            return Err(WriteFailed);
        }
        Ok(Delivery::Queued)
    }

    /// Called by the socket writer once `len` bytes left the queue
    pub fn mark_written(&self, len: usize) {
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(len)));
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Force the socket closed; the session loop observes it via [`Self::closed`]
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::close`] has been called. Any number of tasks
    /// may wait.
    pub async fn closed(&self) {
        let notified = self.close_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("room", &self.room)
            .field("page", &self.page)
            .field("queued", &self.queued_bytes())
            .finish()
    }
}
