//! Live peers: identity, room membership, outbound queues

pub mod cache;
pub mod connection;
pub mod gate;
pub mod registry;

pub use cache::LastFrameCache;
pub use connection::{Outbound, PeerConnection, PeerHandle, PeerId, WriteFailed};
pub use gate::{BackpressureGate, Delivery, Priority};
pub use registry::{PeerRegistry, Room};
