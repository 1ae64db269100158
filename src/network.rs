//! Gossip overlay: wire protocol, peer sessions, and the peer manager

pub mod manager;
pub mod message;
pub mod peer;

pub use manager::{NetworkEvent, PeerManager};
pub use message::{Frame, HandshakePayload, MessageType, PeerInfo, MAX_FRAME_BYTES};
pub use peer::{Direction, PeerHandle, HANDSHAKE_TIMEOUT, OUTBOUND_QUEUE_SIZE, REQUEST_TIMEOUT};
