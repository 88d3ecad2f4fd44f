//! Peer sync protocol
//!
//! Sealed-envelope wire format, the peer table, the transport trait,
//! and the driver that converts inbound messages into sync-layer calls.

pub mod errors;
pub mod message;
pub mod peer;
pub mod protocol;
pub mod transport;

pub use errors::ProtocolError;
pub use message::{Envelope, Message};
pub use peer::{PeerId, PeerState};
pub use protocol::SyncProtocol;
pub use transport::{MemoryHub, MemoryTransport, Transport, TransportEvent, PROTOCOL_ID};
