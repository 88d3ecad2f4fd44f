//! Peer identity and per-peer sync state

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_sync::now_ms;

/// Opaque peer identifier, stable across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// What we know about one peer in this space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    pub peer_id: PeerId,
    /// Base64 Ed25519 key the peer signs operations with
    pub signing_key: String,
    /// Base64 X25519 key we box direct messages to
    pub exchange_key: String,
    /// Peer's log head as last announced
    pub head: u64,
    /// Capability strings advertised in the peer's HELLO
    pub capabilities: Vec<String>,
    pub last_seen_ms: u64,
    /// Round-trip estimate from the last ping, if any
    pub latency_ms: Option<u64>,
    /// Whether the peer completed the join handshake with us
    pub joined: bool,
}

impl PeerState {
    pub fn new(peer_id: PeerId, signing_key: String, exchange_key: String) -> Self {
        Self {
            peer_id,
            signing_key,
            exchange_key,
            head: 0,
            capabilities: Vec::new(),
            last_seen_ms: now_ms(),
            latency_ms: None,
            joined: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_ms = now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_advances_last_seen() {
        let mut state = PeerState::new(PeerId::from("p1"), "sk".into(), "ek".into());
        let before = state.last_seen_ms;
        state.touch();
        assert!(state.last_seen_ms >= before);
    }

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId::from("abc").to_string(), "abc");
    }
}
