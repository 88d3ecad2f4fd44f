//! Transport abstraction
//!
//! The protocol is written against [`Transport`], a byte-frame
//! interface. [`MemoryTransport`] wires several in-process endpoints
//! through a shared hub and is what the scenario tests run over; a
//! network transport implements the same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::errors::ProtocolError;
use super::peer::PeerId;

const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Wire protocol identifier passed to the transport with every frame.
pub const PROTOCOL_ID: &str = "/spacesync/1";

/// Inbound transport notifications, drained by the protocol loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    Frame { from: PeerId, bytes: Vec<u8> },
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn local_peer_id(&self) -> &PeerId;

    /// Establish a link to `peer`. Idempotent for already-connected
    /// peers.
    async fn dial(&self, peer: &PeerId) -> Result<(), ProtocolError>;

    async fn send(
        &self,
        peer: &PeerId,
        protocol_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ProtocolError>;

    async fn connected_peers(&self) -> Vec<PeerId>;
}

struct Endpoint {
    inbox: mpsc::Sender<TransportEvent>,
}

/// Shared switchboard for [`MemoryTransport`] endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<Mutex<HashMap<PeerId, Endpoint>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and hand back its transport plus the event
    /// stream it reads from.
    pub async fn join(&self, peer_id: PeerId) -> (MemoryTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.endpoints
            .lock()
            .await
            .insert(peer_id.clone(), Endpoint { inbox: tx });
        let transport = MemoryTransport {
            local: peer_id,
            hub: self.clone(),
            links: Arc::new(Mutex::new(Vec::new())),
        };
        (transport, rx)
    }

    async fn deliver(&self, to: &PeerId, event: TransportEvent) -> Result<(), ProtocolError> {
        let endpoints = self.endpoints.lock().await;
        let endpoint = endpoints
            .get(to)
            .ok_or_else(|| ProtocolError::UnknownPeer(to.to_string()))?;
        endpoint
            .inbox
            .send(event)
            .await
            .map_err(|_| ProtocolError::Transport(format!("{to} closed its inbox")))
    }
}

/// In-process transport endpoint attached to a [`MemoryHub`].
pub struct MemoryTransport {
    local: PeerId,
    hub: MemoryHub,
    links: Arc<Mutex<Vec<PeerId>>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> &PeerId {
        &self.local
    }

    async fn dial(&self, peer: &PeerId) -> Result<(), ProtocolError> {
        {
            let mut links = self.links.lock().await;
            if links.contains(peer) {
                return Ok(());
            }
            links.push(peer.clone());
        }
        // Both sides observe the connection
        self.hub
            .deliver(peer, TransportEvent::Connected(self.local.clone()))
            .await?;
        self.hub
            .deliver(&self.local, TransportEvent::Connected(peer.clone()))
            .await
    }

    async fn send(
        &self,
        peer: &PeerId,
        protocol_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        if protocol_id != PROTOCOL_ID {
            return Err(ProtocolError::Transport(format!(
                "unsupported protocol {protocol_id}"
            )));
        }
        self.hub
            .deliver(
                peer,
                TransportEvent::Frame {
                    from: self.local.clone(),
                    bytes,
                },
            )
            .await
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        self.links.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_connects_both_sides() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.join(PeerId::from("a")).await;
        let (_b, mut b_rx) = hub.join(PeerId::from("b")).await;

        a.dial(&PeerId::from("b")).await.unwrap();

        assert!(matches!(
            b_rx.recv().await,
            Some(TransportEvent::Connected(p)) if p.as_str() == "a"
        ));
        assert!(matches!(
            a_rx.recv().await,
            Some(TransportEvent::Connected(p)) if p.as_str() == "b"
        ));
        assert_eq!(a.connected_peers().await, vec![PeerId::from("b")]);
    }

    #[tokio::test]
    async fn frames_reach_the_addressee() {
        let hub = MemoryHub::new();
        let (a, _a_rx) = hub.join(PeerId::from("a")).await;
        let (_b, mut b_rx) = hub.join(PeerId::from("b")).await;

        a.send(&PeerId::from("b"), PROTOCOL_ID, vec![1, 2, 3])
            .await
            .unwrap();
        match b_rx.recv().await {
            Some(TransportEvent::Frame { from, bytes }) => {
                assert_eq!(from.as_str(), "a");
                assert_eq!(bytes, vec![1, 2, 3]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sending_to_unknown_peer_fails() {
        let hub = MemoryHub::new();
        let (a, _rx) = hub.join(PeerId::from("a")).await;
        let result = a.send(&PeerId::from("ghost"), PROTOCOL_ID, vec![0]).await;
        assert!(matches!(result, Err(ProtocolError::UnknownPeer(_))));
    }
}
