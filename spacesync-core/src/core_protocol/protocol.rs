//! Sync protocol driver
//!
//! Stateless about transport details: owns the peer table, seals and
//! opens envelopes, and translates messages into sync-layer calls.
//! Malformed, unverifiable, or wrong-space traffic is logged and
//! dropped, never propagated as an error to the pump loop.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::core_crypto::EncryptionManager;
use crate::core_sync::{now_ms, Operation, RemoteOutcome, SignedOperation, SyncLayer};

use super::errors::ProtocolError;
use super::message::{Envelope, Message};
use super::peer::{PeerId, PeerState};
use super::transport::{Transport, TransportEvent, PROTOCOL_ID};

/// What this implementation can do, advertised in HELLO.
const CAPABILITIES: &[&str] = &["ops", "snapshot"];

pub struct SyncProtocol {
    space_id: String,
    crypto: Arc<EncryptionManager>,
    layer: Arc<Mutex<SyncLayer>>,
    transport: Arc<dyn Transport>,
    peers: RwLock<HashMap<PeerId, PeerState>>,
}

impl SyncProtocol {
    pub fn new(
        space_id: String,
        crypto: Arc<EncryptionManager>,
        layer: Arc<Mutex<SyncLayer>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            space_id,
            crypto,
            layer,
            transport,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        self.transport.local_peer_id()
    }

    pub async fn peers(&self) -> Vec<PeerState> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn peer(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// One step of the protocol pump. Never fails on bad input from the
    /// wire; errors mean the transport or local state is broken.
    pub async fn handle_event(&self, event: TransportEvent) -> Result<(), ProtocolError> {
        match event {
            TransportEvent::Connected(peer) => {
                debug!(space = %self.space_id, %peer, "peer connected");
                Ok(())
            }
            TransportEvent::Disconnected(peer) => {
                debug!(space = %self.space_id, %peer, "peer disconnected");
                self.peers.write().await.remove(&peer);
                Ok(())
            }
            TransportEvent::Frame { from, bytes } => self.handle_frame(from, &bytes).await,
        }
    }

    async fn handle_frame(&self, from: PeerId, bytes: &[u8]) -> Result<(), ProtocolError> {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(space = %self.space_id, %from, error = %e, "dropping malformed frame");
                return Ok(());
            }
        };
        if envelope.space_id != self.space_id {
            warn!(space = %self.space_id, %from, got = %envelope.space_id, "dropping frame for wrong space");
            return Ok(());
        }
        let message: Message = match self.crypto.decrypt_operation(&envelope.sealed).await {
            Ok(message) => message,
            Err(e) => {
                warn!(space = %self.space_id, %from, error = %e, "dropping undecryptable frame");
                return Ok(());
            }
        };
        debug!(space = %self.space_id, %from, kind = message.kind(), "message received");
        self.handle_message(from, message).await
    }

    async fn handle_message(&self, from: PeerId, message: Message) -> Result<(), ProtocolError> {
        if let Some(state) = self.peers.write().await.get_mut(&from) {
            state.touch();
        }

        match message {
            Message::Hello {
                peer_id,
                signing_key,
                exchange_key,
                head,
                capabilities,
            } => {
                self.register_peer(&from, peer_id, signing_key, exchange_key, false)
                    .await?;
                self.peers.write().await.entry(from.clone()).and_modify(|s| {
                    s.head = head;
                    s.capabilities = capabilities;
                });
                let our_head = self.layer.lock().await.head();
                self.send(&from, Message::Head { head: our_head }).await
            }
            Message::Join {
                peer_id,
                signing_key,
                exchange_key,
            } => {
                self.register_peer(&from, peer_id, signing_key, exchange_key, true)
                    .await?;
                let (head, ops) = {
                    let layer = self.layer.lock().await;
                    (layer.head(), layer.range(1, layer.head()))
                };
                let ops = self.sign_all(ops).await?;
                self.send(&from, Message::Snapshot { head, ops }).await
            }
            Message::Head { head } => {
                self.note_peer_head(&from, head).await;
                let our_head = self.layer.lock().await.head();
                if our_head < head {
                    self.send(
                        &from,
                        Message::Want {
                            from: our_head + 1,
                            to: head,
                        },
                    )
                    .await
                } else if our_head > head {
                    // The peer is behind: push the gap without waiting
                    // for a WANT.
                    let ops = self.layer.lock().await.range(head + 1, our_head);
                    let ops = self.sign_all(ops).await?;
                    self.send(
                        &from,
                        Message::Ops {
                            from: head + 1,
                            to: our_head,
                            ops,
                        },
                    )
                    .await
                } else {
                    Ok(())
                }
            }
            Message::Have { ops } => self.apply_signed(&from, ops, true).await,
            Message::Want { from: lo, to } => {
                let ops = self.layer.lock().await.range(lo, to);
                let ops = self.sign_all(ops).await?;
                self.send(&from, Message::Ops { from: lo, to, ops }).await
            }
            Message::Ops { ops, .. } => self.apply_signed(&from, ops, true).await,
            Message::Snapshot { head, ops } => {
                self.note_peer_head(&from, head).await;
                self.apply_signed(&from, ops, false).await
            }
            Message::Ack { op_id } => {
                self.layer.lock().await.ack(op_id);
                Ok(())
            }
            Message::Ping { timestamp_ms } => {
                self.send(&from, Message::Pong { timestamp_ms }).await
            }
            Message::Pong { timestamp_ms } => {
                let latency = now_ms().saturating_sub(timestamp_ms);
                if let Some(state) = self.peers.write().await.get_mut(&from) {
                    state.latency_ms = Some(latency);
                }
                Ok(())
            }
        }
    }

    /// Dial a peer and drive the greeting round: HELLO, JOIN, then our
    /// HEAD. Idempotent to call repeatedly; the layer skips operations
    /// it already holds, so re-delivery is harmless.
    pub async fn sync_with_peer(&self, peer: &PeerId) -> Result<(), ProtocolError> {
        self.transport.dial(peer).await?;
        let hello = self.identity_message(false).await?;
        self.send(peer, hello).await?;
        let join = self.identity_message(true).await?;
        self.send(peer, join).await?;
        let head = self.layer.lock().await.head();
        self.send(peer, Message::Head { head }).await
    }

    /// Request membership state from a peer after redeeming an invite.
    pub async fn join_via_peer(&self, peer: &PeerId) -> Result<(), ProtocolError> {
        self.transport.dial(peer).await?;
        let join = self.identity_message(true).await?;
        self.send(peer, join).await
    }

    /// Push one freshly recorded local operation to every connected
    /// peer. Per-peer delivery failures are logged, never raised; one
    /// unreachable peer must not starve the rest.
    pub async fn broadcast_operation(&self, op: Operation) -> Result<(), ProtocolError> {
        let signed = self
            .crypto
            .sign_operation(op)
            .await
            .map_err(ProtocolError::Crypto)?;
        for peer in self.transport.connected_peers().await {
            let message = Message::Ops {
                from: 0,
                to: 0,
                ops: vec![signed.clone()],
            };
            if let Err(e) = self.send(&peer, message).await {
                warn!(space = %self.space_id, %peer, error = %e, "operation delivery failed");
            }
        }
        Ok(())
    }

    /// Advertise our head to every connected peer, prompting laggards
    /// to pull.
    pub async fn announce_head(&self) -> Result<(), ProtocolError> {
        let head = self.layer.lock().await.head();
        for peer in self.transport.connected_peers().await {
            if let Err(e) = self.send(&peer, Message::Head { head }).await {
                warn!(space = %self.space_id, %peer, error = %e, "head announcement failed");
            }
        }
        Ok(())
    }

    pub async fn ping_peers(&self) -> Result<(), ProtocolError> {
        let timestamp_ms = now_ms();
        for peer in self.transport.connected_peers().await {
            if let Err(e) = self.send(&peer, Message::Ping { timestamp_ms }).await {
                warn!(space = %self.space_id, %peer, error = %e, "ping failed");
            }
        }
        Ok(())
    }

    async fn identity_message(&self, join: bool) -> Result<Message, ProtocolError> {
        let peer_id = self.local_peer_id().to_string();
        let signing_key = self.crypto.device_public_key().await;
        let exchange_key = self.crypto.device_exchange_key().await;
        if join {
            Ok(Message::Join {
                peer_id,
                signing_key,
                exchange_key,
            })
        } else {
            let head = self.layer.lock().await.head();
            Ok(Message::Hello {
                peer_id,
                signing_key,
                exchange_key,
                head,
                capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            })
        }
    }

    async fn register_peer(
        &self,
        from: &PeerId,
        peer_id: String,
        signing_key: String,
        exchange_key: String,
        joined: bool,
    ) -> Result<(), ProtocolError> {
        if peer_id != from.as_str() {
            warn!(space = %self.space_id, %from, claimed = %peer_id, "peer id mismatch, using transport identity");
        }
        self.crypto
            .add_peer_key(from.as_str(), &signing_key)
            .await
            .map_err(ProtocolError::Crypto)?;
        let mut peers = self.peers.write().await;
        let state = peers
            .entry(from.clone())
            .or_insert_with(|| PeerState::new(from.clone(), signing_key.clone(), exchange_key.clone()));
        state.signing_key = signing_key;
        state.exchange_key = exchange_key;
        state.joined = state.joined || joined;
        state.touch();
        Ok(())
    }

    /// Record a head report, creating the PeerState on first contact.
    /// Key material arrives later with the peer's HELLO or JOIN.
    async fn note_peer_head(&self, peer: &PeerId, head: u64) {
        let mut peers = self.peers.write().await;
        let state = peers
            .entry(peer.clone())
            .or_insert_with(|| PeerState::new(peer.clone(), String::new(), String::new()));
        state.head = head;
        state.touch();
    }

    async fn apply_signed(
        &self,
        from: &PeerId,
        ops: Vec<SignedOperation>,
        ack: bool,
    ) -> Result<(), ProtocolError> {
        for signed in ops {
            if !signed.verify() {
                warn!(space = %self.space_id, %from, "dropping operation with bad signature");
                continue;
            }
            let op = signed.payload;
            if op.space_id != self.space_id {
                warn!(space = %self.space_id, %from, got = %op.space_id, "dropping operation for wrong space");
                continue;
            }
            let op_id = op.id;
            let outcome = self.layer.lock().await.receive_remote(op)?;
            if ack && outcome == RemoteOutcome::Applied {
                self.send(from, Message::Ack { op_id }).await?;
            }
        }
        Ok(())
    }

    async fn send(&self, peer: &PeerId, message: Message) -> Result<(), ProtocolError> {
        debug!(space = %self.space_id, %peer, kind = message.kind(), "message sent");
        let sealed = self
            .crypto
            .encrypt_operation(&message)
            .await
            .map_err(ProtocolError::Crypto)?;
        let envelope = Envelope {
            space_id: self.space_id.clone(),
            timestamp_ms: now_ms(),
            sealed,
        };
        let bytes = envelope
            .to_bytes()
            .map_err(|e| ProtocolError::Codec(e.to_string()))?;
        self.transport.send(peer, PROTOCOL_ID, bytes).await
    }

    async fn sign_all(&self, ops: Vec<Operation>) -> Result<Vec<SignedOperation>, ProtocolError> {
        let mut signed = Vec::with_capacity(ops.len());
        for op in ops {
            signed.push(
                self.crypto
                    .sign_operation(op)
                    .await
                    .map_err(ProtocolError::Crypto)?,
            );
        }
        Ok(signed)
    }
}
