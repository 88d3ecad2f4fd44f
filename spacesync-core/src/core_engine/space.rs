//! Space composition root
//!
//! One `Space` wires a key manager, a sync layer, and a protocol driver
//! over a shared transport. All mutable state sits behind tokio locks,
//! so watcher callbacks, inbound frames, and timer ticks serialize into
//! a single-writer discipline per space. Background tasks are owned
//! here and aborted on shutdown.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::core_crypto::EncryptionManager;
use crate::core_protocol::{PeerId, PeerState, SyncProtocol, Transport, TransportEvent};
use crate::core_sync::{
    Conflict, FsEvent, Operation, Resolution, SyncEvent, SyncLayer, SyncMode, SyncStatus,
};

use super::errors::EngineError;
use super::invite::{Invite, InviteUri, DEFAULT_INVITE_TTL};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Name of the per-space data directory, also excluded from watching.
pub const DATA_DIR_NAME: &str = ".spacesync";

/// Everything observable about a space, in one subscription.
#[derive(Debug, Clone)]
pub enum SpaceEvent {
    OperationCreated(Operation),
    RemoteApplied(Operation),
    ConflictDetected(Conflict),
    SyncStarted,
    SyncCompleted { pushed: usize },
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
}

pub struct Space {
    space_id: String,
    crypto: Arc<EncryptionManager>,
    layer: Arc<Mutex<SyncLayer>>,
    protocol: Arc<SyncProtocol>,
    events: broadcast::Sender<SpaceEvent>,
    mode_tx: watch::Sender<SyncMode>,
    dirty_tx: mpsc::UnboundedSender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Space {
    /// Bring a space up: keys first, then the sync layer, then the
    /// protocol, then the background tasks that keep it alive.
    pub async fn initialize(
        space_id: String,
        data_dir: impl AsRef<Path>,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, EngineError> {
        let crypto = Arc::new(EncryptionManager::initialize(data_dir.as_ref()).await?);

        let (mut layer, layer_events) = SyncLayer::new(
            space_id.clone(),
            DATA_DIR_NAME.to_string(),
            config.oplog_capacity,
        );
        layer.set_sync_mode(SyncMode::Auto {
            debounce: config.auto_debounce,
        });
        let layer = Arc::new(Mutex::new(layer));

        let protocol = Arc::new(SyncProtocol::new(
            space_id.clone(),
            Arc::clone(&crypto),
            Arc::clone(&layer),
            transport,
        ));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (mode_tx, mode_rx) = watch::channel(SyncMode::Auto {
            debounce: config.auto_debounce,
        });
        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();

        let space = Arc::new(Self {
            space_id: space_id.clone(),
            crypto,
            layer,
            protocol,
            events,
            mode_tx,
            dirty_tx,
            tasks: Mutex::new(Vec::new()),
        });

        {
            let mut tasks = space.tasks.lock().await;
            tasks.push(tokio::spawn(pump_layer_events(
                layer_events,
                space.events.clone(),
                space.dirty_tx.clone(),
                space.mode_tx.subscribe(),
            )));
            tasks.push(tokio::spawn(drive_sync_rounds(
                Arc::clone(&space.layer),
                Arc::clone(&space.protocol),
                space.events.clone(),
                mode_rx,
                dirty_rx,
            )));
            tasks.push(tokio::spawn(ping_loop(
                Arc::clone(&space.protocol),
                config.ping_interval,
            )));
        }

        info!(space = %space_id, "space initialized");
        Ok(space)
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpaceEvent> {
        self.events.subscribe()
    }

    pub async fn device_public_key(&self) -> String {
        self.crypto.device_public_key().await
    }

    /// Feed one transport event into this space's protocol. The engine
    /// router calls this for frames addressed to us.
    pub async fn handle_transport_event(&self, event: TransportEvent) -> Result<(), EngineError> {
        match &event {
            TransportEvent::Connected(peer) => {
                let _ = self.events.send(SpaceEvent::PeerConnected(peer.clone()));
            }
            TransportEvent::Disconnected(peer) => {
                let _ = self.events.send(SpaceEvent::PeerDisconnected(peer.clone()));
            }
            TransportEvent::Frame { .. } => {}
        }
        self.protocol.handle_event(event).await?;
        Ok(())
    }

    /// Mint a sealed invite URI for this space.
    pub async fn generate_invite(&self) -> Result<String, EngineError> {
        let invite = Invite::new(self.space_id.clone(), DEFAULT_INVITE_TTL);
        let blob = self.crypto.encrypt_invite(&invite).await?;
        Ok(InviteUri {
            space_id: self.space_id.clone(),
            blob,
        }
        .encode())
    }

    /// Open and validate an invite blob against this space's key.
    pub async fn validate_invite(&self, uri: &InviteUri) -> Result<Invite, EngineError> {
        if uri.space_id != self.space_id {
            return Err(EngineError::InvalidInvite(format!(
                "invite is for space {}",
                uri.space_id
            )));
        }
        let invite: Invite = self.crypto.decrypt_invite(&uri.blob).await?;
        if invite.space_id != self.space_id {
            return Err(EngineError::InvalidInvite(
                "sealed space id does not match uri".into(),
            ));
        }
        if invite.is_expired() {
            return Err(EngineError::InviteExpired);
        }
        Ok(invite)
    }

    /// Bind a collection directory and start mirroring filesystem
    /// changes into operations.
    pub async fn set_collection_path(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(fs_events) = self.layer.lock().await.set_collection_path(path)? {
            let handle = tokio::spawn(pump_fs_events(Arc::clone(&self.layer), fs_events));
            self.tasks.lock().await.push(handle);
        }
        Ok(())
    }

    /// Bind without watching; changes then only enter via remote peers
    /// or explicit calls.
    pub async fn bind_collection_path(&self, path: &Path) -> Result<(), EngineError> {
        self.layer.lock().await.bind_collection_path(path)?;
        Ok(())
    }

    /// Record an operation produced outside the watcher, such as an
    /// embedder-driven edit. It becomes pending for the next round.
    pub async fn record_operation(&self, op: Operation) {
        self.layer.lock().await.record_local(op);
    }

    /// Run one sync round now, whatever the mode.
    pub async fn sync_with_peers(&self) -> Result<usize, EngineError> {
        run_sync_round(&self.layer, &self.protocol, &self.events).await
    }

    /// Introduce ourselves to a specific peer and reconcile heads.
    pub async fn sync_with_peer(&self, peer: &PeerId) -> Result<(), EngineError> {
        self.protocol.sync_with_peer(peer).await?;
        Ok(())
    }

    /// Ask a member for the full log after redeeming an invite.
    pub async fn join_via_peer(&self, peer: &PeerId) -> Result<(), EngineError> {
        self.protocol.join_via_peer(peer).await?;
        Ok(())
    }

    pub async fn set_sync_mode(&self, mode: SyncMode) {
        self.layer.lock().await.set_sync_mode(mode);
        let _ = self.mode_tx.send(mode);
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        self.layer.lock().await.status()
    }

    pub async fn operation_history(&self, limit: usize) -> Vec<Operation> {
        self.layer.lock().await.operation_history(limit)
    }

    pub async fn conflicts(&self) -> Vec<Conflict> {
        self.layer.lock().await.conflicts()
    }

    /// Settle a conflict; a merge result is pushed to peers right away.
    pub async fn resolve_conflict(
        &self,
        id: Uuid,
        resolution: Resolution,
    ) -> Result<(), EngineError> {
        let merged = self.layer.lock().await.resolve_conflict(id, resolution)?;
        if let Some(op) = merged {
            self.protocol.broadcast_operation(op).await?;
        }
        Ok(())
    }

    pub async fn get_peer_states(&self) -> Vec<PeerState> {
        self.protocol.peers().await
    }

    pub async fn ping_peers(&self) -> Result<(), EngineError> {
        self.protocol.ping_peers().await?;
        Ok(())
    }

    pub async fn export_space_key(&self) -> String {
        self.crypto.export_space_key().await
    }

    pub async fn import_space_key(&self, hex_key: &str) -> Result<(), EngineError> {
        self.crypto.import_space_key(hex_key).await?;
        Ok(())
    }

    /// Rotate the space key. Peers keep the old key until they import
    /// the new one out-of-band.
    pub async fn rekey(&self) -> Result<(), EngineError> {
        self.crypto.rekey_space().await?;
        Ok(())
    }

    /// Stop watching and abort every background task. On-disk key
    /// material survives for the next [`initialize`](Self::initialize).
    pub async fn shutdown(&self) {
        self.layer.lock().await.stop_watching();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!(space = %self.space_id, "space shut down");
    }
}

/// Forward sync-layer events to subscribers and mark the space dirty
/// for the auto-sync driver.
async fn pump_layer_events(
    mut layer_events: mpsc::UnboundedReceiver<SyncEvent>,
    events: broadcast::Sender<SpaceEvent>,
    dirty_tx: mpsc::UnboundedSender<()>,
    mode_rx: watch::Receiver<SyncMode>,
) {
    while let Some(event) = layer_events.recv().await {
        match event {
            SyncEvent::LocalOperation(op) => {
                let _ = events.send(SpaceEvent::OperationCreated(op));
                if matches!(*mode_rx.borrow(), SyncMode::Auto { .. }) {
                    let _ = dirty_tx.send(());
                }
            }
            SyncEvent::RemoteApplied(op) => {
                let _ = events.send(SpaceEvent::RemoteApplied(op));
            }
            SyncEvent::ConflictDetected(conflict) => {
                let _ = events.send(SpaceEvent::ConflictDetected(conflict));
            }
        }
    }
}

/// Turn watcher events into recorded operations.
async fn pump_fs_events(layer: Arc<Mutex<SyncLayer>>, mut fs_events: mpsc::Receiver<FsEvent>) {
    while let Some(event) = fs_events.recv().await {
        if let Err(e) = layer.lock().await.handle_fs_event(event) {
            warn!(error = %e, "failed to record filesystem event");
        }
    }
}

/// The mode-aware timer: debounced rounds in auto mode, fixed-interval
/// rounds in scheduled mode, nothing in manual mode.
async fn drive_sync_rounds(
    layer: Arc<Mutex<SyncLayer>>,
    protocol: Arc<SyncProtocol>,
    events: broadcast::Sender<SpaceEvent>,
    mut mode_rx: watch::Receiver<SyncMode>,
    mut dirty_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        let mode = *mode_rx.borrow_and_update();
        let fire = match mode {
            SyncMode::Manual => {
                // Drain stale dirtiness so a later mode switch does not
                // replay it, then wait for a mode change.
                while dirty_rx.try_recv().is_ok() {}
                if mode_rx.changed().await.is_err() {
                    return;
                }
                false
            }
            SyncMode::Auto { debounce } => {
                tokio::select! {
                    changed = mode_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        false
                    }
                    dirty = dirty_rx.recv() => {
                        if dirty.is_none() {
                            return;
                        }
                        // Coalesce the burst: wait until no new change
                        // arrives for a full debounce window.
                        loop {
                            match tokio::time::timeout(debounce, dirty_rx.recv()).await {
                                Ok(Some(())) => continue,
                                Ok(None) => return,
                                Err(_) => break,
                            }
                        }
                        true
                    }
                }
            }
            SyncMode::Scheduled { interval } => {
                tokio::select! {
                    changed = mode_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        false
                    }
                    _ = tokio::time::sleep(interval) => true,
                }
            }
        };

        if fire {
            if let Err(e) = run_sync_round(&layer, &protocol, &events).await {
                warn!(error = %e, "sync round failed");
            }
        }
    }
}

async fn ping_loop(protocol: Arc<SyncProtocol>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // immediate first tick
    loop {
        ticker.tick().await;
        if let Err(e) = protocol.ping_peers().await {
            debug!(error = %e, "ping round failed");
        }
    }
}

/// Push every pending operation, then announce our head so laggards
/// pull the rest. The pending set clears once the round completes.
async fn run_sync_round(
    layer: &Arc<Mutex<SyncLayer>>,
    protocol: &Arc<SyncProtocol>,
    events: &broadcast::Sender<SpaceEvent>,
) -> Result<usize, EngineError> {
    let pending = layer.lock().await.pending_snapshot();
    let pushed = pending.len();
    let _ = events.send(SpaceEvent::SyncStarted);
    for op in pending {
        protocol.broadcast_operation(op).await?;
    }
    protocol.announce_head().await?;
    layer.lock().await.finish_sync_round();
    let _ = events.send(SpaceEvent::SyncCompleted { pushed });
    Ok(pushed)
}
