//! Engine: the space registry
//!
//! One engine per device. It owns the transport endpoint, routes
//! inbound frames to the right space by envelope space id, and manages
//! space lifecycles under `<data_dir>/spaces/<space_id>/`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core_protocol::{Envelope, Transport, TransportEvent};

use super::errors::EngineError;
use super::invite::InviteUri;
use super::space::Space;

type SpaceRegistry = Arc<RwLock<HashMap<String, Arc<Space>>>>;

pub struct SyncEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    spaces: SpaceRegistry,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Stand up an engine over an already-joined transport endpoint.
    /// `transport_rx` is the endpoint's inbound event stream.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let spaces: SpaceRegistry = Arc::new(RwLock::new(HashMap::new()));
        let router = tokio::spawn(route_events(transport_rx, Arc::clone(&spaces)));
        Self {
            config,
            transport,
            spaces,
            router: Mutex::new(Some(router)),
        }
    }

    fn space_dir(&self, space_id: &str) -> PathBuf {
        self.config.engine.data_dir.join("spaces").join(space_id)
    }

    /// Create a brand-new space. Fails when the space is already
    /// registered or its data directory exists on disk.
    pub async fn create_space(&self, space_id: &str) -> Result<Arc<Space>, EngineError> {
        if self.spaces.read().await.contains_key(space_id) {
            return Err(EngineError::SpaceExists(space_id.to_string()));
        }
        let dir = self.space_dir(space_id);
        if dir.exists() {
            return Err(EngineError::SpaceExists(space_id.to_string()));
        }

        let space = Space::initialize(
            space_id.to_string(),
            &dir,
            self.config.sync.clone(),
            Arc::clone(&self.transport),
        )
        .await?;
        self.spaces
            .write()
            .await
            .insert(space_id.to_string(), Arc::clone(&space));
        info!(space = %space_id, "space created");
        Ok(space)
    }

    /// Redeem an invite. The space key travels out-of-band as hex;
    /// joining a space we already hold returns the existing handle.
    pub async fn join_space(
        &self,
        invite_uri: &str,
        space_key_hex: &str,
    ) -> Result<Arc<Space>, EngineError> {
        let uri = InviteUri::parse(invite_uri)?;
        if let Some(existing) = self.spaces.read().await.get(&uri.space_id) {
            return Ok(Arc::clone(existing));
        }

        let space = Space::initialize(
            uri.space_id.clone(),
            self.space_dir(&uri.space_id),
            self.config.sync.clone(),
            Arc::clone(&self.transport),
        )
        .await?;
        let redeemed = async {
            space.import_space_key(space_key_hex).await?;
            space.validate_invite(&uri).await?;
            Ok(())
        }
        .await;
        if let Err(e) = redeemed {
            space.shutdown().await;
            return Err(e);
        }

        self.spaces
            .write()
            .await
            .insert(uri.space_id.clone(), Arc::clone(&space));
        info!(space = %uri.space_id, "space joined");
        Ok(space)
    }

    /// Reopen a space whose key material already exists on disk.
    pub async fn open_space(&self, space_id: &str) -> Result<Arc<Space>, EngineError> {
        if let Some(existing) = self.spaces.read().await.get(space_id) {
            return Ok(Arc::clone(existing));
        }
        let dir = self.space_dir(space_id);
        if !dir.exists() {
            return Err(EngineError::SpaceNotFound(space_id.to_string()));
        }
        let space = Space::initialize(
            space_id.to_string(),
            &dir,
            self.config.sync.clone(),
            Arc::clone(&self.transport),
        )
        .await?;
        self.spaces
            .write()
            .await
            .insert(space_id.to_string(), Arc::clone(&space));
        Ok(space)
    }

    pub async fn get_space(&self, space_id: &str) -> Option<Arc<Space>> {
        self.spaces.read().await.get(space_id).cloned()
    }

    pub async fn space_ids(&self) -> Vec<String> {
        self.spaces.read().await.keys().cloned().collect()
    }

    /// Drop all in-memory state. Key material on disk survives and is
    /// reloaded the next time the space is opened.
    pub async fn stop(&self) {
        if let Some(router) = self.router.lock().await.take() {
            router.abort();
        }
        let mut spaces = self.spaces.write().await;
        for space in spaces.values() {
            space.shutdown().await;
        }
        spaces.clear();
        info!("engine stopped");
    }
}

/// Route transport events: frames go to the space named in their
/// envelope, connection changes fan out to every space.
async fn route_events(mut rx: mpsc::Receiver<TransportEvent>, spaces: SpaceRegistry) {
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Frame { from, bytes } => {
                let space_id = match Envelope::from_bytes(&bytes) {
                    Ok(envelope) => envelope.space_id,
                    Err(e) => {
                        warn!(%from, error = %e, "dropping unroutable frame");
                        continue;
                    }
                };
                let space = spaces.read().await.get(&space_id).cloned();
                match space {
                    Some(space) => {
                        let frame = TransportEvent::Frame { from, bytes };
                        if let Err(e) = space.handle_transport_event(frame).await {
                            warn!(space = %space_id, error = %e, "frame handling failed");
                        }
                    }
                    None => warn!(space = %space_id, %from, "dropping frame for unknown space"),
                }
            }
            event => {
                let spaces_snapshot: Vec<Arc<Space>> =
                    spaces.read().await.values().cloned().collect();
                for space in spaces_snapshot {
                    if let Err(e) = space.handle_transport_event(event.clone()).await {
                        warn!(error = %e, "connection event handling failed");
                    }
                }
            }
        }
    }
}
