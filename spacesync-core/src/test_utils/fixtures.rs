//! Test fixtures for spaces, engines, and operations

use std::sync::Arc;
use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::core_engine::SyncEngine;
use crate::core_protocol::{MemoryHub, PeerId};
use crate::core_sync::{content_hash, now_ms, Operation, OperationKind, OperationPayload};

/// Build a file-carrying operation without touching a real filesystem.
pub fn file_operation(space_id: &str, path: &str, content: &[u8]) -> Operation {
    Operation::new(
        OperationKind::Add,
        path.to_string(),
        space_id.to_string(),
        OperationPayload::File {
            content: content.to_vec(),
            hash: content_hash(content),
            size: content.len() as u64,
            mtime_ms: now_ms(),
        },
    )
}

/// One simulated device: an engine over a memory transport endpoint,
/// with throwaway key and collection directories that live as long as
/// the node does.
pub struct TestNode {
    pub engine: SyncEngine,
    pub peer_id: PeerId,
    pub collection: TempDir,
    _data_dir: TempDir,
}

impl TestNode {
    pub async fn join_hub(hub: &MemoryHub, id: &str) -> Self {
        let data_dir = TempDir::new().expect("temp data dir");
        let collection = TempDir::new().expect("temp collection dir");

        let mut config = EngineConfig::default();
        config.engine.data_dir = data_dir.path().to_path_buf();
        // Tight timings keep scenario tests fast
        config.sync.auto_debounce = std::time::Duration::from_millis(20);
        config.sync.scheduled_interval = std::time::Duration::from_millis(200);

        let peer_id = PeerId::from(id);
        let (transport, rx) = hub.join(peer_id.clone()).await;
        let engine = SyncEngine::new(config, Arc::new(transport), rx);

        Self {
            engine,
            peer_id,
            collection,
            _data_dir: data_dir,
        }
    }
}
