//! Collection sync layer
//!
//! Owns one bound collection directory: turns filesystem events into
//! operations, applies remote operations to disk, tracks what is still
//! pending for the current sync round, and holds unresolved conflicts
//! until the caller decides them. Network concerns live a level up in
//! the protocol; this layer never sees a peer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::conflict::{Conflict, Resolution};
use super::errors::SyncError;
use super::operation::{content_hash, now_ms, Operation, OperationKind, OperationPayload};
use super::oplog::{OperationLog, PendingOperations};
use super::watcher::{CollectionWatcher, FsEvent, FsEventKind};

/// When and how local changes are pushed to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Only when the caller asks
    Manual,
    /// Shortly after each filesystem event, coalesced by `debounce`
    Auto { debounce: Duration },
    /// On a fixed timer
    Scheduled { interval: Duration },
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Auto {
            debounce: Duration::from_millis(100),
        }
    }
}

/// Lifecycle of the collection binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No collection path bound yet
    Unbound,
    /// Bound, not observing the filesystem
    Bound,
    /// Bound and observing
    Watching,
    /// Was watching, explicitly stopped
    Stopped,
}

/// Point-in-time view for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: WatchState,
    pub head: u64,
    pub pending: usize,
    pub conflicts: usize,
    pub mode: SyncMode,
    /// When the last push round finished, if one ever has
    pub last_sync_ms: Option<u64>,
}

/// What the layer did with a remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Applied to disk and recorded in the log
    Applied,
    /// Collided with a pending local change; held for resolution
    Conflicted(Uuid),
}

/// Notifications pushed to whoever composed this layer.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    LocalOperation(Operation),
    RemoteApplied(Operation),
    ConflictDetected(Conflict),
}

pub struct SyncLayer {
    space_id: String,
    data_dir_name: String,
    collection_root: Option<PathBuf>,
    oplog: OperationLog,
    pending: PendingOperations,
    conflicts: HashMap<Uuid, Conflict>,
    watcher: Option<CollectionWatcher>,
    state: WatchState,
    mode: SyncMode,
    last_sync_ms: Option<u64>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncLayer {
    pub fn new(
        space_id: String,
        data_dir_name: String,
        oplog_capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let layer = Self {
            space_id,
            data_dir_name,
            collection_root: None,
            oplog: OperationLog::new(oplog_capacity),
            pending: PendingOperations::new(),
            conflicts: HashMap::new(),
            watcher: None,
            state: WatchState::Unbound,
            mode: SyncMode::default(),
            last_sync_ms: None,
            events,
        };
        (layer, rx)
    }

    /// Bind a collection directory without observing it. Useful when the
    /// caller drives the layer with explicit operations.
    pub fn bind_collection_path(&mut self, root: &Path) -> Result<(), SyncError> {
        if !root.is_dir() {
            return Err(SyncError::Watch(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        self.collection_root = Some(root.to_path_buf());
        if self.state == WatchState::Unbound {
            self.state = WatchState::Bound;
        }
        Ok(())
    }

    /// Bind a collection directory and start watching it.
    pub fn set_collection_path(
        &mut self,
        root: &Path,
    ) -> Result<Option<mpsc::Receiver<FsEvent>>, SyncError> {
        self.bind_collection_path(root)?;
        self.start_watching()
    }

    /// Start observing the bound directory. Returns the event stream the
    /// composition root pumps into [`handle_fs_event`](Self::handle_fs_event),
    /// or `None` when already watching.
    pub fn start_watching(&mut self) -> Result<Option<mpsc::Receiver<FsEvent>>, SyncError> {
        if self.state == WatchState::Watching {
            return Ok(None);
        }
        let root = self.root()?.to_path_buf();
        let (watcher, rx) = CollectionWatcher::start(&root, &self.data_dir_name)?;
        self.watcher = Some(watcher);
        self.state = WatchState::Watching;
        info!(space = %self.space_id, root = %root.display(), "watching collection");
        Ok(Some(rx))
    }

    pub fn stop_watching(&mut self) {
        if self.watcher.take().is_some() {
            self.state = WatchState::Stopped;
            info!(space = %self.space_id, "stopped watching collection");
        }
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode) {
        debug!(space = %self.space_id, ?mode, "sync mode changed");
        self.mode = mode;
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.mode
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state,
            head: self.oplog.head(),
            pending: self.pending.len(),
            conflicts: self.conflicts.len(),
            mode: self.mode,
            last_sync_ms: self.last_sync_ms,
        }
    }

    pub fn head(&self) -> u64 {
        self.oplog.head()
    }

    pub fn range(&self, from: u64, to: u64) -> Vec<Operation> {
        self.oplog.range(from, to)
    }

    pub fn operation_history(&self, limit: usize) -> Vec<Operation> {
        self.oplog.recent(limit)
    }

    pub fn pending_snapshot(&self) -> Vec<Operation> {
        self.pending.snapshot()
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.conflicts.values().cloned().collect()
    }

    /// A peer acknowledged one of our operations.
    pub fn ack(&mut self, op_id: Uuid) {
        if self.pending.remove(&op_id).is_some() {
            debug!(space = %self.space_id, %op_id, "operation acknowledged");
        }
    }

    /// The current round of pushes completed; everything sent is no
    /// longer pending.
    pub fn finish_sync_round(&mut self) {
        self.pending.clear();
        self.last_sync_ms = Some(now_ms());
    }

    /// Turn a filesystem event into a recorded local operation.
    ///
    /// Returns `None` for events that produce nothing, such as a change
    /// to a path that vanished before we could read it and was never
    /// known to the log.
    pub fn handle_fs_event(&mut self, event: FsEvent) -> Result<Option<Operation>, SyncError> {
        let root = self.root()?.to_path_buf();
        let Some(path) = relative_path(&root, &event.path) else {
            return Ok(None);
        };

        let (kind, payload) = match event.kind {
            FsEventKind::AddDir => (OperationKind::AddDir, OperationPayload::Directory),
            FsEventKind::UnlinkDir => (OperationKind::UnlinkDir, OperationPayload::Deleted),
            FsEventKind::Unlink => (OperationKind::Unlink, OperationPayload::Deleted),
            FsEventKind::Add | FsEventKind::Change => {
                let kind = if event.kind == FsEventKind::Add {
                    OperationKind::Add
                } else {
                    OperationKind::Change
                };
                match read_file_payload(&event.path) {
                    Ok(payload) => (kind, payload),
                    // The file disappeared between the event and the
                    // read; record the deletion instead.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        (OperationKind::Unlink, OperationPayload::Deleted)
                    }
                    Err(e) => return Err(SyncError::Io(e)),
                }
            }
        };

        let op = Operation::new(kind, path, self.space_id.clone(), payload);
        self.record_local(op.clone());
        Ok(Some(op))
    }

    /// Record an operation produced locally: append to the log, mark it
    /// pending for the next round, notify the composition root.
    pub fn record_local(&mut self, op: Operation) {
        debug!(space = %self.space_id, kind = ?op.kind, path = %op.path, "local operation");
        self.oplog.push(op.clone());
        self.pending.insert(op.clone());
        let _ = self.events.send(SyncEvent::LocalOperation(op));
    }

    /// Handle an operation that arrived from a peer.
    ///
    /// If a local operation for the same path is still pending the
    /// remote one is held as a conflict and nothing touches the disk.
    pub fn receive_remote(&mut self, op: Operation) -> Result<RemoteOutcome, SyncError> {
        // Snapshots and greeting rounds can re-deliver operations we
        // already hold; skip them instead of re-applying.
        if self.oplog.contains(&op.id) {
            debug!(space = %self.space_id, op_id = %op.id, "duplicate remote operation skipped");
            return Ok(RemoteOutcome::Applied);
        }
        if let Some(local) = self.pending.for_path(&op.path).cloned() {
            let conflict = Conflict::new(local, op);
            let id = conflict.id;
            warn!(space = %self.space_id, path = %conflict.path, kind = ?conflict.kind, "conflict detected");
            let _ = self.events.send(SyncEvent::ConflictDetected(conflict.clone()));
            self.conflicts.insert(id, conflict);
            return Ok(RemoteOutcome::Conflicted(id));
        }

        self.apply_operation(&op)?;
        self.oplog.push(op.clone());
        let _ = self.events.send(SyncEvent::RemoteApplied(op));
        Ok(RemoteOutcome::Applied)
    }

    /// Apply an operation's effect to the bound directory. Idempotent:
    /// re-applying yields the same on-disk state.
    pub fn apply_operation(&mut self, op: &Operation) -> Result<(), SyncError> {
        let root = self.root()?.to_path_buf();
        let target = root.join(op.path.replace('/', std::path::MAIN_SEPARATOR_STR));

        match &op.payload {
            OperationPayload::Directory => {
                std::fs::create_dir_all(&target)?;
            }
            OperationPayload::File { content, .. } => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, content)?;
            }
            OperationPayload::Deleted => {
                let removal = if target.is_dir() {
                    std::fs::remove_dir_all(&target)
                } else {
                    std::fs::remove_file(&target)
                };
                match removal {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(SyncError::Io(e)),
                }
            }
        }
        Ok(())
    }

    /// Settle a held conflict. `Merge` produces a fresh local operation
    /// carrying the merged content, returned so it can be pushed out.
    pub fn resolve_conflict(
        &mut self,
        id: Uuid,
        resolution: Resolution,
    ) -> Result<Option<Operation>, SyncError> {
        let conflict = self
            .conflicts
            .remove(&id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        self.pending.remove_for_path(&conflict.path);

        match resolution {
            Resolution::Accept => {
                info!(space = %self.space_id, path = %conflict.path, "conflict resolved: accept remote");
                self.apply_operation(&conflict.remote)?;
                self.oplog.push(conflict.remote.clone());
                let _ = self.events.send(SyncEvent::RemoteApplied(conflict.remote));
                Ok(None)
            }
            Resolution::Reject => {
                info!(space = %self.space_id, path = %conflict.path, "conflict resolved: keep local");
                Ok(None)
            }
            Resolution::Merge { content } => {
                info!(space = %self.space_id, path = %conflict.path, "conflict resolved: merge");
                let size = content.len() as u64;
                let hash = content_hash(&content);
                let op = Operation::new(
                    OperationKind::Change,
                    conflict.path.clone(),
                    self.space_id.clone(),
                    OperationPayload::File {
                        content,
                        hash,
                        size,
                        mtime_ms: now_ms(),
                    },
                );
                self.apply_operation(&op)?;
                self.record_local(op.clone());
                Ok(Some(op))
            }
        }
    }

    fn root(&self) -> Result<&Path, SyncError> {
        self.collection_root.as_deref().ok_or(SyncError::Unbound)
    }
}

/// Read a file into the wire payload, hashing as we go.
fn read_file_payload(path: &Path) -> std::io::Result<OperationPayload> {
    let metadata = std::fs::metadata(path)?;
    let content = std::fs::read(path)?;
    let mtime_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(now_ms);
    Ok(OperationPayload::File {
        hash: content_hash(&content),
        size: content.len() as u64,
        content,
        mtime_ms,
    })
}

/// Root-relative path with `/` separators, or `None` when outside root.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
