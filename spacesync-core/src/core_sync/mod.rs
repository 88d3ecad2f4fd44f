//! Collection synchronization
//!
//! Everything between the local filesystem and the wire: the operation
//! model, the bounded operation log, the directory watcher, conflict
//! bookkeeping, and the [`SyncLayer`] that ties them together for one
//! space.

pub mod conflict;
pub mod errors;
pub mod layer;
pub mod operation;
pub mod oplog;
pub mod watcher;

pub use conflict::{Conflict, ConflictKind, Resolution};
pub use errors::SyncError;
pub use layer::{RemoteOutcome, SyncEvent, SyncLayer, SyncMode, SyncStatus, WatchState};
pub use operation::{
    content_hash, now_ms, Operation, OperationKind, OperationPayload, SignedOperation,
};
pub use oplog::{OperationLog, PendingOperations};
pub use watcher::{CollectionWatcher, FsEvent, FsEventKind};
