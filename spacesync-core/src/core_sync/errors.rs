//! Sync layer error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The bound path does not exist, is not a directory, or the watch
    /// subsystem refused it. Fatal to the sync layer until a valid path
    /// is supplied.
    #[error("watch error: {0}")]
    Watch(String),

    /// Lookup miss (conflict or operation id). Recoverable; surfaced to
    /// the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation that needs a collection directory was invoked before
    /// one was bound.
    #[error("no collection path bound")]
    Unbound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
