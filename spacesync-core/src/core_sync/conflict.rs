//! Conflict detection and resolution types
//!
//! A conflict is registered when a remote operation arrives for a path
//! that still has a pending local operation. The caller decides the
//! outcome; nothing here touches the filesystem.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::operation::{Operation, OperationKind};

/// How the local and remote changes collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides modified the same existing entry
    FileModified,
    /// One side deleted what the other changed
    FileDeleted,
    /// Both sides created the same path independently
    FileCreated,
}

impl ConflictKind {
    /// Classify a collision from the local pending kind and the remote
    /// operation's kind.
    pub fn classify(local: OperationKind, remote: OperationKind) -> Self {
        if local.is_deletion() || remote.is_deletion() {
            ConflictKind::FileDeleted
        } else if local == OperationKind::Add && remote == OperationKind::Add {
            ConflictKind::FileCreated
        } else {
            ConflictKind::FileModified
        }
    }
}

/// An unresolved collision awaiting a [`Resolution`] from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflicts are looked up by the remote operation's id
    pub id: Uuid,
    pub kind: ConflictKind,
    pub path: String,
    /// The local operation that had not yet finished a sync round
    pub local: Operation,
    /// The remote operation that arrived while it was pending
    pub remote: Operation,
    pub detected_at_ms: u64,
}

impl Conflict {
    pub fn new(local: Operation, remote: Operation) -> Self {
        let kind = ConflictKind::classify(local.kind, remote.kind);
        Self {
            id: remote.id,
            kind,
            path: remote.path.clone(),
            local,
            remote,
            detected_at_ms: super::operation::now_ms(),
        }
    }
}

/// Caller's verdict on a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum Resolution {
    /// Apply the remote operation, discarding the local change
    Accept,
    /// Keep the local state, ignoring the remote operation
    Reject,
    /// Replace the entry content with caller-supplied bytes
    Merge { content: Vec<u8> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::operation::OperationPayload;

    fn op(kind: OperationKind, path: &str) -> Operation {
        Operation::new(kind, path.to_string(), "space-1".to_string(), OperationPayload::Deleted)
    }

    #[test]
    fn classification_priorities() {
        assert_eq!(
            ConflictKind::classify(OperationKind::Change, OperationKind::Change),
            ConflictKind::FileModified
        );
        assert_eq!(
            ConflictKind::classify(OperationKind::Change, OperationKind::Unlink),
            ConflictKind::FileDeleted
        );
        assert_eq!(
            ConflictKind::classify(OperationKind::Unlink, OperationKind::Change),
            ConflictKind::FileDeleted
        );
        assert_eq!(
            ConflictKind::classify(OperationKind::Add, OperationKind::Add),
            ConflictKind::FileCreated
        );
        assert_eq!(
            ConflictKind::classify(OperationKind::Add, OperationKind::Change),
            ConflictKind::FileModified
        );
    }

    #[test]
    fn conflict_takes_remote_path() {
        let local = op(OperationKind::Change, "requests/get.http");
        let remote = op(OperationKind::Unlink, "requests/get.http");
        let conflict = Conflict::new(local, remote);
        assert_eq!(conflict.kind, ConflictKind::FileDeleted);
        assert_eq!(conflict.path, "requests/get.http");
    }

    #[test]
    fn resolution_wire_shape() {
        let json = serde_json::to_value(&Resolution::Merge { content: vec![1, 2] }).unwrap();
        assert_eq!(json["choice"], "merge");
        let json = serde_json::to_value(&Resolution::Accept).unwrap();
        assert_eq!(json["choice"], "accept");
    }
}
