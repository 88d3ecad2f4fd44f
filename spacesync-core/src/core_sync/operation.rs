//! Operation model
//!
//! An operation is an immutable record of one filesystem change within a
//! space. Operations are created by the sync layer from watch events,
//! appended to the in-memory log, and acquire a signature only when
//! selected for transmission.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::core_crypto::Signed;

/// The kind of filesystem change an operation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}

impl OperationKind {
    pub fn is_deletion(&self) -> bool {
        matches!(self, OperationKind::Unlink | OperationKind::UnlinkDir)
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, OperationKind::AddDir | OperationKind::UnlinkDir)
    }
}

/// Kind-dependent payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationPayload {
    /// File content plus integrity metadata (`add`/`change`)
    File {
        content: Vec<u8>,
        /// SHA-256 of `content`, hex encoded
        hash: String,
        size: u64,
        mtime_ms: u64,
    },
    /// Directory marker (`addDir`)
    Directory,
    /// Deletion marker (`unlink`/`unlinkDir`)
    Deleted,
}

/// One immutable filesystem change within a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    /// Path relative to the collection root, '/'-separated
    pub path: String,
    pub timestamp_ms: u64,
    pub space_id: String,
    pub payload: OperationPayload,
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        path: impl Into<String>,
        space_id: impl Into<String>,
        payload: OperationPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            path: path.into(),
            timestamp_ms: now_ms(),
            space_id: space_id.into(),
            payload,
        }
    }

    /// The file content carried by this operation, when it has any.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.payload {
            OperationPayload::File { content, .. } => Some(content),
            _ => None,
        }
    }
}

/// An operation with its detached signature, ready for the wire.
pub type SignedOperation = Signed<Operation>;

/// SHA-256 content hash, hex encoded.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_get_unique_ids() {
        let a = Operation::new(OperationKind::Add, "a.http", "s", OperationPayload::Deleted);
        let b = Operation::new(OperationKind::Add, "a.http", "s", OperationPayload::Deleted);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn kind_predicates() {
        assert!(OperationKind::Unlink.is_deletion());
        assert!(OperationKind::UnlinkDir.is_deletion());
        assert!(!OperationKind::Change.is_deletion());
        assert!(OperationKind::AddDir.is_directory());
        assert!(!OperationKind::Add.is_directory());
    }

    #[test]
    fn kind_serializes_to_wire_names() {
        assert_eq!(
            serde_json::to_string(&OperationKind::AddDir).unwrap(),
            "\"addDir\""
        );
        assert_eq!(
            serde_json::to_string(&OperationKind::Unlink).unwrap(),
            "\"unlink\""
        );
    }

    #[test]
    fn content_hash_is_stable() {
        let h1 = content_hash(b"body");
        let h2 = content_hash(b"body");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, content_hash(b"other"));
    }

    #[test]
    fn content_accessor() {
        let op = Operation::new(
            OperationKind::Add,
            "f.http",
            "s",
            OperationPayload::File {
                content: b"data".to_vec(),
                hash: content_hash(b"data"),
                size: 4,
                mtime_ms: 0,
            },
        );
        assert_eq!(op.content(), Some(b"data".as_ref()));

        let dir = Operation::new(OperationKind::AddDir, "d", "s", OperationPayload::Directory);
        assert_eq!(dir.content(), None);
    }
}
