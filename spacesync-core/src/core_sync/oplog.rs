//! In-memory operation log and pending set
//!
//! The log is bounded: once it reaches capacity the oldest entries are
//! evicted. Its length doubles as the space's "head" counter shared in
//! HEAD/WANT/OPS exchanges. That counter is a naive linear sequence:
//! each peer populates its own log from its own filesystem events, so
//! two peers' heads are not causally comparable. Range exchange behaves
//! correctly only for a strict producer-to-consumer replication
//! topology, which is the wire-visible behavior this engine preserves.

use std::collections::HashMap;
use uuid::Uuid;

use super::operation::{Operation, OperationKind};

/// Bounded append-only log of locally observed operations.
pub struct OperationLog {
    entries: Vec<Operation>,
    capacity: usize,
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Append an operation, evicting the oldest entry at capacity.
    pub fn push(&mut self, op: Operation) {
        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(op);
    }

    /// Current head: the number of retained operations.
    pub fn head(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Slice the log by 1-based inclusive indices, as used by WANT/OPS.
    /// Out-of-range bounds are clamped; an empty or inverted range is
    /// empty.
    pub fn range(&self, from: u64, to: u64) -> Vec<Operation> {
        if from == 0 || from > to {
            return Vec::new();
        }
        let start = (from - 1) as usize;
        let end = (to as usize).min(self.entries.len());
        if start >= end {
            return Vec::new();
        }
        self.entries[start..end].to_vec()
    }

    /// Whether an operation with this id is still retained.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.iter().any(|op| op.id == *id)
    }

    /// The most recent `limit` operations, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Operation> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries[skip..].to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Operations created locally but not yet delivered to any peer.
#[derive(Default)]
pub struct PendingOperations {
    ops: HashMap<Uuid, Operation>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, op: Operation) {
        self.ops.insert(op.id, op);
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Operation> {
        self.ops.remove(id)
    }

    /// Drop every pending operation targeting `path`; returns how many
    /// were removed.
    pub fn remove_for_path(&mut self, path: &str) -> usize {
        let ids: Vec<Uuid> = self
            .ops
            .values()
            .filter(|op| op.path == path)
            .map(|op| op.id)
            .collect();
        for id in &ids {
            self.ops.remove(id);
        }
        ids.len()
    }

    /// The kind of a pending operation for `path`, if one exists. This
    /// is the conflict trigger: a remote operation only conflicts when a
    /// local pending operation targets the same path.
    pub fn kind_for_path(&self, path: &str) -> Option<OperationKind> {
        self.for_path(path).map(|op| op.kind)
    }

    /// The most recent pending operation targeting `path`.
    pub fn for_path(&self, path: &str) -> Option<&Operation> {
        self.ops
            .values()
            .filter(|op| op.path == path)
            .max_by_key(|op| op.timestamp_ms)
    }

    pub fn snapshot(&self) -> Vec<Operation> {
        self.ops.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::operation::OperationPayload;

    fn op(path: &str) -> Operation {
        Operation::new(OperationKind::Add, path, "space", OperationPayload::Deleted)
    }

    #[test]
    fn head_tracks_length() {
        let mut log = OperationLog::new(10);
        assert_eq!(log.head(), 0);
        log.push(op("a"));
        log.push(op("b"));
        assert_eq!(log.head(), 2);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut log = OperationLog::new(3);
        for i in 0..5 {
            log.push(op(&format!("f{}", i)));
        }
        assert_eq!(log.head(), 3);
        let all = log.range(1, 3);
        assert_eq!(all[0].path, "f2");
        assert_eq!(all[2].path, "f4");
    }

    #[test]
    fn range_is_one_based_inclusive() {
        let mut log = OperationLog::new(10);
        for i in 0..5 {
            log.push(op(&format!("f{}", i)));
        }
        let slice = log.range(4, 5);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].path, "f3");
        assert_eq!(slice[1].path, "f4");
    }

    #[test]
    fn range_clamps_and_rejects_nonsense() {
        let mut log = OperationLog::new(10);
        log.push(op("a"));
        assert!(log.range(0, 5).is_empty());
        assert!(log.range(3, 2).is_empty());
        assert_eq!(log.range(1, 100).len(), 1);
        assert!(log.range(2, 100).is_empty());
    }

    #[test]
    fn recent_returns_tail() {
        let mut log = OperationLog::new(10);
        for i in 0..5 {
            log.push(op(&format!("f{}", i)));
        }
        let tail = log.recent(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].path, "f3");
        assert_eq!(tail[1].path, "f4");
    }

    #[test]
    fn contains_follows_eviction() {
        let mut log = OperationLog::new(2);
        let first = op("a");
        let first_id = first.id;
        log.push(first);
        assert!(log.contains(&first_id));
        log.push(op("b"));
        log.push(op("c"));
        assert!(!log.contains(&first_id));
    }

    #[test]
    fn pending_path_lookup_and_removal() {
        let mut pending = PendingOperations::new();
        pending.insert(op("x"));
        pending.insert(op("x"));
        pending.insert(op("y"));

        assert_eq!(pending.kind_for_path("x"), Some(OperationKind::Add));
        assert_eq!(pending.kind_for_path("z"), None);

        assert_eq!(pending.remove_for_path("x"), 2);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.kind_for_path("x"), None);
    }
}
