//! End-to-end scenarios over the in-memory transport
//!
//! Two simulated devices per test, each a full engine with its own key
//! material, reconciling through the real protocol.

use std::sync::Arc;
use std::time::Duration;

use spacesync_core::core_engine::{Space, SpaceEvent};
use spacesync_core::core_protocol::MemoryHub;
use spacesync_core::core_sync::{ConflictKind, OperationKind, Resolution, SyncMode};
use spacesync_core::test_utils::{file_operation, wait_for_event, wait_until, TestNode};

const SPACE: &str = "team-apis";
const WAIT: Duration = Duration::from_secs(5);

struct Pair {
    a: TestNode,
    b: TestNode,
    space_a: Arc<Space>,
    space_b: Arc<Space>,
}

/// Two manual-mode nodes sharing one space, collections bound but not
/// watched so every operation in the test is explicit.
async fn joined_pair(hub: &MemoryHub) -> Pair {
    let a = TestNode::join_hub(hub, "device-a").await;
    let b = TestNode::join_hub(hub, "device-b").await;

    let space_a = a.engine.create_space(SPACE).await.unwrap();
    space_a.bind_collection_path(a.collection.path()).await.unwrap();
    space_a.set_sync_mode(SyncMode::Manual).await;

    let invite = space_a.generate_invite().await.unwrap();
    let key = space_a.export_space_key().await;
    let space_b = b.engine.join_space(&invite, &key).await.unwrap();
    space_b.bind_collection_path(b.collection.path()).await.unwrap();
    space_b.set_sync_mode(SyncMode::Manual).await;

    Pair {
        a,
        b,
        space_a,
        space_b,
    }
}

async fn head_of(space: &Arc<Space>) -> u64 {
    space.get_sync_status().await.head
}

#[tokio::test]
async fn lagging_peer_pulls_only_the_missing_range() {
    let hub = MemoryHub::new();
    let pair = joined_pair(&hub).await;

    for i in 1..=3 {
        pair.space_a
            .record_operation(file_operation(SPACE, &format!("req-{i}.http"), b"GET /"))
            .await;
    }
    pair.space_a.sync_with_peer(&pair.b.peer_id).await.unwrap();
    wait_until(WAIT, || async { head_of(&pair.space_b).await == 3 })
        .await
        .expect("first three operations replicated");

    // Two more land while the peer is idle
    pair.space_a
        .record_operation(file_operation(SPACE, "req-4.http", b"GET /four"))
        .await;
    pair.space_a
        .record_operation(file_operation(SPACE, "req-5.http", b"GET /five"))
        .await;

    // A greets the lagging peer again; the head exchange ships just the gap
    pair.space_a.sync_with_peer(&pair.b.peer_id).await.unwrap();
    wait_until(WAIT, || async { head_of(&pair.space_b).await == 5 })
        .await
        .expect("missing range replicated");

    // Only the gap crossed the wire; earlier entries were not re-applied
    let history = pair.space_b.operation_history(10).await;
    assert_eq!(history.len(), 5);
    assert_eq!(
        std::fs::read(pair.b.collection.path().join("req-5.http")).unwrap(),
        b"GET /five"
    );
}

#[tokio::test]
async fn concurrent_edits_conflict_and_accept_takes_remote() {
    let hub = MemoryHub::new();
    let pair = joined_pair(&hub).await;
    let mut events_b = pair.space_b.subscribe();

    // Peer b edits the path locally and has not synced yet
    std::fs::write(pair.b.collection.path().join("shared.http"), b"local body").unwrap();
    let mut local = file_operation(SPACE, "shared.http", b"local body");
    local.kind = OperationKind::Change;
    pair.space_b.record_operation(local).await;

    // Peer a pushes its own version of the same path
    pair.space_a
        .record_operation(file_operation(SPACE, "shared.http", b"remote body"))
        .await;
    pair.space_a.sync_with_peer(&pair.b.peer_id).await.unwrap();
    pair.space_a.sync_with_peers().await.unwrap();

    let event = wait_for_event(&mut events_b, WAIT, |e| {
        matches!(e, SpaceEvent::ConflictDetected(_))
    })
    .await
    .expect("conflict surfaced");
    let SpaceEvent::ConflictDetected(conflict) = event else {
        unreachable!();
    };
    assert_eq!(conflict.kind, ConflictKind::FileModified);
    assert_eq!(conflict.path, "shared.http");
    // Disk untouched while the conflict is open
    assert_eq!(
        std::fs::read(pair.b.collection.path().join("shared.http")).unwrap(),
        b"local body"
    );

    pair.space_b
        .resolve_conflict(conflict.id, Resolution::Accept)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(pair.b.collection.path().join("shared.http")).unwrap(),
        b"remote body"
    );
    assert!(pair.space_b.conflicts().await.is_empty());
}

#[tokio::test]
async fn reject_keeps_the_local_version() {
    let hub = MemoryHub::new();
    let pair = joined_pair(&hub).await;
    let mut events_b = pair.space_b.subscribe();

    std::fs::write(pair.b.collection.path().join("mine.http"), b"mine").unwrap();
    pair.space_b
        .record_operation(file_operation(SPACE, "mine.http", b"mine"))
        .await;

    pair.space_a
        .record_operation(file_operation(SPACE, "mine.http", b"theirs"))
        .await;
    pair.space_a.sync_with_peer(&pair.b.peer_id).await.unwrap();
    pair.space_a.sync_with_peers().await.unwrap();

    let event = wait_for_event(&mut events_b, WAIT, |e| {
        matches!(e, SpaceEvent::ConflictDetected(_))
    })
    .await
    .expect("conflict surfaced");
    let SpaceEvent::ConflictDetected(conflict) = event else {
        unreachable!();
    };

    pair.space_b
        .resolve_conflict(conflict.id, Resolution::Reject)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(pair.b.collection.path().join("mine.http")).unwrap(),
        b"mine"
    );
}

#[tokio::test]
async fn rekey_cuts_off_peers_until_they_import_the_new_key() {
    let hub = MemoryHub::new();
    let pair = joined_pair(&hub).await;

    pair.space_a.rekey().await.unwrap();
    pair.space_a
        .record_operation(file_operation(SPACE, "after-rekey.http", b"GET /"))
        .await;
    pair.space_a.sync_with_peer(&pair.b.peer_id).await.unwrap();

    // Old key cannot open the new traffic, nothing replicates
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(head_of(&pair.space_b).await, 0);

    pair.space_b
        .import_space_key(&pair.space_a.export_space_key().await)
        .await
        .unwrap();
    pair.space_b.sync_with_peer(&pair.a.peer_id).await.unwrap();
    wait_until(WAIT, || async { head_of(&pair.space_b).await == 1 })
        .await
        .expect("replication resumes with the new key");
}

#[tokio::test(start_paused = true)]
async fn scheduled_mode_pushes_pending_exactly_once() {
    let hub = MemoryHub::new();
    let pair = joined_pair(&hub).await;
    let mut events_a = pair.space_a.subscribe();

    // Handshake so both sides know each other before the timer runs
    pair.space_a.sync_with_peer(&pair.b.peer_id).await.unwrap();
    wait_until(WAIT, || async {
        !pair.space_a.get_peer_states().await.is_empty()
    })
    .await
    .expect("handshake complete");

    pair.space_a
        .set_sync_mode(SyncMode::Scheduled {
            interval: Duration::from_secs(10),
        })
        .await;
    pair.space_a
        .record_operation(file_operation(SPACE, "timed.http", b"GET /"))
        .await;

    let event = wait_for_event(&mut events_a, Duration::from_secs(30), |e| {
        matches!(e, SpaceEvent::SyncCompleted { .. })
    })
    .await
    .expect("scheduled round fired");
    let SpaceEvent::SyncCompleted { pushed } = event else {
        unreachable!();
    };
    assert_eq!(pushed, 1);

    wait_until(WAIT, || async { head_of(&pair.space_b).await == 1 })
        .await
        .expect("operation replicated");
    // Acked, so the next round has nothing left to push
    wait_until(WAIT, || async {
        pair.space_a.get_sync_status().await.pending == 0
    })
    .await
    .expect("pending drained");
}

#[tokio::test]
async fn joining_an_already_held_space_returns_the_existing_handle() {
    let hub = MemoryHub::new();
    let pair = joined_pair(&hub).await;

    let invite = pair.space_a.generate_invite().await.unwrap();
    let key = pair.space_a.export_space_key().await;
    let again = pair.b.engine.join_space(&invite, &key).await.unwrap();
    assert!(Arc::ptr_eq(&again, &pair.space_b));
}

#[tokio::test]
async fn join_with_wrong_key_is_rejected() {
    let hub = MemoryHub::new();
    let a = TestNode::join_hub(&hub, "device-a").await;
    let b = TestNode::join_hub(&hub, "device-b").await;

    let space_a = a.engine.create_space(SPACE).await.unwrap();
    let invite = space_a.generate_invite().await.unwrap();

    // A key from some other space cannot open the invite blob
    let wrong_key = "00".repeat(32);
    assert!(b.engine.join_space(&invite, &wrong_key).await.is_err());
    assert!(b.engine.get_space(SPACE).await.is_none());
}

#[tokio::test]
async fn watched_directory_changes_replicate() {
    let hub = MemoryHub::new();
    let pair = joined_pair(&hub).await;

    // Switch a to watching with auto sync
    pair.space_a
        .set_collection_path(pair.a.collection.path())
        .await
        .unwrap();
    pair.space_a
        .set_sync_mode(SyncMode::Auto {
            debounce: Duration::from_millis(20),
        })
        .await;
    pair.space_a.sync_with_peer(&pair.b.peer_id).await.unwrap();

    std::fs::write(pair.a.collection.path().join("live.http"), b"GET /live").unwrap();

    wait_until(Duration::from_secs(10), || async {
        head_of(&pair.space_b).await >= 1
    })
    .await
    .expect("watched change replicated");
    assert_eq!(
        std::fs::read(pair.b.collection.path().join("live.http")).unwrap(),
        b"GET /live"
    );
    // One file creation yields exactly one add
    let adds = pair
        .space_a
        .operation_history(10)
        .await
        .into_iter()
        .filter(|op| op.path == "live.http" && op.kind == OperationKind::Add)
        .count();
    assert_eq!(adds, 1);
}
