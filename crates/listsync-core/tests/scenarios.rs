//! End-to-end scenarios through SessionManager
//!
//! Each test drives the manager the way devices would: start a session, load
//! a replica from the returned full state, edit it locally, and send the
//! resulting update back.

use std::sync::Arc;

use listsync_core::protocol;
use listsync_core::{
    InMemoryDirectory, ManualClock, SessionManager, SessionType, Storage, SyncConfig, SyncError,
    TaskDirectory, TaskListDoc, TaskListId, UserId,
};
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;

struct Harness {
    manager: SessionManager<InMemoryDirectory>,
    directory: Arc<InMemoryDirectory>,
    clock: Arc<ManualClock>,
    list: TaskListId,
    _temp: TempDir,
}

fn harness(tasks: &[&str]) -> Harness {
    let temp = TempDir::new().unwrap();
    let storage = Storage::new(temp.path().join("listsync.redb")).unwrap();
    let directory = Arc::new(InMemoryDirectory::new());
    directory.create_list("groceries", "alice", tasks.iter().copied());
    let clock = Arc::new(ManualClock::new(T0));
    let manager = SessionManager::new(storage, directory.clone(), SyncConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    Harness {
        manager,
        directory,
        clock,
        list: "groceries".into(),
        _temp: temp,
    }
}

fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// A device replica bootstrapped from a full state
struct Device {
    name: &'static str,
    replica: TaskListDoc,
}

impl Harness {
    async fn join(&self, name: &'static str, session_type: SessionType) -> Device {
        let start = self
            .manager
            .start_session(&self.list, &"alice".into(), &name.into(), session_type)
            .await
            .unwrap();
        Device {
            name,
            replica: TaskListDoc::load(&start.document_state).unwrap(),
        }
    }

    /// Edit the device's replica and send the resulting update
    async fn submit(
        &self,
        device: &mut Device,
        edit: impl FnOnce(&mut TaskListDoc),
    ) -> listsync_core::UpdateAck {
        let before = device.replica.heads();
        edit(&mut device.replica);
        let update = protocol::update_since(&mut device.replica, &before).expect("edit made");
        self.manager
            .apply_update(&self.list, &"alice".into(), &device.name.into(), &update)
            .await
            .unwrap()
    }

    async fn server_order(&self, device: &str) -> Vec<String> {
        let snapshot = self
            .manager
            .get_state(&self.list, &"alice".into(), &device.into())
            .await
            .unwrap();
        TaskListDoc::load(&snapshot.document_state)
            .unwrap()
            .order()
            .unwrap()
    }
}

// ============================================================================
// Specified Scenarios
// ============================================================================

/// Scenario A: a fresh session sees the relational order
#[tokio::test]
async fn test_fresh_session_materializes_current_tasks() {
    let h = harness(&["t1", "t2"]);

    let device = h.join("phone", SessionType::Active).await;

    assert_eq!(device.replica.order().unwrap(), ids(&["t1", "t2"]));
}

/// Scenario B: a reorder and a concurrent append both survive
#[tokio::test]
async fn test_concurrent_edits_converge() {
    let h = harness(&["t1", "t2"]);
    let mut x = h.join("device-x", SessionType::Active).await;
    let mut y = h.join("device-y", SessionType::Active).await;

    h.submit(&mut x, |doc| doc.move_item(1, 0).unwrap()).await;

    // t3 was created through the task CRUD before Y syncs its append
    h.directory
        .set_task_ids(&h.list, ["t2", "t1", "t3"])
        .unwrap();
    let ack = h.submit(&mut y, |doc| doc.push("t3").unwrap()).await;
    assert!(ack.success);
    assert!(ack.conflict, "both sides edited concurrently");

    let order = h.server_order("device-x").await;
    assert_eq!(order.len(), 3);
    let pos = |id: &str| order.iter().position(|t| t == id).unwrap();
    assert!(pos("t2") < pos("t1"));
    assert!(order.contains(&"t3".to_string()));

    // The reconciled order was written back to the relational record
    assert_eq!(h.directory.task_order(&h.list).unwrap(), order);
}

/// Scenario C: a task deleted through CRUD disappears from the order
#[tokio::test]
async fn test_deleted_task_is_reconciled_away() {
    let h = harness(&["t1", "t2", "t3"]);
    h.join("phone", SessionType::Active).await;

    h.directory.set_task_ids(&h.list, ["t1", "t3"]).unwrap();

    assert_eq!(h.server_order("phone").await, ids(&["t1", "t3"]));
}

/// Scenario D: a task created through CRUD is appended
#[tokio::test]
async fn test_external_task_is_appended() {
    let h = harness(&["t1"]);
    h.join("phone", SessionType::Active).await;

    h.directory.set_task_ids(&h.list, ["t1", "t2"]).unwrap();

    assert_eq!(h.server_order("phone").await, ids(&["t1", "t2"]));
}

/// Scenario E: a malformed update changes nothing
#[tokio::test]
async fn test_malformed_update_leaves_document_unchanged() {
    let h = harness(&["t1", "t2"]);
    let start = h
        .manager
        .start_session(&h.list, &"alice".into(), &"phone".into(), SessionType::Active)
        .await
        .unwrap();

    let result = h
        .manager
        .apply_update(&h.list, &"alice".into(), &"phone".into(), b"\x00garbage")
        .await;
    assert!(matches!(result, Err(SyncError::UpdateDecode(_))));

    let snapshot = h
        .manager
        .get_state(&h.list, &"alice".into(), &"phone".into())
        .await
        .unwrap();
    assert_eq!(snapshot.state_vector, start.state_vector);
    assert!(!snapshot.has_updates);
    assert_eq!(
        TaskListDoc::load(&snapshot.document_state)
            .unwrap()
            .order()
            .unwrap(),
        ids(&["t1", "t2"])
    );
}

// ============================================================================
// Session Timeouts
// ============================================================================

/// A background session expires 300,000 ms after its last activity
#[tokio::test]
async fn test_background_session_expires() {
    let h = harness(&["t1"]);
    h.join("watch", SessionType::Background).await;

    h.clock.set(T0 + 300_000);
    let result = h
        .manager
        .get_state(&h.list, &"alice".into(), &"watch".into())
        .await;

    assert!(matches!(result, Err(SyncError::SessionNotFound(_))));
}

/// An active session expires 3,600,000 ms after its last activity
#[tokio::test]
async fn test_active_session_expires() {
    let h = harness(&["t1"]);
    h.join("laptop", SessionType::Active).await;

    h.clock.set(T0 + 3_599_999);
    let start = h
        .manager
        .start_session(&h.list, &"alice".into(), &"tablet".into(), SessionType::Active)
        .await
        .unwrap();
    assert_eq!(start.expires_at, T0 + 3_599_999 + 3_600_000);

    h.clock.set(T0 + 3_600_000);
    let result = h
        .manager
        .get_state(&h.list, &"alice".into(), &"laptop".into())
        .await;
    assert!(matches!(result, Err(SyncError::SessionNotFound(_))));

    // The tablet's session is still live
    assert!(h
        .manager
        .get_state(&h.list, &"alice".into(), &"tablet".into())
        .await
        .is_ok());
}

/// Activity pushes the expiry out
#[tokio::test]
async fn test_keep_alive_extends_session() {
    let h = harness(&["t1"]);
    let start = h
        .manager
        .start_session(&h.list, &"alice".into(), &"watch".into(), SessionType::Background)
        .await
        .unwrap();

    h.clock.set(T0 + 299_999);
    let expires_at = h.manager.keep_alive(&start.session_id).await.unwrap();
    assert_eq!(expires_at, T0 + 299_999 + 300_000);

    h.clock.set(T0 + 500_000);
    assert!(h
        .manager
        .get_state(&h.list, &"alice".into(), &"watch".into())
        .await
        .is_ok());
}

/// A lazily detected expiry is written back as inactive
#[tokio::test]
async fn test_expired_session_is_marked_inactive() {
    let h = harness(&["t1"]);
    let start = h
        .manager
        .start_session(&h.list, &"alice".into(), &"watch".into(), SessionType::Background)
        .await
        .unwrap();

    h.clock.advance(300_000);
    assert!(matches!(
        h.manager.keep_alive(&start.session_id).await,
        Err(SyncError::SessionNotFound(_))
    ));

    let stored = h.manager.session(&start.session_id).unwrap().unwrap();
    assert!(!stored.is_active);
}

/// Directory whose order write-back takes longer than the session timeout
struct SlowDirectory {
    inner: InMemoryDirectory,
    clock: Arc<ManualClock>,
    write_delay_ms: i64,
}

impl TaskDirectory for SlowDirectory {
    async fn resolve_ownership(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
    ) -> Result<(), SyncError> {
        self.inner.resolve_ownership(task_list_id, user_id).await
    }

    async fn current_task_ids(&self, task_list_id: &TaskListId) -> Result<Vec<String>, SyncError> {
        self.inner.current_task_ids(task_list_id).await
    }

    async fn write_task_order(
        &self,
        task_list_id: &TaskListId,
        ordered_ids: &[String],
    ) -> Result<(), SyncError> {
        self.clock.advance(self.write_delay_ms);
        self.inner.write_task_order(task_list_id, ordered_ids).await
    }
}

/// A stored update is acknowledged even if its session lapses mid-apply
#[tokio::test]
async fn test_session_expiring_during_apply_still_acknowledges() {
    let temp = TempDir::new().unwrap();
    let storage = Storage::new(temp.path().join("listsync.redb")).unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let inner = InMemoryDirectory::new();
    inner.create_list("groceries", "alice", ["t1", "t2"]);
    let directory = Arc::new(SlowDirectory {
        inner,
        clock: clock.clone(),
        write_delay_ms: 300_000,
    });
    let manager = SessionManager::new(storage, directory.clone(), SyncConfig::default())
        .unwrap()
        .with_clock(clock.clone());

    let list = TaskListId::from("groceries");
    let user = UserId::from("alice");
    let start = manager
        .start_session(&list, &user, &"watch".into(), SessionType::Background)
        .await
        .unwrap();

    let mut replica = TaskListDoc::load(&start.document_state).unwrap();
    let before = replica.heads();
    replica.move_item(1, 0).unwrap();
    let update = protocol::update_since(&mut replica, &before).unwrap();

    let ack = manager
        .apply_update(&list, &user, &"watch".into(), &update)
        .await
        .unwrap();
    assert!(ack.success);
    assert_eq!(directory.inner.task_order(&list).unwrap(), ids(&["t2", "t1"]));

    // The session itself is gone; a new one sees the stored order
    assert!(matches!(
        manager.keep_alive(&start.session_id).await,
        Err(SyncError::SessionNotFound(_))
    ));
    let restart = manager
        .start_session(&list, &user, &"watch".into(), SessionType::Background)
        .await
        .unwrap();
    let order = TaskListDoc::load(&restart.document_state).unwrap().order().unwrap();
    assert_eq!(order, ids(&["t2", "t1"]));
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Starting again from the same device supersedes the earlier session
#[tokio::test]
async fn test_new_session_supersedes_previous() {
    let h = harness(&["t1"]);
    let first = h
        .manager
        .start_session(&h.list, &"alice".into(), &"phone".into(), SessionType::Active)
        .await
        .unwrap();
    let second = h
        .manager
        .start_session(&h.list, &"alice".into(), &"phone".into(), SessionType::Active)
        .await
        .unwrap();

    assert_ne!(first.session_id, second.session_id);
    assert!(!h.manager.session(&first.session_id).unwrap().unwrap().is_active);
    assert!(matches!(
        h.manager.keep_alive(&first.session_id).await,
        Err(SyncError::SessionNotFound(_))
    ));
    assert!(h.manager.keep_alive(&second.session_id).await.is_ok());
}

/// Ending is idempotent and ends access
#[tokio::test]
async fn test_end_session() {
    let h = harness(&["t1"]);
    let start = h
        .manager
        .start_session(&h.list, &"alice".into(), &"phone".into(), SessionType::Active)
        .await
        .unwrap();

    h.manager.end_session(&start.session_id).await.unwrap();
    h.manager.end_session(&start.session_id).await.unwrap();

    assert!(matches!(
        h.manager
            .get_state(&h.list, &"alice".into(), &"phone".into())
            .await,
        Err(SyncError::SessionNotFound(_))
    ));
}

/// Sessions can also be addressed by id, but only by their own device
#[tokio::test]
async fn test_get_state_by_session() {
    let h = harness(&["t1", "t2"]);
    let start = h
        .manager
        .start_session(&h.list, &"alice".into(), &"phone".into(), SessionType::Active)
        .await
        .unwrap();

    let snapshot = h
        .manager
        .get_state_by_session(&start.session_id, &"alice".into(), &"phone".into())
        .await
        .unwrap();
    assert_eq!(snapshot.state_vector, start.state_vector);

    let wrong_device = h
        .manager
        .get_state_by_session(&start.session_id, &"alice".into(), &"laptop".into())
        .await;
    assert!(matches!(wrong_device, Err(SyncError::SessionNotFound(_))));
}

// ============================================================================
// Change Notification
// ============================================================================

/// hasUpdates reports movement since the state last handed to the device
#[tokio::test]
async fn test_has_updates_tracks_other_devices() {
    let h = harness(&["t1", "t2"]);
    h.join("phone", SessionType::Active).await;
    let mut laptop = h.join("laptop", SessionType::Active).await;

    h.submit(&mut laptop, |doc| doc.move_item(0, 1).unwrap())
        .await;

    let first = h
        .manager
        .get_state(&h.list, &"alice".into(), &"phone".into())
        .await
        .unwrap();
    assert!(first.has_updates);

    let second = h
        .manager
        .get_state(&h.list, &"alice".into(), &"phone".into())
        .await
        .unwrap();
    assert!(!second.has_updates);
}

/// A device catches up with diff_since instead of reloading the full state
#[tokio::test]
async fn test_diff_since_brings_replica_up_to_date() {
    let h = harness(&["t1", "t2", "t3"]);
    let mut phone = h.join("phone", SessionType::Active).await;
    let mut laptop = h.join("laptop", SessionType::Active).await;

    h.submit(&mut laptop, |doc| doc.move_item(2, 0).unwrap())
        .await;

    let phone_vector = protocol::encode_state_vector(&mut phone.replica);
    let update = h
        .manager
        .diff_since(&h.list, &"alice".into(), &"phone".into(), &phone_vector)
        .await
        .unwrap()
        .expect("laptop's move is missing");
    protocol::merge(&mut phone.replica, &update).unwrap();
    assert_eq!(phone.replica.order().unwrap(), ids(&["t3", "t1", "t2"]));

    let caught_up = protocol::encode_state_vector(&mut phone.replica);
    let nothing = h
        .manager
        .diff_since(&h.list, &"alice".into(), &"phone".into(), &caught_up)
        .await
        .unwrap();
    assert!(nothing.is_none());
}

/// Documents survive a restart of the manager
#[tokio::test]
async fn test_document_persists_across_managers() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("listsync.redb");
    let directory = Arc::new(InMemoryDirectory::new());
    directory.create_list("groceries", "alice", ["t1", "t2"]);
    let list: TaskListId = "groceries".into();

    {
        let manager = SessionManager::new(
            Storage::new(&path).unwrap(),
            directory.clone(),
            SyncConfig::default(),
        )
        .unwrap();
        let start = manager
            .start_session(&list, &"alice".into(), &"phone".into(), SessionType::Active)
            .await
            .unwrap();
        let mut replica = TaskListDoc::load(&start.document_state).unwrap();
        let before = replica.heads();
        replica.move_item(1, 0).unwrap();
        let update = protocol::update_since(&mut replica, &before).unwrap();
        manager
            .apply_update(&list, &"alice".into(), &"phone".into(), &update)
            .await
            .unwrap();
    }

    let manager =
        SessionManager::new(Storage::new(&path).unwrap(), directory, SyncConfig::default())
            .unwrap();
    let snapshot = manager
        .get_state(&list, &"alice".into(), &"phone".into())
        .await
        .unwrap();
    let order = TaskListDoc::load(&snapshot.document_state)
        .unwrap()
        .order()
        .unwrap();
    assert_eq!(order, ids(&["t2", "t1"]));
}
