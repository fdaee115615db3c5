//! SessionManager - the entry point for collaborative list editing
//!
//! SessionManager coordinates DocumentStore, the update protocol, conflict
//! classification and order reconciliation for:
//! - Session lifecycle (start, keep-alive, lazy expiry, end)
//! - Handing devices the full document state and state vectors
//! - Merging device updates under the per-list lock
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use listsync_core::{InMemoryDirectory, SessionManager, SessionType, Storage, SyncConfig};
//!
//! let directory = Arc::new(InMemoryDirectory::new());
//! directory.create_list("groceries", "alice", ["t1", "t2"]);
//!
//! let storage = Storage::new("/tmp/listsync.redb")?;
//! let manager = SessionManager::new(storage, directory, SyncConfig::default())?;
//!
//! let start = manager
//!     .start_session(&"groceries".into(), &"alice".into(), &"phone".into(), SessionType::Active)
//!     .await?;
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::conflict::{self, ConflictReport};
use crate::directory::TaskDirectory;
use crate::document::{DocumentRepository, DocumentStore, ListGuard, TaskListDoc};
use crate::error::SyncError;
use crate::protocol::{self, StateVector};
use crate::reconcile;
use crate::storage::{SessionTxn, Storage};
use crate::types::{DeviceId, Session, SessionId, SessionType, TaskListId, UserId};

/// Result of starting a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub session_id: SessionId,
    /// Full encoded document; devices bootstrap their replica from it
    pub document_state: Vec<u8>,
    pub state_vector: Vec<u8>,
    pub expires_at: i64,
}

/// Current document state as seen by one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub document_state: Vec<u8>,
    pub state_vector: Vec<u8>,
    /// The state vector moved since it was last handed to this device
    pub has_updates: bool,
}

/// Acknowledgement of a merged update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAck {
    pub success: bool,
    pub state_vector: Vec<u8>,
    /// Diagnostic only; the update was merged either way
    pub conflict: bool,
}

/// Owns session lifecycle and every document mutation
pub struct SessionManager<D: TaskDirectory> {
    /// Session records and the default document repository
    storage: Storage,
    documents: DocumentStore,
    directory: Arc<D>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl<D: TaskDirectory> SessionManager<D> {
    /// Create a manager that keeps sessions and documents in `storage`
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if `config` does not validate.
    pub fn new(
        storage: Storage,
        directory: Arc<D>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let documents =
            DocumentStore::new(Arc::new(storage.clone()), config.persist_retry.clone());
        info!(
            active_timeout_ms = config.active_timeout_ms,
            background_timeout_ms = config.background_timeout_ms,
            "Initializing SessionManager"
        );
        Ok(Self {
            storage,
            documents,
            directory,
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Keep documents in `repository` instead of the session storage
    pub fn with_document_repository(mut self, repository: Arc<dyn DocumentRepository>) -> Self {
        self.documents = DocumentStore::new(repository, self.config.persist_retry.clone());
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Start editing a list from a device
    ///
    /// Supersedes any active session for the same (list, device) pair and
    /// creates the list's document from its current membership if needed.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DeviceIdRequired`, `SyncError::UserNotFound` or
    /// `SyncError::TaskListNotFound` for rejected requests.
    pub async fn start_session(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
        device_id: &DeviceId,
        session_type: SessionType,
    ) -> Result<SessionStart, SyncError> {
        self.authorize(task_list_id, user_id, device_id).await?;

        let mut doc = self.current_document(task_list_id).await?;
        let document_state = doc.save();
        let state_vector = protocol::encode_state_vector(&mut doc);

        let now = self.clock.now_millis();
        let session = Session {
            session_id: SessionId::generate(),
            task_list_id: task_list_id.clone(),
            user_id: user_id.clone(),
            device_id: device_id.clone(),
            session_type,
            created_at: now,
            last_activity: now,
            expires_at: now.saturating_add(self.config.timeout_for(session_type)),
            is_active: true,
            last_state_vector: state_vector.clone(),
        };

        let superseded = self.storage.session_unit_of_work(|txn| {
            let superseded = match txn.active_session_for(task_list_id, device_id)? {
                Some(prior_id) => match txn.get(&prior_id)? {
                    Some(mut prior) if prior.is_active => {
                        txn.deactivate(&mut prior)?;
                        Some(prior_id)
                    }
                    _ => None,
                },
                None => None,
            };
            txn.put(&session)?;
            txn.set_active(&session)?;
            Ok(superseded)
        })?;

        if let Some(prior) = superseded {
            debug!(%task_list_id, %device_id, superseded = %prior, "Superseded previous session");
        }
        info!(
            %task_list_id,
            %device_id,
            session_id = %session.session_id,
            session_type = %session_type,
            "Session started"
        );

        Ok(SessionStart {
            session_id: session.session_id,
            document_state,
            state_vector,
            expires_at: session.expires_at,
        })
    }

    /// Push a session's expiry out by its idle timeout
    ///
    /// Returns the new `expires_at`.
    pub async fn keep_alive(&self, session_id: &SessionId) -> Result<i64, SyncError> {
        let expires_at = self.refresh_session(session_id, None)?;
        debug!(%session_id, expires_at, "Session kept alive");
        Ok(expires_at)
    }

    /// End a session; ending an already ended or expired session succeeds
    ///
    /// # Errors
    ///
    /// Returns `SyncError::SessionNotFound` if the id was never issued.
    pub async fn end_session(&self, session_id: &SessionId) -> Result<(), SyncError> {
        let was_active = self.storage.session_unit_of_work(|txn| {
            let Some(mut session) = txn.get(session_id)? else {
                return Ok(None);
            };
            let was_active = session.is_active;
            if was_active {
                txn.deactivate(&mut session)?;
            }
            Ok(Some(was_active))
        })?;

        match was_active {
            Some(true) => info!(%session_id, "Session ended"),
            Some(false) => debug!(%session_id, "Session already ended"),
            None => return Err(SyncError::SessionNotFound(session_id.to_string())),
        }
        Ok(())
    }

    /// Load a session record as stored, live or not
    pub fn session(&self, session_id: &SessionId) -> Result<Option<Session>, SyncError> {
        self.storage.load_session(session_id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Document Access
    // ═══════════════════════════════════════════════════════════════════════

    /// Current document state for the device's active session on a list
    pub async fn get_state(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<DocumentSnapshot, SyncError> {
        self.authorize(task_list_id, user_id, device_id).await?;
        let session = self.live_session_for(task_list_id, user_id, device_id)?;
        self.snapshot(&session).await
    }

    /// Current document state, looking the session up by id
    ///
    /// The session must belong to `user_id` and `device_id`.
    pub async fn get_state_by_session(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<DocumentSnapshot, SyncError> {
        if device_id.is_blank() {
            return Err(SyncError::DeviceIdRequired);
        }
        let session = self
            .live_session(|_| Ok(Some(session_id.clone())))?
            .filter(|s| &s.user_id == user_id && &s.device_id == device_id)
            .ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))?;
        self.directory
            .resolve_ownership(&session.task_list_id, user_id)
            .await?;
        self.snapshot(&session).await
    }

    /// Minimal update a device at `state_vector` is missing
    ///
    /// Returns `None` when the device is up to date. Refreshes the session
    /// like [`get_state`](Self::get_state).
    pub async fn diff_since(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
        device_id: &DeviceId,
        state_vector: &[u8],
    ) -> Result<Option<Vec<u8>>, SyncError> {
        self.authorize(task_list_id, user_id, device_id).await?;
        StateVector::decode(state_vector)?;
        let session = self.live_session_for(task_list_id, user_id, device_id)?;

        let mut doc = self.current_document(task_list_id).await?;
        let update = protocol::diff(&mut doc, state_vector)?;
        let server_vector = protocol::encode_state_vector(&mut doc);
        self.refresh_session(&session.session_id, Some(server_vector))?;

        debug!(
            %task_list_id,
            %device_id,
            bytes = update.as_ref().map_or(0, Vec::len),
            "Computed diff"
        );
        Ok(update)
    }

    /// Merge a device's update into the list's document
    ///
    /// Runs under the list lock: merge, reconcile against current membership,
    /// persist the document, then write the order back to the directory.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UpdateDecode` for malformed bytes, leaving the
    /// document untouched, and `SyncError::SessionNotFound` without an active
    /// session for the device. Once the merged document is persisted the
    /// update is acknowledged even if the session expires before it is
    /// refreshed.
    pub async fn apply_update(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
        device_id: &DeviceId,
        update: &[u8],
    ) -> Result<UpdateAck, SyncError> {
        self.authorize(task_list_id, user_id, device_id).await?;
        let session = self.live_session_for(task_list_id, user_id, device_id)?;

        let guard = self.documents.lock(task_list_id).await;
        // The session may have lapsed while waiting for the list
        self.refresh_session(&session.session_id, None)?;
        let current = self.directory.current_task_ids(task_list_id).await?;
        let mut doc = self.documents.get_or_create(&guard, &current).await?;
        let mut local = doc.fork();

        let outcome = match protocol::merge(&mut doc, update) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%task_list_id, %device_id, bytes = update.len(), error = %e, "Rejected update");
                return Err(e);
            }
        };

        let conflict = self.detect_conflict(&session, &mut local, update);

        let reconciliation = reconcile::reconcile(task_list_id, &mut doc, &current)?;
        if outcome.advanced || reconciliation.changed() {
            self.documents.persist(&guard, &mut doc).await?;
        }
        if reconciliation.order != current {
            self.directory
                .write_task_order(task_list_id, &reconciliation.order)
                .await?;
        }
        let state_vector = protocol::encode_state_vector(&mut doc);

        // The update is durable from here on, so a session that lapsed since
        // the check above still gets its acknowledgement
        match self.refresh_session(&session.session_id, Some(state_vector.clone())) {
            Ok(_) => {}
            Err(SyncError::SessionNotFound(_)) => {
                warn!(
                    %task_list_id,
                    %device_id,
                    session_id = %session.session_id,
                    "Session expired while applying update"
                );
            }
            Err(e) => return Err(e),
        }
        drop(guard);

        debug!(
            %task_list_id,
            %device_id,
            changes = outcome.changes,
            advanced = outcome.advanced,
            removed = reconciliation.removed,
            appended = reconciliation.appended,
            "Update applied"
        );

        Ok(UpdateAck {
            success: true,
            state_vector,
            conflict,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    async fn authorize(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<(), SyncError> {
        if device_id.is_blank() {
            return Err(SyncError::DeviceIdRequired);
        }
        self.directory.resolve_ownership(task_list_id, user_id).await
    }

    /// The list's document, reconciled against current membership
    ///
    /// Reads a snapshot first and only takes the list lock when the document
    /// is missing or has drifted.
    async fn current_document(&self, task_list_id: &TaskListId) -> Result<TaskListDoc, SyncError> {
        let current = self.directory.current_task_ids(task_list_id).await?;
        if let Some(doc) = self.documents.load(task_list_id)? {
            if reconcile::is_reconciled(&doc, &current)? {
                return Ok(doc);
            }
        }

        let guard = self.documents.lock(task_list_id).await;
        // Membership may have moved while waiting for the lock
        let current = self.directory.current_task_ids(task_list_id).await?;
        let mut doc = self.documents.get_or_create(&guard, &current).await?;
        self.reconcile_locked(&guard, &mut doc, &current).await?;
        Ok(doc)
    }

    async fn reconcile_locked(
        &self,
        guard: &ListGuard,
        doc: &mut TaskListDoc,
        current: &[String],
    ) -> Result<(), SyncError> {
        let task_list_id = guard.task_list_id();
        let reconciliation = reconcile::reconcile(task_list_id, doc, current)?;
        if reconciliation.changed() {
            self.documents.persist(guard, doc).await?;
        }
        if reconciliation.order != current {
            self.directory
                .write_task_order(task_list_id, &reconciliation.order)
                .await?;
        }
        Ok(())
    }

    async fn snapshot(&self, session: &Session) -> Result<DocumentSnapshot, SyncError> {
        let mut doc = self.current_document(&session.task_list_id).await?;
        let document_state = doc.save();
        let state_vector = protocol::encode_state_vector(&mut doc);
        let has_updates = state_vector != session.last_state_vector;

        self.refresh_session(&session.session_id, Some(state_vector.clone()))?;

        Ok(DocumentSnapshot {
            document_state,
            state_vector,
            has_updates,
        })
    }

    /// Active session for the pair, which must belong to `user_id`
    fn live_session_for(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Session, SyncError> {
        self.live_session(|txn| txn.active_session_for(task_list_id, device_id))?
            .filter(|s| &s.user_id == user_id)
            .ok_or_else(|| {
                SyncError::SessionNotFound(format!("{} on {}", device_id, task_list_id))
            })
    }

    /// Resolve a session and check it is live
    ///
    /// An active session found past its expiry is written back as inactive;
    /// the write commits even though the caller sees no session.
    fn live_session<F>(&self, find: F) -> Result<Option<Session>, SyncError>
    where
        F: FnOnce(&SessionTxn<'_>) -> Result<Option<SessionId>, SyncError>,
    {
        let now = self.clock.now_millis();
        self.storage.session_unit_of_work(|txn| {
            let Some(session_id) = find(txn)? else {
                return Ok(None);
            };
            let Some(mut session) = txn.get(&session_id)? else {
                return Ok(None);
            };
            if session.is_live(now) {
                return Ok(Some(session));
            }
            if session.is_active {
                txn.deactivate(&mut session)?;
                debug!(%session_id, expires_at = session.expires_at, "Session expired");
            }
            Ok(None)
        })
    }

    /// Record activity on a live session, optionally storing the state vector
    /// just handed to its device. Returns the new `expires_at`.
    fn refresh_session(
        &self,
        session_id: &SessionId,
        state_vector: Option<Vec<u8>>,
    ) -> Result<i64, SyncError> {
        let now = self.clock.now_millis();
        let refreshed = self.storage.session_unit_of_work(|txn| {
            let Some(mut session) = txn.get(session_id)? else {
                return Ok(None);
            };
            if !session.is_live(now) {
                if session.is_active {
                    txn.deactivate(&mut session)?;
                }
                return Ok(None);
            }
            session.touch(now, self.config.timeout_for(session.session_type));
            if let Some(state_vector) = state_vector {
                session.last_state_vector = state_vector;
            }
            txn.put(&session)?;
            Ok(Some(session.expires_at))
        })?;
        refreshed.ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))
    }

    /// Classify the merge of `update` against the pre-merge document
    ///
    /// Failures are logged and treated as no conflict.
    fn detect_conflict(&self, session: &Session, local: &mut TaskListDoc, update: &[u8]) -> bool {
        let task_list_id = &session.task_list_id;
        match classify_update(local, &session.last_state_vector, update) {
            Ok(report) if report.conflict => {
                info!(
                    %task_list_id,
                    device_id = %session.device_id,
                    local = ?report.local_order,
                    remote = ?report.remote_order,
                    merged = ?report.merged_order,
                    "Concurrent edits merged"
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(%task_list_id, error = %e, "Conflict classification skipped");
                false
            }
        }
    }
}

/// The remote view is the document as last handed to the device plus the update
fn classify_update(
    local: &mut TaskListDoc,
    last_state_vector: &[u8],
    update: &[u8],
) -> Result<ConflictReport, SyncError> {
    let seen = StateVector::decode(last_state_vector)?;
    let heads: Vec<_> = seen
        .heads()
        .iter()
        .filter(|h| local.knows(h))
        .copied()
        .collect();
    let mut remote = local.fork_at(&heads)?;
    protocol::merge(&mut remote, update)?;
    conflict::classify(local, &mut remote)
}
