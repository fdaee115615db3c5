//! Session Storage - records and the active-session index
//!
//! Session records are keyed by session id. A second table maps each
//! (task list, device) pair to its single active session, which is what makes
//! superseding a previous session atomic.
//!
//! All mutations go through [`Storage::session_unit_of_work`], which hands a
//! closure a [`SessionTxn`] scoped to one redb write transaction: the effects
//! commit together when the closure returns `Ok` and are discarded otherwise.

use redb::{ReadableTable, TableDefinition, WriteTransaction};

use super::Storage;
use crate::error::SyncError;
use crate::types::{DeviceId, Session, SessionId, TaskListId};

/// Table for session records (key: session id, value: postcard Session)
pub(crate) const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Table for the active session of each (task list, device) pair
/// (key: see [`active_key`], value: session id)
pub(crate) const ACTIVE_SESSIONS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("active_sessions");

/// Index key for a (task list, device) pair; the unit separator cannot
/// appear in ids issued by the surrounding system.
fn active_key(task_list_id: &TaskListId, device_id: &DeviceId) -> String {
    format!("{}\u{1f}{}", task_list_id, device_id)
}

fn decode_session(bytes: &[u8]) -> Result<Session, SyncError> {
    postcard::from_bytes(bytes).map_err(|e| SyncError::Serialization(e.to_string()))
}

/// Transactional handle onto the session tables
pub struct SessionTxn<'a> {
    txn: &'a WriteTransaction,
}

impl SessionTxn<'_> {
    /// Load a session record
    pub fn get(&self, session_id: &SessionId) -> Result<Option<Session>, SyncError> {
        let table = self.txn.open_table(SESSIONS_TABLE)?;
        let value = table.get(session_id.as_str())?;
        value.map(|v| decode_session(v.value())).transpose()
    }

    /// Insert or overwrite a session record
    pub fn put(&self, session: &Session) -> Result<(), SyncError> {
        let mut table = self.txn.open_table(SESSIONS_TABLE)?;
        let serialized =
            postcard::to_allocvec(session).map_err(|e| SyncError::Serialization(e.to_string()))?;
        table.insert(session.session_id.as_str(), serialized.as_slice())?;
        Ok(())
    }

    /// Session currently indexed as active for the pair
    pub fn active_session_for(
        &self,
        task_list_id: &TaskListId,
        device_id: &DeviceId,
    ) -> Result<Option<SessionId>, SyncError> {
        let table = self.txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        let key = active_key(task_list_id, device_id);
        let value = table.get(key.as_str())?;
        Ok(value.map(|v| SessionId::from_string(v.value())))
    }

    /// Index `session` as the active one for its pair
    pub fn set_active(&self, session: &Session) -> Result<(), SyncError> {
        let mut table = self.txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        let key = active_key(&session.task_list_id, &session.device_id);
        table.insert(key.as_str(), session.session_id.as_str())?;
        Ok(())
    }

    /// Drop the index entry for the pair if it still points at `session`
    pub fn clear_active(&self, session: &Session) -> Result<(), SyncError> {
        let current = self.active_session_for(&session.task_list_id, &session.device_id)?;
        if current.as_ref() == Some(&session.session_id) {
            let mut table = self.txn.open_table(ACTIVE_SESSIONS_TABLE)?;
            let key = active_key(&session.task_list_id, &session.device_id);
            table.remove(key.as_str())?;
        }
        Ok(())
    }

    /// Mark `session` inactive and remove it from the index
    pub fn deactivate(&self, session: &mut Session) -> Result<(), SyncError> {
        session.is_active = false;
        self.put(session)?;
        self.clear_active(session)
    }
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Session Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Run `work` against the session tables inside one write transaction.
    ///
    /// Commits when `work` returns `Ok`, aborts when it returns `Err`.
    pub fn session_unit_of_work<T, F>(&self, work: F) -> Result<T, SyncError>
    where
        F: FnOnce(&SessionTxn<'_>) -> Result<T, SyncError>,
    {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let outcome = work(&SessionTxn { txn: &write_txn });
        match outcome {
            Ok(value) => {
                write_txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                write_txn.abort()?;
                Err(e)
            }
        }
    }

    /// Load a session record from a read snapshot
    pub fn load_session(&self, session_id: &SessionId) -> Result<Option<Session>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        let value = table.get(session_id.as_str())?;
        value.map(|v| decode_session(v.value())).transpose()
    }

    /// All session records for a task list, active or not
    pub fn list_sessions(&self, task_list_id: &TaskListId) -> Result<Vec<Session>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        let mut sessions = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let session = decode_session(value.value())?;
            if &session.task_list_id == task_list_id {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}
