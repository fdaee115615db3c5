//! Task List Storage - local stand-in for the relational task list record
//!
//! Deployments normally implement [`TaskDirectory`] over their own CRUD
//! database. This table lets a single redb file play that role for the CLI
//! and for tests.

use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::Storage;
use crate::directory::TaskDirectory;
use crate::error::SyncError;
use crate::types::{TaskListId, UserId};

/// Table for task list records (key: task list id, value: JSON TaskListRecord)
pub(crate) const TASK_LISTS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("task_lists");

/// Owner and ordered membership of one task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListRecord {
    pub owner: UserId,
    pub task_ids: Vec<String>,
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Task List Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a task list record, overwriting any previous one
    pub fn save_task_list(
        &self,
        task_list_id: &TaskListId,
        record: &TaskListRecord,
    ) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(TASK_LISTS_TABLE)?;
            let data =
                serde_json::to_vec(record).map_err(|e| SyncError::Serialization(e.to_string()))?;
            table.insert(task_list_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a task list record
    ///
    /// Returns `None` if the list does not exist.
    pub fn load_task_list(
        &self,
        task_list_id: &TaskListId,
    ) -> Result<Option<TaskListRecord>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TASK_LISTS_TABLE)?;

        match table.get(task_list_id.as_str())? {
            Some(v) => {
                let record: TaskListRecord = serde_json::from_slice(v.value())
                    .map_err(|e| SyncError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Replace the membership of an existing list
    pub fn set_task_ids(
        &self,
        task_list_id: &TaskListId,
        task_ids: Vec<String>,
    ) -> Result<(), SyncError> {
        let mut record = self
            .load_task_list(task_list_id)?
            .ok_or_else(|| SyncError::TaskListNotFound(task_list_id.to_string()))?;
        record.task_ids = task_ids;
        self.save_task_list(task_list_id, &record)
    }

    /// Whether any list is owned by `user_id`
    fn owns_any_list(&self, user_id: &UserId) -> Result<bool, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TASK_LISTS_TABLE)?;

        for entry in table.iter()? {
            let (_, value) = entry?;
            let record: TaskListRecord = serde_json::from_slice(value.value())
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            if &record.owner == user_id {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl TaskDirectory for Storage {
    async fn resolve_ownership(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
    ) -> Result<(), SyncError> {
        match self.load_task_list(task_list_id)? {
            Some(record) if &record.owner == user_id => Ok(()),
            // Without an account table, a user is known once they own a list
            _ if !self.owns_any_list(user_id)? => Err(SyncError::UserNotFound(user_id.to_string())),
            _ => Err(SyncError::TaskListNotFound(task_list_id.to_string())),
        }
    }

    async fn current_task_ids(&self, task_list_id: &TaskListId) -> Result<Vec<String>, SyncError> {
        self.load_task_list(task_list_id)?
            .map(|record| record.task_ids)
            .ok_or_else(|| SyncError::TaskListNotFound(task_list_id.to_string()))
    }

    async fn write_task_order(
        &self,
        task_list_id: &TaskListId,
        ordered_ids: &[String],
    ) -> Result<(), SyncError> {
        self.set_task_ids(task_list_id, ordered_ids.to_vec())
    }
}
