//! Boundary to the surrounding task CRUD system
//!
//! The relational side owns which tasks exist in a list and who owns the list.
//! The synchronization core only reads membership, checks ownership, and writes
//! back the reconciled order through [`TaskDirectory`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::SyncError;
use crate::types::{TaskListId, UserId};

/// Narrow interface onto the relational task list record
pub trait TaskDirectory: Send + Sync {
    /// Check that `task_list_id` exists and belongs to `user_id`.
    ///
    /// Fails with `SyncError::UserNotFound` or `SyncError::TaskListNotFound`.
    fn resolve_ownership(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Task ids currently valid for the list, in relational order
    fn current_task_ids(
        &self,
        task_list_id: &TaskListId,
    ) -> impl Future<Output = Result<Vec<String>, SyncError>> + Send;

    /// Persist the reconciled order into the relational record
    fn write_task_order(
        &self,
        task_list_id: &TaskListId,
        ordered_ids: &[String],
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

#[derive(Debug, Clone)]
struct ListRecord {
    owner: UserId,
    task_ids: Vec<String>,
}

/// In-process directory for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashSet<UserId>>,
    lists: RwLock<HashMap<TaskListId, ListRecord>>,
    order_writes: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: impl Into<UserId>) {
        self.users.write().insert(user_id.into());
    }

    /// Create (or replace) a list owned by `owner`; the owner is registered as a user.
    pub fn create_list<I, S>(
        &self,
        task_list_id: impl Into<TaskListId>,
        owner: impl Into<UserId>,
        task_ids: I,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let owner = owner.into();
        self.add_user(owner.clone());
        self.lists.write().insert(
            task_list_id.into(),
            ListRecord {
                owner,
                task_ids: task_ids.into_iter().map(Into::into).collect(),
            },
        );
    }

    /// Replace the membership of a list, as a CRUD create/delete would
    pub fn set_task_ids<I, S>(&self, task_list_id: &TaskListId, task_ids: I) -> Result<(), SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lists = self.lists.write();
        let record = lists
            .get_mut(task_list_id)
            .ok_or_else(|| SyncError::TaskListNotFound(task_list_id.to_string()))?;
        record.task_ids = task_ids.into_iter().map(Into::into).collect();
        Ok(())
    }

    /// Current relational order, if the list exists
    pub fn task_order(&self, task_list_id: &TaskListId) -> Option<Vec<String>> {
        self.lists
            .read()
            .get(task_list_id)
            .map(|r| r.task_ids.clone())
    }

    /// Number of times the reconciled order was written back
    pub fn order_writes(&self) -> usize {
        self.order_writes.load(Ordering::SeqCst)
    }
}

impl TaskDirectory for InMemoryDirectory {
    async fn resolve_ownership(
        &self,
        task_list_id: &TaskListId,
        user_id: &UserId,
    ) -> Result<(), SyncError> {
        if !self.users.read().contains(user_id) {
            return Err(SyncError::UserNotFound(user_id.to_string()));
        }
        match self.lists.read().get(task_list_id) {
            Some(record) if &record.owner == user_id => Ok(()),
            // Lists owned by someone else are indistinguishable from missing ones
            _ => Err(SyncError::TaskListNotFound(task_list_id.to_string())),
        }
    }

    async fn current_task_ids(&self, task_list_id: &TaskListId) -> Result<Vec<String>, SyncError> {
        self.task_order(task_list_id)
            .ok_or_else(|| SyncError::TaskListNotFound(task_list_id.to_string()))
    }

    async fn write_task_order(
        &self,
        task_list_id: &TaskListId,
        ordered_ids: &[String],
    ) -> Result<(), SyncError> {
        self.set_task_ids(task_list_id, ordered_ids.iter().cloned())?;
        self.order_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
