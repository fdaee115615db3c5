//! Document persistence and per-list exclusivity
//!
//! Every read-modify-write of a list's document (`load → merge/reconcile →
//! encode → persist`) runs while holding that list's [`ListGuard`]. Lists
//! never contend with each other. Plain reads go straight to the repository,
//! which serves consistent snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::TaskListDoc;
use crate::config::RetryPolicy;
use crate::error::SyncError;
use crate::types::TaskListId;

/// Lock entries are pruned once the table grows past this many lists
const LOCK_TABLE_PRUNE_THRESHOLD: usize = 256;

/// Durable storage boundary for document bytes
pub trait DocumentRepository: Send + Sync {
    fn load_document(&self, task_list_id: &TaskListId) -> Result<Option<Vec<u8>>, SyncError>;

    fn save_document(&self, task_list_id: &TaskListId, data: &[u8]) -> Result<(), SyncError>;
}

/// Exclusive access to one list's document
///
/// Held for the whole read-modify-write sequence; dropping it releases the list.
pub struct ListGuard {
    task_list_id: TaskListId,
    _guard: OwnedMutexGuard<()>,
}

impl ListGuard {
    pub fn task_list_id(&self) -> &TaskListId {
        &self.task_list_id
    }
}

/// Owns document bytes for every task list
pub struct DocumentStore {
    repository: Arc<dyn DocumentRepository>,
    locks: Mutex<HashMap<TaskListId, Arc<tokio::sync::Mutex<()>>>>,
    retry: RetryPolicy,
}

impl DocumentStore {
    pub fn new(repository: Arc<dyn DocumentRepository>, retry: RetryPolicy) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
            retry,
        }
    }

    /// Wait for exclusive access to a list
    pub async fn lock(&self, task_list_id: &TaskListId) -> ListGuard {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= LOCK_TABLE_PRUNE_THRESHOLD {
                // Holders and waiters keep a clone, so a count of one means idle
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(task_list_id.clone()).or_default().clone()
        };
        ListGuard {
            task_list_id: task_list_id.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of lists with a lock entry
    pub fn lock_table_len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Load the persisted document for a list, if any
    pub fn load(&self, task_list_id: &TaskListId) -> Result<Option<TaskListDoc>, SyncError> {
        self.repository
            .load_document(task_list_id)?
            .map(|bytes| TaskListDoc::load(&bytes))
            .transpose()
    }

    /// Load the list's document, creating it from `initial_order` if absent
    ///
    /// A created document is persisted before returning so that every replica
    /// bootstraps from the same lineage.
    pub async fn get_or_create(
        &self,
        guard: &ListGuard,
        initial_order: &[String],
    ) -> Result<TaskListDoc, SyncError> {
        if let Some(doc) = self.load(guard.task_list_id())? {
            return Ok(doc);
        }

        let mut doc = TaskListDoc::from_order(initial_order)?;
        self.persist(guard, &mut doc).await?;
        info!(
            task_list_id = %guard.task_list_id(),
            tasks = initial_order.len(),
            "Initialized document from task order"
        );
        Ok(doc)
    }

    /// Persist a document, retrying transient failures with bounded backoff
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DocumentPersist` once retries are exhausted or on a
    /// non-transient failure.
    pub async fn persist(&self, guard: &ListGuard, doc: &mut TaskListDoc) -> Result<(), SyncError> {
        let task_list_id = guard.task_list_id();
        let bytes = doc.save();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.repository.save_document(task_list_id, &bytes) {
                Ok(()) => {
                    debug!(%task_list_id, bytes = bytes.len(), attempt, "Document persisted");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        %task_list_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Document persist failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(%task_list_id, attempt, error = %e, "Document persist failed");
                    return Err(SyncError::DocumentPersist {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
