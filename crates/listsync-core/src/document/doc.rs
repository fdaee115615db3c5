//! Automerge document wrapper for a task list's ordering
//!
//! TaskListDoc wraps an Automerge document holding a single list of task-id
//! strings at the root key `order`. It handles serialization, merging and
//! the change bookkeeping used by the update protocol.

use automerge::{
    transaction::Transactable, AutoCommit, Change, ChangeHash, ObjId, ObjType, ReadDoc, Value,
    ROOT,
};

use crate::error::SyncError;

/// Root key of the ordered task-id list
const ORDER_KEY: &str = "order";

fn automerge_err(e: automerge::AutomergeError) -> SyncError {
    SyncError::Automerge(e.to_string())
}

/// Replicated ordering of one task list
///
/// Replicas must share the same `order` list object, so a client bootstraps
/// with [`TaskListDoc::load`] on the full state issued by the server rather
/// than building its own document.
///
/// # Example
///
/// ```
/// use listsync_core::document::TaskListDoc;
///
/// let mut server = TaskListDoc::from_order(&["t1", "t2"]).unwrap();
/// let mut device = TaskListDoc::load(&server.save()).unwrap();
///
/// device.move_item(1, 0).unwrap();
/// server.merge(&mut device).unwrap();
///
/// assert_eq!(server.order().unwrap(), vec!["t2", "t1"]);
/// ```
pub struct TaskListDoc {
    doc: AutoCommit,
}

impl TaskListDoc {
    /// Create a fresh document whose order is exactly `task_ids`
    pub fn from_order<S: AsRef<str>>(task_ids: &[S]) -> Result<Self, SyncError> {
        let mut doc = AutoCommit::new();
        let list = doc
            .put_object(ROOT, ORDER_KEY, ObjType::List)
            .map_err(automerge_err)?;
        for (index, id) in task_ids.iter().enumerate() {
            doc.insert(&list, index, id.as_ref()).map_err(automerge_err)?;
        }
        doc.commit();
        Ok(Self { doc })
    }

    /// Decode a document from its full encoded state
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DocumentDecode` if the bytes are not an Automerge
    /// document or carry no `order` list.
    pub fn load(data: &[u8]) -> Result<Self, SyncError> {
        let doc = AutoCommit::load(data).map_err(|e| SyncError::DocumentDecode(e.to_string()))?;
        let loaded = Self { doc };
        loaded
            .order_obj()
            .map_err(|e| SyncError::DocumentDecode(e.to_string()))?;
        Ok(loaded)
    }

    /// Encode the full document state
    pub fn save(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Fork the document for independent editing
    ///
    /// The fork gets its own actor id and can later be merged back.
    pub fn fork(&mut self) -> Self {
        Self {
            doc: self.doc.fork(),
        }
    }

    /// Fork the document as it was at `heads`
    pub fn fork_at(&mut self, heads: &[ChangeHash]) -> Result<Self, SyncError> {
        let doc = self.doc.fork_at(heads).map_err(automerge_err)?;
        Ok(Self { doc })
    }

    /// Merge another replica into this one
    ///
    /// Commutative and idempotent: the materialized order does not depend on
    /// merge order or on how often a replica is merged.
    pub fn merge(&mut self, other: &mut TaskListDoc) -> Result<(), SyncError> {
        self.doc.merge(&mut other.doc).map_err(automerge_err)?;
        Ok(())
    }

    /// Current heads of the change graph, sorted
    pub fn heads(&mut self) -> Vec<ChangeHash> {
        let mut heads = self.doc.get_heads();
        heads.sort();
        heads
    }

    /// The materialized order
    ///
    /// Entries that are not strings are skipped; reconciliation removes them.
    pub fn order(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.entries()?.into_iter().flatten().collect())
    }

    /// Number of entries in the order list
    pub fn len(&self) -> usize {
        self.order_obj()
            .map(|list| self.doc.length(&list))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a task id at `index`
    pub fn insert(&mut self, index: usize, task_id: &str) -> Result<(), SyncError> {
        let list = self.order_obj()?;
        let len = self.doc.length(&list);
        if index > len {
            return Err(SyncError::IndexOutOfBounds { index, len });
        }
        self.doc.insert(&list, index, task_id).map_err(automerge_err)?;
        self.doc.commit();
        Ok(())
    }

    /// Append a task id at the end
    pub fn push(&mut self, task_id: &str) -> Result<(), SyncError> {
        let len = self.len();
        self.insert(len, task_id)
    }

    /// Remove the entry at `index`, returning it if it was a string
    pub fn remove(&mut self, index: usize) -> Result<Option<String>, SyncError> {
        let list = self.order_obj()?;
        let len = self.doc.length(&list);
        if index >= len {
            return Err(SyncError::IndexOutOfBounds { index, len });
        }
        let removed = self.entry_at(&list, index)?;
        self.doc.delete(&list, index).map_err(automerge_err)?;
        self.doc.commit();
        Ok(removed)
    }

    /// Move the entry at `from` so that it ends up at position `to`
    ///
    /// Sequence CRDTs have no native move: this is a delete plus an insert in
    /// one change. Concurrent moves of the same item can leave a duplicate,
    /// which reconciliation drops.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), SyncError> {
        let list = self.order_obj()?;
        let len = self.doc.length(&list);
        if from >= len {
            return Err(SyncError::IndexOutOfBounds { index: from, len });
        }
        if to >= len {
            return Err(SyncError::IndexOutOfBounds { index: to, len });
        }
        if from == to {
            return Ok(());
        }
        let task_id = self
            .entry_at(&list, from)?
            .ok_or_else(|| SyncError::Automerge(format!("entry {} is not a task id", from)))?;
        self.doc.delete(&list, from).map_err(automerge_err)?;
        self.doc
            .insert(&list, to, task_id.as_str())
            .map_err(automerge_err)?;
        self.doc.commit();
        Ok(())
    }

    /// Raw entries of the order list; `None` marks a non-string value
    pub(crate) fn entries(&self) -> Result<Vec<Option<String>>, SyncError> {
        let list = self.order_obj()?;
        let len = self.doc.length(&list);
        (0..len).map(|index| self.entry_at(&list, index)).collect()
    }

    /// Delete the entries at `indexes` and append `appended`, as one change
    pub(crate) fn rewrite(&mut self, indexes: &[usize], appended: &[String]) -> Result<(), SyncError> {
        let list = self.order_obj()?;
        let mut indexes = indexes.to_vec();
        indexes.sort_unstable();
        indexes.dedup();
        // Highest index first so earlier positions stay valid
        for index in indexes.into_iter().rev() {
            self.doc.delete(&list, index).map_err(automerge_err)?;
        }
        for task_id in appended {
            let len = self.doc.length(&list);
            self.doc
                .insert(&list, len, task_id.as_str())
                .map_err(automerge_err)?;
        }
        self.doc.commit();
        Ok(())
    }

    /// Raw bytes of every change not covered by `heads`
    pub(crate) fn changes_since(&mut self, heads: &[ChangeHash]) -> Vec<Vec<u8>> {
        self.doc
            .get_changes(heads)
            .into_iter()
            .map(|change| change.raw_bytes().to_vec())
            .collect()
    }

    /// Whether the change graph contains `hash`
    pub(crate) fn knows(&mut self, hash: &ChangeHash) -> bool {
        self.doc.get_change_by_hash(hash).is_some()
    }

    pub(crate) fn apply_changes(&mut self, changes: Vec<Change>) -> Result<(), SyncError> {
        self.doc.apply_changes(changes).map_err(automerge_err)
    }

    /// Every object ever put at `ROOT/order`, winner first
    ///
    /// Replicas that share a lineage see exactly one.
    pub(crate) fn order_lineage(&self) -> Result<Vec<ObjId>, SyncError> {
        Ok(self
            .doc
            .get_all(ROOT, ORDER_KEY)
            .map_err(automerge_err)?
            .into_iter()
            .map(|(_, id)| id)
            .collect())
    }

    fn order_obj(&self) -> Result<ObjId, SyncError> {
        match self.doc.get(ROOT, ORDER_KEY).map_err(automerge_err)? {
            Some((Value::Object(ObjType::List), id)) => Ok(id),
            Some(_) => Err(SyncError::Automerge("order is not a list".into())),
            None => Err(SyncError::Automerge("order list not found".into())),
        }
    }

    fn entry_at(&self, list: &ObjId, index: usize) -> Result<Option<String>, SyncError> {
        Ok(self
            .doc
            .get(list, index)
            .map_err(automerge_err)?
            .and_then(|(value, _)| value.to_str().map(str::to_string)))
    }
}

impl std::fmt::Debug for TaskListDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskListDoc")
            .field("order", &self.order().unwrap_or_default())
            .finish()
    }
}
