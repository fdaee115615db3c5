//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Documents (Automerge blobs, one per task list)
//! - Sessions and the active-session index
//! - A local stand-in for the relational task list record

use crate::document::DocumentRepository;
use crate::error::SyncError;
use crate::types::TaskListId;
use parking_lot::RwLock;
use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;

mod sessions;
mod task_lists;

use sessions::{ACTIVE_SESSIONS_TABLE, SESSIONS_TABLE};
use task_lists::TASK_LISTS_TABLE;

pub use sessions::SessionTxn;
pub use task_lists::TaskListRecord;

// Table definitions
const DOCUMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
            let _ = write_txn.open_table(ACTIVE_SESSIONS_TABLE)?;
            let _ = write_txn.open_table(TASK_LISTS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Document Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a document (Automerge blob) for a task list.
    pub fn save_document(&self, task_list_id: &TaskListId, data: &[u8]) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
            table.insert(task_list_id.as_str(), data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the document for a task list.
    ///
    /// Returns `None` if no document exists yet.
    pub fn load_document(&self, task_list_id: &TaskListId) -> Result<Option<Vec<u8>>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;

        Ok(table
            .get(task_list_id.as_str())?
            .map(|v| v.value().to_vec()))
    }
}

impl DocumentRepository for Storage {
    fn load_document(&self, task_list_id: &TaskListId) -> Result<Option<Vec<u8>>, SyncError> {
        Storage::load_document(self, task_list_id)
    }

    fn save_document(&self, task_list_id: &TaskListId, data: &[u8]) -> Result<(), SyncError> {
        Storage::save_document(self, task_list_id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_save_and_load_document() {
        let (storage, _temp) = create_test_storage();
        let list = TaskListId::from("groceries");

        storage.save_document(&list, b"doc bytes").unwrap();

        let loaded = storage.load_document(&list).unwrap();
        assert_eq!(loaded.as_deref(), Some(&b"doc bytes"[..]));
    }

    #[test]
    fn test_load_nonexistent_document() {
        let (storage, _temp) = create_test_storage();
        let loaded = storage.load_document(&"missing".into()).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_document_overwrite() {
        let (storage, _temp) = create_test_storage();
        let list = TaskListId::from("groceries");

        storage.save_document(&list, b"v1").unwrap();
        storage.save_document(&list, b"v2").unwrap();
        assert_eq!(storage.load_document(&list).unwrap().unwrap(), b"v2");
    }

    #[test]
    fn test_document_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let list = TaskListId::from("groceries");

        {
            let storage = Storage::new(&db_path).unwrap();
            storage.save_document(&list, b"durable").unwrap();
        }

        let storage = Storage::new(&db_path).unwrap();
        assert_eq!(storage.load_document(&list).unwrap().unwrap(), b"durable");
    }
}
