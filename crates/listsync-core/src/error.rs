//! Error types for the list synchronization core

use thiserror::Error;

/// Main error type for list synchronization operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// The user is unknown to the surrounding account system
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The task list does not exist or is not owned by the caller
    #[error("Task list not found: {0}")]
    TaskListNotFound(String),

    /// A request arrived without a device identifier
    #[error("Device ID is required")]
    DeviceIdRequired,

    /// No active, unexpired session matches the request
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Update bytes could not be decoded; the document was left untouched
    #[error("Update decode error: {0}")]
    UpdateDecode(String),

    /// State vector bytes could not be decoded
    #[error("State vector decode error: {0}")]
    StateVectorDecode(String),

    /// Persisted or transmitted full document state could not be decoded
    #[error("Document decode error: {0}")]
    DocumentDecode(String),

    /// Positional edit outside the bounds of the materialized order
    #[error("Index {index} out of bounds for order of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Document could not be persisted after all retry attempts
    #[error("Document persist failed after {attempts} attempt(s): {reason}")]
    DocumentPersist { attempts: u32, reason: String },

    /// Error raised by a storage backend
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Automerge document error
    #[error("Automerge error: {0}")]
    Automerge(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Stable error code reported to callers at the request boundary.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::UserNotFound(_) => "USER_NOT_FOUND",
            SyncError::TaskListNotFound(_) => "TASK_LIST_NOT_FOUND",
            SyncError::DeviceIdRequired => "DEVICE_ID_REQUIRED",
            SyncError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            SyncError::UpdateDecode(_) => "UPDATE_DECODE_ERROR",
            SyncError::StateVectorDecode(_) => "STATE_VECTOR_DECODE_ERROR",
            SyncError::DocumentDecode(_) => "DOCUMENT_DECODE_ERROR",
            SyncError::IndexOutOfBounds { .. } => "INDEX_OUT_OF_BOUNDS",
            SyncError::DocumentPersist { .. } => "DOCUMENT_PERSIST_ERROR",
            SyncError::Storage(_)
            | SyncError::Database(_)
            | SyncError::Transaction(_)
            | SyncError::Table(_)
            | SyncError::StorageOp(_)
            | SyncError::Commit(_) => "STORAGE_ERROR",
            SyncError::Serialization(_) => "SERIALIZATION_ERROR",
            SyncError::Automerge(_) => "AUTOMERGE_ERROR",
            SyncError::Config(_) => "CONFIG_ERROR",
            SyncError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error is a client-side problem (bad input, missing entity)
    /// rather than a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::UserNotFound(_)
                | SyncError::TaskListNotFound(_)
                | SyncError::DeviceIdRequired
                | SyncError::SessionNotFound(_)
                | SyncError::UpdateDecode(_)
                | SyncError::StateVectorDecode(_)
                | SyncError::IndexOutOfBounds { .. }
        )
    }

    /// Transient storage faults that a bounded retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_)
                | SyncError::Transaction(_)
                | SyncError::StorageOp(_)
                | SyncError::Commit(_)
                | SyncError::Io(_)
        )
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
