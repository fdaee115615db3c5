//! listsync Core Library
//!
//! Collaborative ordering for shared task lists with Automerge CRDTs.
//!
//! ## Overview
//!
//! Several devices edit the order of one task list at the same time and
//! converge without losing edits. The core combines:
//!
//! - **Replicated merge**: each list's order is an Automerge document; devices
//!   exchange opaque update deltas and state vectors
//! - **Sessions**: per-device sessions with activity-based lazy expiry
//! - **Reconciliation**: the document decides relative order, while the
//!   surrounding task system decides which tasks exist
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use listsync_core::{InMemoryDirectory, SessionManager, SessionType, Storage, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(InMemoryDirectory::new());
//!     directory.create_list("groceries", "alice", ["t1", "t2"]);
//!
//!     let storage = Storage::new("~/.listsync/data/listsync.redb")?;
//!     let manager = SessionManager::new(storage, directory, SyncConfig::default())?;
//!
//!     let list = "groceries".into();
//!     let user = "alice".into();
//!     let device = "phone".into();
//!     let start = manager
//!         .start_session(&list, &user, &device, SessionType::Active)
//!         .await?;
//!
//!     // The device builds its replica from the full state
//!     let replica = listsync_core::TaskListDoc::load(&start.document_state)?;
//!     println!("{:?}", replica.order()?);
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod conflict;
pub mod directory;
pub mod document;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod storage;
pub mod types;
pub mod wire;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryPolicy, SyncConfig};
pub use conflict::ConflictReport;
pub use directory::{InMemoryDirectory, TaskDirectory};
pub use document::{DocumentRepository, DocumentStore, TaskListDoc};
pub use error::{SyncError, SyncResult};
pub use protocol::StateVector;
pub use reconcile::Reconciliation;
pub use session::{DocumentSnapshot, SessionManager, SessionStart, UpdateAck};
pub use storage::{Storage, TaskListRecord};
pub use types::*;
