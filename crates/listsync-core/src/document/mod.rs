//! Replicated task-order documents
//!
//! - [`TaskListDoc`]: the Automerge document behind one list's ordering
//! - [`DocumentStore`]: persistence, initialization and per-list locking

pub mod doc;
pub mod store;

pub use doc::TaskListDoc;
pub use store::{DocumentRepository, DocumentStore, ListGuard};
