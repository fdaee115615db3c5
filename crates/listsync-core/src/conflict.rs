//! Diagnostic classification of divergent merges
//!
//! A merge of two replicas always succeeds. This module only reports whether
//! both sides contributed edits the other had not seen, so concurrent editing
//! can be surfaced in logs. It never blocks or alters a merge.
//!
//! The check compares materialized orders by equality, so a merge that happens
//! to coincide with one side's order is reported as no conflict even when it
//! incorporated the other side's operations.

use crate::document::TaskListDoc;
use crate::error::SyncError;

/// Result of classifying two replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    /// True only if the merged order matches neither input's order
    pub conflict: bool,
    pub local_order: Vec<String>,
    pub remote_order: Vec<String>,
    pub merged_order: Vec<String>,
}

/// Merge scratch copies of `local` and `remote` and compare the orders
///
/// Both inputs are left as they were.
pub fn classify(
    local: &mut TaskListDoc,
    remote: &mut TaskListDoc,
) -> Result<ConflictReport, SyncError> {
    let local_order = local.order()?;
    let remote_order = remote.order()?;

    let mut merged = local.fork();
    let mut incoming = remote.fork();
    merged.merge(&mut incoming)?;
    let merged_order = merged.order()?;

    let conflict = merged_order != local_order && merged_order != remote_order;
    Ok(ConflictReport {
        conflict,
        local_order,
        remote_order,
        merged_order,
    })
}
