//! Alignment of the replicated order with relational task membership
//!
//! The relational record decides *which* tasks exist; the document decides
//! their *relative order*. Reconciliation drops ids that no longer exist (and
//! duplicates left behind by concurrent moves), then appends ids the document
//! has never seen, in relational order.

use std::collections::HashSet;

use tracing::debug;

use crate::document::TaskListDoc;
use crate::error::SyncError;
use crate::types::TaskListId;

/// Result of reconciling one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Reconciled order, to be written back to the relational record
    pub order: Vec<String>,
    /// Entries deleted from the document (stale, duplicate or malformed)
    pub removed: usize,
    /// Ids appended to the document
    pub appended: usize,
}

impl Reconciliation {
    /// Whether the document was edited
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.appended > 0
    }
}

/// Positions to delete and ids to append to turn `entries` into a
/// duplicate-free permutation of `current`
fn plan(entries: &[Option<String>], current: &[String]) -> (Vec<usize>, Vec<String>) {
    let valid: HashSet<&str> = current.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut removals = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        match entry.as_deref() {
            Some(id) if valid.contains(id) && seen.insert(id) => {}
            _ => removals.push(index),
        }
    }

    let mut appended = Vec::new();
    for id in current {
        if seen.insert(id.as_str()) {
            appended.push(id.clone());
        }
    }
    (removals, appended)
}

/// Reconciled order without touching any document
///
/// Keeps the first occurrence of each surviving id in `materialized` order,
/// then appends ids from `current` that were missing.
pub fn reconcile_order(materialized: &[String], current: &[String]) -> Vec<String> {
    let entries: Vec<Option<String>> = materialized.iter().cloned().map(Some).collect();
    let (removals, appended) = plan(&entries, current);
    let removals: HashSet<usize> = removals.into_iter().collect();
    materialized
        .iter()
        .enumerate()
        .filter(|(index, _)| !removals.contains(index))
        .map(|(_, id)| id.clone())
        .chain(appended)
        .collect()
}

/// Whether the document already matches `current` exactly
pub fn is_reconciled(doc: &TaskListDoc, current: &[String]) -> Result<bool, SyncError> {
    let (removals, appended) = plan(&doc.entries()?, current);
    Ok(removals.is_empty() && appended.is_empty())
}

/// Reconcile `doc` against `current`, writing the edits back as one change
pub fn reconcile(
    task_list_id: &TaskListId,
    doc: &mut TaskListDoc,
    current: &[String],
) -> Result<Reconciliation, SyncError> {
    let (removals, appended) = plan(&doc.entries()?, current);

    if !removals.is_empty() || !appended.is_empty() {
        doc.rewrite(&removals, &appended)?;
        debug!(
            %task_list_id,
            removed = removals.len(),
            appended = appended.len(),
            "Reconciled task order"
        );
    }

    Ok(Reconciliation {
        order: doc.order()?,
        removed: removals.len(),
        appended: appended.len(),
    })
}
