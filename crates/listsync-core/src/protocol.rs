//! Update deltas and state vectors exchanged with replicas
//!
//! Both payloads are versioned postcard frames:
//!
//! - an **update** carries raw Automerge change chunks, every one of which is
//!   parsed before any is applied, so a malformed update never half-merges;
//! - a **state vector** carries the sorted heads of the sender's change graph.
//!
//! Clients treat both as opaque bytes.

use automerge::{Change, ChangeHash};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::TaskListDoc;
use crate::error::SyncError;

/// Current wire version of update frames
pub const UPDATE_FRAME_VERSION: u8 = 1;

/// Current wire version of state vector frames
pub const STATE_VECTOR_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct UpdateFrame {
    version: u8,
    changes: Vec<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct StateVectorFrame {
    version: u8,
    heads: Vec<[u8; 32]>,
}

/// Summary of the causal history a replica has incorporated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVector {
    heads: Vec<ChangeHash>,
}

impl StateVector {
    /// State vector of a document
    pub fn of(doc: &mut TaskListDoc) -> Self {
        Self { heads: doc.heads() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let frame = StateVectorFrame {
            version: STATE_VECTOR_VERSION,
            heads: self.heads.iter().map(|h| h.0).collect(),
        };
        // Serializing a Vec of byte arrays into a Vec cannot fail
        postcard::to_allocvec(&frame).unwrap_or_default()
    }

    /// Decode a state vector; an empty buffer means "nothing known yet"
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let frame: StateVectorFrame = postcard::from_bytes(bytes)
            .map_err(|e| SyncError::StateVectorDecode(e.to_string()))?;
        if frame.version != STATE_VECTOR_VERSION {
            return Err(SyncError::StateVectorDecode(format!(
                "unsupported state vector version {}",
                frame.version
            )));
        }
        let mut heads: Vec<ChangeHash> = frame.heads.into_iter().map(ChangeHash).collect();
        heads.sort();
        heads.dedup();
        Ok(Self { heads })
    }

    pub fn heads(&self) -> &[ChangeHash] {
        &self.heads
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }
}

/// Encoded state vector of a document
pub fn encode_state_vector(doc: &mut TaskListDoc) -> Vec<u8> {
    StateVector::of(doc).encode()
}

/// Outcome of merging one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Number of change chunks in the update
    pub changes: usize,
    /// Whether the document's heads moved
    pub advanced: bool,
}

/// Frame raw change chunks as an update
pub fn encode_update(changes: Vec<Vec<u8>>) -> Vec<u8> {
    let frame = UpdateFrame {
        version: UPDATE_FRAME_VERSION,
        changes,
    };
    postcard::to_allocvec(&frame).unwrap_or_default()
}

/// Strictly decode every change in an update
///
/// # Errors
///
/// Returns `SyncError::UpdateDecode` for an empty buffer, an unknown frame
/// version, or any change chunk that does not parse.
pub fn decode_update(bytes: &[u8]) -> Result<Vec<Change>, SyncError> {
    if bytes.is_empty() {
        return Err(SyncError::UpdateDecode("empty update".into()));
    }
    let frame: UpdateFrame =
        postcard::from_bytes(bytes).map_err(|e| SyncError::UpdateDecode(e.to_string()))?;
    if frame.version != UPDATE_FRAME_VERSION {
        return Err(SyncError::UpdateDecode(format!(
            "unsupported update version {}",
            frame.version
        )));
    }
    frame
        .changes
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            Change::from_bytes(raw)
                .map_err(|e| SyncError::UpdateDecode(format!("change {}: {}", i, e)))
        })
        .collect()
}

/// Apply a foreign update to `doc`
///
/// All-or-nothing: changes are applied to a scratch fork, which replaces
/// `doc` only when every change went in and the `order` list is still the
/// one the document started with.
///
/// # Errors
///
/// Returns `SyncError::UpdateDecode`, leaving `doc` untouched, when the
/// update does not parse, depends on changes `doc` has never seen, or comes
/// from a document that was not bootstrapped from this one.
pub fn merge(doc: &mut TaskListDoc, update: &[u8]) -> Result<MergeOutcome, SyncError> {
    let changes = decode_update(update)?;
    let count = changes.len();
    let hashes: Vec<ChangeHash> = changes.iter().map(|c| c.hash()).collect();
    let before = doc.heads();
    let lineage = doc.order_lineage()?;

    let mut scratch = doc.fork();
    scratch
        .apply_changes(changes)
        .map_err(|e| SyncError::UpdateDecode(e.to_string()))?;

    // Automerge queues changes whose dependencies are missing instead of failing
    let pending = hashes.iter().filter(|h| !scratch.knows(h)).count();
    if pending > 0 {
        debug!(changes = count, pending, "Rejected update with missing dependencies");
        return Err(SyncError::UpdateDecode(format!(
            "{} of {} changes depend on history this document does not have",
            pending, count
        )));
    }
    if scratch.order_lineage()? != lineage {
        debug!(changes = count, "Rejected update from a foreign document");
        return Err(SyncError::UpdateDecode(
            "update replaces the order list; replicas must load the server state".into(),
        ));
    }
    *doc = scratch;

    let advanced = doc.heads() != before;
    debug!(changes = count, advanced, "Merged update");
    Ok(MergeOutcome {
        changes: count,
        advanced,
    })
}

/// Minimal update covering what a replica at `since` has not seen
///
/// Returns `None` when the replica is already up to date. Heads the document
/// does not know are ignored, so a replica that is ahead simply receives
/// whatever it might still be missing.
pub fn diff(doc: &mut TaskListDoc, since: &[u8]) -> Result<Option<Vec<u8>>, SyncError> {
    let since = StateVector::decode(since)?;
    let known: Vec<ChangeHash> = since
        .heads()
        .iter()
        .filter(|h| doc.knows(h))
        .copied()
        .collect();

    if !known.is_empty() && known == doc.heads() {
        return Ok(None);
    }

    let changes = doc.changes_since(&known);
    if changes.is_empty() {
        return Ok(None);
    }
    Ok(Some(encode_update(changes)))
}

/// Update carrying everything `doc` has done since `heads`
///
/// Used by replicas to package their local edits for the server.
pub fn update_since(doc: &mut TaskListDoc, heads: &[ChangeHash]) -> Option<Vec<u8>> {
    let changes = doc.changes_since(heads);
    if changes.is_empty() {
        None
    } else {
        Some(encode_update(changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TaskListDoc {
        TaskListDoc::from_order(&["t1", "t2"]).unwrap()
    }

    #[test]
    fn test_state_vector_round_trip() {
        let mut doc = base();
        let encoded = encode_state_vector(&mut doc);
        let decoded = StateVector::decode(&encoded).unwrap();
        assert_eq!(decoded, StateVector::of(&mut doc));
        assert!(!decoded.is_empty());
    }

    #[test]
    fn test_empty_state_vector_means_nothing_known() {
        let decoded = StateVector::decode(&[]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_garbage_state_vector_rejected() {
        let result = StateVector::decode(&[9, 9, 9]);
        assert!(matches!(result, Err(SyncError::StateVectorDecode(_))));
    }

    #[test]
    fn test_diff_then_merge() {
        let mut server = base();
        let mut device = server.fork();
        let device_sv = encode_state_vector(&mut device);

        server.push("t3").unwrap();

        let update = diff(&mut server, &device_sv).unwrap().expect("server has news");
        merge(&mut device, &update).unwrap();
        assert_eq!(device.order().unwrap(), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_diff_up_to_date_is_none() {
        let mut server = base();
        let sv = encode_state_vector(&mut server);
        assert!(diff(&mut server, &sv).unwrap().is_none());
    }

    #[test]
    fn test_diff_from_nothing_is_full_history() {
        let mut server = base();
        let update = diff(&mut server, &[]).unwrap().unwrap();
        assert!(!decode_update(&update).unwrap().is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut server = base();
        let mut device = server.fork();
        let heads = device.heads();
        device.move_item(0, 1).unwrap();
        let update = update_since(&mut device, &heads).unwrap();

        merge(&mut server, &update).unwrap();
        let once = server.order().unwrap();
        let outcome = merge(&mut server, &update).unwrap();

        assert_eq!(server.order().unwrap(), once);
        assert!(!outcome.advanced);
    }

    #[test]
    fn test_malformed_update_leaves_doc_untouched() {
        let mut server = base();
        let heads = server.heads();

        for bad in [&b""[..], &b"\xff\xff\xff\xff"[..], &b"not an update"[..]] {
            let result = merge(&mut server, bad);
            assert!(matches!(result, Err(SyncError::UpdateDecode(_))));
        }
        assert_eq!(server.heads(), heads);
        assert_eq!(server.order().unwrap(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_update_with_missing_history_rejected() {
        let mut server = TaskListDoc::from_order(&["t1", "t2", "t3"]).unwrap();
        let mut device = TaskListDoc::load(&server.save()).unwrap();
        device.move_item(0, 2).unwrap();
        let after_first = device.heads();
        device.move_item(0, 1).unwrap();
        let heads = server.heads();

        // Only the second edit is sent; it builds on the first
        let update = update_since(&mut device, &after_first).unwrap();
        let result = merge(&mut server, &update);

        assert!(matches!(result, Err(SyncError::UpdateDecode(_))));
        assert_eq!(server.heads(), heads);
        assert_eq!(server.order().unwrap(), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_update_from_foreign_document_rejected() {
        let mut server = TaskListDoc::from_order(&["t1", "t2", "t3"]).unwrap();
        server.move_item(2, 0).unwrap();
        let heads = server.heads();

        // A replica that built its own document instead of loading the server's
        let mut stranger = TaskListDoc::from_order(&["t1", "t2", "t3"]).unwrap();
        let update = update_since(&mut stranger, &[]).unwrap();
        let result = merge(&mut server, &update);

        assert!(matches!(result, Err(SyncError::UpdateDecode(_))));
        assert_eq!(server.heads(), heads);
        assert_eq!(server.order().unwrap(), vec!["t3", "t1", "t2"]);
    }

    #[test]
    fn test_full_history_from_same_lineage_accepted() {
        let mut server = base();
        let mut device = TaskListDoc::load(&server.save()).unwrap();
        device.push("t3").unwrap();

        let update = update_since(&mut device, &[]).unwrap();
        let outcome = merge(&mut server, &update).unwrap();

        assert!(outcome.advanced);
        assert_eq!(server.order().unwrap(), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_frame_with_corrupt_change_rejected() {
        let update = encode_update(vec![b"garbage change".to_vec()]);
        assert!(matches!(
            decode_update(&update),
            Err(SyncError::UpdateDecode(_))
        ));
    }

    #[test]
    fn test_unknown_update_version_rejected() {
        let frame = UpdateFrame {
            version: 99,
            changes: Vec::new(),
        };
        let bytes = postcard::to_allocvec(&frame).unwrap();
        assert!(matches!(
            decode_update(&bytes),
            Err(SyncError::UpdateDecode(_))
        ));
    }
}
