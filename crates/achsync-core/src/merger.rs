//! Monotonic merge of completion state with provenance tracking
//!
//! Only `true` leaves travel from the source into the destination, so a merge
//! behaves like a boolean OR over every path: order of application does not
//! matter and applying the same source twice changes nothing the second time.

use crate::tree::{SetOutcome, StatePath, StateTree};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

/// How a leaf changed during a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeAction {
    /// The path was absent in the destination
    Created,
    /// The path held a non-`true` value in the destination
    Updated,
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeAction::Created => write!(f, "Created"),
            MergeAction::Updated => write!(f, "Updated"),
        }
    }
}

/// One leaf changed by a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Path of the leaf that became `true`
    pub path: StatePath,
    /// Whether it was created or overwritten
    pub action: MergeAction,
}

impl MergeRecord {
    /// Turn a write outcome into a record, if the write changed anything
    pub fn from_outcome(path: StatePath, outcome: SetOutcome) -> Option<Self> {
        let action = match outcome {
            SetOutcome::Created => MergeAction::Created,
            SetOutcome::Updated => MergeAction::Updated,
            SetOutcome::AlreadyTrue | SetOutcome::Blocked => return None,
        };
        Some(Self { path, action })
    }
}

impl fmt::Display for MergeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} = true", self.action, self.path)
    }
}

/// Result of merging one document into another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Leaves that changed, in source traversal order
    pub records: Vec<MergeRecord>,
    /// `true` leaves that could not be written without replacing a node
    pub blocked: Vec<StatePath>,
}

impl MergeOutcome {
    /// Number of leaves that changed
    pub fn changed(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.blocked.is_empty()
    }
}

/// Merge every `true` leaf of `source` into `destination`.
///
/// Leaves holding `false` or any non-boolean value in the source are ignored.
/// The destination is mutated in place; the returned outcome lists each leaf
/// that changed.
pub fn merge_state(destination: &mut StateTree, source: &StateTree) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (path, value) in source.leaves() {
        if !matches!(value, Value::Bool(true)) {
            continue;
        }

        match destination.set_true(path.segments()) {
            SetOutcome::Blocked => {
                warn!("Skipped {} = true: destination holds a conflicting node", path);
                outcome.blocked.push(path);
            }
            result => {
                if let Some(record) = MergeRecord::from_outcome(path, result) {
                    info!("{}", record);
                    outcome.records.push(record);
                }
            }
        }
    }

    if outcome.records.is_empty() {
        info!("[Merged] No updates were made.");
    } else {
        info!("[Merged] Total updated entries: {}", outcome.records.len());
    }

    outcome
}
