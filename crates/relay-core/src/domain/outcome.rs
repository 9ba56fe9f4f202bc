//! Per-change and per-trigger results of a run.

use serde::{Deserialize, Serialize};

use super::change::Change;
use super::mirror_ref::MirrorRef;

/// Which git step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Fetch,
    Push,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStage::Fetch => f.write_str("fetch"),
            SyncStage::Push => f.write_str("push"),
        }
    }
}

/// What the synchronizer did with one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Fetched from Gerrit and pushed to the mirror in this run.
    Pushed,
    /// Already mirrored.
    Skipped,
    /// Not attempted; the push limit was reached. Eligible next run.
    Deferred,
    Failed { stage: SyncStage, reason: String },
}

impl SyncOutcome {
    pub fn is_pushed(&self) -> bool {
        matches!(self, SyncOutcome::Pushed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Synchronizer result for one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOutcome {
    pub change: Change,
    pub mirror_ref: MirrorRef,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Result of one workflow-dispatch call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Triggered,
    Failed { reason: String },
}

impl TriggerOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TriggerOutcome::Failed { .. })
    }
}

/// One workflow dispatched (or not) for one mirror branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub mirror_ref: MirrorRef,
    pub workflow: String,
    #[serde(flatten)]
    pub outcome: TriggerOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change::sample_change;

    #[test]
    fn test_sync_outcome_predicates() {
        assert!(SyncOutcome::Pushed.is_pushed());
        assert!(!SyncOutcome::Skipped.is_pushed());
        assert!(SyncOutcome::Failed {
            stage: SyncStage::Fetch,
            reason: "timeout".to_string()
        }
        .is_failed());
        assert!(!SyncOutcome::Deferred.is_failed());
    }

    #[test]
    fn test_change_outcome_json_shape() {
        let change = sample_change(1234, 2);
        let outcome = ChangeOutcome {
            mirror_ref: change.mirror_ref(),
            change,
            outcome: SyncOutcome::Failed {
                stage: SyncStage::Push,
                reason: "rejected".to_string(),
            },
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["outcome"], "failed");
        assert_eq!(v["stage"], "push");
        assert_eq!(v["mirror_ref"], "changes/34/1234/2");
        assert_eq!(v["change"]["change_number"], 1234);
    }

    #[test]
    fn test_trigger_record_json_shape() {
        let record = TriggerRecord {
            mirror_ref: MirrorRef::new(5, 1),
            workflow: "ci.yml".to_string(),
            outcome: TriggerOutcome::Triggered,
        };
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["outcome"], "triggered");
        assert_eq!(v["workflow"], "ci.yml");
    }
}
