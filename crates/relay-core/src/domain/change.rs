//! Gerrit changes and the batch selected for one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mirror_ref::MirrorRef;

/// An open Gerrit change at its current patchset.
///
/// Built from the change query; immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Gerrit's numeric change id (`_number`).
    pub change_number: u64,

    /// SHA of the current revision.
    pub revision_id: String,

    /// Ordinal of the current revision (`revisions[..]._number`).
    pub patchset: u32,

    /// Patchset ref to fetch from Gerrit, `refs/changes/<shard>/<n>/<ps>`.
    pub source_ref: String,

    pub project: String,

    /// Target branch of the change.
    pub branch: String,

    pub subject: String,

    /// Last update time reported by Gerrit.
    pub updated: DateTime<Utc>,
}

impl Change {
    /// Mirror branch for the current patchset.
    pub fn mirror_ref(&self) -> MirrorRef {
        MirrorRef::new(self.change_number, self.patchset)
    }
}

/// Changes selected for one run, ascending by change number.
///
/// `limit` bounds how many of them may be pushed, not how many are examined.
#[derive(Debug, Clone)]
pub struct DispatchBatch {
    changes: Vec<Change>,
    limit: usize,
}

impl DispatchBatch {
    /// Sort by change number and drop duplicate change numbers, keeping the
    /// highest patchset seen.
    pub fn new(mut changes: Vec<Change>, limit: usize) -> Self {
        changes.sort_by(|a, b| {
            a.change_number
                .cmp(&b.change_number)
                .then(b.patchset.cmp(&a.patchset))
        });
        changes.dedup_by_key(|c| c.change_number);
        Self { changes, limit }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn sample_change(change_number: u64, patchset: u32) -> Change {
    let mirror = MirrorRef::new(change_number, patchset);
    Change {
        change_number,
        revision_id: format!("{:040x}", change_number * 1000 + u64::from(patchset)),
        patchset,
        source_ref: mirror.source_ref(),
        project: "platform/kernel".to_string(),
        branch: "main".to_string(),
        subject: format!("change {change_number}"),
        updated: DateTime::<Utc>::from_timestamp(1_700_000_000 + change_number as i64, 0)
            .unwrap_or_default(),
    }
}
