//! Mirrors Gerrit patchsets onto the target repository.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{Change, ChangeOutcome, DispatchBatch, MirrorRef, SyncOutcome, SyncStage};
use crate::git::{local_fetch_ref, GitRemote};
use crate::obs;

/// Fetch-then-push for each change in a batch.
///
/// A change whose mirror branch already exists is skipped. Once the batch's
/// push limit is reached the remaining new changes are deferred. A failure
/// on one change is recorded and the batch continues.
#[derive(Clone)]
pub struct Synchronizer {
    git: Arc<dyn GitRemote>,
    gerrit_remote: String,
    target_remote: String,
}

impl Synchronizer {
    pub fn new(
        git: Arc<dyn GitRemote>,
        gerrit_remote: impl Into<String>,
        target_remote: impl Into<String>,
    ) -> Self {
        Self {
            git,
            gerrit_remote: gerrit_remote.into(),
            target_remote: target_remote.into(),
        }
    }

    /// Process `batch` in order. `existing` holds the mirror branch names
    /// already on the target and gains every branch pushed here.
    pub async fn synchronize(
        &self,
        batch: &DispatchBatch,
        existing: &mut BTreeSet<String>,
    ) -> Vec<ChangeOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut pushed = 0usize;

        for change in batch.changes() {
            let mirror = change.mirror_ref();
            let outcome = if existing.contains(&mirror.branch_name()) {
                obs::emit_change_skipped(&mirror);
                SyncOutcome::Skipped
            } else if pushed >= batch.limit() {
                obs::emit_change_deferred(&mirror);
                SyncOutcome::Deferred
            } else {
                let outcome = self.mirror_change(change, &mirror).await;
                if outcome.is_pushed() {
                    pushed += 1;
                    existing.insert(mirror.branch_name());
                }
                outcome
            };

            outcomes.push(ChangeOutcome {
                change: change.clone(),
                mirror_ref: mirror,
                outcome,
            });
        }
        outcomes
    }

    async fn mirror_change(&self, change: &Change, mirror: &MirrorRef) -> SyncOutcome {
        let local_ref = local_fetch_ref(mirror);

        let outcome = match self
            .git
            .fetch_ref(&self.gerrit_remote, &change.source_ref, &local_ref)
            .await
        {
            Err(e) => {
                obs::emit_change_failed(mirror, SyncStage::Fetch, &e);
                SyncOutcome::Failed {
                    stage: SyncStage::Fetch,
                    reason: e.to_string(),
                }
            }
            Ok(()) => match self
                .git
                .push_ref(&self.target_remote, &local_ref, mirror)
                .await
            {
                Ok(()) => {
                    obs::emit_change_pushed(mirror);
                    SyncOutcome::Pushed
                }
                Err(e) => {
                    obs::emit_change_failed(mirror, SyncStage::Push, &e);
                    SyncOutcome::Failed {
                        stage: SyncStage::Push,
                        reason: e.to_string(),
                    }
                }
            },
        };

        if let Err(e) = self.git.delete_local_ref(&local_ref).await {
            debug!(local_ref = %local_ref, error = %e, "could not remove fetched ref");
        }
        outcome
    }
}
