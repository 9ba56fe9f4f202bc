//! CI workflow dispatch for newly mirrored branches.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::Result;
use crate::domain::{MirrorRef, TriggerOutcome, TriggerRecord};
use crate::obs;

/// CI platform that can start a named workflow.
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    /// Start `workflow` on `dispatch_ref`, passing `mirror` as the branch input.
    async fn trigger(&self, workflow: &str, dispatch_ref: &str, mirror: &MirrorRef) -> Result<()>;
}

/// Triggers every configured workflow for a branch and records the outcome.
///
/// Failures are recorded, not retried.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn WorkflowDispatcher>,
    workflows: Vec<String>,
    dispatch_ref: String,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn WorkflowDispatcher>,
        workflows: Vec<String>,
        dispatch_ref: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            workflows,
            dispatch_ref: dispatch_ref.into(),
        }
    }

    pub fn workflows(&self) -> &[String] {
        &self.workflows
    }

    /// One record per configured workflow, in configuration order.
    pub async fn dispatch(&self, mirror: &MirrorRef) -> Vec<TriggerRecord> {
        let mut records = Vec::with_capacity(self.workflows.len());
        for workflow in &self.workflows {
            let outcome = match self
                .backend
                .trigger(workflow, &self.dispatch_ref, mirror)
                .await
            {
                Ok(()) => {
                    obs::emit_triggered(mirror, workflow);
                    TriggerOutcome::Triggered
                }
                Err(e) => {
                    obs::emit_trigger_failed(mirror, workflow, &e);
                    TriggerOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            records.push(TriggerRecord {
                mirror_ref: *mirror,
                workflow: workflow.clone(),
                outcome,
            });
        }
        records
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workflows", &self.workflows)
            .field("dispatch_ref", &self.dispatch_ref)
            .finish_non_exhaustive()
    }
}
