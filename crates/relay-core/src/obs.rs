//! Structured lifecycle events for a relay run.
//!
//! Every event carries an `event` field so the JSON log can be filtered by
//! kind. Failures are logged at `warn!`; everything else at `info!`.

use tracing::{info, warn};

use crate::domain::{MirrorRef, SyncStage};

/// Run-scoped span; attach it to the run future with
/// [`tracing::Instrument::instrument`].
///
/// ```ignore
/// run.execute().instrument(obs::run_span("3f1c...")).await
/// // every event inside is tagged run_id=3f1c...
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("relay.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, limit: usize, workflows: usize) {
    info!(event = "run.started", run_id = %run_id, limit, workflows);
}

/// Emit event: run finished with per-outcome counts.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, pushed: usize, failed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms,
        pushed,
        failed,
        success = failed == 0,
    );
}

pub fn emit_changes_listed(count: usize, existing: usize) {
    info!(event = "changes.listed", count, existing);
}

pub fn emit_change_skipped(mirror: &MirrorRef) {
    info!(event = "change.skipped", mirror = %mirror);
}

pub fn emit_change_deferred(mirror: &MirrorRef) {
    info!(event = "change.deferred", mirror = %mirror);
}

pub fn emit_change_pushed(mirror: &MirrorRef) {
    info!(event = "change.pushed", mirror = %mirror);
}

pub fn emit_change_failed(mirror: &MirrorRef, stage: SyncStage, error: &dyn std::fmt::Display) {
    warn!(event = "change.failed", mirror = %mirror, stage = %stage, error = %error);
}

pub fn emit_triggered(mirror: &MirrorRef, workflow: &str) {
    info!(event = "workflow.triggered", mirror = %mirror, workflow = %workflow);
}

pub fn emit_trigger_failed(mirror: &MirrorRef, workflow: &str, error: &dyn std::fmt::Display) {
    warn!(event = "workflow.trigger_failed", mirror = %mirror, workflow = %workflow, error = %error);
}

/// Emit event: watermark moved (or failed to persist).
pub fn emit_watermark(before: Option<i64>, after: Option<i64>, saved: bool) {
    info!(event = "watermark.updated", before = ?before, after = ?after, saved);
}

/// Retest phase could not run; the main batch is unaffected.
pub fn emit_retest_error(error: &dyn std::fmt::Display) {
    warn!(event = "retest.error", error = %error);
}
