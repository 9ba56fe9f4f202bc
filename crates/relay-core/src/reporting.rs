use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChangeOutcome, MirrorRef, SyncOutcome, TriggerRecord};

/// Per-outcome tallies for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub listed: usize,
    pub pushed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub failed: usize,
    pub triggered: usize,
    pub trigger_failed: usize,
}

impl RunCounts {
    pub fn tally(changes: &[ChangeOutcome], triggers: &[TriggerRecord]) -> Self {
        let mut counts = RunCounts {
            listed: changes.len(),
            ..RunCounts::default()
        };
        for c in changes {
            match c.outcome {
                SyncOutcome::Pushed => counts.pushed += 1,
                SyncOutcome::Skipped => counts.skipped += 1,
                SyncOutcome::Deferred => counts.deferred += 1,
                SyncOutcome::Failed { .. } => counts.failed += 1,
            }
        }
        for t in triggers {
            if t.outcome.is_failed() {
                counts.trigger_failed += 1;
            } else {
                counts.triggered += 1;
            }
        }
        counts
    }
}

/// Run summary artifact written for CI (`--summary`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Unix seconds.
    pub watermark_before: Option<i64>,
    pub watermark_after: Option<i64>,
    pub watermark_saved: bool,
    pub changes: Vec<ChangeOutcome>,
    /// Workflow triggers for branches pushed in this run.
    pub triggers: Vec<TriggerRecord>,
    /// Workflow triggers for retest requests.
    pub retests: Vec<TriggerRecord>,
    /// Pushed branches with at least one failed trigger.
    pub untriggered: Vec<MirrorRef>,
    pub counts: RunCounts,
}

impl RunSummary {
    /// Any failed fetch, push or trigger.
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
            || self.counts.trigger_failed > 0
            || self.retests.iter().any(|r| r.outcome.is_failed())
    }
}

/// Write the run summary in pretty JSON format.
pub fn write_run_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    let content = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render markdown summary for the CI job page.
pub fn render_run_summary_md(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("# Gerrit Relay\n\n");
    out.push_str(&format!(
        "- listed: {}\n- pushed: {}\n- skipped: {}\n- deferred: {}\n- failed: {}\n- triggered: {}\n- trigger failures: {}\n\n",
        summary.counts.listed,
        summary.counts.pushed,
        summary.counts.skipped,
        summary.counts.deferred,
        summary.counts.failed,
        summary.counts.triggered,
        summary.counts.trigger_failed
    ));

    let pushed: Vec<_> = summary
        .changes
        .iter()
        .filter(|c| c.outcome.is_pushed())
        .collect();
    if !pushed.is_empty() {
        out.push_str("## Pushed\n");
        for c in pushed {
            out.push_str(&format!("- `{}` {}\n", c.mirror_ref, c.change.subject));
        }
        out.push('\n');
    }

    let failed: Vec<_> = summary
        .changes
        .iter()
        .filter_map(|c| match &c.outcome {
            SyncOutcome::Failed { stage, reason } => Some((c, stage, reason)),
            _ => None,
        })
        .collect();
    if !failed.is_empty() {
        out.push_str("## Failed\n");
        for (c, stage, reason) in failed {
            out.push_str(&format!("- `{}` {}: {}\n", c.mirror_ref, stage, reason));
        }
        out.push('\n');
    }

    if !summary.untriggered.is_empty() {
        out.push_str("## Pushed but not triggered\n");
        for m in &summary.untriggered {
            out.push_str(&format!("- `{}`\n", m));
        }
        out.push('\n');
    }

    if !summary.retests.is_empty() {
        out.push_str("## Retests\n");
        for r in &summary.retests {
            let status = if r.outcome.is_failed() { "failed" } else { "triggered" };
            out.push_str(&format!("- `{}` {} {}\n", r.mirror_ref, r.workflow, status));
        }
        out.push('\n');
    }

    let watermark = match summary.watermark_after {
        Some(w) if summary.watermark_saved => format!("{w} (saved)"),
        Some(w) => format!("{w}"),
        None => "unset".to_string(),
    };
    out.push_str(&format!("Watermark: {}\n", watermark));
    out
}
