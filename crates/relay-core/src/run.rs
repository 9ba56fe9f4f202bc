//! One dispatch run, end to end.
//!
//! Order of work:
//! 1. validate configuration and check both git remotes (no I/O on failure)
//! 2. read the watermark (best effort)
//! 3. list open changes and existing mirror branches (fatal on failure)
//! 4. synchronize the batch, then trigger workflows for every pushed branch
//! 5. re-dispatch retest requests from the events-log, when configured
//! 6. advance the watermark once
//!
//! Nothing is mutated before step 4, so a failed query leaves the mirror and
//! the watermark untouched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use relay_state::{Watermark, WatermarkStore};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, WorkflowDispatcher};
use crate::domain::error::{RelayError, Result};
use crate::domain::{ChangeOutcome, DispatchBatch, MirrorRef, TriggerRecord};
use crate::git::{verify_remotes, GitRemote};
use crate::obs;
use crate::query::{ChangeQuery, MaxAge};
use crate::reporting::{RunCounts, RunSummary};
use crate::retest::{retest_requests, EventsLog, DEFAULT_RETEST_PHRASE};
use crate::source::{ChangeSource, MAX_PAGE_SIZE};
use crate::synchronizer::Synchronizer;

/// Largest accepted push limit (Gerrit's page cap).
pub const MAX_LIMIT: usize = MAX_PAGE_SIZE;

/// Retest look-back when neither a watermark nor a max age is known.
const DEFAULT_RETEST_LOOKBACK_SECS: i64 = 86_400;

/// Settings for one dispatch run.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub gerrit_remote: String,
    pub target_remote: String,
    pub workflows: Vec<String>,
    pub dispatch_ref: String,
    pub query: ChangeQuery,
    pub max_age: Option<MaxAge>,
    /// Cap on changes read from Gerrit.
    pub query_limit: usize,
    /// Cap on branches pushed.
    pub limit: usize,
    pub retest_phrase: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            gerrit_remote: "gerrit".to_string(),
            target_remote: "target".to_string(),
            workflows: Vec::new(),
            dispatch_ref: "main".to_string(),
            query: ChangeQuery::new(),
            max_age: None,
            query_limit: MAX_LIMIT,
            limit: 5,
            retest_phrase: DEFAULT_RETEST_PHRASE.to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(RelayError::Config(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.query_limit == 0 {
            return Err(RelayError::Config("query limit must be positive".to_string()));
        }
        if self.workflows.is_empty() {
            return Err(RelayError::Config(
                "at least one workflow is required".to_string(),
            ));
        }
        if let Some(blank) = self.workflows.iter().position(|w| w.trim().is_empty()) {
            return Err(RelayError::Config(format!("workflow #{} is empty", blank + 1)));
        }
        if self.dispatch_ref.trim().is_empty() {
            return Err(RelayError::Config("dispatch ref is empty".to_string()));
        }
        if self.retest_phrase.trim().is_empty() {
            return Err(RelayError::Config("retest phrase is empty".to_string()));
        }
        Ok(())
    }
}

/// A configured run with its ports wired in.
pub struct DispatchRun {
    config: DispatchConfig,
    source: Arc<dyn ChangeSource>,
    git: Arc<dyn GitRemote>,
    workflows: Arc<dyn WorkflowDispatcher>,
    watermark: Option<WatermarkStore>,
    events: Option<Arc<dyn EventsLog>>,
}

impl DispatchRun {
    pub fn new(
        config: DispatchConfig,
        source: Arc<dyn ChangeSource>,
        git: Arc<dyn GitRemote>,
        workflows: Arc<dyn WorkflowDispatcher>,
    ) -> Self {
        Self {
            config,
            source,
            git,
            workflows,
            watermark: None,
            events: None,
        }
    }

    pub fn with_watermark(mut self, store: WatermarkStore) -> Self {
        self.watermark = Some(store);
        self
    }

    /// Enable the retest phase.
    pub fn with_events_log(mut self, events: Arc<dyn EventsLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub async fn execute(&self) -> Result<RunSummary> {
        self.execute_at(Utc::now()).await
    }

    /// Run with `now` as the wall clock for the retest window.
    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        self.run(run_id, now)
            .instrument(obs::run_span(&run_id.to_string()))
            .await
    }

    async fn run(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_run_started(
            &run_id.to_string(),
            self.config.limit,
            self.config.workflows.len(),
        );

        let remotes = self.git.remotes().await?;
        verify_remotes(
            &remotes,
            &self.config.gerrit_remote,
            &self.config.target_remote,
        )?;

        let before = match &self.watermark {
            Some(store) => store.read_watermark().await,
            None => None,
        };

        let changes = self
            .source
            .list_open_changes(
                &self.config.query,
                self.config.max_age.as_ref(),
                self.config.query_limit,
            )
            .await?;
        let mut existing = self.git.list_refs(&self.config.target_remote).await?;
        obs::emit_changes_listed(changes.len(), existing.len());

        let batch = DispatchBatch::new(changes, self.config.limit);
        let synchronizer = Synchronizer::new(
            self.git.clone(),
            self.config.gerrit_remote.clone(),
            self.config.target_remote.clone(),
        );
        let outcomes = synchronizer.synchronize(&batch, &mut existing).await;

        let dispatcher = Dispatcher::new(
            self.workflows.clone(),
            self.config.workflows.clone(),
            self.config.dispatch_ref.clone(),
        );
        let triggered = dispatch_pushed(&dispatcher, &outcomes).await;

        let dispatched: BTreeSet<MirrorRef> =
            triggered.records.iter().map(|r| r.mirror_ref).collect();
        let retest = self
            .retest_phase(now, before, &existing, &dispatched, &dispatcher)
            .await;

        // With retests enabled the watermark is the events-log cursor and
        // only moves past a window that was read and fully dispatched.
        let after = if self.events.is_some() {
            before.max(retest.window_end)
        } else {
            before.max(triggered.completed)
        };
        let saved = match (&self.watermark, after) {
            (Some(store), Some(mark)) if after != before => store.write_watermark(mark).await,
            _ => false,
        };
        obs::emit_watermark(
            before.map(Watermark::as_unix),
            after.map(Watermark::as_unix),
            saved,
        );

        let counts = RunCounts::tally(&outcomes, &triggered.records);
        obs::emit_run_finished(
            &run_id.to_string(),
            clock.elapsed().as_millis() as u64,
            counts.pushed,
            counts.failed + counts.trigger_failed,
        );

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            watermark_before: before.map(Watermark::as_unix),
            watermark_after: after.map(Watermark::as_unix),
            watermark_saved: saved,
            changes: outcomes,
            triggers: triggered.records,
            retests: retest.records,
            untriggered: triggered.untriggered,
            counts,
        })
    }

    /// Re-dispatch mirrored patchsets that a reviewer asked to retest.
    ///
    /// Requests go out oldest first. The reported window end covers every
    /// request that was triggered; a failed trigger reports none, so the next
    /// run reads the same window again.
    async fn retest_phase(
        &self,
        now: DateTime<Utc>,
        before: Option<Watermark>,
        existing: &BTreeSet<String>,
        dispatched: &BTreeSet<MirrorRef>,
        dispatcher: &Dispatcher,
    ) -> RetestResult {
        let Some(events) = &self.events else {
            return RetestResult::default();
        };

        let (since, until) = retest_window(now, before, self.config.max_age.as_ref());
        if since > until {
            return RetestResult::default();
        }

        let events = match events.events_between(since, until).await {
            Ok(events) => events,
            Err(e) => {
                obs::emit_retest_error(&e);
                return RetestResult::default();
            }
        };

        let mut requested = Vec::new();
        for request in retest_requests(&events, &self.config.retest_phrase) {
            let mirror = request.mirror;
            if dispatched.contains(&mirror) {
                continue;
            }
            if !existing.contains(&mirror.branch_name()) {
                info!(mirror = %mirror, "retest requested for a patchset that is not mirrored");
                continue;
            }
            requested.push(request);
        }

        let limit = self.config.limit;
        let mut records = Vec::new();
        for request in requested.iter().take(limit) {
            info!(event = "retest.dispatch", mirror = %request.mirror);
            records.extend(dispatcher.dispatch(&request.mirror).await);
        }
        if records.iter().any(|r| r.outcome.is_failed()) {
            return RetestResult {
                records,
                window_end: None,
            };
        }

        // Past the limit the cursor stops one second short of the first
        // request left over. Requests sharing that second are dispatched
        // again next run (at-least-once); an untimed leftover keeps the
        // whole window.
        let window_end = match requested.get(limit) {
            None => Some(Watermark::from_datetime(until)),
            Some(next) => {
                let cut = next
                    .requested_at
                    .map(|at| Watermark::from_unix(at.saturating_sub(1)))
                    .filter(|mark| Some(*mark) > before);
                warn!(
                    requested = requested.len(),
                    limit,
                    resume_after = cut.map(Watermark::as_unix),
                    "more retest requests than the limit; the rest wait for the next run"
                );
                cut.map(|mark| mark.min(Watermark::from_datetime(until)))
            }
        };
        RetestResult {
            records,
            window_end,
        }
    }
}

impl std::fmt::Debug for DispatchRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRun")
            .field("config", &self.config)
            .field("watermark", &self.watermark)
            .field("retests", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Triggered {
    records: Vec<TriggerRecord>,
    untriggered: Vec<MirrorRef>,
    /// `updated` of each change pushed and fully triggered.
    completed: Option<Watermark>,
}

#[derive(Debug, Default)]
struct RetestResult {
    records: Vec<TriggerRecord>,
    window_end: Option<Watermark>,
}

/// Inclusive `[since, until]` bounds of the retest window.
///
/// Starts just after the watermark, else at `now - max_age`, else one day
/// back. A lower bound before chrono's range clamps to the epoch; a
/// watermark past it yields an empty window.
fn retest_window(
    now: DateTime<Utc>,
    before: Option<Watermark>,
    max_age: Option<&MaxAge>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let back = |secs: i64| {
        Duration::try_seconds(secs)
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or_default()
    };
    let until = back(1);
    let since = match (before, max_age) {
        (Some(mark), _) => DateTime::from_timestamp(mark.as_unix().saturating_add(1), 0)
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        (None, Some(age)) => {
            back(i64::try_from(age.as_duration().as_secs()).unwrap_or(i64::MAX))
        }
        (None, None) => back(DEFAULT_RETEST_LOOKBACK_SECS),
    };
    (since, until)
}

async fn dispatch_pushed(dispatcher: &Dispatcher, outcomes: &[ChangeOutcome]) -> Triggered {
    let mut triggered = Triggered::default();
    for outcome in outcomes.iter().filter(|o| o.outcome.is_pushed()) {
        let records = dispatcher.dispatch(&outcome.mirror_ref).await;
        if records.iter().any(|r| r.outcome.is_failed()) {
            warn!(
                event = "workflow.untriggered",
                mirror = %outcome.mirror_ref,
                "branch pushed but not every workflow started"
            );
            triggered.untriggered.push(outcome.mirror_ref);
        } else {
            let mark = Watermark::from_datetime(outcome.change.updated);
            triggered.completed = triggered.completed.max(Some(mark));
        }
        triggered.records.extend(records);
    }
    triggered
}
