use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_core::fakes::{
    comment_event, comment_event_at, GitCall, MemoryChangeSource, MemoryEventsLog, MemoryGitRemote,
    RecordingDispatcher,
};
use relay_core::git::{RemoteDirection, RemoteEntry};
use relay_core::{
    Change, DispatchBatch, DispatchConfig, DispatchRun, MaxAge, MirrorRef, RelayError,
    SyncOutcome, SyncStage, Synchronizer, TriggerOutcome, WatermarkStore,
};
use relay_state::fakes::MemoryVariableStore;
use relay_state::{VariableStore, DEFAULT_WATERMARK_VARIABLE};

const BASE_TS: i64 = 1_700_000_000;

fn change(change_number: u64, patchset: u32) -> Change {
    let mirror = MirrorRef::new(change_number, patchset);
    Change {
        change_number,
        revision_id: format!("{:040x}", change_number),
        patchset,
        source_ref: mirror.source_ref(),
        project: "platform/kernel".to_string(),
        branch: "main".to_string(),
        subject: format!("fix {change_number}"),
        updated: at(BASE_TS + change_number as i64),
    }
}

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds, 0).expect("valid timestamp")
}

struct Harness {
    source: Arc<MemoryChangeSource>,
    git: Arc<MemoryGitRemote>,
    ci: Arc<RecordingDispatcher>,
    vars: Arc<MemoryVariableStore>,
}

impl Harness {
    fn new(changes: Vec<Change>, mirrored: &[MirrorRef]) -> Self {
        Self {
            source: Arc::new(MemoryChangeSource::new(changes)),
            git: Arc::new(MemoryGitRemote::with_branches(mirrored)),
            ci: Arc::new(RecordingDispatcher::new()),
            vars: Arc::new(MemoryVariableStore::new()),
        }
    }

    fn run(&self, limit: usize) -> DispatchRun {
        let config = DispatchConfig {
            workflows: vec!["ci.yml".to_string()],
            limit,
            ..DispatchConfig::default()
        };
        DispatchRun::new(
            config,
            self.source.clone(),
            self.git.clone(),
            self.ci.clone(),
        )
        .with_watermark(WatermarkStore::new(
            self.vars.clone(),
            DEFAULT_WATERMARK_VARIABLE,
        ))
    }

    fn watermark(&self) -> Option<i64> {
        self.vars
            .get(DEFAULT_WATERMARK_VARIABLE)
            .map(|v| v.parse().expect("numeric watermark"))
    }
}

fn outcomes(summary: &relay_core::RunSummary) -> Vec<(u64, SyncOutcome)> {
    summary
        .changes
        .iter()
        .map(|c| (c.change.change_number, c.outcome.clone()))
        .collect()
}

// ── batch scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn mirrored_change_skipped_and_new_ones_pushed_with_limit_two() {
    let h = Harness::new(
        vec![change(103, 1), change(101, 1), change(102, 1)],
        &[MirrorRef::new(101, 1)],
    );

    let summary = h.run(2).execute().await.expect("run");

    assert_eq!(
        outcomes(&summary),
        vec![
            (101, SyncOutcome::Skipped),
            (102, SyncOutcome::Pushed),
            (103, SyncOutcome::Pushed),
        ]
    );
    assert_eq!(
        h.ci.triggered_mirrors(),
        vec![MirrorRef::new(102, 1), MirrorRef::new(103, 1)]
    );
    assert!(!summary.has_failures());
}

#[tokio::test]
async fn limit_one_defers_the_last_change() {
    let h = Harness::new(
        vec![change(101, 1), change(102, 1), change(103, 1)],
        &[MirrorRef::new(101, 1)],
    );

    let summary = h.run(1).execute().await.expect("run");

    assert_eq!(
        outcomes(&summary),
        vec![
            (101, SyncOutcome::Skipped),
            (102, SyncOutcome::Pushed),
            (103, SyncOutcome::Deferred),
        ]
    );
    assert_eq!(h.ci.triggered_mirrors(), vec![MirrorRef::new(102, 1)]);
    assert!(!h.git.branches().contains("changes/03/103/1"));

    // the deferred change goes out on the next run
    let second = h.run(1).execute().await.expect("second run");
    assert_eq!(
        outcomes(&second),
        vec![
            (101, SyncOutcome::Skipped),
            (102, SyncOutcome::Skipped),
            (103, SyncOutcome::Pushed),
        ]
    );
}

#[tokio::test]
async fn middle_fetch_failure_does_not_stop_the_batch() {
    let h = Harness::new(vec![change(1, 1), change(2, 1), change(3, 1)], &[]);
    h.git.fail_fetch(&change(2, 1).source_ref);

    let summary = h.run(5).execute().await.expect("run");

    let kinds: Vec<_> = summary.changes.iter().map(|c| &c.outcome).collect();
    assert!(kinds[0].is_pushed());
    assert!(matches!(
        kinds[1],
        SyncOutcome::Failed {
            stage: SyncStage::Fetch,
            ..
        }
    ));
    assert!(kinds[2].is_pushed());
    assert_eq!(
        h.ci.triggered_mirrors(),
        vec![MirrorRef::new(1, 1), MirrorRef::new(3, 1)]
    );
    assert!(summary.has_failures());
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let h = Harness::new(vec![change(10, 1), change(11, 2)], &[]);

    h.run(5).execute().await.expect("first run");
    let attempts = h.ci.attempts();
    let second = h.run(5).execute().await.expect("second run");

    assert!(second
        .changes
        .iter()
        .all(|c| c.outcome == SyncOutcome::Skipped));
    assert_eq!(h.ci.attempts(), attempts);
    assert!(second.triggers.is_empty());
}

#[tokio::test]
async fn synchronizer_second_pass_over_same_batch_only_skips() {
    let git = Arc::new(MemoryGitRemote::new());
    let synchronizer = Synchronizer::new(git.clone(), "gerrit", "target");
    let batch = DispatchBatch::new(vec![change(5, 1), change(6, 1), change(7, 1)], 2);
    let mut existing = BTreeSet::new();

    let first = synchronizer.synchronize(&batch, &mut existing).await;
    let second = synchronizer.synchronize(&batch, &mut existing).await;

    assert_eq!(first.iter().filter(|o| o.outcome.is_pushed()).count(), 2);
    assert_eq!(second[0].outcome, SyncOutcome::Skipped);
    assert_eq!(second[1].outcome, SyncOutcome::Skipped);
    // 7 was deferred the first time and is pushed now
    assert_eq!(second[2].outcome, SyncOutcome::Pushed);
}

#[tokio::test]
async fn pushes_never_exceed_limit() {
    let changes: Vec<Change> = (1..=40).map(|n| change(n, 1)).collect();
    for limit in [1, 3, 7, 40] {
        let h = Harness::new(changes.clone(), &[]);
        let summary = h.run(limit).execute().await.expect("run");
        assert_eq!(summary.counts.pushed, limit);
        assert_eq!(summary.counts.deferred, 40 - limit);
        assert_eq!(h.git.pushed().len(), limit);
    }
}

#[tokio::test]
async fn changes_processed_in_ascending_order() {
    let h = Harness::new(
        vec![change(900, 1), change(12, 3), change(450, 2), change(7, 1)],
        &[],
    );

    h.run(10).execute().await.expect("run");

    let numbers: Vec<u64> = h.git.pushed().iter().map(|m| m.change_number()).collect();
    assert_eq!(numbers, vec![7, 12, 450, 900]);
}

#[tokio::test]
async fn new_patchset_of_mirrored_change_gets_its_own_branch() {
    let h = Harness::new(vec![change(1234, 6)], &[MirrorRef::new(1234, 5)]);

    let summary = h.run(5).execute().await.expect("run");

    assert_eq!(summary.counts.pushed, 1);
    assert!(h.git.branches().contains("changes/34/1234/5"));
    assert!(h.git.branches().contains("changes/34/1234/6"));
}

// ── failure handling ───────────────────────────────────────────────────────

#[tokio::test]
async fn query_failure_is_fatal_and_mutates_nothing() {
    let h = Harness::new(vec![change(1, 1)], &[]);
    h.vars
        .write(DEFAULT_WATERMARK_VARIABLE, "1700000000")
        .await
        .expect("seed");
    h.source.set_fail(true);

    let err = h.run(5).execute().await.unwrap_err();

    assert!(matches!(err, RelayError::Query(_)));
    assert!(h.git.mutations().is_empty());
    assert_eq!(h.ci.attempts(), 0);
    assert_eq!(h.vars.write_count(), 1);
}

#[tokio::test]
async fn ref_listing_failure_is_fatal() {
    let h = Harness::new(vec![change(1, 1)], &[]);
    h.git.set_fail_list(true);

    let err = h.run(5).execute().await.unwrap_err();

    assert!(matches!(err, RelayError::GitError(_)));
    assert!(h.git.mutations().is_empty());
}

#[tokio::test]
async fn missing_target_remote_aborts_before_io() {
    let h = Harness::new(vec![change(1, 1)], &[]);
    h.git.set_remotes(vec![RemoteEntry {
        name: "gerrit".to_string(),
        url: "https://review.example.org/kernel".to_string(),
        direction: RemoteDirection::Fetch,
    }]);

    let err = h.run(5).execute().await.unwrap_err();

    assert!(matches!(err, RelayError::Config(_)));
    assert!(h.source.queries().is_empty());
    assert!(h.git.calls().is_empty());
}

#[tokio::test]
async fn invalid_limit_rejected_before_io() {
    let h = Harness::new(vec![change(1, 1)], &[]);

    let err = h.run(0).execute().await.unwrap_err();

    assert!(matches!(err, RelayError::Config(_)));
    assert!(h.source.queries().is_empty());
}

#[tokio::test]
async fn trigger_failure_recorded_as_untriggered() {
    let h = Harness::new(vec![change(1, 1), change(2, 1)], &[]);
    h.ci.fail_mirror(&MirrorRef::new(1, 1));

    let summary = h.run(5).execute().await.expect("run");

    assert_eq!(summary.counts.pushed, 2);
    assert_eq!(summary.untriggered, vec![MirrorRef::new(1, 1)]);
    assert_eq!(summary.counts.trigger_failed, 1);
    assert!(summary.has_failures());
    // the branch stays; the next run will skip it, not retry the trigger
    assert!(h.git.branches().contains("changes/01/1/1"));
}

#[tokio::test]
async fn push_rejected_for_concurrently_created_branch() {
    let h = Harness::new(vec![change(8, 1)], &[]);
    h.git.fail_push(&MirrorRef::new(8, 1));

    let summary = h.run(5).execute().await.expect("run");

    assert!(matches!(
        summary.changes[0].outcome,
        SyncOutcome::Failed {
            stage: SyncStage::Push,
            ..
        }
    ));
    assert_eq!(h.ci.attempts(), 0);
    assert!(h
        .git
        .calls()
        .contains(&GitCall::DeleteLocal("refs/relay/fetch/8/1".to_string())));
}

// ── watermark ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn watermark_advances_to_newest_fully_dispatched_change() {
    let h = Harness::new(vec![change(1, 1), change(2, 1), change(3, 1)], &[]);
    h.ci.fail_mirror(&MirrorRef::new(3, 1));

    let summary = h.run(5).execute().await.expect("run");

    assert_eq!(summary.watermark_before, None);
    assert_eq!(summary.watermark_after, Some(BASE_TS + 2));
    assert!(summary.watermark_saved);
    assert_eq!(h.watermark(), Some(BASE_TS + 2));
    assert_eq!(h.vars.write_count(), 1);
}

#[tokio::test]
async fn watermark_not_written_when_nothing_moved() {
    let h = Harness::new(vec![change(1, 1)], &[MirrorRef::new(1, 1)]);
    h.vars
        .write(DEFAULT_WATERMARK_VARIABLE, &(BASE_TS + 50).to_string())
        .await
        .expect("seed");

    let summary = h.run(5).execute().await.expect("run");

    assert_eq!(summary.watermark_after, Some(BASE_TS + 50));
    assert!(!summary.watermark_saved);
    assert_eq!(h.vars.write_count(), 1);
}

#[tokio::test]
async fn watermark_never_moves_backwards() {
    let h = Harness::new(vec![change(1, 1)], &[]);
    h.vars
        .write(DEFAULT_WATERMARK_VARIABLE, &(BASE_TS + 500).to_string())
        .await
        .expect("seed");

    let summary = h.run(5).execute().await.expect("run");

    // the older change is still mirrored; the watermark never filters
    assert_eq!(summary.counts.pushed, 1);
    assert_eq!(summary.watermark_after, Some(BASE_TS + 500));
    assert_eq!(h.watermark(), Some(BASE_TS + 500));
}

#[tokio::test]
async fn watermark_store_failures_do_not_fail_the_run() {
    let h = Harness::new(vec![change(1, 1)], &[]);
    h.vars.set_fail_reads(true);
    h.vars.set_fail_writes(true);

    let summary = h.run(5).execute().await.expect("run");

    assert_eq!(summary.counts.pushed, 1);
    assert_eq!(summary.watermark_before, None);
    assert!(!summary.watermark_saved);
    assert!(!summary.has_failures());
}

// ── retest requests ────────────────────────────────────────────────────────

fn with_events(h: &Harness, limit: usize, events: Arc<MemoryEventsLog>) -> DispatchRun {
    h.run(limit).with_events_log(events)
}

#[tokio::test]
async fn retest_comment_redispatches_mirrored_patchset() {
    let mirrored = MirrorRef::new(55, 2);
    let h = Harness::new(vec![], &[mirrored]);
    let events = Arc::new(MemoryEventsLog::new(vec![
        comment_event(&mirrored, "Patch Set 2:\n\nFalse Positive"),
        comment_event(&MirrorRef::new(56, 1), "false positive"),
        comment_event(&MirrorRef::new(57, 1), "looks good"),
    ]));
    let now = at(BASE_TS + 10_000);

    let summary = with_events(&h, 5, events.clone())
        .execute_at(now)
        .await
        .expect("run");

    assert_eq!(summary.retests.len(), 1);
    assert_eq!(summary.retests[0].mirror_ref, mirrored);
    assert_eq!(summary.retests[0].outcome, TriggerOutcome::Triggered);
    assert_eq!(h.ci.triggered_mirrors(), vec![mirrored]);
    // window end is now - 1s
    assert_eq!(summary.watermark_after, Some(BASE_TS + 9_999));
}

#[tokio::test]
async fn retest_window_starts_after_watermark() {
    let h = Harness::new(vec![], &[]);
    h.vars
        .write(DEFAULT_WATERMARK_VARIABLE, &BASE_TS.to_string())
        .await
        .expect("seed");
    let events = Arc::new(MemoryEventsLog::new(vec![]));
    let now = at(BASE_TS + 60);

    with_events(&h, 5, events.clone())
        .execute_at(now)
        .await
        .expect("run");

    assert_eq!(events.windows(), vec![(at(BASE_TS + 1), at(BASE_TS + 59))]);
}

#[tokio::test]
async fn retest_not_repeated_for_branch_pushed_this_run() {
    let h = Harness::new(vec![change(9, 1)], &[]);
    let events = Arc::new(MemoryEventsLog::new(vec![comment_event(
        &MirrorRef::new(9, 1),
        "false positive",
    )]));

    let summary = with_events(&h, 5, events)
        .execute_at(at(BASE_TS + 1_000))
        .await
        .expect("run");

    assert!(summary.retests.is_empty());
    assert_eq!(h.ci.attempts(), 1);
}

#[tokio::test]
async fn events_log_failure_keeps_the_run_and_the_window() {
    let h = Harness::new(vec![change(4, 1)], &[]);
    let events = Arc::new(MemoryEventsLog::new(vec![]));
    events.set_fail(true);

    let summary = with_events(&h, 5, events)
        .execute_at(at(BASE_TS + 1_000))
        .await
        .expect("run");

    assert_eq!(summary.counts.pushed, 1);
    assert!(summary.retests.is_empty());
    // the unread window holds the watermark back despite the push
    assert_eq!(summary.watermark_after, None);
    assert!(!summary.watermark_saved);
    assert_eq!(h.watermark(), None);
}

#[tokio::test]
async fn unread_events_window_is_read_by_the_next_run() {
    let mirrored = MirrorRef::new(55, 2);
    let h = Harness::new(vec![change(9, 1)], &[mirrored]);
    h.vars
        .write(DEFAULT_WATERMARK_VARIABLE, &BASE_TS.to_string())
        .await
        .expect("seed");
    let events = Arc::new(MemoryEventsLog::new(vec![comment_event_at(
        &mirrored,
        "false positive",
        BASE_TS + 500,
    )]));
    events.set_fail(true);

    let first = with_events(&h, 5, events.clone())
        .execute_at(at(BASE_TS + 1_000))
        .await
        .expect("first run");
    assert_eq!(first.counts.pushed, 1);
    assert_eq!(first.watermark_after, Some(BASE_TS));
    assert!(!first.watermark_saved);
    assert_eq!(h.watermark(), Some(BASE_TS));

    events.set_fail(false);
    let second = with_events(&h, 5, events.clone())
        .execute_at(at(BASE_TS + 2_000))
        .await
        .expect("second run");

    assert_eq!(
        events.windows()[1],
        (at(BASE_TS + 1), at(BASE_TS + 1_999))
    );
    assert_eq!(second.retests.len(), 1);
    assert_eq!(second.retests[0].mirror_ref, mirrored);
    assert_eq!(h.watermark(), Some(BASE_TS + 1_999));
}

#[tokio::test]
async fn huge_max_age_without_watermark_reads_from_the_epoch() {
    let h = Harness::new(vec![], &[]);
    let events = Arc::new(MemoryEventsLog::new(vec![]));
    let config = DispatchConfig {
        workflows: vec!["ci.yml".to_string()],
        max_age: Some(MaxAge::parse("100000000w").expect("parses")),
        ..DispatchConfig::default()
    };
    let run = DispatchRun::new(config, h.source.clone(), h.git.clone(), h.ci.clone())
        .with_events_log(events.clone());

    run.execute_at(at(BASE_TS)).await.expect("run");

    assert_eq!(events.windows(), vec![(at(0), at(BASE_TS - 1))]);
}

#[tokio::test]
async fn untimed_retests_beyond_limit_keep_the_window() {
    let mirrored: Vec<MirrorRef> = (1..=3).map(|n| MirrorRef::new(n, 1)).collect();
    let h = Harness::new(vec![], &mirrored);
    let events = Arc::new(MemoryEventsLog::new(
        mirrored
            .iter()
            .map(|m| comment_event(m, "false positive"))
            .collect(),
    ));

    let summary = with_events(&h, 2, events)
        .execute_at(at(BASE_TS + 1_000))
        .await
        .expect("run");

    assert_eq!(summary.retests.len(), 2);
    assert_eq!(summary.watermark_after, None);
    assert!(!summary.watermark_saved);
}

#[tokio::test]
async fn retests_beyond_limit_resume_at_the_first_left_over() {
    let mirrored: Vec<MirrorRef> = (1..=3).map(|n| MirrorRef::new(n, 1)).collect();
    let h = Harness::new(vec![], &mirrored);
    h.vars
        .write(DEFAULT_WATERMARK_VARIABLE, &BASE_TS.to_string())
        .await
        .expect("seed");
    // change 3 was asked for first, then 1, then 2
    let events = Arc::new(MemoryEventsLog::new(vec![
        comment_event_at(&mirrored[0], "false positive", BASE_TS + 20),
        comment_event_at(&mirrored[1], "false positive", BASE_TS + 30),
        comment_event_at(&mirrored[2], "false positive", BASE_TS + 10),
    ]));

    let first = with_events(&h, 2, events.clone())
        .execute_at(at(BASE_TS + 1_000))
        .await
        .expect("first run");
    let first_mirrors: Vec<MirrorRef> = first.retests.iter().map(|r| r.mirror_ref).collect();
    assert_eq!(first_mirrors, vec![mirrored[2], mirrored[0]]);
    assert_eq!(first.watermark_after, Some(BASE_TS + 29));
    assert_eq!(h.watermark(), Some(BASE_TS + 29));

    // The fake log ignores the window, so the next run sees every event
    // again; only those the window still covers matter in production.
    let remaining = Arc::new(MemoryEventsLog::new(vec![comment_event_at(
        &mirrored[1],
        "false positive",
        BASE_TS + 30,
    )]));
    let second = with_events(&h, 2, remaining.clone())
        .execute_at(at(BASE_TS + 2_000))
        .await
        .expect("second run");

    assert_eq!(remaining.windows(), vec![(at(BASE_TS + 30), at(BASE_TS + 1_999))]);
    assert_eq!(second.retests.len(), 1);
    assert_eq!(second.retests[0].mirror_ref, mirrored[1]);
    assert_eq!(h.watermark(), Some(BASE_TS + 1_999));
}

#[tokio::test]
async fn retests_sharing_the_cut_second_are_dispatched_again() {
    let mirrored: Vec<MirrorRef> = (1..=3).map(|n| MirrorRef::new(n, 1)).collect();
    let h = Harness::new(vec![], &mirrored);
    h.vars
        .write(DEFAULT_WATERMARK_VARIABLE, &BASE_TS.to_string())
        .await
        .expect("seed");
    let events = Arc::new(MemoryEventsLog::new(
        mirrored
            .iter()
            .map(|m| comment_event_at(m, "false positive", BASE_TS + 40))
            .collect(),
    ));

    let summary = with_events(&h, 2, events)
        .execute_at(at(BASE_TS + 1_000))
        .await
        .expect("run");

    // the cut lands before second 40, so changes 1 and 2 go out again
    // together with 3 on the next run
    assert_eq!(summary.retests.len(), 2);
    assert_eq!(summary.watermark_after, Some(BASE_TS + 39));
}
