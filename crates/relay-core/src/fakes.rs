//! In-memory fakes for the relay's ports (testing only)
//!
//! Each fake records what it was asked to do and can be told to fail, so the
//! run orchestration can be exercised without Gerrit, GitHub or a git binary.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dispatch::WorkflowDispatcher;
use crate::domain::error::{RelayError, Result};
use crate::domain::{Change, MirrorRef};
use crate::git::{GitRemote, RemoteDirection, RemoteEntry};
use crate::query::{ChangeQuery, MaxAge};
use crate::retest::{EventsLog, GerritEvent};
use crate::review::{ReviewInput, ReviewPoster};
use crate::source::ChangeSource;

/// Change source serving a fixed list.
#[derive(Debug, Default)]
pub struct MemoryChangeSource {
    changes: Mutex<Vec<Change>>,
    fail: AtomicBool,
    queries: Mutex<Vec<String>>,
}

impl MemoryChangeSource {
    pub fn new(changes: Vec<Change>) -> Self {
        Self {
            changes: Mutex::new(changes),
            ..Self::default()
        }
    }

    pub fn set_changes(&self, changes: Vec<Change>) {
        *self.changes.lock().unwrap() = changes;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Rendered query strings received so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeSource for MemoryChangeSource {
    async fn list_open_changes(
        &self,
        query: &ChangeQuery,
        max_age: Option<&MaxAge>,
        limit: usize,
    ) -> Result<Vec<Change>> {
        self.queries.lock().unwrap().push(query.render(max_age));
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Query("injected query failure".to_string()));
        }
        let changes = self.changes.lock().unwrap();
        Ok(changes.iter().take(limit).cloned().collect())
    }
}

/// One call made against [`MemoryGitRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCall {
    ListRefs(String),
    Fetch { remote: String, source_ref: String },
    Push { remote: String, mirror: MirrorRef },
    DeleteLocal(String),
}

/// Git remote pair held in memory.
///
/// Branches on the target remote are a set of names; a push of a name that is
/// already present fails, as a write-once push would.
#[derive(Debug)]
pub struct MemoryGitRemote {
    remotes: Mutex<Vec<RemoteEntry>>,
    branches: Mutex<BTreeSet<String>>,
    fail_fetch: Mutex<HashSet<String>>,
    fail_push: Mutex<HashSet<MirrorRef>>,
    fail_list: AtomicBool,
    calls: Mutex<Vec<GitCall>>,
    pushed: Mutex<Vec<MirrorRef>>,
}

impl Default for MemoryGitRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGitRemote {
    /// Remotes `gerrit` (fetch) and `target` (push), no branches.
    pub fn new() -> Self {
        let entry = |name: &str, direction| RemoteEntry {
            name: name.to_string(),
            url: format!("https://{name}.example/repo.git"),
            direction,
        };
        Self {
            remotes: Mutex::new(vec![
                entry("gerrit", RemoteDirection::Fetch),
                entry("gerrit", RemoteDirection::Push),
                entry("target", RemoteDirection::Fetch),
                entry("target", RemoteDirection::Push),
            ]),
            branches: Mutex::new(BTreeSet::new()),
            fail_fetch: Mutex::new(HashSet::new()),
            fail_push: Mutex::new(HashSet::new()),
            fail_list: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_branches(branches: &[MirrorRef]) -> Self {
        let git = Self::new();
        git.branches
            .lock()
            .unwrap()
            .extend(branches.iter().map(MirrorRef::branch_name));
        git
    }

    pub fn set_remotes(&self, remotes: Vec<RemoteEntry>) {
        *self.remotes.lock().unwrap() = remotes;
    }

    pub fn fail_fetch(&self, source_ref: &str) {
        self.fail_fetch
            .lock()
            .unwrap()
            .insert(source_ref.to_string());
    }

    pub fn fail_push(&self, mirror: &MirrorRef) {
        self.fail_push.lock().unwrap().insert(*mirror);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn branches(&self) -> BTreeSet<String> {
        self.branches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<GitCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Mirrors pushed successfully, in push order.
    pub fn pushed(&self) -> Vec<MirrorRef> {
        self.pushed.lock().unwrap().clone()
    }

    /// Fetch, push and delete calls. Ref listing is read-only and excluded.
    pub fn mutations(&self) -> Vec<GitCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, GitCall::ListRefs(_)))
            .collect()
    }

    fn record(&self, call: GitCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GitRemote for MemoryGitRemote {
    async fn remotes(&self) -> Result<Vec<RemoteEntry>> {
        Ok(self.remotes.lock().unwrap().clone())
    }

    async fn list_refs(&self, remote: &str) -> Result<BTreeSet<String>> {
        self.record(GitCall::ListRefs(remote.to_string()));
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RelayError::GitError("injected ls-remote failure".to_string()));
        }
        Ok(self.branches())
    }

    async fn fetch_ref(&self, remote: &str, source_ref: &str, _local_ref: &str) -> Result<()> {
        self.record(GitCall::Fetch {
            remote: remote.to_string(),
            source_ref: source_ref.to_string(),
        });
        if self.fail_fetch.lock().unwrap().contains(source_ref) {
            return Err(RelayError::GitError(format!("couldn't find {source_ref}")));
        }
        Ok(())
    }

    async fn push_ref(&self, remote: &str, _local_ref: &str, mirror: &MirrorRef) -> Result<()> {
        self.record(GitCall::Push {
            remote: remote.to_string(),
            mirror: *mirror,
        });
        if self.fail_push.lock().unwrap().contains(mirror) {
            return Err(RelayError::GitError(format!("push of {mirror} rejected")));
        }
        if !self.branches.lock().unwrap().insert(mirror.branch_name()) {
            return Err(RelayError::GitError(format!("stale info for {mirror}")));
        }
        self.pushed.lock().unwrap().push(*mirror);
        Ok(())
    }

    async fn delete_local_ref(&self, local_ref: &str) -> Result<()> {
        self.record(GitCall::DeleteLocal(local_ref.to_string()));
        Ok(())
    }
}

/// One workflow dispatch seen by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCall {
    pub workflow: String,
    pub dispatch_ref: String,
    pub mirror_ref: MirrorRef,
}

/// Workflow dispatcher that records successful triggers.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<DispatchCall>>,
    fail_workflows: Mutex<HashSet<String>>,
    fail_mirrors: Mutex<HashSet<MirrorRef>>,
    attempts: AtomicUsize,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every trigger of `workflow` fails.
    pub fn fail_workflow(&self, workflow: &str) {
        self.fail_workflows
            .lock()
            .unwrap()
            .insert(workflow.to_string());
    }

    /// Every trigger for `mirror` fails.
    pub fn fail_mirror(&self, mirror: &MirrorRef) {
        self.fail_mirrors.lock().unwrap().insert(*mirror);
    }

    /// Successful triggers, in order.
    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Mirrors with at least one successful trigger, in first-trigger order.
    pub fn triggered_mirrors(&self) -> Vec<MirrorRef> {
        let mut seen = Vec::new();
        for call in self.calls() {
            if !seen.contains(&call.mirror_ref) {
                seen.push(call.mirror_ref);
            }
        }
        seen
    }

    /// Triggers attempted, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowDispatcher for RecordingDispatcher {
    async fn trigger(&self, workflow: &str, dispatch_ref: &str, mirror: &MirrorRef) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_workflows.lock().unwrap().contains(workflow)
            || self.fail_mirrors.lock().unwrap().contains(mirror)
        {
            return Err(RelayError::UnexpectedStatus {
                status: 422,
                url: format!("fake://{workflow}"),
                body: "injected".to_string(),
            });
        }
        self.calls.lock().unwrap().push(DispatchCall {
            workflow: workflow.to_string(),
            dispatch_ref: dispatch_ref.to_string(),
            mirror_ref: *mirror,
        });
        Ok(())
    }
}

/// Review poster that records every vote.
#[derive(Debug, Default)]
pub struct RecordingReviewer {
    posted: Mutex<Vec<(u64, String, ReviewInput)>>,
}

impl RecordingReviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> Vec<(u64, String, ReviewInput)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewPoster for RecordingReviewer {
    async fn post_review(
        &self,
        change_number: u64,
        revision: &str,
        review: &ReviewInput,
    ) -> Result<()> {
        self.posted
            .lock()
            .unwrap()
            .push((change_number, revision.to_string(), review.clone()));
        Ok(())
    }
}

/// Events-log serving a fixed list regardless of the window.
#[derive(Debug, Default)]
pub struct MemoryEventsLog {
    events: Mutex<Vec<GerritEvent>>,
    fail: AtomicBool,
    windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl MemoryEventsLog {
    pub fn new(events: Vec<GerritEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Self::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Windows requested so far.
    pub fn windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.windows.lock().unwrap().clone()
    }
}

/// A `comment-added` event on `mirror`'s patchset.
pub fn comment_event(mirror: &MirrorRef, comment: &str) -> GerritEvent {
    GerritEvent {
        kind: "comment-added".to_string(),
        comment: Some(comment.to_string()),
        patch_set: Some(crate::retest::PatchSetAttribute {
            git_ref: mirror.source_ref(),
        }),
        created_on: None,
    }
}

/// [`comment_event`] stamped at `created_on` unix seconds.
pub fn comment_event_at(mirror: &MirrorRef, comment: &str, created_on: i64) -> GerritEvent {
    GerritEvent {
        created_on: Some(created_on),
        ..comment_event(mirror, comment)
    }
}

#[async_trait]
impl EventsLog for MemoryEventsLog {
    async fn events_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<GerritEvent>> {
        self.windows.lock().unwrap().push((since, until));
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Http("injected events-log failure".to_string()));
        }
        Ok(self.events.lock().unwrap().clone())
    }
}
