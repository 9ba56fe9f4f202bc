//! Relay Core Library
//!
//! Mirrors open Gerrit patchsets onto a GitHub repository as
//! `changes/<shard>/<change>/<patchset>` branches, starts CI workflows for
//! each new branch and reports verdicts back to Gerrit as label votes.
//!
//! Every external system sits behind a port trait (`ChangeSource`,
//! `GitRemote`, `WorkflowDispatcher`, `ReviewPoster`, `EventsLog`) with an
//! in-memory counterpart in [`fakes`].

pub mod dispatch;
pub mod domain;
pub mod fakes;
pub mod gerrit;
pub mod git;
pub mod github;
pub mod obs;
pub mod query;
pub mod reporting;
pub mod retest;
pub mod review;
pub mod run;
pub mod source;
pub mod synchronizer;
pub mod telemetry;

pub use domain::{
    Change, ChangeOutcome, DispatchBatch, MirrorRef, RelayError, Result, SyncOutcome, SyncStage,
    TriggerOutcome, TriggerRecord,
};

pub use dispatch::{Dispatcher, WorkflowDispatcher};
pub use gerrit::{GerritClient, GerritConfig};
pub use git::{GitCli, GitRemote, RepoLock};
pub use github::{GithubConfig, GithubDispatcher};
pub use query::{ChangeQuery, MaxAge};
pub use reporting::{render_run_summary_md, write_run_summary_json, RunCounts, RunSummary};
pub use retest::{EventsLog, GerritEvent, RetestRequest, DEFAULT_RETEST_PHRASE};
pub use review::{report_verdict, ReviewInput, ReviewPoster, Verdict, DEFAULT_LABEL};
pub use run::{DispatchConfig, DispatchRun, MAX_LIMIT};
pub use source::ChangeSource;
pub use synchronizer::Synchronizer;
pub use telemetry::init_tracing;

pub use relay_state::{Watermark, WatermarkStore};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
