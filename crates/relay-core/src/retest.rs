//! Retest requests read from the Gerrit events-log.
//!
//! A reviewer asks for a patchset to be re-run by leaving a comment containing
//! the retest phrase. Matching `comment-added` events name the patchset ref,
//! which maps to the mirror branch that should be dispatched again.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::error::{RelayError, Result};
use crate::domain::MirrorRef;

/// Phrase that marks a retest request.
pub const DEFAULT_RETEST_PHRASE: &str = "false positive";

/// One events-log entry. Only the fields needed here are decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GerritEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(rename = "patchSet", default)]
    pub patch_set: Option<PatchSetAttribute>,
    /// Unix seconds.
    #[serde(rename = "eventCreatedOn", default)]
    pub created_on: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PatchSetAttribute {
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// Source of review events.
#[async_trait]
pub trait EventsLog: Send + Sync {
    /// Events recorded in `[since, until]`.
    async fn events_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<GerritEvent>>;
}

/// Parse newline-delimited JSON events. Blank lines are ignored.
pub fn parse_events(body: &str) -> Result<Vec<GerritEvent>> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str::<GerritEvent>(line).map_err(RelayError::from))
        .collect()
}

/// A mirror branch a reviewer asked to run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetestRequest {
    /// Earliest matching comment, unix seconds; `None` when the event
    /// carried no timestamp.
    pub requested_at: Option<i64>,
    pub mirror: MirrorRef,
}

/// Retest requests ordered by request time, one per mirror branch.
///
/// The phrase match is case-insensitive. Events whose patchset ref is not a
/// Gerrit change ref are ignored. Untimed requests sort first.
pub fn retest_requests(events: &[GerritEvent], phrase: &str) -> Vec<RetestRequest> {
    let phrase = phrase.to_lowercase();
    let mut earliest: BTreeMap<MirrorRef, Option<i64>> = BTreeMap::new();
    for event in events
        .iter()
        .filter(|e| e.kind == "comment-added")
        .filter(|e| {
            e.comment
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&phrase))
        })
    {
        let Some(mirror) = event
            .patch_set
            .as_ref()
            .and_then(|ps| MirrorRef::from_source_ref(&ps.git_ref).ok())
        else {
            continue;
        };
        earliest
            .entry(mirror)
            .and_modify(|at| *at = (*at).min(event.created_on))
            .or_insert(event.created_on);
    }

    let mut requests: Vec<RetestRequest> = earliest
        .into_iter()
        .map(|(mirror, requested_at)| RetestRequest {
            requested_at,
            mirror,
        })
        .collect();
    requests.sort();

    if !requests.is_empty() {
        tracing::info!(count = requests.len(), "retest requests found");
    }
    requests
}
