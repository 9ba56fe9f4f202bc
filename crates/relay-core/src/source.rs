//! Change source: open Gerrit changes matching a query.
//!
//! The REST payload handling lives here so it can be exercised without a
//! server; [`crate::gerrit::GerritClient`] does the transport.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::domain::error::{RelayError, Result};
use crate::domain::{Change, MirrorRef};
use crate::query::{ChangeQuery, MaxAge};

/// Gerrit prepends this to every JSON response body.
pub const XSSI_PREFIX: &str = ")]}'";

/// Largest page Gerrit serves for a change query.
pub const MAX_PAGE_SIZE: usize = 500;

/// Source of open changes.
///
/// Implementations must fail the whole call rather than return a partial
/// list: a missing change would be silently skipped.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Up to `limit` open changes matching `query` updated within `max_age`,
    /// in the order the review system returns them.
    async fn list_open_changes(
        &self,
        query: &ChangeQuery,
        max_age: Option<&MaxAge>,
        limit: usize,
    ) -> Result<Vec<Change>>;
}

#[derive(Debug, Deserialize)]
struct ChangeInfo {
    #[serde(rename = "_number")]
    number: u64,
    #[serde(default)]
    project: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    subject: String,
    updated: String,
    current_revision: Option<String>,
    #[serde(default)]
    revisions: HashMap<String, RevisionInfo>,
    #[serde(rename = "_more_changes", default)]
    more_changes: bool,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    #[serde(rename = "_number")]
    number: u32,
    #[serde(rename = "ref")]
    git_ref: String,
}

/// One page of a change query.
#[derive(Debug)]
pub struct ChangePage {
    pub changes: Vec<Change>,
    /// Gerrit has more results past this page.
    pub more: bool,
}

/// Strip the XSSI guard line from a Gerrit response body.
pub fn strip_xssi(body: &str) -> &str {
    body.strip_prefix(XSSI_PREFIX).unwrap_or(body).trim_start()
}

/// Parse a `GET /changes/?o=CURRENT_REVISION` response body.
///
/// Every change must carry its current revision and a well-formed patchset
/// ref; otherwise the whole page is rejected.
pub fn parse_change_page(body: &str) -> Result<ChangePage> {
    let infos: Vec<ChangeInfo> = serde_json::from_str(strip_xssi(body))
        .map_err(|e| RelayError::Query(format!("malformed change list: {e}")))?;

    let more = infos.last().map(|info| info.more_changes).unwrap_or(false);
    let changes = infos
        .into_iter()
        .map(change_from_info)
        .collect::<Result<Vec<_>>>()?;

    Ok(ChangePage { changes, more })
}

/// Page through a change query until `limit` changes are collected.
///
/// `fetch_page(n, start)` returns the raw body of one page of at most `n`
/// changes skipping the first `start`. Paging stops at the limit, on a page
/// without `_more_changes` or on an empty page. Any failed page fails the
/// whole listing.
pub async fn collect_pages<F, Fut>(limit: usize, mut fetch_page: F) -> Result<Vec<Change>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut changes: Vec<Change> = Vec::new();
    while changes.len() < limit {
        let page_size = (limit - changes.len()).min(MAX_PAGE_SIZE);
        let body = fetch_page(page_size, changes.len()).await?;
        let page = parse_change_page(&body)?;

        let received = page.changes.len();
        debug!(received, more = page.more, "change page read");
        changes.extend(page.changes);
        if !page.more || received == 0 {
            break;
        }
    }
    changes.truncate(limit);
    Ok(changes)
}

fn change_from_info(info: ChangeInfo) -> Result<Change> {
    let malformed = |reason: &str| RelayError::MalformedChange {
        change: info.number.to_string(),
        reason: reason.to_string(),
    };

    let revision_id = info
        .current_revision
        .clone()
        .ok_or_else(|| malformed("no current_revision (query without CURRENT_REVISION?)"))?;
    let revision = info
        .revisions
        .get(&revision_id)
        .ok_or_else(|| malformed("current revision missing from revisions"))?;

    let mirror = MirrorRef::from_source_ref(&revision.git_ref)
        .map_err(|_| malformed(&format!("unexpected patchset ref {}", revision.git_ref)))?;
    if mirror.change_number() != info.number || mirror.patchset() != revision.number {
        return Err(malformed(&format!(
            "patchset ref {} does not match change/patchset numbers",
            revision.git_ref
        )));
    }

    let updated = parse_gerrit_timestamp(&info.updated)
        .ok_or_else(|| malformed(&format!("bad timestamp {:?}", info.updated)))?;

    Ok(Change {
        change_number: info.number,
        patchset: revision.number,
        source_ref: revision.git_ref.clone(),
        revision_id,
        project: info.project,
        branch: info.branch,
        subject: info.subject,
        updated,
    })
}

/// Gerrit timestamps are UTC, `yyyy-mm-dd hh:mm:ss.fffffffff`.
pub fn parse_gerrit_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
