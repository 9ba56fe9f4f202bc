//! Verdict relay: post the CI result back to the originating patchset.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::{RelayError, Result};
use crate::domain::MirrorRef;

/// Default label voted on by the relay.
pub const DEFAULT_LABEL: &str = "Verified";

/// Binary CI verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// Label vote for this verdict.
    pub fn vote(self) -> i8 {
        match self {
            Verdict::Pass => 1,
            Verdict::Fail => -1,
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" | "passed" | "success" => Ok(Verdict::Pass),
            "fail" | "failed" | "failure" => Ok(Verdict::Fail),
            other => Err(RelayError::Config(format!("unknown verdict {other:?}"))),
        }
    }
}

/// Body of `POST /changes/<n>/revisions/<rev>/review`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInput {
    pub message: String,
    pub labels: BTreeMap<String, i8>,
}

impl ReviewInput {
    pub fn new(label: &str, verdict: Verdict, run_url: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(label.to_string(), verdict.vote());
        Self {
            message: run_url.to_string(),
            labels,
        }
    }
}

/// Review system that accepts label votes.
#[async_trait]
pub trait ReviewPoster: Send + Sync {
    /// `revision` is a revision SHA or a patchset number.
    async fn post_review(
        &self,
        change_number: u64,
        revision: &str,
        review: &ReviewInput,
    ) -> Result<()>;
}

/// Post `verdict` for the patchset mirrored as `branch`.
pub async fn report_verdict(
    poster: &dyn ReviewPoster,
    branch: &str,
    label: &str,
    verdict: Verdict,
    run_url: &str,
) -> Result<MirrorRef> {
    let mirror = MirrorRef::parse(branch)?;
    let review = ReviewInput::new(label, verdict, run_url);

    tracing::info!(
        event = "review.posting",
        change = mirror.change_number(),
        patchset = mirror.patchset(),
        label = %label,
        vote = verdict.vote(),
    );
    poster
        .post_review(
            mirror.change_number(),
            &mirror.patchset().to_string(),
            &review,
        )
        .await?;
    Ok(mirror)
}
