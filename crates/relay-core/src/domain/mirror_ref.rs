//! Branch names under which patchsets are mirrored.
//!
//! A patchset `ps` of change `n` is mirrored as the branch
//! `changes/<shard>/<n>/<ps>`, where `shard` is `n % 100` zero-padded to two
//! digits. This is Gerrit's own `refs/changes/..` layout with the `refs/`
//! prefix dropped, so the name is stable across runs and distinct for every
//! patchset of a change.

use serde::{Deserialize, Serialize};

use super::error::{RelayError, Result};

const BRANCH_PREFIX: &str = "changes/";
const HEADS_PREFIX: &str = "refs/heads/";
const GERRIT_PREFIX: &str = "refs/";

/// Mirrored branch name for one patchset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MirrorRef {
    change_number: u64,
    patchset: u32,
}

impl MirrorRef {
    pub fn new(change_number: u64, patchset: u32) -> Self {
        Self {
            change_number,
            patchset,
        }
    }

    pub fn change_number(&self) -> u64 {
        self.change_number
    }

    pub fn patchset(&self) -> u32 {
        self.patchset
    }

    /// Two-digit shard directory.
    pub fn shard(&self) -> String {
        format!("{:02}", self.change_number % 100)
    }

    /// Branch name on the mirror, e.g. `changes/34/1234/5`.
    pub fn branch_name(&self) -> String {
        format!(
            "{}{}/{}/{}",
            BRANCH_PREFIX,
            self.shard(),
            self.change_number,
            self.patchset
        )
    }

    /// Fully qualified ref on the mirror, e.g. `refs/heads/changes/34/1234/5`.
    pub fn remote_ref(&self) -> String {
        format!("{}{}", HEADS_PREFIX, self.branch_name())
    }

    /// The patchset ref on Gerrit, e.g. `refs/changes/34/1234/5`.
    pub fn source_ref(&self) -> String {
        format!("{}{}", GERRIT_PREFIX, self.branch_name())
    }

    /// Parse a mirror branch name. `refs/heads/` is accepted and stripped.
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        let branch = name.strip_prefix(HEADS_PREFIX).unwrap_or(name);
        Self::parse_branch(branch).ok_or_else(|| RelayError::InvalidMirrorRef(name.to_string()))
    }

    /// Parse a Gerrit patchset ref (`refs/changes/<shard>/<n>/<ps>`).
    pub fn from_source_ref(git_ref: &str) -> Result<Self> {
        git_ref
            .strip_prefix(GERRIT_PREFIX)
            .and_then(Self::parse_branch)
            .ok_or_else(|| RelayError::InvalidMirrorRef(git_ref.to_string()))
    }

    fn parse_branch(branch: &str) -> Option<Self> {
        let rest = branch.strip_prefix(BRANCH_PREFIX)?;
        let mut parts = rest.split('/');
        let shard = parts.next()?;
        let change_number: u64 = parse_decimal(parts.next()?)?;
        let patchset: u32 = parse_decimal(parts.next()?)?;
        if parts.next().is_some() || change_number == 0 || patchset == 0 {
            return None;
        }

        let parsed = Self::new(change_number, patchset);
        (parsed.shard() == shard).then_some(parsed)
    }
}

fn parse_decimal<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl std::fmt::Display for MirrorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.branch_name())
    }
}

impl TryFrom<String> for MirrorRef {
    type Error = RelayError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<MirrorRef> for String {
    fn from(r: MirrorRef) -> Self {
        r.branch_name()
    }
}
