//! Git remote operations.
//!
//! The relay touches git in four ways: listing the mirror's branches,
//! fetching a patchset ref from Gerrit, pushing it to the mirror and checking
//! that both remotes are configured. [`GitRemote`] is that surface; [`GitCli`]
//! implements it by running the `git` binary in the local clone.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use fs2::FileExt;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::domain::error::{RelayError, Result};
use crate::domain::MirrorRef;

/// Namespace for refs fetched from Gerrit before they are pushed.
pub const FETCH_REF_PREFIX: &str = "refs/relay/fetch";

/// Local ref a patchset is fetched into.
pub fn local_fetch_ref(mirror: &MirrorRef) -> String {
    format!(
        "{}/{}/{}",
        FETCH_REF_PREFIX,
        mirror.change_number(),
        mirror.patchset()
    )
}

/// Direction of a `git remote -v` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDirection {
    Fetch,
    Push,
}

/// One line of `git remote -v`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub url: String,
    pub direction: RemoteDirection,
}

/// Git operations needed by the synchronizer.
#[async_trait]
pub trait GitRemote: Send + Sync {
    /// Configured remotes.
    async fn remotes(&self) -> Result<Vec<RemoteEntry>>;

    /// Mirror branch names present on `remote` (ref listing only).
    async fn list_refs(&self, remote: &str) -> Result<BTreeSet<String>>;

    /// Fetch `source_ref` from `remote` into `local_ref`.
    async fn fetch_ref(&self, remote: &str, source_ref: &str, local_ref: &str) -> Result<()>;

    /// Create `mirror` on `remote` from `local_ref`. Must fail if the branch
    /// already exists.
    async fn push_ref(&self, remote: &str, local_ref: &str, mirror: &MirrorRef) -> Result<()>;

    /// Remove a local ref created by `fetch_ref`.
    async fn delete_local_ref(&self, local_ref: &str) -> Result<()>;
}

/// Check that `gerrit` can be fetched from and `target` pushed to.
pub fn verify_remotes(remotes: &[RemoteEntry], gerrit: &str, target: &str) -> Result<()> {
    let has = |name: &str, direction: RemoteDirection| {
        remotes
            .iter()
            .any(|r| r.name == name && r.direction == direction)
    };

    let got_gerrit = has(gerrit, RemoteDirection::Fetch);
    let got_target = has(target, RemoteDirection::Push);
    info!(got_gerrit, got_target, "checked repository remotes");

    if got_gerrit && got_target {
        Ok(())
    } else {
        let mut missing = Vec::new();
        if !got_gerrit {
            missing.push(format!("fetch remote {gerrit:?}"));
        }
        if !got_target {
            missing.push(format!("push remote {target:?}"));
        }
        Err(RelayError::Config(format!(
            "repository lacks {}",
            missing.join(" and ")
        )))
    }
}

/// Parse `git remote -v` output.
pub fn parse_remotes(stdout: &str) -> Vec<RemoteEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let url = fields.next()?;
            let direction = match fields.next()? {
                "(fetch)" => RemoteDirection::Fetch,
                "(push)" => RemoteDirection::Push,
                _ => return None,
            };
            if fields.next().is_some() {
                return None;
            }
            Some(RemoteEntry {
                name: name.to_string(),
                url: url.to_string(),
                direction,
            })
        })
        .collect()
}

fn ls_remote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-f]+\s+refs/heads/(changes/\d+/\d+/\d+)$").expect("valid regex")
    })
}

/// Mirror branch names in `git ls-remote --heads` output.
///
/// Branches that look like mirror refs but fail validation (wrong shard) are
/// ignored.
pub fn parse_ls_remote(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .filter_map(|line| ls_remote_pattern().captures(line.trim()))
        .filter_map(|caps| MirrorRef::parse(&caps[1]).ok())
        .map(|mirror| mirror.branch_name())
        .collect()
}

/// [`GitRemote`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Run git and return stdout; non-zero exit is an error carrying stderr.
    async fn run_git(&self, args: &[&str]) -> Result<String> {
        info!(cmd = %format!("git {}", args.join(" ")), "running git");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RelayError::GitError(format!("failed to run git: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                cmd = %format!("git {}", args.join(" ")),
                code = output.status.code().unwrap_or(-1),
                stderr = %stderr.trim(),
                "git failed"
            );
            return Err(RelayError::GitError(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        debug!(stdout = %stdout.trim(), "git succeeded");
        Ok(stdout)
    }

    /// Absolute path of the repository's git directory.
    pub async fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_git(&["rev-parse", "--absolute-git-dir"]).await?;
        Ok(PathBuf::from(out.trim()))
    }
}

#[async_trait]
impl GitRemote for GitCli {
    async fn remotes(&self) -> Result<Vec<RemoteEntry>> {
        let out = self.run_git(&["remote", "-v"]).await?;
        Ok(parse_remotes(&out))
    }

    async fn list_refs(&self, remote: &str) -> Result<BTreeSet<String>> {
        let out = self.run_git(&["ls-remote", "--heads", remote]).await?;
        let refs = parse_ls_remote(&out);
        info!(remote = %remote, count = refs.len(), "mirror branches listed");
        Ok(refs)
    }

    async fn fetch_ref(&self, remote: &str, source_ref: &str, local_ref: &str) -> Result<()> {
        let refspec = format!("+{source_ref}:{local_ref}");
        self.run_git(&["fetch", "--no-tags", remote, &refspec])
            .await
            .map(|_| ())
    }

    async fn push_ref(&self, remote: &str, local_ref: &str, mirror: &MirrorRef) -> Result<()> {
        let remote_ref = mirror.remote_ref();
        // An empty lease expectation means "must not exist yet".
        let lease = format!("--force-with-lease={remote_ref}:");
        let refspec = format!("{local_ref}:{remote_ref}");
        self.run_git(&["push", "--no-verify", &lease, remote, &refspec])
            .await
            .map(|_| ())
    }

    async fn delete_local_ref(&self, local_ref: &str) -> Result<()> {
        self.run_git(&["update-ref", "-d", local_ref])
            .await
            .map(|_| ())
    }
}

/// Exclusive claim on a local clone for the duration of a run.
///
/// An advisory lock on `gerrit-relay.lock` in the git directory. The file is
/// left in place; only the lock matters. The kernel drops the lock when the
/// process exits, so a killed run never leaves the clone locked.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: File,
}

impl RepoLock {
    pub const FILE_NAME: &'static str = "gerrit-relay.lock";

    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let path = git_dir.join(Self::FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            debug!(path = %path.display(), error = %e, "repository lock busy");
            return Err(RelayError::LockHeld(path));
        }

        // Holder's pid, for humans inspecting the file.
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!(path = %path.display(), "repository lock acquired");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
