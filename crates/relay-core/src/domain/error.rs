//! Domain-level error taxonomy for gerrit-relay.

use std::path::PathBuf;

use relay_state::StateError;

/// gerrit-relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The change query could not be answered. Fatal for the run.
    #[error("change query failed: {0}")]
    Query(String),

    #[error("malformed change {change}: {reason}")]
    MalformedChange { change: String, reason: String },

    #[error("invalid mirror ref: {0}")]
    InvalidMirrorRef(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("repository is locked by another relay run: {0}")]
    LockHeld(PathBuf),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Http(err.to_string())
    }
}

/// Result type for gerrit-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
