//! Error types for relay-state

use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// Transport-level HTTP failure (connection, TLS, body read)
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The store answered with an unexpected status code
    #[error("unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// A stored value could not be interpreted
    #[error("invalid value for variable {name}: {value:?}")]
    InvalidValue { name: String, value: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Store is not usable (bad URL, missing credentials)
    #[error("variable store misconfigured: {0}")]
    Configuration(String),

    /// Fault injected by an in-memory fake
    #[error("injected failure: {0}")]
    Injected(String),
}

impl From<reqwest::Error> for StateError {
    fn from(err: reqwest::Error) -> Self {
        StateError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}
