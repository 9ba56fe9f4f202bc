//! Storage trait definitions for gerrit-relay
//!
//! - `VariableStore`: named string variables kept outside the process
//!   (GitHub Actions repository variables in production)
//! - `Watermark`: the persisted progress marker
//! - `WatermarkStore`: best-effort read/write of the watermark on top of a
//!   `VariableStore`
//!
//! The watermark is a scan-window hint only. Reads degrade to `None` and
//! writes never fail the caller; correctness comes from the mirror's refs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StateError;

/// Result type for storage operations
pub type StateResult<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// VariableStore
// ---------------------------------------------------------------------------

/// External key-value store holding string variables.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Read a variable. `Ok(None)` when the variable does not exist.
    async fn read(&self, name: &str) -> StateResult<Option<String>>;

    /// Create or overwrite a variable.
    async fn write(&self, name: &str, value: &str) -> StateResult<()>;
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Unix-seconds timestamp of the newest point already processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(i64);

impl Watermark {
    pub fn from_unix(seconds: i64) -> Self {
        Watermark(seconds)
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Watermark(at.timestamp())
    }

    pub fn as_unix(self) -> i64 {
        self.0
    }

    /// The watermark as a UTC datetime. Out-of-range values clamp to the epoch.
    pub fn as_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0, 0)
            .single()
            .unwrap_or_default()
    }

    /// Parse the stored representation (decimal unix seconds).
    pub fn parse(name: &str, value: &str) -> StateResult<Self> {
        value
            .trim()
            .parse::<i64>()
            .map(Watermark)
            .map_err(|_| StateError::InvalidValue {
                name: name.to_string(),
                value: value.to_string(),
            })
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_datetime().format("%Y-%m-%d %H:%M:%S"))
    }
}

// ---------------------------------------------------------------------------
// WatermarkStore
// ---------------------------------------------------------------------------

/// Default variable name, shared with the workflow that schedules the relay.
pub const DEFAULT_WATERMARK_VARIABLE: &str = "LAST_TIMESTAMP";

/// Watermark persistence on top of a [`VariableStore`].
#[derive(Clone)]
pub struct WatermarkStore {
    store: Arc<dyn VariableStore>,
    variable: String,
}

impl WatermarkStore {
    pub fn new(store: Arc<dyn VariableStore>, variable: impl Into<String>) -> Self {
        Self {
            store,
            variable: variable.into(),
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Read the watermark. Any failure is logged and reported as `None`.
    pub async fn read_watermark(&self) -> Option<Watermark> {
        let raw = match self.store.read(&self.variable).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!(variable = %self.variable, "no watermark stored");
                return None;
            }
            Err(e) => {
                warn!(variable = %self.variable, error = %e, "watermark read failed");
                return None;
            }
        };

        match Watermark::parse(&self.variable, &raw) {
            Ok(mark) => {
                info!(variable = %self.variable, watermark = %mark, "watermark loaded");
                Some(mark)
            }
            Err(e) => {
                warn!(error = %e, "ignoring unparsable watermark");
                None
            }
        }
    }

    /// Persist the watermark. Returns `false` (after logging) on failure.
    pub async fn write_watermark(&self, mark: Watermark) -> bool {
        match self
            .store
            .write(&self.variable, &mark.as_unix().to_string())
            .await
        {
            Ok(()) => {
                info!(variable = %self.variable, watermark = %mark, "watermark saved");
                true
            }
            Err(e) => {
                warn!(variable = %self.variable, error = %e, "watermark write failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for WatermarkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkStore")
            .field("variable", &self.variable)
            .finish_non_exhaustive()
    }
}
