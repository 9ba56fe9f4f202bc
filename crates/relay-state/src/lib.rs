//! Relay-State: persisted run state for gerrit-relay
//!
//! This crate owns everything the relay keeps between invocations. Today that
//! is a single value, the watermark, stored as a GitHub Actions repository
//! variable.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: best-effort persistence that never blocks a run.
//!
//! ## Key Components
//!
//! - `VariableStore`: narrow key-value port
//! - `GithubVariableStore`: REST implementation of the port
//! - `WatermarkStore`: typed watermark read/write with conservative failure
//!   handling

mod error;
pub mod fakes;
pub mod github_variables;
pub mod storage_traits;

pub use error::StateError;
pub use github_variables::{GithubVariableStore, GithubVariablesConfig};
pub use storage_traits::{
    StateResult, VariableStore, Watermark, WatermarkStore, DEFAULT_WATERMARK_VARIABLE,
};
