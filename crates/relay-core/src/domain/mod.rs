//! Domain models for gerrit-relay.
//!
//! - `Change`: an open Gerrit change at its current patchset
//! - `MirrorRef`: the branch a patchset is mirrored under
//! - `DispatchBatch`: the ordered, limit-bounded selection for one run
//! - `SyncOutcome` / `TriggerOutcome`: what happened to each change

pub mod change;
pub mod error;
pub mod mirror_ref;
pub mod outcome;

pub use change::{Change, DispatchBatch};
pub use error::{RelayError, Result};
pub use mirror_ref::MirrorRef;
pub use outcome::{ChangeOutcome, SyncOutcome, SyncStage, TriggerOutcome, TriggerRecord};
