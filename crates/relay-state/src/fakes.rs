//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryVariableStore`, which satisfies the `VariableStore`
//! contract without any network access and can be told to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StateError;
use crate::storage_traits::{StateResult, VariableStore};

/// In-memory variable store backed by a `HashMap<name, value>`.
#[derive(Debug, Default)]
pub struct MemoryVariableStore {
    vars: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one variable.
    pub fn with_var(name: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .vars
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        store
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current value, bypassing failure injection.
    pub fn get(&self, name: &str) -> Option<String> {
        self.vars.lock().unwrap().get(name).cloned()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VariableStore for MemoryVariableStore {
    async fn read(&self, name: &str) -> StateResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StateError::Injected(format!("read {name}")));
        }
        Ok(self.get(name))
    }

    async fn write(&self, name: &str, value: &str) -> StateResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::Injected(format!("write {name}")));
        }
        self.vars
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
