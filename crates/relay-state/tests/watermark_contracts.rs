//! Contract tests for VariableStore and WatermarkStore.
//!
//! These run against the in-memory fake; any conforming `VariableStore`
//! must behave the same way.

use std::sync::Arc;

use relay_state::fakes::MemoryVariableStore;
use relay_state::{VariableStore, Watermark, WatermarkStore, DEFAULT_WATERMARK_VARIABLE};

// ===========================================================================
// VariableStore contract tests
// ===========================================================================

#[tokio::test]
async fn variable_read_missing_is_none() {
    let store = MemoryVariableStore::new();
    assert_eq!(store.read("NOPE").await.unwrap(), None);
}

#[tokio::test]
async fn variable_write_then_read() {
    let store = MemoryVariableStore::new();
    store.write("LAST_TIMESTAMP", "42").await.unwrap();
    assert_eq!(
        store.read("LAST_TIMESTAMP").await.unwrap().as_deref(),
        Some("42")
    );
}

#[tokio::test]
async fn variable_write_overwrites() {
    let store = MemoryVariableStore::with_var("LAST_TIMESTAMP", "1");
    store.write("LAST_TIMESTAMP", "2").await.unwrap();
    assert_eq!(store.get("LAST_TIMESTAMP").as_deref(), Some("2"));
}

// ===========================================================================
// WatermarkStore behaviour
// ===========================================================================

fn watermark_store(inner: Arc<MemoryVariableStore>) -> WatermarkStore {
    WatermarkStore::new(inner, DEFAULT_WATERMARK_VARIABLE)
}

#[tokio::test]
async fn watermark_absent_reads_none() {
    let inner = Arc::new(MemoryVariableStore::new());
    assert_eq!(watermark_store(inner).read_watermark().await, None);
}

#[tokio::test]
async fn watermark_round_trip() {
    let inner = Arc::new(MemoryVariableStore::new());
    let store = watermark_store(inner.clone());

    assert!(store.write_watermark(Watermark::from_unix(1_700_000_000)).await);
    assert_eq!(
        store.read_watermark().await,
        Some(Watermark::from_unix(1_700_000_000))
    );
    assert_eq!(inner.get("LAST_TIMESTAMP").as_deref(), Some("1700000000"));
}

#[tokio::test]
async fn watermark_read_failure_degrades_to_none() {
    let inner = Arc::new(MemoryVariableStore::with_var("LAST_TIMESTAMP", "100"));
    inner.set_fail_reads(true);

    assert_eq!(watermark_store(inner).read_watermark().await, None);
}

#[tokio::test]
async fn watermark_garbage_value_degrades_to_none() {
    let inner = Arc::new(MemoryVariableStore::with_var("LAST_TIMESTAMP", "soon"));
    assert_eq!(watermark_store(inner).read_watermark().await, None);
}

#[tokio::test]
async fn watermark_write_failure_is_reported_not_raised() {
    let inner = Arc::new(MemoryVariableStore::new());
    inner.set_fail_writes(true);
    let store = watermark_store(inner.clone());

    assert!(!store.write_watermark(Watermark::from_unix(5)).await);
    assert_eq!(inner.write_count(), 0);
}
