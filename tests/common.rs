#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stratadb::{EventStore, ManualClock, NewMessage, StoreConfig};

/// A fixed instant all test clocks start from.
pub const EPOCH_MS: i64 = 1_700_000_000_000;

/// Opens a file-backed store in a fresh temp dir with a manual clock.
///
/// The temp dir must be kept alive for the duration of the test.
pub async fn open_file_store(name: &str) -> (tempfile::TempDir, EventStore, Arc<ManualClock>) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let (store, clock) = open_at(&path).await;
    (dir, store, clock)
}

/// Opens (or reopens) a store at an explicit path with a manual clock.
pub async fn open_at(path: &PathBuf) -> (EventStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(EPOCH_MS));
    let config = StoreConfig::default().with_clock(clock.clone());
    let store = EventStore::open_with(path, config).await.expect("open store");
    (store, clock)
}

/// Opens an in-memory store with a manual clock.
pub async fn open_memory_store() -> (EventStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(EPOCH_MS));
    let config = StoreConfig::default().with_clock(clock.clone());
    let store = EventStore::open_in_memory_with(config)
        .await
        .expect("open in-memory store");
    (store, clock)
}

/// A deterministic message id.
pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// A test message with a deterministic id and JSON payload.
pub fn msg(n: u128) -> NewMessage {
    NewMessage::new(id(n), "test-event", format!(r#"{{"n":{n}}}"#))
}

/// A fresh, un-cancelled token.
pub fn token() -> CancellationToken {
    CancellationToken::new()
}
