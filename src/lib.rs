//! # StrataDB - Append-Only Event Store on SQLite
//!
//! StrataDB is a stream-oriented event store layered on SQLite. Clients
//! identify logical streams by name, append ordered message batches under
//! optimistic concurrency control, and read them forwards or backwards,
//! either per-stream or across the whole store in one global order.
//!
//! - **Optimistic, idempotent appends**: every append states an expected
//!   stream version; retrying the same batch is recognized and never
//!   double-writes.
//! - **Dual ordering**: each message has a dense per-stream version and a
//!   sparse, monotonic global position, assigned atomically with the insert.
//! - **Look-ahead paging**: pages fetch one extra row to learn end-of-stream
//!   in the same round-trip, forwards and backwards, with optional lazy
//!   payloads.
//! - **Audited deletes**: soft stream deletes and hard message deletes leave
//!   events in the `$deleted` system stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Async API Layer                           │
//! │            (append, read pages, delete, close)                  │
//! └───────────────┬─────────────────────────────┬───────────────────┘
//!                 ▼                             ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────────┐
//! │       Writer Thread       │   │          Reader Pool            │
//! │ (owns the R/W connection, │   │ (read-only connections, pooled  │
//! │  strictly sequential      │   │  request channel, look-ahead    │
//! │  append/delete engines)   │   │  paging)                        │
//! └───────────────┬───────────┘   └───────────────┬─────────────────┘
//!                 └───────────────┬───────────────┘
//!                                 ▼
//!                        ┌─────────────────┐
//!                        │  SQLite (WAL)   │
//!                        └─────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. Within a stream, versions are exactly `0, 1, …, head`: dense, gap-free
//!    at append time (hard message deletes may later remove rows, never
//!    renumber them).
//! 2. Global positions strictly increase with commit order and are never
//!    reused; readers must treat them as sparse.
//! 3. `(stream, message_id)` identifies a message; replaying a batch yields
//!    the identical result and writes nothing.
//! 4. A read that starts after an append completes observes that append.
//! 5. The `$deleted` audit stream is append-only and immutable from outside.
//!
//! ## Module Organization
//!
//! - [`error`]: the single error enum
//! - [`types`]: messages, pages, sentinels, expected versions
//! - [`ident`]: stream name canonicalization
//! - [`clock`]: injected time source
//! - [`schema`]: SQLite DDL and initialization
//! - [`driver`]: the storage driver contract
//! - [`sqlite`]: the SQLite driver implementation
//! - [`api`]: the public async handle
//! - `writer` / `reader`: the engines behind the worker threads

pub mod api;
pub mod clock;
pub mod driver;
pub mod error;
pub mod ident;
pub mod schema;
pub mod sqlite;
pub mod types;

mod reader;
mod writer;

pub use api::{EventStore, StoreConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{MessageRow, StorageDriver, StreamHead, StreamPageRows};
pub use error::{Error, Result};
pub use ident::{StreamName, ALL_STREAM, DELETED_STREAM, MESSAGE_DELETED_TYPE, STREAM_DELETED_TYPE};
pub use schema::Database;
pub use sqlite::SqliteDriver;
pub use types::{
    AppendResult, ExpectedVersion, Message, NewMessage, PageReadStatus, Position, ReadAllPage,
    ReadDirection, ReadStreamPage, StreamVersion,
};
