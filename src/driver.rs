//! # Storage Driver Contract
//!
//! The engines never touch SQL directly; they compose the named operations of
//! this trait. Each operation is atomic on its own, and `append_to_stream` in
//! particular runs its whole protocol (head lookup, expected-version
//! arbitration, replay detection, row inserts, head upsert) inside a single
//! transaction.
//!
//! [`SqliteDriver`](crate::sqlite::SqliteDriver) is the one implementation;
//! the trait is the seam that keeps the engines testable and the backend
//! swappable.

use uuid::Uuid;

use crate::error::Result;
use crate::ident::StreamName;
use crate::types::{AppendResult, ExpectedVersion, NewMessage, ReadDirection};

// =============================================================================
// Rows Exchanged With the Engines
// =============================================================================

/// A stream's head coordinates: its highest version and highest global
/// position, both -1 while the stream has no messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHead {
    /// Highest assigned stream version.
    pub version: i64,
    /// Highest global position among the stream's messages.
    pub position: i64,
}

/// One stored message as the driver returns it.
///
/// `payload`/`metadata` are `None` when the page was requested without
/// prefetch; the driver then never reads those columns at all.
#[derive(Debug, Clone)]
pub struct MessageRow {
    /// Caller-supplied unique id.
    pub message_id: Uuid,
    /// The owning stream's original name.
    pub stream_name: String,
    /// 0-based position within the stream.
    pub stream_version: i64,
    /// Global position.
    pub position: i64,
    /// Append timestamp, unix milliseconds.
    pub created_utc: i64,
    /// Short type tag.
    pub message_type: String,
    /// Payload, when prefetched.
    pub payload: Option<String>,
    /// Metadata, when prefetched and present.
    pub metadata: Option<String>,
}

/// Result of a stream page read: the head at read time plus the rows.
#[derive(Debug)]
pub struct StreamPageRows {
    /// The stream's head when the page was read.
    pub head: StreamHead,
    /// The requested rows, already ordered for the read direction.
    pub rows: Vec<MessageRow>,
}

// =============================================================================
// The Contract
// =============================================================================

/// Atomic operations over the relational backend.
///
/// Implementations map concurrency conflicts to
/// [`Error::WrongExpectedVersion`](crate::Error::WrongExpectedVersion) by
/// comparing versions structurally, never by matching backend error strings,
/// and enforce the `(stream, version)` / `(stream, message_id)` uniqueness
/// constraints.
pub trait StorageDriver: Send {
    /// Creates tables, indexes, and the version marker. Idempotent.
    fn create_schema(&mut self) -> Result<()>;

    /// Appends a batch under the expected-version protocol, atomically.
    ///
    /// Inside one transaction: reads the stream head, arbitrates
    /// `expected`, detects idempotent replays of the same batch (returning
    /// the recorded head without inserting anything), allocates dense stream
    /// versions and backend-sequenced global positions, inserts the rows,
    /// and upserts the head. Either the whole batch commits or none of it.
    ///
    /// `created_utc` stamps every row in the batch; the driver has no clock
    /// of its own.
    fn append_to_stream(
        &mut self,
        stream: &StreamName,
        expected: ExpectedVersion,
        messages: &[NewMessage],
        created_utc: i64,
    ) -> Result<AppendResult>;

    /// Reads one page of a stream in the given direction.
    ///
    /// Returns `Ok(None)` when the stream does not exist. `from_version` is
    /// inclusive; callers resolve their own sentinels (e.g. "from the end")
    /// to concrete bounds before calling.
    fn read_stream_page(
        &self,
        canonical: &str,
        from_version: i64,
        count: usize,
        direction: ReadDirection,
        prefetch: bool,
    ) -> Result<Option<StreamPageRows>>;

    /// Reads one page of the global log. `from_position` is exclusive in
    /// both directions.
    fn read_all_page(
        &self,
        from_position: i64,
        count: usize,
        direction: ReadDirection,
        prefetch: bool,
    ) -> Result<Vec<MessageRow>>;

    /// Largest committed global position, or -1 when the store is empty.
    fn read_head_position(&self) -> Result<i64>;

    /// Deletes a stream (all message rows plus the head row) under the
    /// expected-version protocol. Returns `true` iff the stream existed.
    fn delete_stream(&mut self, stream: &StreamName, expected: ExpectedVersion) -> Result<bool>;

    /// Deletes a single message. Returns `true` iff a row was removed.
    /// Never allocates positions; deleting a missing message is a no-op.
    fn delete_message(&mut self, canonical: &str, message_id: Uuid) -> Result<bool>;

    /// Fetches one message's payload and metadata, for lazy (non-prefetch)
    /// readers. `Ok(None)` when the message does not exist.
    fn read_message_data(
        &self,
        canonical: &str,
        message_id: Uuid,
    ) -> Result<Option<(String, Option<String>)>>;
}
