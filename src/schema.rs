//! # SQLite Schema
//!
//! Two logical tables back the store, plus a small metadata table for schema
//! versioning.
//!
//! ```text
//! streams                          messages
//! ┌──────────────────┐            ┌───────────────────────────┐
//! │ key  (PK, 40ch)  │◄───────────│ stream_key                │
//! │ name             │            │ position (PK, AUTOINCR)   │
//! │ version          │            │ stream_version            │
//! │ position         │            │ message_id                │
//! │ max_age          │            │ created_utc               │
//! │ max_count        │            │ message_type              │
//! └──────────────────┘            │ payload / metadata        │
//!                                 └───────────────────────────┘
//! ```
//!
//! ## The Position Sequence
//!
//! `messages.position` is an `AUTOINCREMENT` primary key. SQLite guarantees
//! such rowids are strictly increasing and never reused, which is exactly the
//! global-order contract: monotonic with commit order, with permanent holes
//! where a transaction rolled back. Readers must treat positions as sparse.
//!
//! ## Uniqueness
//!
//! - `(stream_key, stream_version)` unique: each slot in a stream is written
//!   once.
//! - `(stream_key, message_id)` unique: a message id appears once per stream,
//!   the anchor of idempotent retry.

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment on breaking schema changes.
///
/// There is no migration machinery: a mismatch is an error and the operator
/// decides what to do with the file.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// The `streams` table: one row per live stream.
///
/// # Columns
///
/// - `key`: 40-char canonical id (digest, or NUL-padded system name)
/// - `name`: the caller's original name, echoed back on reads
/// - `version`: highest assigned stream version; -1 while the stream has no
///   messages
/// - `position`: highest global position among the stream's messages; -1
///   while empty
/// - `max_age`, `max_count`: retention hints. Carried for operators and
///   external tooling; nothing in the engine enforces them.
///
/// A row is created lazily on first successful append and removed by stream
/// deletion.
const CREATE_STREAMS: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    key       TEXT PRIMARY KEY,
    name      TEXT NOT NULL,
    version   INTEGER NOT NULL DEFAULT -1,
    position  INTEGER NOT NULL DEFAULT -1,
    max_age   INTEGER,
    max_count INTEGER
)
"#;

/// The `messages` table: every stored message, across all streams.
///
/// # Columns
///
/// - `position`: global order, allocated by SQLite's AUTOINCREMENT sequence
/// - `stream_key`: the owning stream's canonical id
/// - `stream_version`: 0-based dense position within the stream
/// - `message_id`: caller-supplied UUID, unique per stream
/// - `created_utc`: unix milliseconds from the injected clock
/// - `message_type`: short type tag
/// - `payload`, `metadata`: opaque UTF-8 JSON; `metadata` may be NULL
const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    position       INTEGER PRIMARY KEY AUTOINCREMENT,
    stream_key     TEXT NOT NULL,
    stream_version INTEGER NOT NULL,
    message_id     TEXT NOT NULL,
    created_utc    INTEGER NOT NULL,
    message_type   TEXT NOT NULL,
    payload        TEXT NOT NULL,
    metadata       TEXT
)
"#;

/// Enforces one write per stream slot and supports ordered stream reads.
const CREATE_MESSAGES_BY_VERSION: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS messages_by_stream_version
ON messages(stream_key, stream_version)
"#;

/// Enforces per-stream message-id uniqueness and supports the idempotency
/// probe and single-message lookups.
const CREATE_MESSAGES_BY_ID: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS messages_by_stream_message_id
ON messages(stream_key, message_id)
"#;

/// Key-value metadata, currently just the schema version.
const CREATE_META: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the store's schema applied and verified.
///
/// `Database` owns its `Connection`; dropping it closes the file. The
/// read-write driver opens through here
/// ([`SqliteDriver::open`](crate::sqlite::SqliteDriver::open) unwraps the
/// initialized connection with
/// [`into_connection`](Self::into_connection)), so opening a store always
/// applies pragmas and checks the schema version first. Read-only reader
/// connections skip it; they attach to a database the writer already
/// initialized.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - [`Error::Sqlite`] if the file cannot be opened or created
    /// - [`Error::Schema`] if the file carries a different schema version
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database. Lost when the connection closes;
    /// intended for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Unwraps the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Applies pragmas, creates tables, verifies the schema version.
    ///
    /// Idempotent: all DDL is `IF NOT EXISTS`.
    fn initialize(&mut self) -> Result<()> {
        apply(&self.conn)
    }
}

/// Applies pragmas and DDL to a connection and verifies the schema version.
///
/// Idempotent; safe to re-run against an already-initialized database.
pub(crate) fn apply(conn: &Connection) -> Result<()> {
    // WAL keeps readers unblocked while the writer commits; NORMAL sync
    // bounds the fsync cost to one per commit.
    conn.execute_batch("PRAGMA journal_mode = WAL")?;
    conn.execute_batch("PRAGMA synchronous = NORMAL")?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;

    conn.execute_batch(CREATE_META)?;
    conn.execute_batch(CREATE_STREAMS)?;
    conn.execute_batch(CREATE_MESSAGES)?;
    conn.execute_batch(CREATE_MESSAGES_BY_VERSION)?;
    conn.execute_batch(CREATE_MESSAGES_BY_ID)?;

    verify_or_set_version(conn)?;

    tracing::debug!(version = SCHEMA_VERSION, "schema initialized");
    Ok(())
}

/// Reads the stored schema version, setting it on a fresh database and
/// erroring on a mismatch.
fn verify_or_set_version(conn: &Connection) -> Result<()> {
    let existing: Option<i32> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'schema_version'",
            [],
            |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            },
        )
        .ok();

    match existing {
        None => {
            conn.execute(
                "INSERT INTO store_meta (key, value) VALUES ('schema_version', ?)",
                [SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => {
            return Err(Error::Schema(format!(
                "schema version mismatch: database has version {v}, this build requires {SCHEMA_VERSION}"
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
