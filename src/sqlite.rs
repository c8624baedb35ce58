//! # SQLite Driver
//!
//! The one [`StorageDriver`] implementation. The writer thread owns a
//! read-write driver; each reader thread owns a read-only one (file mode).
//!
//! ## Append Protocol
//!
//! `append_to_stream` runs entirely inside one `BEGIN IMMEDIATE` transaction:
//!
//! 1. Read the stream head.
//! 2. Arbitrate the expected version against it.
//! 3. If the head moved past the expectation, probe whether the submitted
//!    batch is an in-order replay of already-stored messages; if so, report
//!    the recorded head and insert nothing.
//! 4. Otherwise insert the rows. Stream versions are assigned densely from
//!    the head; global positions come from the `AUTOINCREMENT` sequence, so
//!    they are monotonic with commit order and never reused.
//! 5. Upsert the stream head.
//!
//! `IMMEDIATE` takes the write lock up front, so the head read inside the
//! transaction cannot be invalidated by a concurrent writer. Conflicts are
//! decided by comparing versions in code, never by parsing SQLite error
//! text.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use uuid::Uuid;

use crate::driver::{MessageRow, StorageDriver, StreamHead, StreamPageRows};
use crate::error::{Error, Result};
use crate::ident::StreamName;
use crate::schema::{self, Database};
use crate::types::{AppendResult, ExpectedVersion, NewMessage, ReadDirection};

// =============================================================================
// Driver
// =============================================================================

/// SQLite-backed storage driver.
#[derive(Debug)]
pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    /// Opens (or creates) a database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path)?;
        Ok(Self {
            conn: db.into_connection(),
        })
    }

    /// Opens an in-memory database with the schema applied. For tests and
    /// single-connection stores.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            conn: db.into_connection(),
        })
    }

    /// Opens a read-only connection to an existing database file.
    ///
    /// Read-only drivers serve the reader pool; calling a mutating trait
    /// method on one fails at the SQLite level.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// The stream row, if any: original name plus head coordinates.
    fn stream_row(&self, canonical: &str) -> Result<Option<(String, StreamHead)>> {
        let row = self.conn.query_row(
            "SELECT name, version, position FROM streams WHERE key = ?1",
            [canonical],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    StreamHead {
                        version: row.get(1)?,
                        position: row.get(2)?,
                    },
                ))
            },
        );
        match row {
            Ok(found) => Ok(Some(found)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The stream version holding `message_id`, if the id is present.
    fn version_of(&self, canonical: &str, message_id: Uuid) -> Result<Option<i64>> {
        let row = self.conn.query_row(
            "SELECT stream_version FROM messages WHERE stream_key = ?1 AND message_id = ?2",
            params![canonical, message_id.to_string()],
            |row| row.get::<_, i64>(0),
        );
        match row {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// True iff the batch matches, id for id and in order, the run of stored
    /// messages beginning at `start_version`.
    ///
    /// This is the idempotency probe: a full match means the batch was
    /// already applied and must not be inserted again.
    fn replay_matches(
        &self,
        canonical: &str,
        start_version: i64,
        messages: &[NewMessage],
    ) -> Result<bool> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id FROM messages
             WHERE stream_key = ?1 AND stream_version >= ?2
             ORDER BY stream_version ASC
             LIMIT ?3",
        )?;
        let stored: Vec<String> = stmt
            .query_map(
                params![canonical, start_version, messages.len() as i64],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<_>>()?;

        if stored.len() != messages.len() {
            return Ok(false);
        }
        Ok(stored
            .iter()
            .zip(messages)
            .all(|(stored_id, m)| *stored_id == m.message_id.to_string()))
    }

    // =========================================================================
    // Append (inside the transaction)
    // =========================================================================

    fn append_in_tx(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        messages: &[NewMessage],
        created_utc: i64,
    ) -> Result<AppendResult> {
        let canonical = stream.canonical();
        let head = self.stream_row(canonical)?;
        let current = head.as_ref().map(|(_, h)| h.version);
        let current_version = current.unwrap_or(-1);

        let conflict = |actual: Option<i64>| Error::WrongExpectedVersion {
            stream: stream.original().to_string(),
            expected: expected.as_raw(),
            actual,
        };

        // A batch that repeats a message id can be neither applied nor
        // replayed; reject before touching anything.
        let mut seen = HashSet::with_capacity(messages.len());
        for m in messages {
            if !seen.insert(m.message_id) {
                return Err(conflict(current));
            }
        }

        // Arbitrate the expectation. Each arm either settles the starting
        // version for a fresh append, or returns early (replay detected, or
        // conflict).
        let start_version: i64 = match expected {
            ExpectedVersion::Any => {
                if current_version < 0 {
                    0
                } else if messages.is_empty() {
                    return Ok(head_result(&head));
                } else if let Some(at) = self.version_of(canonical, messages[0].message_id)? {
                    // First id already stored: the whole batch must be a
                    // replay of the run starting there.
                    if self.replay_matches(canonical, at, messages)? {
                        return Ok(head_result(&head));
                    }
                    return Err(conflict(Some(current_version)));
                } else {
                    current_version + 1
                }
            }
            ExpectedVersion::NoStream => {
                if current_version < 0 {
                    0
                } else {
                    if !messages.is_empty() && self.replay_matches(canonical, 0, messages)? {
                        return Ok(head_result(&head));
                    }
                    return Err(conflict(Some(current_version)));
                }
            }
            ExpectedVersion::EmptyStream => match current {
                None => return Err(conflict(None)),
                Some(v) if v < 0 => 0,
                Some(v) => {
                    if !messages.is_empty() && self.replay_matches(canonical, 0, messages)? {
                        return Ok(head_result(&head));
                    }
                    return Err(conflict(Some(v)));
                }
            },
            ExpectedVersion::Exact(n) => {
                let n = n as i64;
                match current {
                    None => return Err(conflict(None)),
                    Some(v) if v == n => n + 1,
                    Some(v) if v > n => {
                        if !messages.is_empty()
                            && self.replay_matches(canonical, n + 1, messages)?
                        {
                            return Ok(head_result(&head));
                        }
                        return Err(conflict(Some(v)));
                    }
                    Some(v) => return Err(conflict(Some(v))),
                }
            }
        };

        // Fresh append. No batch id may collide with a stored message that
        // the replay probe did not claim; such a collision is a conflict,
        // not a constraint fault.
        if !messages.is_empty() {
            let mut probe = self.conn.prepare(
                "SELECT 1 FROM messages WHERE stream_key = ?1 AND message_id = ?2 LIMIT 1",
            )?;
            for m in messages {
                if probe.exists(params![canonical, m.message_id.to_string()])? {
                    return Err(conflict(current));
                }
            }
        }

        let mut version = start_version;
        {
            let mut insert = self.conn.prepare(
                "INSERT INTO messages
                   (stream_key, stream_version, message_id, created_utc, message_type, payload, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for m in messages {
                insert.execute(params![
                    canonical,
                    version,
                    m.message_id.to_string(),
                    created_utc,
                    m.message_type,
                    m.payload,
                    m.metadata,
                ])?;
                version += 1;
            }
        }

        let (new_version, new_position) = if messages.is_empty() {
            // Expectation satisfied with nothing to write: ensure the stream
            // row exists (this is how an empty stream comes into being) and
            // report the unchanged head.
            (
                current_version,
                head.as_ref().map(|(_, h)| h.position).unwrap_or(-1),
            )
        } else {
            (
                start_version + messages.len() as i64 - 1,
                self.conn.last_insert_rowid(),
            )
        };

        self.conn.execute(
            "INSERT INTO streams (key, name, version, position) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET version = excluded.version, position = excluded.position",
            params![canonical, stream.original(), new_version, new_position],
        )?;

        Ok(AppendResult {
            current_version: new_version,
            current_position: new_position,
        })
    }

    fn delete_stream_in_tx(&self, stream: &StreamName, expected: ExpectedVersion) -> Result<bool> {
        let canonical = stream.canonical();
        let head = self.stream_row(canonical)?;
        let current = head.as_ref().map(|(_, h)| h.version);

        let conflict = |actual: Option<i64>| Error::WrongExpectedVersion {
            stream: stream.original().to_string(),
            expected: expected.as_raw(),
            actual,
        };

        match expected {
            ExpectedVersion::Any => {}
            ExpectedVersion::NoStream => {
                if let Some(v) = current {
                    if v >= 0 {
                        return Err(conflict(Some(v)));
                    }
                }
            }
            ExpectedVersion::EmptyStream => match current {
                None => return Err(conflict(None)),
                Some(v) if v >= 0 => return Err(conflict(Some(v))),
                Some(_) => {}
            },
            ExpectedVersion::Exact(n) => match current {
                None => return Err(conflict(None)),
                Some(v) if v != n as i64 => return Err(conflict(Some(v))),
                Some(_) => {}
            },
        }

        if head.is_none() {
            return Ok(false);
        }

        self.conn
            .execute("DELETE FROM messages WHERE stream_key = ?1", [canonical])?;
        self.conn
            .execute("DELETE FROM streams WHERE key = ?1", [canonical])?;
        Ok(true)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction, committing on
    /// success and rolling back on any error.
    fn in_transaction<T>(&mut self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.conn.execute("BEGIN IMMEDIATE", [])?;
        match f(self) {
            Ok(value) => match self.conn.execute("COMMIT", []) {
                Ok(_) => Ok(value),
                Err(e) => {
                    let _ = self.conn.execute("ROLLBACK", []);
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

/// The head reported back for an idempotent no-op.
fn head_result(head: &Option<(String, StreamHead)>) -> AppendResult {
    match head {
        Some((_, h)) => AppendResult {
            current_version: h.version,
            current_position: h.position,
        },
        None => AppendResult {
            current_version: -1,
            current_position: -1,
        },
    }
}

// =============================================================================
// StorageDriver Implementation
// =============================================================================

impl StorageDriver for SqliteDriver {
    fn create_schema(&mut self) -> Result<()> {
        schema::apply(&self.conn)
    }

    fn append_to_stream(
        &mut self,
        stream: &StreamName,
        expected: ExpectedVersion,
        messages: &[NewMessage],
        created_utc: i64,
    ) -> Result<AppendResult> {
        tracing::debug!(
            stream = stream.original(),
            expected = %expected,
            count = messages.len(),
            "append"
        );
        self.in_transaction(|driver| driver.append_in_tx(stream, expected, messages, created_utc))
    }

    fn read_stream_page(
        &self,
        canonical: &str,
        from_version: i64,
        count: usize,
        direction: ReadDirection,
        prefetch: bool,
    ) -> Result<Option<StreamPageRows>> {
        let Some((name, head)) = self.stream_row(canonical)? else {
            return Ok(None);
        };

        let sql = match (direction, prefetch) {
            (ReadDirection::Forward, true) => {
                "SELECT position, stream_version, message_id, created_utc, message_type, payload, metadata
                 FROM messages WHERE stream_key = ?1 AND stream_version >= ?2
                 ORDER BY stream_version ASC LIMIT ?3"
            }
            (ReadDirection::Forward, false) => {
                "SELECT position, stream_version, message_id, created_utc, message_type
                 FROM messages WHERE stream_key = ?1 AND stream_version >= ?2
                 ORDER BY stream_version ASC LIMIT ?3"
            }
            (ReadDirection::Backward, true) => {
                "SELECT position, stream_version, message_id, created_utc, message_type, payload, metadata
                 FROM messages WHERE stream_key = ?1 AND stream_version <= ?2
                 ORDER BY stream_version DESC LIMIT ?3"
            }
            (ReadDirection::Backward, false) => {
                "SELECT position, stream_version, message_id, created_utc, message_type
                 FROM messages WHERE stream_key = ?1 AND stream_version <= ?2
                 ORDER BY stream_version DESC LIMIT ?3"
            }
        };

        let mut stmt = self.conn.prepare(sql)?;
        let raw: Vec<RawRow> = stmt
            .query_map(params![canonical, from_version, count as i64], |row| {
                let (payload, metadata) = if prefetch {
                    (Some(row.get::<_, String>(5)?), row.get::<_, Option<String>>(6)?)
                } else {
                    (None, None)
                };
                Ok(RawRow {
                    position: row.get(0)?,
                    stream_version: row.get(1)?,
                    message_id: row.get(2)?,
                    created_utc: row.get(3)?,
                    message_type: row.get(4)?,
                    stream_name: None,
                    payload,
                    metadata,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let rows = raw
            .into_iter()
            .map(|r| r.into_message_row(&name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(StreamPageRows { head, rows }))
    }

    fn read_all_page(
        &self,
        from_position: i64,
        count: usize,
        direction: ReadDirection,
        prefetch: bool,
    ) -> Result<Vec<MessageRow>> {
        let sql = match (direction, prefetch) {
            (ReadDirection::Forward, true) => {
                "SELECT m.position, m.stream_version, m.message_id, m.created_utc, m.message_type, s.name, m.payload, m.metadata
                 FROM messages m JOIN streams s ON s.key = m.stream_key
                 WHERE m.position > ?1 ORDER BY m.position ASC LIMIT ?2"
            }
            (ReadDirection::Forward, false) => {
                "SELECT m.position, m.stream_version, m.message_id, m.created_utc, m.message_type, s.name
                 FROM messages m JOIN streams s ON s.key = m.stream_key
                 WHERE m.position > ?1 ORDER BY m.position ASC LIMIT ?2"
            }
            (ReadDirection::Backward, true) => {
                "SELECT m.position, m.stream_version, m.message_id, m.created_utc, m.message_type, s.name, m.payload, m.metadata
                 FROM messages m JOIN streams s ON s.key = m.stream_key
                 WHERE m.position < ?1 ORDER BY m.position DESC LIMIT ?2"
            }
            (ReadDirection::Backward, false) => {
                "SELECT m.position, m.stream_version, m.message_id, m.created_utc, m.message_type, s.name
                 FROM messages m JOIN streams s ON s.key = m.stream_key
                 WHERE m.position < ?1 ORDER BY m.position DESC LIMIT ?2"
            }
        };

        let mut stmt = self.conn.prepare(sql)?;
        let raw: Vec<RawRow> = stmt
            .query_map(params![from_position, count as i64], |row| {
                let (payload, metadata) = if prefetch {
                    (Some(row.get::<_, String>(6)?), row.get::<_, Option<String>>(7)?)
                } else {
                    (None, None)
                };
                Ok(RawRow {
                    position: row.get(0)?,
                    stream_version: row.get(1)?,
                    message_id: row.get(2)?,
                    created_utc: row.get(3)?,
                    message_type: row.get(4)?,
                    stream_name: Some(row.get(5)?),
                    payload,
                    metadata,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        raw.into_iter().map(|r| r.into_message_row("")).collect()
    }

    fn read_head_position(&self) -> Result<i64> {
        let head: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position), -1) FROM messages",
            [],
            |row| row.get(0),
        )?;
        Ok(head)
    }

    fn delete_stream(&mut self, stream: &StreamName, expected: ExpectedVersion) -> Result<bool> {
        tracing::debug!(stream = stream.original(), expected = %expected, "delete stream");
        self.in_transaction(|driver| driver.delete_stream_in_tx(stream, expected))
    }

    fn delete_message(&mut self, canonical: &str, message_id: Uuid) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM messages WHERE stream_key = ?1 AND message_id = ?2",
            params![canonical, message_id.to_string()],
        )?;
        Ok(removed > 0)
    }

    fn read_message_data(
        &self,
        canonical: &str,
        message_id: Uuid,
    ) -> Result<Option<(String, Option<String>)>> {
        let row = self.conn.query_row(
            "SELECT payload, metadata FROM messages WHERE stream_key = ?1 AND message_id = ?2",
            params![canonical, message_id.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        );
        match row {
            Ok(found) => Ok(Some(found)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

/// A row as SQLite hands it back, before the message id is parsed.
struct RawRow {
    position: i64,
    stream_version: i64,
    message_id: String,
    created_utc: i64,
    message_type: String,
    stream_name: Option<String>,
    payload: Option<String>,
    metadata: Option<String>,
}

impl RawRow {
    /// Finishes decoding; `fallback_name` supplies the stream name when the
    /// query did not join it (stream page reads know their stream already).
    fn into_message_row(self, fallback_name: &str) -> Result<MessageRow> {
        let message_id = Uuid::parse_str(&self.message_id).map_err(|e| {
            Error::Schema(format!(
                "stored message id '{}' is not a valid uuid: {e}",
                self.message_id
            ))
        })?;
        Ok(MessageRow {
            message_id,
            stream_name: self.stream_name.unwrap_or_else(|| fallback_name.to_string()),
            stream_version: self.stream_version,
            position: self.position,
            created_utc: self.created_utc,
            message_type: self.message_type,
            payload: self.payload,
            metadata: self.metadata,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> SqliteDriver {
        SqliteDriver::open_in_memory().expect("in-memory driver")
    }

    fn name(s: &str) -> StreamName {
        StreamName::canonicalize(s).unwrap()
    }

    fn msg(n: u128) -> NewMessage {
        NewMessage::new(Uuid::from_u128(n), "test", format!(r#"{{"n":{n}}}"#))
    }

    #[test]
    fn test_append_to_new_stream_starts_at_version_zero() {
        let mut d = driver();
        let s = name("s1");

        let r = d
            .append_to_stream(&s, ExpectedVersion::NoStream, &[msg(1), msg(2)], 100)
            .unwrap();
        assert_eq!(r.current_version, 1);
        assert!(r.current_position >= 1);

        let page = d
            .read_stream_page(s.canonical(), 0, 10, ReadDirection::Forward, true)
            .unwrap()
            .unwrap();
        assert_eq!(page.head.version, 1);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0].stream_version, 0);
        assert_eq!(page.rows[0].created_utc, 100);
        assert_eq!(page.rows[0].payload.as_deref(), Some(r#"{"n":1}"#));
    }

    #[test]
    fn test_append_conflict_reports_versions() {
        let mut d = driver();
        let s = name("s1");
        d.append_to_stream(&s, ExpectedVersion::NoStream, &[msg(1)], 0)
            .unwrap();

        let err = d
            .append_to_stream(&s, ExpectedVersion::NoStream, &[msg(2)], 0)
            .unwrap_err();
        match err {
            Error::WrongExpectedVersion {
                expected, actual, ..
            } => {
                assert_eq!(expected, -1);
                assert_eq!(actual, Some(0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_idempotent_replay_returns_recorded_head() {
        let mut d = driver();
        let s = name("s1");
        let batch = [msg(1), msg(2), msg(3)];

        let first = d
            .append_to_stream(&s, ExpectedVersion::NoStream, &batch, 0)
            .unwrap();
        let replay = d
            .append_to_stream(&s, ExpectedVersion::NoStream, &batch, 0)
            .unwrap();
        assert_eq!(first, replay);

        // Nothing extra was written.
        assert_eq!(d.read_head_position().unwrap(), first.current_position);
    }

    #[test]
    fn test_partial_replay_with_exact_expectation() {
        let mut d = driver();
        let s = name("s1");
        d.append_to_stream(&s, ExpectedVersion::NoStream, &[msg(1), msg(2), msg(3)], 0)
            .unwrap();

        // Replay of the run at versions 1..2 against expected = 0.
        let r = d
            .append_to_stream(&s, ExpectedVersion::Exact(0), &[msg(2), msg(3)], 0)
            .unwrap();
        assert_eq!(r.current_version, 2);

        // Same expectation, different ids: conflict.
        let err = d
            .append_to_stream(&s, ExpectedVersion::Exact(0), &[msg(2), msg(9)], 0)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_any_appends_at_head_and_replays() {
        let mut d = driver();
        let s = name("s1");
        d.append_to_stream(&s, ExpectedVersion::Any, &[msg(1)], 0)
            .unwrap();
        let r = d
            .append_to_stream(&s, ExpectedVersion::Any, &[msg(2)], 0)
            .unwrap();
        assert_eq!(r.current_version, 1);

        // Replaying the first batch changes nothing.
        let replay = d
            .append_to_stream(&s, ExpectedVersion::Any, &[msg(1)], 0)
            .unwrap();
        assert_eq!(replay.current_version, 1);
        assert_eq!(replay.current_position, r.current_position);
    }

    #[test]
    fn test_duplicate_id_not_at_replay_position_conflicts() {
        let mut d = driver();
        let s = name("s1");
        d.append_to_stream(&s, ExpectedVersion::NoStream, &[msg(1), msg(2)], 0)
            .unwrap();

        // msg(2) exists at version 1, not at the fresh-append position.
        let err = d
            .append_to_stream(&s, ExpectedVersion::Exact(1), &[msg(3), msg(2)], 0)
            .unwrap_err();
        assert!(err.is_conflict());

        // The failed batch must not have inserted msg(3).
        let page = d
            .read_stream_page(s.canonical(), 0, 10, ReadDirection::Forward, false)
            .unwrap()
            .unwrap();
        assert_eq!(page.rows.len(), 2);
    }

    #[test]
    fn test_batch_with_internal_duplicate_conflicts() {
        let mut d = driver();
        let s = name("s1");
        let err = d
            .append_to_stream(&s, ExpectedVersion::NoStream, &[msg(1), msg(1)], 0)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_empty_batch_creates_empty_stream() {
        let mut d = driver();
        let s = name("s1");

        let r = d
            .append_to_stream(&s, ExpectedVersion::NoStream, &[], 0)
            .unwrap();
        assert_eq!(r.current_version, -1);
        assert_eq!(r.current_position, -1);

        // The row now exists, so EmptyStream is satisfied where NoStream
        // also still is.
        let r2 = d
            .append_to_stream(&s, ExpectedVersion::EmptyStream, &[msg(1)], 0)
            .unwrap();
        assert_eq!(r2.current_version, 0);
    }

    #[test]
    fn test_empty_stream_expectation_requires_row() {
        let mut d = driver();
        let s = name("missing");
        let err = d
            .append_to_stream(&s, ExpectedVersion::EmptyStream, &[msg(1)], 0)
            .unwrap_err();
        match err {
            Error::WrongExpectedVersion { actual, .. } => assert_eq!(actual, None),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_global_positions_are_monotonic_across_streams() {
        let mut d = driver();
        let a = name("a");
        let b = name("b");

        let r1 = d
            .append_to_stream(&a, ExpectedVersion::NoStream, &[msg(1)], 0)
            .unwrap();
        let r2 = d
            .append_to_stream(&b, ExpectedVersion::NoStream, &[msg(2)], 0)
            .unwrap();
        let r3 = d
            .append_to_stream(&a, ExpectedVersion::Exact(0), &[msg(3)], 0)
            .unwrap();

        assert!(r1.current_position < r2.current_position);
        assert!(r2.current_position < r3.current_position);
        assert_eq!(d.read_head_position().unwrap(), r3.current_position);
    }

    #[test]
    fn test_delete_stream_checks_expectation() {
        let mut d = driver();
        let s = name("s1");
        d.append_to_stream(&s, ExpectedVersion::NoStream, &[msg(1), msg(2)], 0)
            .unwrap();

        let err = d.delete_stream(&s, ExpectedVersion::Exact(0)).unwrap_err();
        assert!(err.is_conflict());

        assert!(d.delete_stream(&s, ExpectedVersion::Exact(1)).unwrap());
        assert!(d.stream_row(s.canonical()).unwrap().is_none());

        // Gone now; Any-delete of a missing stream is a quiet no-op.
        assert!(!d.delete_stream(&s, ExpectedVersion::Any).unwrap());
    }

    #[test]
    fn test_delete_message_reports_removal() {
        let mut d = driver();
        let s = name("s1");
        d.append_to_stream(&s, ExpectedVersion::NoStream, &[msg(1), msg(2), msg(3)], 0)
            .unwrap();
        let head_before = d.read_head_position().unwrap();

        assert!(d.delete_message(s.canonical(), Uuid::from_u128(2)).unwrap());
        assert!(!d.delete_message(s.canonical(), Uuid::from_u128(2)).unwrap());
        assert_eq!(d.read_head_position().unwrap(), head_before);

        // Surviving versions keep their numbers.
        let page = d
            .read_stream_page(s.canonical(), 0, 10, ReadDirection::Forward, false)
            .unwrap()
            .unwrap();
        let versions: Vec<i64> = page.rows.iter().map(|r| r.stream_version).collect();
        assert_eq!(versions, vec![0, 2]);
    }

    #[test]
    fn test_lazy_page_omits_payload_and_data_fetch_completes_it() {
        let mut d = driver();
        let s = name("s1");
        d.append_to_stream(
            &s,
            ExpectedVersion::NoStream,
            &[msg(1).with_metadata(r#"{"m":true}"#)],
            0,
        )
        .unwrap();

        let page = d
            .read_stream_page(s.canonical(), 0, 10, ReadDirection::Forward, false)
            .unwrap()
            .unwrap();
        assert!(page.rows[0].payload.is_none());
        assert!(page.rows[0].metadata.is_none());

        let (payload, metadata) = d
            .read_message_data(s.canonical(), Uuid::from_u128(1))
            .unwrap()
            .unwrap();
        assert_eq!(payload, r#"{"n":1}"#);
        assert_eq!(metadata.as_deref(), Some(r#"{"m":true}"#));

        assert!(d
            .read_message_data(s.canonical(), Uuid::from_u128(99))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_read_all_joins_original_names() {
        let mut d = driver();
        d.append_to_stream(&name("alpha"), ExpectedVersion::NoStream, &[msg(1)], 0)
            .unwrap();
        d.append_to_stream(&name("beta"), ExpectedVersion::NoStream, &[msg(2)], 0)
            .unwrap();

        let rows = d
            .read_all_page(0, 10, ReadDirection::Forward, true)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stream_name, "alpha");
        assert_eq!(rows[1].stream_name, "beta");

        let backwards = d
            .read_all_page(i64::MAX, 10, ReadDirection::Backward, false)
            .unwrap();
        assert_eq!(backwards[0].stream_name, "beta");
        assert!(backwards[0].payload.is_none());
    }
}
