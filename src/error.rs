//! # Error Handling
//!
//! A single error enum ([`Error`]) represents every failure mode in the
//! store. One enum keeps function signatures simple and lets callers match
//! on the handful of conditions they actually care about: the optimistic
//! concurrency conflict, and everything else.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Conflict | `WrongExpectedVersion` | Re-read the stream, retry with fresh version |
//! | Rejection | `InvalidStreamName`, `SystemStream` | Fix the caller |
//! | Lifecycle | `Disposed`, `Cancelled` | Stop; the store is closed or the caller gave up |
//! | Backend | `Sqlite`, `Schema` | Log and investigate; surfaced with diagnostics |
//!
//! The store retries nothing itself. A missing stream on a read is not an
//! error at all: it is reported as
//! [`PageReadStatus::StreamNotFound`](crate::types::PageReadStatus).

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Optimistic concurrency conflict on append or stream delete.
    ///
    /// # When This Happens
    ///
    /// The caller supplied an expected version that does not match the
    /// stream's current head, or retried a batch whose message ids do not
    /// line up with what was actually written (a duplicate message id lands
    /// here too: an id that exists in the stream but not at the position the
    /// replay would require).
    ///
    /// # Recovery
    ///
    /// 1. Re-read the stream head
    /// 2. Re-apply business logic against the current state
    /// 3. Retry with the updated expected version
    ///
    /// `actual` is `None` when the stream does not exist.
    #[error("wrong expected version on stream '{stream}': expected {expected}, actual {}", actual.map(|v| v.to_string()).unwrap_or_else(|| "none".into()))]
    WrongExpectedVersion {
        /// The stream where the conflict occurred.
        stream: String,
        /// The raw expected version the caller supplied (sentinels included).
        expected: i64,
        /// The actual current version, if the stream exists.
        actual: Option<i64>,
    },

    /// The stream name failed validation.
    ///
    /// Names must be non-empty, must not be the reserved `"$all"` sentinel,
    /// and system names (`$`-prefixed) must fit the fixed 40-byte key width.
    #[error("invalid stream name: {0}")]
    InvalidStreamName(String),

    /// A client write targeted an engine-owned system stream.
    ///
    /// `$`-prefixed streams are written only by the engine itself; in
    /// particular `$deleted`, the deletion audit stream, is immutable from
    /// the outside. Reads of system streams are always allowed.
    #[error("stream '{stream}' is a system stream and cannot be written by clients")]
    SystemStream {
        /// The system stream that was targeted.
        stream: String,
    },

    /// The store was used after `close()`.
    #[error("store is closed")]
    Disposed,

    /// The caller's cancellation token fired before the operation completed.
    ///
    /// A write that already reached the writer thread still commits or rolls
    /// back whole; cancellation never leaves a partial batch behind.
    #[error("operation cancelled")]
    Cancelled,

    /// SQLite operation failed.
    ///
    /// Wraps any error from `rusqlite`: locked database file, full disk,
    /// corruption, or a constraint violation the engine did not arbitrate
    /// itself. Surfaced unchanged with the backend diagnostics attached.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema mismatch or internal plumbing failure.
    ///
    /// Opening a database created by an incompatible version, a worker
    /// thread that could not be spawned, or a response channel that went
    /// away mid-operation.
    #[error("schema error: {0}")]
    Schema(String),
}

impl Error {
    /// True if this is the optimistic concurrency conflict.
    ///
    /// Conflicts are the one error kind callers routinely branch on, so a
    /// predicate beats matching the variant at every call site.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::WrongExpectedVersion { .. })
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let conflict = Error::WrongExpectedVersion {
            stream: "orders-42".to_string(),
            expected: 5,
            actual: Some(7),
        };
        assert_eq!(
            conflict.to_string(),
            "wrong expected version on stream 'orders-42': expected 5, actual 7"
        );

        let missing = Error::WrongExpectedVersion {
            stream: "orders-42".to_string(),
            expected: 3,
            actual: None,
        };
        assert_eq!(
            missing.to_string(),
            "wrong expected version on stream 'orders-42': expected 3, actual none"
        );

        let system = Error::SystemStream {
            stream: "$deleted".to_string(),
        };
        assert!(system.to_string().contains("$deleted"));
    }

    #[test]
    fn test_is_conflict() {
        let conflict = Error::WrongExpectedVersion {
            stream: "s".to_string(),
            expected: 0,
            actual: Some(1),
        };
        assert!(conflict.is_conflict());
        assert!(!Error::Disposed.is_conflict());
        assert!(!Error::Cancelled.is_conflict());
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();
        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
