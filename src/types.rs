//! # Domain Types
//!
//! The types that model the store's domain: messages going in, messages
//! coming back out, append results, expected-version claims, and read pages.
//!
//! ## Dual Ordering
//!
//! Every stored message has two coordinates:
//!
//! - **`stream_version`**: its 0-based position within its stream. Dense per
//!   stream: the versions of a stream are exactly `0, 1, …, head`, no gaps,
//!   no duplicates.
//! - **`position`**: its position in the global log across all streams.
//!   Strictly increasing in commit order but sparse: rolled-back
//!   transactions leave holes that are never filled.
//!
//! Both are `i64` because `-1` is a meaningful sentinel ("no messages yet",
//! "from the end") throughout the API; see [`StreamVersion`] and
//! [`Position`].
//!
//! ## Pages Carry Their Continuation
//!
//! A read page records the bind parameters of the next call
//! (`next_version`/`next_position`, count, direction, prefetch). The store's
//! `read_stream_next`/`read_all_next` take a page by reference and re-enter
//! the read path, so callers never capture engine internals in a closure.

use uuid::Uuid;

// =============================================================================
// Sentinels
// =============================================================================

/// The caller's claim about a stream's head at append time. Basis of the
/// optimistic concurrency protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No version check; append at whatever the current head is.
    Any,
    /// The stream must not exist, or must exist with no messages.
    NoStream,
    /// The stream must exist and have no messages.
    EmptyStream,
    /// The stream's head must be exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Raw sentinel for [`Any`](Self::Any).
    pub const ANY_RAW: i64 = -3;
    /// Raw sentinel for [`EmptyStream`](Self::EmptyStream).
    pub const EMPTY_STREAM_RAW: i64 = -2;
    /// Raw sentinel for [`NoStream`](Self::NoStream).
    pub const NO_STREAM_RAW: i64 = -1;

    /// The wire-level integer form: `-3`, `-2`, `-1`, or `n >= 0`.
    pub fn as_raw(&self) -> i64 {
        match self {
            ExpectedVersion::Any => Self::ANY_RAW,
            ExpectedVersion::EmptyStream => Self::EMPTY_STREAM_RAW,
            ExpectedVersion::NoStream => Self::NO_STREAM_RAW,
            ExpectedVersion::Exact(n) => *n as i64,
        }
    }

    /// Parses the integer form. Returns `None` for negative values that are
    /// not one of the three sentinels.
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            Self::ANY_RAW => Some(ExpectedVersion::Any),
            Self::EMPTY_STREAM_RAW => Some(ExpectedVersion::EmptyStream),
            Self::NO_STREAM_RAW => Some(ExpectedVersion::NoStream),
            n if n >= 0 => Some(ExpectedVersion::Exact(n as u64)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::EmptyStream => write!(f, "empty-stream"),
            ExpectedVersion::NoStream => write!(f, "no-stream"),
            ExpectedVersion::Exact(n) => write!(f, "{n}"),
        }
    }
}

/// Stream-version sentinels for reads.
pub struct StreamVersion;

impl StreamVersion {
    /// First message of a stream (forward reads).
    pub const START: i64 = 0;
    /// Latest message of a stream (backward reads).
    pub const END: i64 = -1;
}

/// Global-position sentinels for reads of the all-log.
///
/// Positions are allocated from 1, and the `from` bound of all-log reads is
/// exclusive, so `Position::START` as a lower bound reads the whole log.
pub struct Position;

impl Position {
    /// Beginning of the global log.
    pub const START: i64 = 0;
    /// End of the global log (backward reads start at the head).
    pub const END: i64 = -1;
}

/// Direction of a paged read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    /// Ascending versions / positions.
    Forward,
    /// Descending versions / positions.
    Backward,
}

// =============================================================================
// Messages
// =============================================================================

/// A message to be appended: the caller-supplied half of a stored message.
///
/// Versions, positions, and timestamps are assigned during append.
///
/// # Example
///
/// ```rust
/// use uuid::Uuid;
/// use stratadb::NewMessage;
///
/// let msg = NewMessage::new(Uuid::new_v4(), "OrderPlaced", r#"{"total":42}"#)
///     .with_metadata(r#"{"correlation":"abc"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Caller-supplied unique id. Unique within the target stream; the
    /// anchor of idempotent retry.
    pub message_id: Uuid,

    /// Short type tag, e.g. `"OrderPlaced"`.
    pub message_type: String,

    /// Opaque UTF-8 JSON payload. The store never interprets it.
    pub payload: String,

    /// Optional opaque UTF-8 JSON metadata.
    pub metadata: Option<String>,
}

impl NewMessage {
    /// Creates a message with no metadata.
    pub fn new(
        message_id: Uuid,
        message_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            message_type: message_type.into(),
            payload: payload.into(),
            metadata: None,
        }
    }

    /// Attaches metadata.
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// A stored message, as returned by reads.
///
/// `payload` and `metadata` are `None` on pages read with `prefetch = false`;
/// `stream_id` and `message_id` are exactly what a later
/// `read_message_data` call needs to materialize them.
#[derive(Debug, Clone)]
pub struct Message {
    /// Caller-supplied unique id.
    pub message_id: Uuid,

    /// The stream's original name, echoed back verbatim.
    pub stream_id: String,

    /// 0-based dense position within the stream.
    pub stream_version: i64,

    /// Global position across all streams. Monotonic, sparse.
    pub position: i64,

    /// Append timestamp in milliseconds since the Unix epoch, taken from the
    /// injected clock.
    pub created_utc: i64,

    /// Short type tag.
    pub message_type: String,

    /// Payload, if the page was read with prefetch.
    pub payload: Option<String>,

    /// Metadata, if present and the page was read with prefetch.
    pub metadata: Option<String>,
}

// =============================================================================
// Append Result
// =============================================================================

/// Outcome of a successful append: the stream head afterwards.
///
/// Reported identically for fresh appends and idempotent replays, so a
/// retrying caller cannot tell the difference (and does not need to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Highest stream version in the stream.
    pub current_version: i64,

    /// Highest global position in the stream.
    pub current_position: i64,
}

// =============================================================================
// Read Pages
// =============================================================================

/// Outcome discriminator of a stream read.
///
/// A missing stream is an ordinary answer, not an error; soft-deleted and
/// never-created streams are indistinguishable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReadStatus {
    /// The stream exists; the page holds its messages.
    Success,
    /// The stream does not exist.
    StreamNotFound,
}

/// One page of a stream read.
#[derive(Debug, Clone)]
pub struct ReadStreamPage {
    /// Whether the stream existed at all.
    pub status: PageReadStatus,

    /// The stream's original name.
    pub stream_id: String,

    /// The `from_version` this page was read with, echoed back.
    pub from_version: i64,

    /// Where the next page starts: last version + 1 going forward, last
    /// version - 1 going backward (so -1 is the terminal backward cursor).
    pub next_version: i64,

    /// The stream's head version at read time, -1 if the stream was missing.
    pub last_stream_version: i64,

    /// The stream's head global position at read time, -1 if missing.
    pub last_stream_position: i64,

    /// Direction this page was read in.
    pub direction: ReadDirection,

    /// True when there is nothing further in this direction. Established by
    /// the look-ahead row, not by a second round-trip.
    pub is_end: bool,

    /// The page's messages, at most `max_count` of them.
    pub messages: Vec<Message>,

    /// Page size, carried for the continuation.
    pub(crate) max_count: usize,

    /// Whether payloads were materialized, carried for the continuation.
    pub(crate) prefetch: bool,
}

/// One page of a global-log read.
#[derive(Debug, Clone)]
pub struct ReadAllPage {
    /// The exclusive `from_position` this page was read with, echoed back.
    pub from_position: i64,

    /// The exclusive bound of the next page: the position of the last
    /// returned message in both directions, or `from_position` again when
    /// the page is empty.
    pub next_position: i64,

    /// Direction this page was read in.
    pub direction: ReadDirection,

    /// True when there is nothing further in this direction.
    pub is_end: bool,

    /// The page's messages, at most `max_count` of them.
    pub messages: Vec<Message>,

    pub(crate) max_count: usize,
    pub(crate) prefetch: bool,
}

// =============================================================================
// Tests
// =============================================================================
