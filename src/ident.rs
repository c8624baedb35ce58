//! # Stream Identity
//!
//! Callers name streams with arbitrary strings. Internally every stream is
//! keyed by a fixed-width 40-character canonical form, and the original name
//! is carried alongside for echo-back in results and audit payloads.
//!
//! ## Canonical Form
//!
//! - **Ordinary streams**: lowercase hex of the SHA-1 digest of the name.
//!   Fixed width keeps the B-tree keys uniform regardless of how long the
//!   caller's names get, and the digest is stable across processes and
//!   platforms, so two nodes pointed at the same database agree on every key.
//! - **System streams** (`$`-prefixed): the literal name, left-padded with
//!   NUL bytes to 40 characters. System names are engine-chosen and short;
//!   keeping them literal makes them recognizable in the raw tables.
//!
//! The reserved name `"$all"` denotes the global log in read APIs and is
//! never a real stream; [`StreamName::canonicalize`] rejects it.

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Width of the canonical key, in bytes.
const KEY_WIDTH: usize = 40;

/// The deletion audit stream. Append-only, engine-owned.
pub const DELETED_STREAM: &str = "$deleted";

/// Reserved sentinel naming the global log. Never a real stream.
pub const ALL_STREAM: &str = "$all";

/// Message type of the audit event recorded when a stream is deleted.
pub const STREAM_DELETED_TYPE: &str = "$stream-deleted";

/// Message type of the audit event recorded when a single message is deleted.
pub const MESSAGE_DELETED_TYPE: &str = "$message-deleted";

// =============================================================================
// StreamName
// =============================================================================

/// A validated stream identity: the caller's original name plus the
/// fixed-width canonical key used for all indexing.
///
/// # Example
///
/// ```rust
/// use stratadb::StreamName;
///
/// let name = StreamName::canonicalize("orders-42")?;
/// assert_eq!(name.original(), "orders-42");
/// assert_eq!(name.canonical().len(), 40);
/// assert!(!name.is_system());
/// # Ok::<(), stratadb::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName {
    original: String,
    canonical: String,
}

impl StreamName {
    /// Validates a caller-supplied name and computes its canonical key.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidStreamName`] if the name is empty, is the reserved
    /// `"$all"` sentinel, or is a system name longer than the 40-byte key
    /// width.
    pub fn canonicalize(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidStreamName(
                "stream name must not be empty".to_string(),
            ));
        }
        if name == ALL_STREAM {
            return Err(Error::InvalidStreamName(format!(
                "'{ALL_STREAM}' is reserved for the global log"
            )));
        }

        let canonical = if name.starts_with('$') {
            if name.len() > KEY_WIDTH {
                return Err(Error::InvalidStreamName(format!(
                    "system stream name '{name}' exceeds {KEY_WIDTH} bytes"
                )));
            }
            pad_system_name(name)
        } else {
            let mut hasher = Sha1::new();
            hasher.update(name.as_bytes());
            hex::encode(hasher.finalize())
        };

        Ok(Self {
            original: name.to_string(),
            canonical,
        })
    }

    /// The caller's name, preserved verbatim.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The 40-character canonical key.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// True for `$`-prefixed, engine-owned streams.
    pub fn is_system(&self) -> bool {
        self.original.starts_with('$')
    }

    /// The deletion audit stream identity.
    ///
    /// Built directly rather than through [`canonicalize`](Self::canonicalize)
    /// so engine internals cannot trip over their own validation.
    pub(crate) fn deleted_stream() -> Self {
        Self {
            original: DELETED_STREAM.to_string(),
            canonical: pad_system_name(DELETED_STREAM),
        }
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Left-pads a system name with NUL to the key width.
fn pad_system_name(name: &str) -> String {
    let mut key = String::with_capacity(KEY_WIDTH);
    for _ in 0..(KEY_WIDTH - name.len()) {
        key.push('\0');
    }
    key.push_str(name);
    key
}

// =============================================================================
// Tests
// =============================================================================
