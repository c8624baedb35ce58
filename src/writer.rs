//! # Write Engines
//!
//! Appends and deletes run on one dedicated writer thread that owns the
//! read-write driver. The async side sends [`WriteRequest`]s over an mpsc
//! channel; this module holds the request loop and the engine functions it
//! dispatches to.
//!
//! ## Single Writer
//!
//! One thread, one connection, strictly sequential writes. Global positions
//! therefore commit in allocation order, which is what makes the all-log a
//! total order, and no in-memory locks are ever held across an await.
//!
//! ## The Audit Stream
//!
//! Deletions leave a trace in `$deleted`:
//!
//! - `delete_stream` appends a `$stream-deleted` event with payload
//!   `{"stream_id": …}` iff the stream existed;
//! - `delete_message` appends a `$message-deleted` event with payload
//!   `{"stream_id": …, "message_id": …}` iff a row was actually removed.
//!
//! Audit events get fresh v4 ids: each physical deletion is its own audit
//! fact (deleting a recreated stream must record a second event). Clients
//! cannot write to `$deleted` or any other `$`-stream; the engine rejects
//! those before touching the driver.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::clock::Clock;
use crate::driver::StorageDriver;
use crate::error::{Error, Result};
use crate::ident::{StreamName, MESSAGE_DELETED_TYPE, STREAM_DELETED_TYPE};
use crate::types::{AppendResult, ExpectedVersion, NewMessage};

// =============================================================================
// Request Types
// =============================================================================

/// Requests handled by the writer thread.
pub(crate) enum WriteRequest {
    /// Append a batch under optimistic concurrency.
    Append {
        stream: StreamName,
        expected: ExpectedVersion,
        messages: Vec<NewMessage>,
        response: oneshot::Sender<Result<AppendResult>>,
    },
    /// Delete a whole stream, with an audit event.
    DeleteStream {
        stream: StreamName,
        expected: ExpectedVersion,
        response: oneshot::Sender<Result<()>>,
    },
    /// Delete a single message, with an audit event.
    DeleteMessage {
        stream: StreamName,
        message_id: Uuid,
        response: oneshot::Sender<Result<()>>,
    },
    /// Drain and stop.
    Shutdown,
}

// =============================================================================
// Writer Loop
// =============================================================================

/// Serves one request. Returns `false` on shutdown.
///
/// Shared by the dedicated writer loop below and by the combined in-memory
/// worker. Dropped response channels (a caller that gave up waiting) are
/// ignored; the write itself still completed or rolled back whole.
pub(crate) fn handle_request<D: StorageDriver>(
    driver: &mut D,
    clock: &dyn Clock,
    request: WriteRequest,
) -> bool {
    match request {
        WriteRequest::Append {
            stream,
            expected,
            messages,
            response,
        } => {
            let result = append(driver, clock, &stream, expected, &messages);
            let _ = response.send(result);
            true
        }
        WriteRequest::DeleteStream {
            stream,
            expected,
            response,
        } => {
            let result = delete_stream(driver, clock, &stream, expected);
            let _ = response.send(result);
            true
        }
        WriteRequest::DeleteMessage {
            stream,
            message_id,
            response,
        } => {
            let result = delete_message(driver, clock, &stream, message_id);
            let _ = response.send(result);
            true
        }
        WriteRequest::Shutdown => false,
    }
}

/// Processes write requests until shutdown.
///
/// Requests queued before the shutdown marker are fully processed first, so
/// `close()` never abandons accepted work.
pub(crate) async fn run_writer<D: StorageDriver>(
    mut driver: D,
    clock: Arc<dyn Clock>,
    mut rx: mpsc::Receiver<WriteRequest>,
) {
    while let Some(request) = rx.recv().await {
        if !handle_request(&mut driver, clock.as_ref(), request) {
            break;
        }
    }
    tracing::debug!("writer loop stopped");
}

// =============================================================================
// Engines
// =============================================================================

/// Client write targeting a `$`-stream: rejected up front.
fn guard_system(stream: &StreamName) -> Result<()> {
    if stream.is_system() {
        return Err(Error::SystemStream {
            stream: stream.original().to_string(),
        });
    }
    Ok(())
}

/// Append engine: stamps the batch with the injected clock and hands it to
/// the driver's atomic append.
pub(crate) fn append<D: StorageDriver>(
    driver: &mut D,
    clock: &dyn Clock,
    stream: &StreamName,
    expected: ExpectedVersion,
    messages: &[NewMessage],
) -> Result<AppendResult> {
    guard_system(stream)?;
    driver.append_to_stream(stream, expected, messages, clock.utc_now_ms())
}

/// Delete engine, stream flavor.
///
/// The expected-version check follows append semantics; deleting a stream
/// that does not exist with `Any` is a quiet no-op.
pub(crate) fn delete_stream<D: StorageDriver>(
    driver: &mut D,
    clock: &dyn Clock,
    stream: &StreamName,
    expected: ExpectedVersion,
) -> Result<()> {
    guard_system(stream)?;

    let existed = driver.delete_stream(stream, expected)?;
    if existed {
        let payload = serde_json::json!({ "stream_id": stream.original() }).to_string();
        let audit = NewMessage::new(Uuid::new_v4(), STREAM_DELETED_TYPE, payload);
        driver.append_to_stream(
            &StreamName::deleted_stream(),
            ExpectedVersion::Any,
            &[audit],
            clock.utc_now_ms(),
        )?;
        tracing::debug!(stream = stream.original(), "stream deleted");
    }
    Ok(())
}

/// Delete engine, single-message flavor.
///
/// Only an actual removal produces an audit event; a missing message leaves
/// no trace and allocates no position.
pub(crate) fn delete_message<D: StorageDriver>(
    driver: &mut D,
    clock: &dyn Clock,
    stream: &StreamName,
    message_id: Uuid,
) -> Result<()> {
    guard_system(stream)?;

    let removed = driver.delete_message(stream.canonical(), message_id)?;
    if removed {
        let payload = serde_json::json!({
            "stream_id": stream.original(),
            "message_id": message_id.to_string(),
        })
        .to_string();
        let audit = NewMessage::new(Uuid::new_v4(), MESSAGE_DELETED_TYPE, payload);
        driver.append_to_stream(
            &StreamName::deleted_stream(),
            ExpectedVersion::Any,
            &[audit],
            clock.utc_now_ms(),
        )?;
        tracing::debug!(
            stream = stream.original(),
            message_id = %message_id,
            "message deleted"
        );
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
