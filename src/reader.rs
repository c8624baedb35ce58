//! # Read Engine
//!
//! Paged reads over a single stream and over the global log, in either
//! direction, plus the head-position probe and the lazy payload fetch.
//!
//! ## The Look-Ahead Row
//!
//! Every page asks the driver for `max_count + 1` rows. Getting all of them
//! means more data exists in that direction: `is_end = false` and the extra
//! row is discarded. Getting fewer means this page reaches the end. One
//! round-trip yields both the page and its `is_end`; there is no secondary
//! count query.
//!
//! ## Cursor Arithmetic
//!
//! Stream reads are keyed by inclusive version bounds:
//!
//! - forward: `next_version = last.version + 1` (or `from + 1` on an empty
//!   page), so an `is_end` page re-read later picks up newly appended
//!   messages;
//! - backward: `next_version = last.version - 1`, bottoming out at -1, the
//!   terminal cursor (a -1 bound matches nothing, versions start at 0).
//!
//! All-log reads are keyed by an exclusive position bound in both
//! directions, so `next_position` is simply the last returned position and
//! sparse position gaps need no special handling.
//!
//! ## Threading
//!
//! For file-backed stores a pool of reader threads each owns a read-only
//! connection and competes for requests on a shared channel, the writer
//! never blocked by readers (WAL). In-memory stores run reads on the single
//! worker thread instead.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::driver::{MessageRow, StorageDriver, StreamPageRows};
use crate::error::Result;
use crate::ident::StreamName;
use crate::types::{
    Message, PageReadStatus, ReadAllPage, ReadDirection, ReadStreamPage, StreamVersion,
};

// =============================================================================
// Request Types
// =============================================================================

/// Requests handled by the reader side.
///
/// `from` fields are the caller-visible values (echoed back on pages);
/// `bound` fields are the already-resolved SQL bounds (sentinels like "from
/// the end" become `i64::MAX` before the request is built).
pub(crate) enum ReadRequest {
    ReadStream {
        stream: StreamName,
        from_version: i64,
        bound: i64,
        max_count: usize,
        direction: ReadDirection,
        prefetch: bool,
        response: oneshot::Sender<Result<ReadStreamPage>>,
    },
    ReadAll {
        from_position: i64,
        bound: i64,
        max_count: usize,
        direction: ReadDirection,
        prefetch: bool,
        response: oneshot::Sender<Result<ReadAllPage>>,
    },
    HeadPosition {
        response: oneshot::Sender<Result<i64>>,
    },
    MessageData {
        stream: StreamName,
        message_id: Uuid,
        response: oneshot::Sender<Result<Option<(String, Option<String>)>>>,
    },
    Shutdown,
}

// =============================================================================
// Engine
// =============================================================================

/// Reads one stream page with the look-ahead scheme.
pub(crate) fn read_stream<D: StorageDriver>(
    driver: &D,
    stream: &StreamName,
    from_version: i64,
    bound: i64,
    max_count: usize,
    direction: ReadDirection,
    prefetch: bool,
) -> Result<ReadStreamPage> {
    let fetched =
        driver.read_stream_page(stream.canonical(), bound, max_count + 1, direction, prefetch)?;

    let Some(StreamPageRows { head, mut rows }) = fetched else {
        // Missing stream: an ordinary answer. Soft-deleted and never-created
        // streams are indistinguishable here.
        return Ok(ReadStreamPage {
            status: PageReadStatus::StreamNotFound,
            stream_id: stream.original().to_string(),
            from_version,
            next_version: match direction {
                ReadDirection::Forward => from_version + 1,
                ReadDirection::Backward => StreamVersion::END,
            },
            last_stream_version: -1,
            last_stream_position: -1,
            direction,
            is_end: true,
            messages: Vec::new(),
            max_count,
            prefetch,
        });
    };

    let is_end = rows.len() <= max_count;
    if !is_end {
        rows.truncate(max_count);
    }

    let next_version = match (direction, rows.last()) {
        (ReadDirection::Forward, Some(last)) => last.stream_version + 1,
        (ReadDirection::Forward, None) => from_version + 1,
        (ReadDirection::Backward, Some(last)) => last.stream_version - 1,
        (ReadDirection::Backward, None) => StreamVersion::END,
    };

    Ok(ReadStreamPage {
        status: PageReadStatus::Success,
        stream_id: stream.original().to_string(),
        from_version,
        next_version,
        last_stream_version: head.version,
        last_stream_position: head.position,
        direction,
        is_end,
        messages: rows.into_iter().map(to_message).collect(),
        max_count,
        prefetch,
    })
}

/// Reads one page of the global log with the look-ahead scheme.
pub(crate) fn read_all<D: StorageDriver>(
    driver: &D,
    from_position: i64,
    bound: i64,
    max_count: usize,
    direction: ReadDirection,
    prefetch: bool,
) -> Result<ReadAllPage> {
    let mut rows = driver.read_all_page(bound, max_count + 1, direction, prefetch)?;

    let is_end = rows.len() <= max_count;
    if !is_end {
        rows.truncate(max_count);
    }

    let next_position = match rows.last() {
        Some(last) => last.position,
        None => from_position,
    };

    Ok(ReadAllPage {
        from_position,
        next_position,
        direction,
        is_end,
        messages: rows.into_iter().map(to_message).collect(),
        max_count,
        prefetch,
    })
}

fn to_message(row: MessageRow) -> Message {
    Message {
        message_id: row.message_id,
        stream_id: row.stream_name,
        stream_version: row.stream_version,
        position: row.position,
        created_utc: row.created_utc,
        message_type: row.message_type,
        payload: row.payload,
        metadata: row.metadata,
    }
}

// =============================================================================
// Request Dispatch and Reader Loop
// =============================================================================

/// Serves one request. Returns `false` on shutdown.
///
/// Shared by the pooled reader loop below and by the combined in-memory
/// worker, so both modes answer reads identically.
pub(crate) fn handle_request<D: StorageDriver>(driver: &D, request: ReadRequest) -> bool {
    match request {
        ReadRequest::ReadStream {
            stream,
            from_version,
            bound,
            max_count,
            direction,
            prefetch,
            response,
        } => {
            let result = read_stream(
                driver,
                &stream,
                from_version,
                bound,
                max_count,
                direction,
                prefetch,
            );
            let _ = response.send(result);
            true
        }
        ReadRequest::ReadAll {
            from_position,
            bound,
            max_count,
            direction,
            prefetch,
            response,
        } => {
            let result = read_all(driver, from_position, bound, max_count, direction, prefetch);
            let _ = response.send(result);
            true
        }
        ReadRequest::HeadPosition { response } => {
            let _ = response.send(driver.read_head_position());
            true
        }
        ReadRequest::MessageData {
            stream,
            message_id,
            response,
        } => {
            let _ = response.send(driver.read_message_data(stream.canonical(), message_id));
            true
        }
        ReadRequest::Shutdown => false,
    }
}

/// Pooled reader loop.
///
/// Threads share the receiver behind a mutex and compete for requests:
/// whichever thread is free picks up the next one. Each thread's own
/// read-only connection executes the query, so distinct requests run in
/// parallel.
pub(crate) async fn run_reader_pooled<D: StorageDriver>(
    driver: D,
    rx: Arc<std::sync::Mutex<mpsc::Receiver<ReadRequest>>>,
) {
    loop {
        let request = {
            let mut guard = rx.lock().expect("reader receiver mutex poisoned");
            guard.recv().await
        };
        match request {
            Some(request) => {
                if !handle_request(&driver, request) {
                    break;
                }
            }
            None => break,
        }
    }
    tracing::debug!("reader loop stopped");
}

// =============================================================================
// Tests
// =============================================================================
