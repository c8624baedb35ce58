//! # The Async Store Handle
//!
//! [`EventStore`] is the public face of the crate: the append, read, and
//! delete surface, plus lifecycle. It is `Clone`, `Send`, and `Sync`; all
//! clones share the same worker threads.
//!
//! ## Architecture
//!
//! SQLite connections cannot be shared across threads, so the store runs
//! them on dedicated OS threads and talks to them over channels:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Async Tasks                            │
//! └───────────────┬───────────────────────────┬──────────────────┘
//!          mpsc (writes)                mpsc (reads)
//!                 ▼                           ▼
//!        ┌────────────────┐        ┌──────────────────────┐
//!        │  Writer Thread │        │     Reader Pool      │
//!        │  (1, R/W conn) │        │  (N, read-only conns)│
//!        └────────┬───────┘        └──────────┬───────────┘
//!                 └───────────┬───────────────┘
//!                             ▼
//!                      ┌─────────────┐
//!                      │ SQLite (WAL)│
//!                      └─────────────┘
//! ```
//!
//! One writer thread keeps writes strictly sequential (appends commit in
//! global-position order); WAL mode lets the reader pool see every committed
//! write without blocking the writer. In-memory databases have exactly one
//! connection, so both channels are served by a single combined worker
//! instead.
//!
//! ## Lifecycle
//!
//! The store moves through `open → closing → closed`. Every public call
//! checks the state first and fails with [`Error::Disposed`] once closing
//! has begun. [`close`](EventStore::close) is idempotent: it lets queued
//! work drain, joins the threads, and releases the connections.
//!
//! ## Cancellation
//!
//! Every operation takes a [`CancellationToken`], observed at each await
//! point (queueing the request, awaiting the response). Cancelling after
//! the writer picked the request up does not interrupt the transaction; it
//! commits or rolls back whole, and only the caller's wait is abandoned.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, available_parallelism, JoinHandle};

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::driver::StorageDriver;
use crate::error::{Error, Result};
use crate::ident::StreamName;
use crate::reader::{self, ReadRequest};
use crate::sqlite::SqliteDriver;
use crate::types::{
    AppendResult, ExpectedVersion, NewMessage, Position, ReadAllPage, ReadDirection,
    ReadStreamPage, StreamVersion,
};
use crate::writer::{self, WriteRequest};

// =============================================================================
// Configuration
// =============================================================================

/// Default size of the write request channel.
const WRITE_CHANNEL_SIZE: usize = 1024;

/// Default size of the read request channel.
const READ_CHANNEL_SIZE: usize = 4096;

/// Bounds for the reader pool when sized from the CPU count.
const MIN_READ_THREADS: usize = 1;
const MAX_READ_THREADS: usize = 16;

/// Store construction options.
///
/// The defaults suit most uses; tests override `clock` for deterministic
/// timestamps.
#[derive(Clone)]
pub struct StoreConfig {
    /// Reader pool size for file-backed stores. `None` sizes it from the
    /// CPU count, clamped to 1..=16. Ignored for in-memory stores, which
    /// always run a single worker.
    pub reader_threads: Option<usize>,

    /// Capacity of the write request channel.
    pub write_queue_depth: usize,

    /// Capacity of the read request channel.
    pub read_queue_depth: usize,

    /// Timestamp source for appended messages.
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reader_threads: None,
            write_queue_depth: WRITE_CHANNEL_SIZE,
            read_queue_depth: READ_CHANNEL_SIZE,
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreConfig {
    /// Replaces the clock; handy in the builder position.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("reader_threads", &self.reader_threads)
            .field("write_queue_depth", &self.write_queue_depth)
            .field("read_queue_depth", &self.read_queue_depth)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Lifecycle States
// =============================================================================

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

// =============================================================================
// EventStore
// =============================================================================

/// The async event store handle.
///
/// # Example
///
/// ```rust,no_run
/// use stratadb::{EventStore, ExpectedVersion, NewMessage};
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
///
/// #[tokio::main]
/// async fn main() -> stratadb::Result<()> {
///     let store = EventStore::open("events.db").await?;
///     let token = CancellationToken::new();
///
///     let result = store
///         .append(
///             "orders-42",
///             ExpectedVersion::NoStream,
///             vec![NewMessage::new(Uuid::new_v4(), "OrderPlaced", r#"{"total":99}"#)],
///             &token,
///         )
///         .await?;
///     println!("head is now version {}", result.current_version);
///
///     let page = store.read_stream_forwards("orders-42", 0, 10, true, &token).await?;
///     for message in &page.messages {
///         println!("{} @ v{}", message.message_type, message.stream_version);
///     }
///
///     store.close().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct EventStore {
    write_tx: mpsc::Sender<WriteRequest>,
    read_tx: mpsc::Sender<ReadRequest>,
    state: Arc<AtomicU8>,
    writer_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    reader_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    reader_count: usize,
}

impl EventStore {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Opens or creates a file-backed store with default configuration.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, StoreConfig::default()).await
    }

    /// Opens or creates a file-backed store.
    pub async fn open_with<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let write_driver = SqliteDriver::open(&path)?;

        let reader_count = config
            .reader_threads
            .unwrap_or_else(|| {
                available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(MIN_READ_THREADS)
            })
            .clamp(MIN_READ_THREADS, MAX_READ_THREADS);

        let mut read_drivers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            read_drivers.push(SqliteDriver::open_read_only(&path)?);
        }

        let (write_tx, write_rx) = mpsc::channel(config.write_queue_depth);
        let (read_tx, read_rx) = mpsc::channel(config.read_queue_depth);
        let clock = Arc::clone(&config.clock);

        let writer_handle = spawn_worker("strata-writer", move || {
            block_on_current_thread(writer::run_writer(write_driver, clock, write_rx));
        })?;

        let read_rx = Arc::new(std::sync::Mutex::new(read_rx));
        let mut reader_handles = Vec::with_capacity(reader_count);
        for (i, driver) in read_drivers.into_iter().enumerate() {
            let rx = Arc::clone(&read_rx);
            let handle = spawn_worker(&format!("strata-reader-{i}"), move || {
                block_on_current_thread(reader::run_reader_pooled(driver, rx));
            })?;
            reader_handles.push(handle);
        }

        tracing::info!(path = %path.display(), readers = reader_count, "store opened");

        Ok(Self {
            write_tx,
            read_tx,
            state: Arc::new(AtomicU8::new(STATE_OPEN)),
            writer_handle: Arc::new(Mutex::new(Some(writer_handle))),
            reader_handles: Arc::new(Mutex::new(reader_handles)),
            reader_count,
        })
    }

    /// Opens an in-memory store with default configuration. Data is lost
    /// when the store closes; intended for tests.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(StoreConfig::default()).await
    }

    /// Opens an in-memory store.
    ///
    /// An in-memory database has exactly one connection, so one combined
    /// worker serves both channels; `reader_threads` is ignored.
    pub async fn open_in_memory_with(config: StoreConfig) -> Result<Self> {
        let driver = SqliteDriver::open_in_memory()?;

        let (write_tx, write_rx) = mpsc::channel(config.write_queue_depth);
        let (read_tx, read_rx) = mpsc::channel(config.read_queue_depth);
        let clock = Arc::clone(&config.clock);

        let handle = spawn_worker("strata-worker", move || {
            block_on_current_thread(run_combined(driver, clock, write_rx, read_rx));
        })?;

        tracing::info!("in-memory store opened");

        Ok(Self {
            write_tx,
            read_tx,
            state: Arc::new(AtomicU8::new(STATE_OPEN)),
            writer_handle: Arc::new(Mutex::new(Some(handle))),
            reader_handles: Arc::new(Mutex::new(Vec::new())),
            reader_count: 0,
        })
    }

    /// Number of reader threads backing this store (0 for in-memory).
    pub fn reader_count(&self) -> usize {
        self.reader_count
    }

    // =========================================================================
    // Appends
    // =========================================================================

    /// Appends a batch to a stream under optimistic concurrency.
    ///
    /// Retrying the same batch is safe: a batch whose message ids match an
    /// already-stored run is recognized and reported as applied, with the
    /// head unchanged. Any other overlap is a
    /// [`Error::WrongExpectedVersion`].
    ///
    /// # Errors
    ///
    /// - [`Error::WrongExpectedVersion`] on conflict or mismatched replay
    /// - [`Error::InvalidStreamName`] / [`Error::SystemStream`] on bad targets
    /// - [`Error::Disposed`] after close, [`Error::Cancelled`] on token fire
    pub async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        messages: Vec<NewMessage>,
        token: &CancellationToken,
    ) -> Result<AppendResult> {
        self.ensure_open()?;
        let stream = StreamName::canonicalize(stream)?;

        let (response, rx) = oneshot::channel();
        self.send_write(
            WriteRequest::Append {
                stream,
                expected,
                messages,
                response,
            },
            token,
        )
        .await?;
        self.await_response(rx, token).await
    }

    // =========================================================================
    // Stream Reads
    // =========================================================================

    /// Reads a stream in version order, starting at `from_version`
    /// (inclusive; [`StreamVersion::START`] for the beginning).
    pub async fn read_stream_forwards(
        &self,
        stream: &str,
        from_version: i64,
        max_count: usize,
        prefetch: bool,
        token: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        self.ensure_open()?;
        let stream = StreamName::canonicalize(stream)?;
        let bound = from_version.max(0);
        self.read_stream_request(
            stream,
            from_version,
            bound,
            max_count,
            ReadDirection::Forward,
            prefetch,
            token,
        )
        .await
    }

    /// Reads a stream in reverse version order, starting at `from_version`
    /// (inclusive; [`StreamVersion::END`] for the latest message).
    pub async fn read_stream_backwards(
        &self,
        stream: &str,
        from_version: i64,
        max_count: usize,
        prefetch: bool,
        token: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        self.ensure_open()?;
        let stream = StreamName::canonicalize(stream)?;
        let bound = if from_version == StreamVersion::END {
            i64::MAX
        } else {
            from_version
        };
        self.read_stream_request(
            stream,
            from_version,
            bound,
            max_count,
            ReadDirection::Backward,
            prefetch,
            token,
        )
        .await
    }

    /// Reads the page after `page`, with the same count, direction, and
    /// prefetch mode.
    ///
    /// Calling this on an end-of-stream page returns an empty page (or, in
    /// the forward direction, whatever has been appended since).
    pub async fn read_stream_next(
        &self,
        page: &ReadStreamPage,
        token: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        self.ensure_open()?;
        let stream = StreamName::canonicalize(&page.stream_id)?;
        // The continuation uses the cursor verbatim: a backward cursor of -1
        // is terminal (no version matches it), not the "from the end"
        // sentinel again.
        self.read_stream_request(
            stream,
            page.next_version,
            page.next_version,
            page.max_count,
            page.direction,
            page.prefetch,
            token,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_stream_request(
        &self,
        stream: StreamName,
        from_version: i64,
        bound: i64,
        max_count: usize,
        direction: ReadDirection,
        prefetch: bool,
        token: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        let (response, rx) = oneshot::channel();
        self.send_read(
            ReadRequest::ReadStream {
                stream,
                from_version,
                bound,
                max_count,
                direction,
                prefetch,
                response,
            },
            token,
        )
        .await?;
        self.await_response(rx, token).await
    }

    // =========================================================================
    // All-Log Reads
    // =========================================================================

    /// Reads the global log in position order. `from_position` is exclusive;
    /// [`Position::START`] reads from the beginning.
    pub async fn read_all_forwards(
        &self,
        from_position: i64,
        max_count: usize,
        prefetch: bool,
        token: &CancellationToken,
    ) -> Result<ReadAllPage> {
        self.ensure_open()?;
        self.read_all_request(
            from_position,
            from_position,
            max_count,
            ReadDirection::Forward,
            prefetch,
            token,
        )
        .await
    }

    /// Reads the global log in reverse position order. `from_position` is
    /// exclusive; [`Position::END`] reads from the head.
    pub async fn read_all_backwards(
        &self,
        from_position: i64,
        max_count: usize,
        prefetch: bool,
        token: &CancellationToken,
    ) -> Result<ReadAllPage> {
        self.ensure_open()?;
        let bound = if from_position == Position::END {
            i64::MAX
        } else {
            from_position
        };
        self.read_all_request(
            from_position,
            bound,
            max_count,
            ReadDirection::Backward,
            prefetch,
            token,
        )
        .await
    }

    /// Reads the page after `page`, with the same count, direction, and
    /// prefetch mode.
    pub async fn read_all_next(
        &self,
        page: &ReadAllPage,
        token: &CancellationToken,
    ) -> Result<ReadAllPage> {
        self.ensure_open()?;
        self.read_all_request(
            page.next_position,
            page.next_position,
            page.max_count,
            page.direction,
            page.prefetch,
            token,
        )
        .await
    }

    async fn read_all_request(
        &self,
        from_position: i64,
        bound: i64,
        max_count: usize,
        direction: ReadDirection,
        prefetch: bool,
        token: &CancellationToken,
    ) -> Result<ReadAllPage> {
        let (response, rx) = oneshot::channel();
        self.send_read(
            ReadRequest::ReadAll {
                from_position,
                bound,
                max_count,
                direction,
                prefetch,
                response,
            },
            token,
        )
        .await?;
        self.await_response(rx, token).await
    }

    /// The largest committed global position, or -1 while the store is
    /// empty. Monotonically non-decreasing across successful appends.
    pub async fn read_head_position(&self, token: &CancellationToken) -> Result<i64> {
        self.ensure_open()?;
        let (response, rx) = oneshot::channel();
        self.send_read(ReadRequest::HeadPosition { response }, token)
            .await?;
        self.await_response(rx, token).await
    }

    /// Fetches one message's payload and metadata: the lazy half of a page
    /// read with `prefetch = false`. `Ok(None)` if the message is gone.
    pub async fn read_message_data(
        &self,
        stream: &str,
        message_id: Uuid,
        token: &CancellationToken,
    ) -> Result<Option<(String, Option<String>)>> {
        self.ensure_open()?;
        let stream = StreamName::canonicalize(stream)?;
        let (response, rx) = oneshot::channel();
        self.send_read(
            ReadRequest::MessageData {
                stream,
                message_id,
                response,
            },
            token,
        )
        .await?;
        self.await_response(rx, token).await
    }

    // =========================================================================
    // Deletes
    // =========================================================================

    /// Deletes a whole stream under the expected-version protocol and
    /// records a `$stream-deleted` audit event iff the stream existed.
    pub async fn delete_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        token: &CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        let stream = StreamName::canonicalize(stream)?;
        let (response, rx) = oneshot::channel();
        self.send_write(
            WriteRequest::DeleteStream {
                stream,
                expected,
                response,
            },
            token,
        )
        .await?;
        self.await_response(rx, token).await
    }

    /// Deletes one message and records a `$message-deleted` audit event iff
    /// a row was removed. Deleting a missing message is a silent no-op.
    pub async fn delete_message(
        &self,
        stream: &str,
        message_id: Uuid,
        token: &CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        let stream = StreamName::canonicalize(stream)?;
        let (response, rx) = oneshot::channel();
        self.send_write(
            WriteRequest::DeleteMessage {
                stream,
                message_id,
                response,
            },
            token,
        )
        .await?;
        self.await_response(rx, token).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Closes the store: queued work drains, worker threads join, and the
    /// connections are released.
    ///
    /// Idempotent; concurrent and repeated calls are safe. Operations
    /// submitted after closing begins fail with [`Error::Disposed`].
    pub async fn close(&self) {
        let _ = self.state.compare_exchange(
            STATE_OPEN,
            STATE_CLOSING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        let _ = self.write_tx.send(WriteRequest::Shutdown).await;
        for _ in 0..self.reader_count {
            let _ = self.read_tx.send(ReadRequest::Shutdown).await;
        }

        if let Some(handle) = self.writer_handle.lock().await.take() {
            let _ = handle.join();
        }
        let handles = std::mem::take(&mut *self.reader_handles.lock().await);
        for handle in handles {
            let _ = handle.join();
        }

        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        tracing::info!("store closed");
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.state.load(Ordering::SeqCst) == STATE_OPEN {
            Ok(())
        } else {
            Err(Error::Disposed)
        }
    }

    // Cancellation is checked first (biased) at every await point, so a
    // token that fired before the call is observed deterministically.

    async fn send_write(&self, request: WriteRequest, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            sent = self.write_tx.send(request) => sent.map_err(|_| Error::Disposed),
        }
    }

    async fn send_read(&self, request: ReadRequest, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            sent = self.read_tx.send(request) => sent.map_err(|_| Error::Disposed),
        }
    }

    async fn await_response<T>(
        &self,
        rx: oneshot::Receiver<Result<T>>,
        token: &CancellationToken,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            received = rx => received.map_err(|_| Error::Disposed)?,
        }
    }
}

// =============================================================================
// Workers
// =============================================================================

/// Spawns a named worker thread running `body`.
fn spawn_worker(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| Error::Schema(format!("failed to spawn worker thread: {e}")))
}

/// Runs a future to completion on a current-thread runtime.
///
/// Worker threads need a runtime only to receive from the async channels;
/// the actual SQLite work is synchronous.
fn block_on_current_thread(future: impl std::future::Future<Output = ()>) {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build worker runtime")
        .block_on(future);
}

/// Combined worker for in-memory stores: one thread, one connection, both
/// channels.
///
/// Stops on the write-side shutdown marker, then drains any reads that were
/// already queued so close() never abandons accepted work.
async fn run_combined<D: StorageDriver>(
    mut driver: D,
    clock: Arc<dyn Clock>,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    mut read_rx: mpsc::Receiver<ReadRequest>,
) {
    loop {
        tokio::select! {
            request = write_rx.recv() => match request {
                Some(request) => {
                    if !writer::handle_request(&mut driver, clock.as_ref(), request) {
                        break;
                    }
                }
                None => break,
            },
            request = read_rx.recv() => match request {
                Some(request) => {
                    if !reader::handle_request(&driver, request) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    while let Ok(request) = read_rx.try_recv() {
        if !reader::handle_request(&driver, request) {
            break;
        }
    }
    tracing::debug!("combined worker stopped");
}

// =============================================================================
// Tests
// =============================================================================
