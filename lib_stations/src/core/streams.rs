//! # Stream Cursor Engine
//!
//! Every connection gets one periodic producer per dataset list. Each producer is a
//! lightweight task that owns its own [`Cursor`] and walks its list circularly, one
//! record per tick, pushing `station_update` messages into the connection's
//! [`UpdateSink`].
//!
//! ## Core Behaviour:
//!
//! 1.  **Independent schedules**: each stream runs on its own interval. A slow send on
//!     one stream never delays another, because they never share a task.
//! 2.  **Drop, don't buffer**: a tick that finds the socket not open is a silent
//!     no-op. The record is skipped, never queued for later.
//! 3.  **Failed ticks are local**: if delivery fails, an `error` message is offered to
//!     the same client instead and the timer keeps running.
//! 4.  **Idempotent cancellation**: all producers of a connection share one
//!     `CancellationToken`. Cancelling it once or twice has the same effect, so a close
//!     handler and an error handler may race to do it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::codec::{CodecError, OutboundMessage};
use crate::dataset::{Dataset, Record};

/// Text of the `error` message sent to a client when a tick fails.
pub const TICK_FAILURE_TEXT: &str = "Failed to send station update";

/// Why a message could not be handed to a connection.
#[derive(Debug, Error)]
pub enum SendFailure {
    #[error("connection writer is gone")]
    Closed,

    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// # Update Sink
///
/// The write side of a connection as seen by its stream producers.
pub trait UpdateSink: Send + Sync + 'static {
    /// Whether the socket currently accepts writes.
    fn is_open(&self) -> bool;

    /// Hands one message to the connection's writer.
    fn deliver(&self, message: &OutboundMessage) -> Result<(), SendFailure>;
}

/// # Cursor
///
/// Replay offset of one stream within its list. Only the owning producer touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    offset: usize,
    len: usize,
}

impl Cursor {
    pub fn new(len: usize) -> Self {
        Self { offset: 0, len }
    }

    /// The index to emit on this tick, wrapping to 0 once the offset ran off the end.
    pub fn current(&mut self) -> usize {
        if self.offset >= self.len {
            self.offset = 0;
        }
        self.offset
    }

    /// Moves past the record that was just emitted.
    pub fn advance(&mut self) {
        self.offset += 1;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Outcome of a single tick, mostly useful for tests and trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The record at this index was delivered.
    Sent(usize),
    /// The socket was not open; the record at this index was dropped.
    Skipped(usize),
    /// No update went out; an `error` message was offered instead.
    Failed,
}

/// Runs one tick of stream `stream_id` against `list`.
///
/// On a failed delivery the cursor stays put, so the next tick retries the same record.
pub fn tick<S: UpdateSink + ?Sized>(
    stream_id: usize,
    list: &[Record],
    cursor: &mut Cursor,
    sink: &S,
) -> TickOutcome {
    let index = cursor.current();
    let Some(record) = list.get(index) else {
        warn!(stream_id, index, len = list.len(), "cursor points past its list");
        notify_failure(stream_id, sink);
        return TickOutcome::Failed;
    };

    if !sink.is_open() {
        cursor.advance();
        return TickOutcome::Skipped(index);
    }

    match sink.deliver(&OutboundMessage::station_update(stream_id, record.clone())) {
        Ok(()) => {
            cursor.advance();
            TickOutcome::Sent(index)
        }
        Err(e) => {
            warn!(stream_id, error = %e, "station update failed");
            notify_failure(stream_id, sink);
            TickOutcome::Failed
        }
    }
}

fn notify_failure<S: UpdateSink + ?Sized>(stream_id: usize, sink: &S) {
    if let Err(e) = sink.deliver(&OutboundMessage::error(TICK_FAILURE_TEXT)) {
        debug!(stream_id, error = %e, "error notice could not be delivered either");
    }
}

/// # Stream Set
///
/// The live producers of one connection: exactly one task per dataset list.
pub struct StreamSet {
    token: CancellationToken,
    cancelled: AtomicBool,
    handles: Vec<JoinHandle<()>>,
}

impl StreamSet {
    /// Starts one producer per list of `dataset`, each ticking every `period`.
    ///
    /// The first tick of every stream happens one full `period` after the call.
    pub fn spawn<S: UpdateSink>(dataset: Arc<Dataset>, sink: Arc<S>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let handles = (0..dataset.stream_count())
            .map(|stream_id| {
                tokio::spawn(run_stream(
                    stream_id,
                    Arc::clone(&dataset),
                    Arc::clone(&sink),
                    period,
                    token.child_token(),
                ))
            })
            .collect();

        Self {
            token,
            cancelled: AtomicBool::new(false),
            handles,
        }
    }

    /// Number of producers started for this connection.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Producers that have not finished yet.
    pub fn live_count(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Stops every producer. Returns `true` only for the call that actually cancelled.
    ///
    /// A tick already running is not interrupted; no tick starts afterwards.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for StreamSet {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_stream<S: UpdateSink>(
    stream_id: usize,
    dataset: Arc<Dataset>,
    sink: Arc<S>,
    period: Duration,
    token: CancellationToken,
) {
    let Some(list) = dataset.list(stream_id) else {
        return;
    };
    let mut cursor = Cursor::new(list.len());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = tick(stream_id, list, &mut cursor, &*sink);
                debug!(stream_id, ?outcome, "stream tick");
            }
        }
    }
}
