//! # Connection State
//!
//! Everything the server keeps about one open socket: the liveness flag, the explicit
//! socket state, the outbound queue drained by the socket task, the connection's
//! stream producers and the token that forces the socket task to drop the socket.
//!
//! The socket itself is owned by the lifecycle task. Other parts of the engine (stream
//! producers, the liveness monitor, the shutdown coordinator) only ever talk to it
//! through [`Outbound`] commands queued here.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::codec::{self, OutboundMessage};
use crate::core::registry::ConnectionRegistry;
use crate::core::streams::{SendFailure, StreamSet, UpdateSink};

/// Identifier handed out by the registry, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Explicit socket state, checked before every data write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl SocketState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Commands for the task that owns the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded protocol message.
    Text(String),
    /// A liveness probe.
    Ping,
    /// Graceful close with a "going away" frame.
    Close,
}

/// Receiving half of a connection's outbound queue.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// # Connection State
///
/// Shared between the lifecycle task, the connection's stream producers and the
/// registry. Teardown is idempotent: the first caller cancels the streams and removes
/// the entry, later callers do nothing.
pub struct ConnectionState {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    alive: AtomicBool,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Outbound>,
    terminate: CancellationToken,
    streams: Mutex<Option<StreamSet>>,
    torn_down: AtomicBool,
}

impl ConnectionState {
    /// Creates an open, alive connection and the queue its socket task drains.
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>) -> (Self, OutboundReceiver) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let state = Self {
            id,
            peer,
            alive: AtomicBool::new(true),
            state: AtomicU8::new(SocketState::Open as u8),
            outbound,
            terminate: CancellationToken::new(),
            streams: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        };
        (state, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn socket_state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_socket_state(&self, state: SocketState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Records a pong from the peer.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Reads and clears the liveness flag in one step, returning its previous value.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Queues a liveness probe.
    pub fn send_ping(&self) -> Result<(), SendFailure> {
        self.push(Outbound::Ping)
    }

    /// Asks the socket task to close gracefully.
    pub fn request_close(&self) {
        if self.socket_state() == SocketState::Open {
            self.set_socket_state(SocketState::Closing);
        }
        if self.push(Outbound::Close).is_err() {
            debug!(conn = %self.id, "close requested after socket task exited");
        }
    }

    /// Abruptly ends the connection: the socket task drops the socket without a close
    /// handshake and then runs teardown.
    pub fn terminate(&self) {
        self.set_socket_state(SocketState::Closed);
        self.terminate.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        self.terminate.cancelled().await;
    }

    /// Hands the connection its stream producers. If teardown already ran they are
    /// cancelled on the spot.
    pub fn attach_streams(&self, streams: StreamSet) {
        let mut slot = lock(&self.streams);
        if self.is_torn_down() {
            streams.cancel();
        }
        *slot = Some(streams);
    }

    /// Number of stream producers still running.
    pub fn live_streams(&self) -> usize {
        lock(&self.streams).as_ref().map_or(0, StreamSet::live_count)
    }

    /// Number of stream producers attached, running or not.
    pub fn stream_count(&self) -> usize {
        lock(&self.streams).as_ref().map_or(0, StreamSet::len)
    }

    /// Cancels the connection's streams and removes it from `registry`.
    ///
    /// Returns `true` for the call that did the work; repeated calls are no-ops.
    pub fn teardown(&self, registry: &ConnectionRegistry) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.set_socket_state(SocketState::Closed);
        if let Some(streams) = lock(&self.streams).as_ref() {
            streams.cancel();
        }
        registry.remove(self.id);
        true
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn push(&self, command: Outbound) -> Result<(), SendFailure> {
        self.outbound.send(command).map_err(|_| SendFailure::Closed)
    }
}

impl UpdateSink for ConnectionState {
    fn is_open(&self) -> bool {
        self.socket_state() == SocketState::Open
    }

    fn deliver(&self, message: &OutboundMessage) -> Result<(), SendFailure> {
        let text = codec::encode(message)?;
        self.push(Outbound::Text(text))
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("alive", &self.is_alive())
            .field("state", &self.socket_state())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
