//! # Core Engine Module
//!
//! The per-connection streaming engine of the charging station push server. It
//! aggregates everything that has real concurrency, resource lifecycle and failure
//! handling to get right.
//!
//! ## Core Components:
//!
//! - **`codec`**: the JSON wire form of `welcome`, `station_update` and `error`
//!   messages, plus lenient decoding of whatever clients send.
//!
//! - **`streams`**: one periodic producer per dataset list per connection, each walking
//!   its list circularly with a private cursor. Cancellation is idempotent.
//!
//! - **`connection`** and **`registry`**: per-socket state (liveness flag, explicit
//!   socket state, outbound queue, streams) and the owned set of open connections.
//!
//! - **`liveness`**: the global two-round ping/pong sweep that terminates dead peers.
//!
//! - **`lifecycle`**: the task that owns each WebSocket from welcome to teardown.
//!
//! - **`shutdown`**: the linear, run-once shutdown sequence.
//!
//! - **`context`**: the server-lifetime context and engine timing settings.

/// JSON wire form of protocol messages.
pub mod codec;
/// Per-socket state shared by the engine's tasks.
pub mod connection;
/// Server-lifetime context and engine settings.
pub mod context;
/// Task that owns one WebSocket from accept to teardown.
pub mod lifecycle;
/// Global ping/pong dead-peer detection.
pub mod liveness;
/// The set of currently open connections.
pub mod registry;
/// Linear shutdown sequence.
pub mod shutdown;
/// Per-connection periodic record producers.
pub mod streams;

// --- Public API Re-exports ---
pub use codec::{CodecError, InboundMessage, OutboundMessage};
pub use connection::{ConnectionId, ConnectionState, Outbound, SocketState};
pub use context::{EngineSettings, StreamContext, DEFAULT_PING_INTERVAL, DEFAULT_TICK_INTERVAL};
pub use lifecycle::run_connection;
pub use liveness::{LivenessMonitor, SweepReport};
pub use registry::ConnectionRegistry;
pub use shutdown::{ShutdownCoordinator, ShutdownError, ShutdownPhase, StopHandle};
pub use streams::{Cursor, SendFailure, StreamSet, UpdateSink};
