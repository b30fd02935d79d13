//! # Connection Lifecycle
//!
//! One task per upgraded WebSocket. The task owns the socket for its whole life and
//! is the only place that writes to it.
//!
//! ## Workflow:
//! 1.  **Register**: a [`ConnectionState`] is created and inserted into the registry.
//!     A sealed registry (shutdown in progress) gets a close frame instead.
//! 2.  **Welcome**: the welcome message is written straight to the socket. Stream
//!     producers are only started after that write, so it is always first.
//! 3.  **Drive**: the task multiplexes three sources until one of them ends the
//!     connection:
//!     - forced termination from the liveness monitor,
//!     - queued [`Outbound`] commands (updates, pings, graceful close),
//!     - inbound frames (pongs, client messages, close, transport errors).
//! 4.  **Teardown**: streams are cancelled and the registry entry removed, whatever the
//!     reason. Nothing is re-thrown; the outcome is only logged.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::SinkExt;
use tracing::{debug, info, warn};

use crate::core::codec::{self, CodecError, InboundMessage, OutboundMessage};
use crate::core::connection::{ConnectionState, Outbound, OutboundReceiver};
use crate::core::context::StreamContext;
use crate::core::streams::StreamSet;

/// Why a connection ended.
#[derive(Debug)]
pub enum ConnectionEnd {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// Reading or writing the socket failed.
    TransportError(axum::Error),
    /// The liveness monitor gave up on the peer.
    Terminated,
    /// The server closed the socket (shutdown or refused registration).
    ServerClosed,
}

/// Serves one upgraded WebSocket until it ends, then tears it down.
pub async fn run_connection(mut socket: WebSocket, ctx: Arc<StreamContext>, peer: Option<SocketAddr>) {
    let (conn, mut outbound) = ConnectionState::new(ctx.registry.next_id(), peer);
    let conn = Arc::new(conn);

    if !ctx.registry.insert(Arc::clone(&conn)) {
        info!(conn = %conn.id(), peer = ?peer, "Refusing client, server is shutting down");
        let _ = socket.send(going_away()).await;
        return;
    }
    info!(conn = %conn.id(), peer = ?peer, "New client connected");

    let end = match send_welcome(&mut socket, &conn, &ctx.settings.welcome_text).await {
        Err(end) => end,
        Ok(()) => {
            let streams = StreamSet::spawn(
                Arc::clone(&ctx.dataset),
                Arc::clone(&conn),
                ctx.settings.tick_interval,
            );
            debug!(conn = %conn.id(), streams = streams.len(), "Streams started");
            conn.attach_streams(streams);
            drive(&mut socket, &conn, &mut outbound).await
        }
    };

    if matches!(end, ConnectionEnd::PeerClosed) {
        // Flushes the close reply the WebSocket layer queued for the peer.
        let _ = SinkExt::close(&mut socket).await;
    }
    conn.teardown(&ctx.registry);

    match end {
        ConnectionEnd::PeerClosed => info!(conn = %conn.id(), "Client disconnected"),
        ConnectionEnd::ServerClosed => info!(conn = %conn.id(), "Client closed by server"),
        ConnectionEnd::Terminated => warn!(conn = %conn.id(), peer = ?peer, "Client terminated, liveness probe unanswered"),
        ConnectionEnd::TransportError(e) => warn!(conn = %conn.id(), error = %e, "WebSocket error"),
    }
}

async fn send_welcome(
    socket: &mut WebSocket,
    conn: &ConnectionState,
    text: &str,
) -> Result<(), ConnectionEnd> {
    let welcome = match codec::encode(&OutboundMessage::welcome(text)) {
        Ok(welcome) => welcome,
        Err(e) => {
            warn!(error = %e, "Welcome message could not be encoded");
            return Err(ConnectionEnd::ServerClosed);
        }
    };
    send_frame(socket, conn, Message::Text(welcome.into())).await
}

/// Writes one frame, giving up as soon as the connection is terminated. A peer that
/// stopped reading can block the write indefinitely once its buffers are full.
async fn send_frame(
    socket: &mut WebSocket,
    conn: &ConnectionState,
    frame: Message,
) -> Result<(), ConnectionEnd> {
    tokio::select! {
        biased;
        _ = conn.terminated() => Err(ConnectionEnd::Terminated),
        sent = socket.send(frame) => sent.map_err(ConnectionEnd::TransportError),
    }
}

async fn drive(
    socket: &mut WebSocket,
    conn: &ConnectionState,
    outbound: &mut OutboundReceiver,
) -> ConnectionEnd {
    loop {
        tokio::select! {
            biased;
            _ = conn.terminated() => return ConnectionEnd::Terminated,
            command = outbound.recv() => {
                let Some(command) = command else {
                    return ConnectionEnd::ServerClosed;
                };
                let frame = match command {
                    Outbound::Text(text) => Message::Text(text.into()),
                    Outbound::Ping => Message::Ping(Bytes::new()),
                    Outbound::Close => {
                        return match send_frame(socket, conn, going_away()).await {
                            Err(ConnectionEnd::Terminated) => ConnectionEnd::Terminated,
                            _ => ConnectionEnd::ServerClosed,
                        };
                    }
                };
                if let Err(end) = send_frame(socket, conn, frame).await {
                    return end;
                }
            }
            inbound = socket.recv() => match inbound {
                None => return ConnectionEnd::PeerClosed,
                Some(Err(e)) => return ConnectionEnd::TransportError(e),
                Some(Ok(message)) => {
                    if let Some(end) = handle_inbound(conn, message) {
                        return end;
                    }
                }
            },
        }
    }
}

fn handle_inbound(conn: &ConnectionState, message: Message) -> Option<ConnectionEnd> {
    match message {
        Message::Pong(_) => conn.mark_alive(),
        // Pings from the client are answered by the WebSocket layer itself.
        Message::Ping(_) => {}
        Message::Text(text) => log_client_message(conn, codec::decode(text.as_str())),
        Message::Binary(bytes) => log_client_message(conn, codec::decode_bytes(&bytes)),
        Message::Close(frame) => {
            debug!(conn = %conn.id(), ?frame, "Close frame received");
            return Some(ConnectionEnd::PeerClosed);
        }
    }
    None
}

fn log_client_message(conn: &ConnectionState, decoded: Result<InboundMessage, CodecError>) {
    match decoded {
        Ok(message) => info!(
            conn = %conn.id(),
            kind = message.kind.as_deref().unwrap_or("untyped"),
            payload = %message.payload,
            "Received client message"
        ),
        Err(e) => warn!(conn = %conn.id(), error = %e, "Failed to parse client message"),
    }
}

fn going_away() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: Utf8Bytes::from_static("server shutting down"),
    }))
}
