//! # Message Codec
//!
//! Turns protocol messages into the textual wire form and validates what clients send
//! back. Every message is one self-describing JSON object of shape
//! `{type, message?, streamId?, data?}`; there is no batching and no schema version.
//!
//! Inbound text only has to be well-formed JSON. Any shape is accepted as an opaque
//! payload so new client message types can be added without touching the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dataset::Record;

/// Failures of the codec. Encoding failures only surface for messages the server did
/// not build itself; decoding failures are logged and the frame is dropped.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("inbound frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("inbound frame is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

/// # Outbound Message
///
/// The tagged union the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Sent exactly once per connection, before anything else.
    Welcome { message: String },
    /// One record of one stream.
    StationUpdate {
        #[serde(rename = "streamId")]
        stream_id: usize,
        data: Record,
    },
    /// A tick could not deliver its update.
    Error { message: String },
}

impl OutboundMessage {
    pub fn welcome(message: impl Into<String>) -> Self {
        Self::Welcome {
            message: message.into(),
        }
    }

    pub fn station_update(stream_id: usize, data: Record) -> Self {
        Self::StationUpdate { stream_id, data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire `type` tag, handy for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::StationUpdate { .. } => "station_update",
            Self::Error { .. } => "error",
        }
    }
}

/// # Inbound Message
///
/// A decoded client frame. `kind` is the `type` field when the payload is an object
/// carrying a string tag; everything else is kept untouched in `payload`.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: Option<String>,
    pub payload: Value,
}

/// Serializes an outbound message to its wire text.
pub fn encode(message: &OutboundMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

/// Decodes a text frame from a client.
pub fn decode(text: &str) -> Result<InboundMessage, CodecError> {
    let payload: Value = serde_json::from_str(text).map_err(CodecError::Decode)?;
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned);
    Ok(InboundMessage { kind, payload })
}

/// Decodes a binary frame from a client; the bytes must hold UTF-8 JSON.
pub fn decode_bytes(bytes: &[u8]) -> Result<InboundMessage, CodecError> {
    decode(std::str::from_utf8(bytes)?)
}
