//! JSON wire format shared by the server actor and the client library.
//!
//! Every WebSocket text frame carries exactly one [`Frame`]. Fire-and-forget
//! events, requests and replies are distinct variants, so a reply channel is
//! never inferred from the shape of the arguments.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names that belong to transport plumbing and are never dispatched to a role.
pub const RESERVED_NAMES: &[&str] = &["message", "connected"];

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Named message with no reply expected.
    Event {
        name: String,
        #[serde(default)]
        data: Value,
    },
    /// Named message the remote end must answer with a `Reply` carrying the same id.
    Request {
        id: u64,
        name: String,
        #[serde(default)]
        data: Value,
    },
    /// Answer to an earlier `Request`.
    Reply {
        id: u64,
        #[serde(default)]
        data: Value,
    },
}

impl Frame {
    pub fn event(name: &str, data: Value) -> Self {
        Frame::Event {
            name: name.to_string(),
            data,
        }
    }

    pub fn request(id: u64, name: &str, data: Value) -> Self {
        Frame::Request {
            id,
            name: name.to_string(),
            data,
        }
    }

    pub fn reply(id: u64, data: Value) -> Self {
        Frame::Reply { id, data }
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Encode for a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// True for transport-level names that must not reach a role handler.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Decode a message payload into the type the handler expects.
pub fn payload<T: DeserializeOwned>(name: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Read an optional video id: `null`, a missing value and `""` all mean "none".
pub fn optional_video_id(data: &Value) -> Option<String> {
    match data {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Error type for frame decoding and dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Text frame was not a valid `Frame`.
    Malformed(String),
    /// No handler is registered for this name on the receiving role.
    UnknownMessage(String),
    /// Handler exists but the payload has the wrong shape.
    InvalidPayload { name: String, reason: String },
    /// Outbound value could not be serialized.
    Encode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(reason) => write!(f, "Malformed frame: {}", reason),
            ProtocolError::UnknownMessage(name) => write!(f, "No handler for message: {}", name),
            ProtocolError::InvalidPayload { name, reason } => {
                write!(f, "Invalid payload for {}: {}", name, reason)
            }
            ProtocolError::Encode(reason) => write!(f, "Failed to encode frame: {}", reason),
        }
    }
}

impl std::error::Error for ProtocolError {}
