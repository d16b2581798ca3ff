//! Codec for the JSON event envelope.
//!
//! Parsing applies the defaulting rules: `room` falls back to
//! [`DEFAULT_ROOM`], `text` to the empty string and `cursor` to absent.
//! A missing or `null` `data` field behaves like an empty object.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent, DEFAULT_ROOM};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message is not a valid envelope.
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope's `data` does not fit the event.
    #[error("Invalid payload for '{event}': {reason}")]
    InvalidPayload {
        /// Event name from the envelope.
        event: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The event name is not part of the protocol.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RoomPayload {
    room: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct DiagramPayload {
    room: Option<String>,
    text: Option<String>,
    cursor: Option<Value>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct CursorPayload {
    room: Option<String>,
    cursor: Option<Value>,
}

fn room_or_default(room: Option<String>) -> String {
    room.unwrap_or_else(|| DEFAULT_ROOM.to_string())
}

fn payload<T: DeserializeOwned + Default>(event: &str, data: Value) -> Result<T, ProtocolError> {
    match data {
        Value::Null => Ok(T::default()),
        Value::Object(_) => {
            serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
                event: event.to_string(),
                reason: e.to_string(),
            })
        }
        other => Err(ProtocolError::InvalidPayload {
            event: event.to_string(),
            reason: format!("expected an object, got {other}"),
        }),
    }
}

fn from_envelope(envelope: Envelope) -> Result<ClientEvent, ProtocolError> {
    let Envelope { event, data } = envelope;

    let parsed = match event.as_str() {
        "join" => {
            let p: RoomPayload = payload(&event, data)?;
            ClientEvent::Join {
                room: room_or_default(p.room),
            }
        }
        "leave" => {
            let p: RoomPayload = payload(&event, data)?;
            ClientEvent::Leave {
                room: room_or_default(p.room),
            }
        }
        "diagram_update" => {
            let p: DiagramPayload = payload(&event, data)?;
            ClientEvent::DiagramUpdate {
                room: room_or_default(p.room),
                text: p.text.unwrap_or_default(),
                cursor: p.cursor,
            }
        }
        "cursor_update" => {
            let p: CursorPayload = payload(&event, data)?;
            ClientEvent::CursorUpdate {
                room: room_or_default(p.room),
                cursor: p.cursor,
            }
        }
        _ => return Err(ProtocolError::UnknownEvent(event)),
    };

    Ok(parsed)
}

/// Decode a client event from a text message.
///
/// # Errors
///
/// Returns an error if the message is not a valid envelope, the event is
/// unknown, or its payload has fields of the wrong type.
pub fn decode(text: &str) -> Result<ClientEvent, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    from_envelope(envelope)
}

/// Decode a client event from a binary message holding UTF-8 JSON.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_bytes(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(data)?;
    from_envelope(envelope)
}

/// Decode a server event, as a client would.
///
/// # Errors
///
/// Returns an error if the message is not a known server event.
pub fn decode_server(text: &str) -> Result<ServerEvent, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode an event envelope to a JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<E: Serialize>(event: &E) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}
