//! Event types for the umlsync protocol.
//!
//! Inbound events are parsed into [`ClientEvent`] with all defaults already
//! applied, so the relay never re-checks for missing fields. Outbound events
//! are [`ServerEvent`] values serialized as `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Room used when a client omits the `room` field.
pub const DEFAULT_ROOM: &str = "default";

/// Message sent with every `error` event.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// An event sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to a room.
    Join {
        /// Room to join.
        room: String,
    },

    /// Unsubscribe from a room.
    Leave {
        /// Room to leave.
        room: String,
    },

    /// Replace the room's diagram text.
    DiagramUpdate {
        /// Target room.
        room: String,
        /// Full diagram source.
        text: String,
        /// Optional cursor position of the sender.
        cursor: Option<Value>,
    },

    /// Forward a cursor position to the room.
    CursorUpdate {
        /// Target room.
        room: String,
        /// Cursor position, passed through untouched.
        cursor: Option<Value>,
    },
}

impl ClientEvent {
    /// Get the wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::Leave { .. } => "leave",
            ClientEvent::DiagramUpdate { .. } => "diagram_update",
            ClientEvent::CursorUpdate { .. } => "cursor_update",
        }
    }

    /// Get the room the event targets.
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            ClientEvent::Join { room }
            | ClientEvent::Leave { room }
            | ClientEvent::DiagramUpdate { room, .. }
            | ClientEvent::CursorUpdate { room, .. } => room,
        }
    }

    /// Create a new Join event.
    #[must_use]
    pub fn join(room: impl Into<String>) -> Self {
        ClientEvent::Join { room: room.into() }
    }

    /// Create a new Leave event.
    #[must_use]
    pub fn leave(room: impl Into<String>) -> Self {
        ClientEvent::Leave { room: room.into() }
    }

    /// Create a new DiagramUpdate event.
    #[must_use]
    pub fn diagram_update(
        room: impl Into<String>,
        text: impl Into<String>,
        cursor: Option<Value>,
    ) -> Self {
        ClientEvent::DiagramUpdate {
            room: room.into(),
            text: text.into(),
            cursor,
        }
    }

    /// Create a new CursorUpdate event.
    #[must_use]
    pub fn cursor_update(room: impl Into<String>, cursor: Option<Value>) -> Self {
        ClientEvent::CursorUpdate {
            room: room.into(),
            cursor,
        }
    }
}

/// An event sent by the server.
///
/// `cursor` is always serialized, as `null` when absent. `users_count` and
/// `from_sid` are omitted entirely when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledgment, sent to the new connection only.
    Connected {
        /// The connection's identifier.
        sid: String,
    },

    /// Another connection joined a room this connection is in.
    UserJoined {
        /// The joining connection.
        sid: String,
        /// Member count after the join.
        users_count: usize,
    },

    /// Another connection left a room this connection is in.
    UserLeft {
        /// The departing connection.
        sid: String,
        /// Remaining member count. Absent on the disconnect path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        users_count: Option<usize>,
    },

    /// Diagram text, either a relayed edit or a late-join snapshot.
    DiagramUpdate {
        /// Full diagram source.
        text: String,
        /// Sender's cursor, `null` for snapshots.
        cursor: Option<Value>,
        /// Sender of the edit. Absent for snapshots.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_sid: Option<String>,
    },

    /// Relayed cursor position.
    CursorUpdate {
        /// Cursor position as sent by the client.
        cursor: Option<Value>,
        /// Sender of the cursor.
        from_sid: String,
    },

    /// Generic failure report.
    Error {
        /// Human-readable message.
        message: String,
    },
}

impl ServerEvent {
    /// Get the wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::DiagramUpdate { .. } => "diagram_update",
            ServerEvent::CursorUpdate { .. } => "cursor_update",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Create a new Connected event.
    #[must_use]
    pub fn connected(sid: impl Into<String>) -> Self {
        ServerEvent::Connected { sid: sid.into() }
    }

    /// Create a new UserJoined event.
    #[must_use]
    pub fn user_joined(sid: impl Into<String>, users_count: usize) -> Self {
        ServerEvent::UserJoined {
            sid: sid.into(),
            users_count,
        }
    }

    /// Create a UserLeft event for an explicit leave.
    #[must_use]
    pub fn user_left(sid: impl Into<String>, users_count: usize) -> Self {
        ServerEvent::UserLeft {
            sid: sid.into(),
            users_count: Some(users_count),
        }
    }

    /// Create a UserLeft event for a disconnect.
    #[must_use]
    pub fn user_disconnected(sid: impl Into<String>) -> Self {
        ServerEvent::UserLeft {
            sid: sid.into(),
            users_count: None,
        }
    }

    /// Create the snapshot sent to a late joiner.
    #[must_use]
    pub fn snapshot(text: impl Into<String>) -> Self {
        ServerEvent::DiagramUpdate {
            text: text.into(),
            cursor: None,
            from_sid: None,
        }
    }

    /// Create a relayed diagram edit.
    #[must_use]
    pub fn diagram_update(
        text: impl Into<String>,
        cursor: Option<Value>,
        from_sid: impl Into<String>,
    ) -> Self {
        ServerEvent::DiagramUpdate {
            text: text.into(),
            cursor,
            from_sid: Some(from_sid.into()),
        }
    }

    /// Create a relayed cursor update.
    #[must_use]
    pub fn cursor_update(cursor: Option<Value>, from_sid: impl Into<String>) -> Self {
        ServerEvent::CursorUpdate {
            cursor,
            from_sid: from_sid.into(),
        }
    }

    /// Create the generic error event.
    #[must_use]
    pub fn internal_error() -> Self {
        ServerEvent::Error {
            message: INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names() {
        assert_eq!(ClientEvent::join("a").name(), "join");
        assert_eq!(ClientEvent::cursor_update("a", None).name(), "cursor_update");
        assert_eq!(ServerEvent::user_disconnected("s").name(), "user_left");
        assert_eq!(ServerEvent::internal_error().name(), "error");
    }

    #[test]
    fn test_snapshot_serializes_null_cursor_without_sender() {
        let value = serde_json::to_value(ServerEvent::snapshot("@startuml")).unwrap();
        assert_eq!(
            value,
            json!({"event": "diagram_update", "data": {"text": "@startuml", "cursor": null}})
        );
    }

    #[test]
    fn test_user_left_count_only_on_leave_path() {
        let leave = serde_json::to_value(ServerEvent::user_left("sid_1", 0)).unwrap();
        assert_eq!(leave["data"], json!({"sid": "sid_1", "users_count": 0}));

        let disconnect = serde_json::to_value(ServerEvent::user_disconnected("sid_1")).unwrap();
        assert_eq!(disconnect["data"], json!({"sid": "sid_1"}));
    }

    #[test]
    fn test_relayed_update_carries_sender() {
        let value =
            serde_json::to_value(ServerEvent::diagram_update("x", Some(json!(5)), "sid_a"))
                .unwrap();
        assert_eq!(
            value["data"],
            json!({"text": "x", "cursor": 5, "from_sid": "sid_a"})
        );
    }
}
