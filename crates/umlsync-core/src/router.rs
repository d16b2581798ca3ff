//! Event router for umlsync.
//!
//! The router applies client events to the [`SessionRegistry`] and queues the
//! resulting notifications on the [`ConnectionHub`]. All emissions for a room
//! are decided and queued while the room is locked.

use crate::connection::ConnectionId;
use crate::hub::{ConnectionHub, Outbound};
use crate::registry::SessionRegistry;
use crate::room::RoomId;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use umlsync_protocol::{codec, ClientEvent, ProtocolError, ServerEvent};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound message could not be parsed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is not (or no longer) registered.
    #[error("Connection not registered: {0}")]
    UnknownConnection(ConnectionId),
}

impl RelayError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Protocol(ProtocolError::Json(_)) => "malformed",
            RelayError::Protocol(ProtocolError::InvalidPayload { .. }) => "invalid_payload",
            RelayError::Protocol(ProtocolError::UnknownEvent(_)) => "unknown_event",
            RelayError::UnknownConnection(_) => "unknown_connection",
        }
    }
}

/// The central event router.
///
/// One router serves every namespace.
#[derive(Debug, Default)]
pub struct EventRouter {
    registry: SessionRegistry,
    hub: ConnectionHub,
}

impl EventRouter {
    /// Create a router with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            room_count: self.registry.room_count(),
            connection_count: self.hub.len(),
            total_members: self.registry.total_members(),
        }
    }

    /// Register a new connection and acknowledge it.
    ///
    /// The `connected` event is queued before the receiver is returned. No
    /// room membership is created.
    pub fn connect(&self, connection_id: &ConnectionId) -> mpsc::UnboundedReceiver<Outbound> {
        let rx = self.hub.register(connection_id);
        self.hub.send(
            connection_id,
            Arc::new(ServerEvent::connected(connection_id.as_str())),
        );
        info!(connection = %connection_id, "Client connected");
        rx
    }

    /// Tear down a connection.
    ///
    /// The connection stops receiving events first, then leaves every room;
    /// remaining members of each room get `user_left`. Returns the affected
    /// rooms.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        self.hub.unregister(connection_id);

        let notice = Arc::new(ServerEvent::user_disconnected(connection_id.as_str()));
        let rooms = self.registry.remove_connection(connection_id, |room| {
            let recipients = self.hub.broadcast(room.members(), &notice);
            debug!(
                room = %room.id(),
                connection = %connection_id,
                recipients,
                "Notified remaining members"
            );
        });

        info!(connection = %connection_id, rooms = rooms.len(), "Client disconnected");
        rooms
    }

    /// Decode and apply a text message.
    ///
    /// Returns the event name on success.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be decoded or the connection
    /// is not registered.
    pub fn handle_text(
        &self,
        connection_id: &ConnectionId,
        text: &str,
    ) -> Result<&'static str, RelayError> {
        let event = codec::decode(text)?;
        self.handle(connection_id, event)
    }

    /// Decode and apply a binary message.
    ///
    /// # Errors
    ///
    /// Same as [`Self::handle_text`].
    pub fn handle_bytes(
        &self,
        connection_id: &ConnectionId,
        data: &[u8],
    ) -> Result<&'static str, RelayError> {
        let event = codec::decode_bytes(data)?;
        self.handle(connection_id, event)
    }

    /// Apply a decoded client event.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn handle(
        &self,
        connection_id: &ConnectionId,
        event: ClientEvent,
    ) -> Result<&'static str, RelayError> {
        if !self.hub.is_registered(connection_id) {
            return Err(RelayError::UnknownConnection(connection_id.clone()));
        }

        let name = event.name();
        match event {
            ClientEvent::Join { room } => {
                self.join(connection_id, &room);
            }
            ClientEvent::Leave { room } => {
                self.leave(connection_id, &room);
            }
            ClientEvent::DiagramUpdate { room, text, cursor } => {
                self.diagram_update(connection_id, &room, text, cursor);
            }
            ClientEvent::CursorUpdate { room, cursor } => {
                self.cursor_update(connection_id, &room, cursor);
            }
        }

        Ok(name)
    }

    /// Report a failed event back to its sender.
    ///
    /// Unknown events and events from unregistered connections are only
    /// logged; everything else answers the sender with a generic `error`.
    pub fn report_error(&self, connection_id: &ConnectionId, err: &RelayError) {
        match err {
            RelayError::Protocol(ProtocolError::UnknownEvent(name)) => {
                warn!(connection = %connection_id, event = %name, "Ignoring unknown event");
            }
            RelayError::UnknownConnection(_) => {
                warn!(connection = %connection_id, "Dropping event for unregistered connection");
            }
            RelayError::Protocol(_) => {
                error!(connection = %connection_id, error = %err, "Event handling failed");
                self.hub
                    .send(connection_id, Arc::new(ServerEvent::internal_error()));
            }
        }
    }

    /// Join a room.
    ///
    /// A late joiner receives the stored text; other members receive
    /// `user_joined`. Returns the member count.
    pub fn join(&self, connection_id: &ConnectionId, room_id: &str) -> usize {
        let hub = &self.hub;
        let (users, recipients) = self.registry.update_or_create(room_id, connection_id, |room| {
            room.add_member(connection_id);

            if !room.text().is_empty() {
                hub.send(connection_id, Arc::new(ServerEvent::snapshot(room.text())));
                debug!(
                    connection = %connection_id,
                    room = %room_id,
                    bytes = room.text().len(),
                    "Sent current state"
                );
            }

            let users = room.member_count();
            let notice = Arc::new(ServerEvent::user_joined(connection_id.as_str(), users));
            (users, hub.broadcast(room.recipients_except(connection_id), &notice))
        });

        info!(connection = %connection_id, room = %room_id, users, recipients, "Client joined room");
        users
    }

    /// Leave a room.
    ///
    /// Returns the remaining member count, or `None` if the room is unknown.
    pub fn leave(&self, connection_id: &ConnectionId, room_id: &str) -> Option<usize> {
        let hub = &self.hub;
        let remaining = self.registry.update(room_id, connection_id, |room| {
            room.remove_member(connection_id);
            let remaining = room.member_count();
            let notice = Arc::new(ServerEvent::user_left(connection_id.as_str(), remaining));
            hub.broadcast(room.members(), &notice);
            remaining
        });

        match remaining {
            Some(users) => {
                info!(connection = %connection_id, room = %room_id, users, "Client left room");
            }
            None => debug!(connection = %connection_id, room = %room_id, "Leave for unknown room"),
        }
        remaining
    }

    /// Store new diagram text and relay it to the other members.
    ///
    /// A sender that is not a member of the room is enrolled first, creating
    /// the room if needed. Returns the number of recipients.
    pub fn diagram_update(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        text: String,
        cursor: Option<Value>,
    ) -> usize {
        let hub = &self.hub;
        let bytes = text.len();
        let recipients = self.registry.update_or_create(room_id, connection_id, |room| {
            if room.add_member(connection_id) {
                info!(connection = %connection_id, room = %room_id, "Auto-joined on diagram update");
            }

            let notice = Arc::new(ServerEvent::diagram_update(
                text.as_str(),
                cursor,
                connection_id.as_str(),
            ));
            room.set_text(text);
            hub.broadcast(room.recipients_except(connection_id), &notice)
        });

        debug!(connection = %connection_id, room = %room_id, bytes, recipients, "Diagram updated");
        recipients
    }

    /// Relay a cursor position to the other members.
    ///
    /// Nothing is stored and nobody is enrolled. Returns `None` if the room is
    /// unknown.
    pub fn cursor_update(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        cursor: Option<Value>,
    ) -> Option<usize> {
        let notice = Arc::new(ServerEvent::cursor_update(cursor, connection_id.as_str()));
        let recipients = self.registry.read(room_id, |room| {
            self.hub.broadcast(room.recipients_except(connection_id), &notice)
        });

        trace!(connection = %connection_id, room = %room_id, ?recipients, "Cursor relayed");
        recipients
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of connected clients.
    pub connection_count: usize,
    /// Sum of room member counts.
    pub total_members: usize,
}
