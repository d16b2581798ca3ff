//! Room abstraction for umlsync.
//!
//! A room is a named broadcast group plus the last diagram text any member
//! sent to it. Room names are free-form client strings.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// A room identifier.
pub type RoomId = String;

/// A collaboration room.
#[derive(Debug)]
pub struct Room {
    /// Room name.
    id: RoomId,
    /// Last known full diagram source.
    text: String,
    /// Connections currently joined.
    members: HashSet<ConnectionId>,
}

impl Room {
    /// Create a new, empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            text: String::new(),
            members: HashSet::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the stored diagram text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the stored diagram text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }

    /// Add a member.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn add_member(&mut self, connection_id: &ConnectionId) -> bool {
        let added = self.members.insert(connection_id.clone());
        if added {
            debug!(room = %self.id, connection = %connection_id, "Member added");
        }
        added
    }

    /// Remove a member.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove_member(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.members.remove(connection_id);
        if removed {
            debug!(room = %self.id, connection = %connection_id, "Member removed");
        }
        removed
    }

    /// Iterate over all members.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    /// Iterate over every member except `sender`.
    pub fn recipients_except<'a>(
        &'a self,
        sender: &'a ConnectionId,
    ) -> impl Iterator<Item = &'a ConnectionId> + 'a {
        self.members.iter().filter(move |member| *member != sender)
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_creation() {
        let room = Room::new("diag1");
        assert_eq!(room.id(), "diag1");
        assert_eq!(room.text(), "");
        assert_eq!(room.member_count(), 0);
        assert!(room.is_empty());
    }

    #[test]
    fn test_membership_is_a_set() {
        let mut room = Room::new("diag1");
        let a = ConnectionId::new("a");

        assert!(room.add_member(&a));
        assert!(!room.add_member(&a));
        assert_eq!(room.member_count(), 1);
        assert!(room.is_member(&a));

        assert!(room.remove_member(&a));
        assert!(!room.remove_member(&a));
        assert!(room.is_empty());
    }

    #[test]
    fn test_recipients_exclude_sender() {
        let mut room = Room::new("diag1");
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");
        let c = ConnectionId::new("c");
        room.add_member(&a);
        room.add_member(&b);
        room.add_member(&c);

        let mut recipients: Vec<_> = room.recipients_except(&a).cloned().collect();
        recipients.sort();
        assert_eq!(recipients, vec![b.clone(), c]);

        // A non-member sender excludes nobody.
        let outsider = ConnectionId::new("z");
        assert_eq!(room.recipients_except(&outsider).count(), 3);
    }

    #[test]
    fn test_text_overwrite() {
        let mut room = Room::new("diag1");
        room.set_text("@startuml\nA -> B\n@enduml");
        room.set_text("@startuml\n@enduml");
        assert_eq!(room.text(), "@startuml\n@enduml");
    }
}
