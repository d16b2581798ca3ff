//! Session registry for umlsync.
//!
//! The registry owns every room and the reverse index from connection to
//! rooms. A room exists exactly while it has at least one member.
//!
//! Every mutation runs while the room's map entry is locked, and the caller's
//! closure runs inside that lock, so the membership change and the emission
//! decision for a room are never interleaved with another event for the same
//! room. Lock order is always room entry first, then membership index.

use crate::connection::ConnectionId;
use crate::room::{Room, RoomId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::info;

/// Rooms plus the connection → rooms index.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Rooms indexed by name.
    rooms: DashMap<RoomId, Room>,
    /// Rooms each connection is a member of.
    memberships: DashMap<ConnectionId, HashSet<RoomId>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on a room, creating the room first if it does not exist.
    ///
    /// `f` may only change the membership of `connection_id`. The room is
    /// removed (or never inserted) if it has no members once `f` returns.
    pub fn update_or_create<R>(
        &self,
        room_id: &str,
        connection_id: &ConnectionId,
        f: impl FnOnce(&mut Room) -> R,
    ) -> R {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let result = self.apply(occupied.get_mut(), connection_id, f);
                if occupied.get().is_empty() {
                    occupied.remove();
                    info!(room = %room_id, "Removed empty room");
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut room = Room::new(room_id);
                let result = self.apply(&mut room, connection_id, f);
                if !room.is_empty() {
                    info!(room = %room_id, "Created room");
                    vacant.insert(room);
                }
                result
            }
        }
    }

    /// Run `f` on a room if it exists.
    ///
    /// Returns `None` without calling `f` for an unknown room. Same
    /// membership and removal rules as [`Self::update_or_create`].
    pub fn update<R>(
        &self,
        room_id: &str,
        connection_id: &ConnectionId,
        f: impl FnOnce(&mut Room) -> R,
    ) -> Option<R> {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let result = self.apply(occupied.get_mut(), connection_id, f);
                if occupied.get().is_empty() {
                    occupied.remove();
                    info!(room = %room_id, "Removed empty room");
                }
                Some(result)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Run `f` on a room without modifying it.
    pub fn read<R>(&self, room_id: &str, f: impl FnOnce(&Room) -> R) -> Option<R> {
        self.rooms.get(room_id).map(|room| f(room.value()))
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// `notify` is called for each affected room after the removal, while the
    /// room is still locked. Rooms left empty are deleted. Returns the names
    /// of the affected rooms.
    pub fn remove_connection(
        &self,
        connection_id: &ConnectionId,
        mut notify: impl FnMut(&Room),
    ) -> Vec<RoomId> {
        let Some((_, rooms)) = self.memberships.remove(connection_id) else {
            return Vec::new();
        };

        let mut affected = Vec::with_capacity(rooms.len());
        for room_id in rooms {
            if let Entry::Occupied(mut occupied) = self.rooms.entry(room_id.clone()) {
                if !occupied.get_mut().remove_member(connection_id) {
                    continue;
                }
                info!(room = %room_id, connection = %connection_id, "Removed from room");
                notify(occupied.get());

                if occupied.get().is_empty() {
                    occupied.remove();
                    info!(room = %room_id, "Removed empty room");
                }
                affected.push(room_id);
            }
        }

        affected
    }

    fn apply<R>(
        &self,
        room: &mut Room,
        connection_id: &ConnectionId,
        f: impl FnOnce(&mut Room) -> R,
    ) -> R {
        let was_member = room.is_member(connection_id);
        let result = f(room);
        let is_member = room.is_member(connection_id);

        match (was_member, is_member) {
            (false, true) => {
                self.memberships
                    .entry(connection_id.clone())
                    .or_default()
                    .insert(room.id().to_string());
            }
            (true, false) => {
                if let Entry::Occupied(mut rooms) = self.memberships.entry(connection_id.clone()) {
                    rooms.get_mut().remove(room.id());
                    if rooms.get().is_empty() {
                        rooms.remove();
                    }
                }
            }
            _ => {}
        }

        result
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get the number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get the member count of a room, 0 if it does not exist.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.read(room_id, Room::member_count).unwrap_or(0)
    }

    /// Sum of member counts over all rooms.
    #[must_use]
    pub fn total_members(&self) -> usize {
        self.rooms.iter().map(|room| room.member_count()).sum()
    }

    /// Get a copy of a room's stored text.
    #[must_use]
    pub fn room_text(&self, room_id: &str) -> Option<String> {
        self.read(room_id, |room| room.text().to_string())
    }

    /// Get the rooms a connection is a member of.
    #[must_use]
    pub fn connection_rooms(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        self.memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::new(s)
    }

    #[test]
    fn test_room_created_on_first_member() {
        let registry = SessionRegistry::new();
        let a = id("a");

        let added = registry.update_or_create("diag1", &a, |room| room.add_member(&a));
        assert!(added);
        assert!(registry.room_exists("diag1"));
        assert_eq!(registry.member_count("diag1"), 1);
        assert_eq!(registry.connection_rooms(&a), vec!["diag1".to_string()]);
    }

    #[test]
    fn test_room_never_inserted_without_members() {
        let registry = SessionRegistry::new();
        let a = id("a");

        registry.update_or_create("diag1", &a, |room| room.set_text("@startuml"));
        assert!(!registry.room_exists("diag1"));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_room_removed_when_last_member_leaves() {
        let registry = SessionRegistry::new();
        let a = id("a");
        registry.update_or_create("diag1", &a, |room| room.add_member(&a));

        let removed = registry.update("diag1", &a, |room| room.remove_member(&a));
        assert_eq!(removed, Some(true));
        assert!(!registry.room_exists("diag1"));
        assert!(registry.connection_rooms(&a).is_empty());
    }

    #[test]
    fn test_update_unknown_room_is_none() {
        let registry = SessionRegistry::new();
        let a = id("a");

        let called = registry.update("missing", &a, |_| ());
        assert!(called.is_none());
        assert!(!registry.room_exists("missing"));
    }

    #[test]
    fn test_remove_connection_cleans_every_room() {
        let registry = SessionRegistry::new();
        let a = id("a");
        let b = id("b");

        registry.update_or_create("r1", &a, |room| room.add_member(&a));
        registry.update_or_create("r2", &a, |room| room.add_member(&a));
        registry.update_or_create("r2", &b, |room| room.add_member(&b));

        let mut notified = Vec::new();
        let mut affected = registry.remove_connection(&a, |room| {
            notified.push((room.id().to_string(), room.member_count()));
        });
        affected.sort();
        notified.sort();

        assert_eq!(affected, vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(notified, vec![("r1".to_string(), 0), ("r2".to_string(), 1)]);
        assert!(!registry.room_exists("r1"));
        assert!(registry.room_exists("r2"));
        assert_eq!(registry.member_count("r2"), 1);
        assert!(registry.connection_rooms(&a).is_empty());
    }

    #[test]
    fn test_remove_unknown_connection() {
        let registry = SessionRegistry::new();
        let affected = registry.remove_connection(&id("ghost"), |_| panic!("no rooms"));
        assert!(affected.is_empty());
    }

    #[test]
    fn test_total_members() {
        let registry = SessionRegistry::new();
        let a = id("a");
        let b = id("b");

        registry.update_or_create("r1", &a, |room| room.add_member(&a));
        registry.update_or_create("r1", &b, |room| room.add_member(&b));
        registry.update_or_create("r2", &a, |room| room.add_member(&a));

        assert_eq!(registry.room_count(), 2);
        assert_eq!(registry.total_members(), 3);
        let mut names = registry.room_names();
        names.sort();
        assert_eq!(names, vec!["r1".to_string(), "r2".to_string()]);
    }
}
