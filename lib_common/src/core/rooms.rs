//! # Room Membership
//!
//! Named delivery scopes. A room materializes on its first join and
//! disappears with its last member; nothing ever needs to create or clean
//! one up explicitly.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use crate::core::events::{ConnectionId, RoomId};

/// Two-way index between rooms and the connections joined to them.
#[derive(Debug, Default)]
pub struct Rooms {
    members: HashMap<RoomId, IndexSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl Rooms {
    /// No rooms, no members.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection to the room. Returns `false` if it was already a member.
    pub fn join(&mut self, connection_id: &str, room_id: &str) -> bool {
        let added = self
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        if added {
            self.joined
                .entry(connection_id.to_string())
                .or_default()
                .insert(room_id.to_string());
        }
        added
    }

    /// Removes the connection from one room. Returns `false` if it was not a member.
    pub fn leave(&mut self, connection_id: &str, room_id: &str) -> bool {
        let Some(set) = self.members.get_mut(room_id) else {
            return false;
        };
        let removed = set.shift_remove(connection_id);
        if set.is_empty() {
            self.members.remove(room_id);
        }
        if let Some(rooms) = self.joined.get_mut(connection_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.joined.remove(connection_id);
            }
        }
        removed
    }

    /// Drops the connection from every room it joined, returning those rooms.
    pub fn leave_all(&mut self, connection_id: &str) -> Vec<RoomId> {
        let Some(rooms) = self.joined.remove(connection_id) else {
            return Vec::new();
        };
        for room_id in &rooms {
            if let Some(set) = self.members.get_mut(room_id) {
                set.shift_remove(connection_id);
                if set.is_empty() {
                    self.members.remove(room_id);
                }
            }
        }
        rooms.into_iter().collect()
    }

    /// Delivery set of a room in join order, minus the optional excluded sender.
    pub fn recipients(&self, room_id: &str, exclude: Option<&str>) -> Vec<ConnectionId> {
        self.members
            .get(room_id)
            .map(|set| {
                set.iter()
                    .filter(|conn| Some(conn.as_str()) != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `connection_id` is a member of `room_id`.
    #[cfg(test)]
    pub fn contains(&self, room_id: &str, connection_id: &str) -> bool {
        self.members
            .get(room_id)
            .is_some_and(|set| set.contains(connection_id))
    }

    /// Rooms the connection has joined, in no particular order.
    #[cfg(test)]
    pub fn rooms_of(&self, connection_id: &str) -> Vec<RoomId> {
        self.joined
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a room currently has any member.
    #[cfg(test)]
    pub fn exists(&self, room_id: &str) -> bool {
        self.members.contains_key(room_id)
    }
}
