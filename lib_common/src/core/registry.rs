//! # Connection Registry
//!
//! The single source of truth for "who is online". Maps a user identity to
//! the one connection that currently speaks for it. A newer connection from
//! the same identity supersedes the older mapping (last connection wins);
//! the superseded connection stays open but is no longer addressable by
//! user identity.
//!
//! The registry does no locking of its own. It lives inside the
//! `Dispatcher` state, which serializes every mutation.

use indexmap::IndexMap;

use crate::core::events::{ConnectionId, PresenceEntry, UserId};

/// Presence map of user identity to active connection.
#[derive(Debug, Default)]
pub struct Registry {
    // Insertion-ordered so presence snapshots are stable across broadcasts.
    users: IndexMap<UserId, ConnectionId>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or overwrites) the presence entry for `user_id`.
    ///
    /// Returns the connection that previously held the identity, if it was a
    /// different one, so the caller can decide what to do with it.
    pub fn register(&mut self, user_id: &str, connection_id: &str) -> Option<ConnectionId> {
        let previous = self
            .users
            .insert(user_id.to_string(), connection_id.to_string());
        previous.filter(|prev| prev != connection_id)
    }

    /// Removes the presence entry pointing at `connection_id`, if any.
    ///
    /// A superseded connection no longer owns an entry, so its disconnect
    /// leaves the newer mapping intact.
    pub fn unregister(&mut self, connection_id: &str) -> Option<UserId> {
        let index = self
            .users
            .iter()
            .position(|(_, conn)| conn == connection_id)?;
        self.users.shift_remove_index(index).map(|(user_id, _)| user_id)
    }

    /// Connection currently representing `user_id`.
    pub fn lookup(&self, user_id: &str) -> Option<&ConnectionId> {
        self.users.get(user_id)
    }

    /// The user identity currently mapped to `connection_id`.
    #[cfg(test)]
    pub fn user_of(&self, connection_id: &str) -> Option<&UserId> {
        self.users
            .iter()
            .find(|(_, conn)| conn.as_str() == connection_id)
            .map(|(user_id, _)| user_id)
    }

    /// Online user identities in first-seen order.
    pub fn snapshot(&self) -> Vec<UserId> {
        self.users.keys().cloned().collect()
    }

    /// The snapshot in the shape broadcast to clients.
    pub fn directory(&self) -> Vec<PresenceEntry> {
        self.users
            .keys()
            .map(|user_id| PresenceEntry { user_id: user_id.clone() })
            .collect()
    }

    /// Number of online users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// `true` when nobody is online.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        assert_eq!(registry.register("alice", "c1"), None);
        assert_eq!(registry.lookup("alice").map(String::as_str), Some("c1"));
        assert_eq!(registry.user_of("c1").map(String::as_str), Some("alice"));
        assert_eq!(registry.lookup("bob"), None);
    }

    #[test]
    fn test_reconnect_supersedes_previous_connection() {
        let mut registry = Registry::new();
        registry.register("alice", "c1");
        assert_eq!(registry.register("alice", "c2"), Some("c1".to_string()));
        assert_eq!(registry.lookup("alice").map(String::as_str), Some("c2"));

        // Old connection dropping must not take the new mapping with it.
        assert_eq!(registry.unregister("c1"), None);
        assert_eq!(registry.lookup("alice").map(String::as_str), Some("c2"));

        assert_eq!(registry.unregister("c2"), Some("alice".to_string()));
        assert_eq!(registry.lookup("alice"), None);
    }

    #[test]
    fn test_reregistering_same_connection_reports_no_previous() {
        let mut registry = Registry::new();
        registry.register("alice", "c1");
        assert_eq!(registry.register("alice", "c1"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_unknown_connection_is_noop() {
        let mut registry = Registry::new();
        registry.register("alice", "c1");
        assert_eq!(registry.unregister("nope"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_keeps_first_seen_order() {
        let mut registry = Registry::new();
        registry.register("alice", "c1");
        registry.register("bob", "c2");
        registry.register("carol", "c3");
        registry.register("alice", "c4");
        assert_eq!(registry.snapshot(), vec!["alice", "bob", "carol"]);

        registry.unregister("c2");
        assert_eq!(registry.snapshot(), vec!["alice", "carol"]);
        assert_eq!(
            registry.directory(),
            vec![
                PresenceEntry { user_id: "alice".into() },
                PresenceEntry { user_id: "carol".into() },
            ]
        );
    }

    #[test]
    fn test_lookup_tracks_most_recent_operation() {
        // (user, connection, is_register)
        let ops = [
            ("a", "c1", true),
            ("b", "c2", true),
            ("a", "c3", true),
            ("a", "c1", false),
            ("b", "c2", false),
            ("b", "c4", true),
            ("a", "c3", false),
        ];
        let mut registry = Registry::new();
        for (user, conn, is_register) in ops {
            if is_register {
                registry.register(user, conn);
            } else {
                registry.unregister(conn);
            }
        }
        assert_eq!(registry.lookup("a"), None);
        assert_eq!(registry.lookup("b").map(String::as_str), Some("c4"));
        assert!(!registry.is_empty());
    }
}
