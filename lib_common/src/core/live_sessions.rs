//! # Live Session Manager
//!
//! Owns the lifecycle of broadcast sessions: one host connection, an ordered
//! set of viewer connections, and a directory every client can discover.
//!
//! Per session identifier the states are
//!
//! ```text
//! absent --start--> live --host drops--> grace-pending --expiry--> absent
//!                    |  ^                      |
//!                    |  +-------start----------+   (host reconnect, viewers kept)
//!                    +--end--> absent
//! ```
//!
//! The grace period reuses the linger pattern: a `CancellationToken` per
//! pending teardown, cancelled by a later `start` or `end`. The table only
//! hands out tokens and generations; the `Dispatcher` spawns the sleeping
//! task and calls [`LiveSessions::expire`] when it fires. `expire` re-checks
//! that the very same timer is still current and the host connection is
//! unchanged, so a stale timer can never tear down a restarted session.

use std::collections::HashMap;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::error::{RealtimeError, RealtimeResult};
use crate::core::events::{ConnectionId, RoomId, StartLive};

/// Who may call `start` for a session identifier that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostTakeover {
    /// Any connection may (re)start any session id. Matches the behavior
    /// existing clients rely on.
    #[default]
    Open,
    /// A different connection must present the host token minted when the
    /// session was created.
    Token,
}

impl FromStr for HostTakeover {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(HostTakeover::Open),
            "token" => Ok(HostTakeover::Token),
            other => Err(format!("unknown host takeover policy '{}' (expected open|token)", other)),
        }
    }
}

/// One active broadcast, as listed in the live-session directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSession {
    /// Session identifier.
    pub room_id: RoomId,
    /// Connection currently hosting.
    pub host_id: ConnectionId,
    /// Opaque display title, as the host sent it.
    pub title: Value,
    /// Opaque host display metadata.
    pub host_data: Value,
    /// Distinct viewer connections in join order.
    pub viewers: Vec<ConnectionId>,
    #[serde(skip)]
    host_token: String,
}

impl LiveSession {
    /// Secret minted on a fresh start. Never serialized.
    pub fn host_token(&self) -> &str {
        &self.host_token
    }
}

/// Result of a successful `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    /// Token to hand back to the host.
    pub host_token: String,
    /// `true` when a pending grace timer was cancelled and viewers preserved.
    pub resumed: bool,
}

/// Result of a viewer `join` on an existing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    /// Host to notify with `viewer-joined`.
    pub host_id: ConnectionId,
    /// `false` when the viewer was already listed.
    pub added: bool,
}

/// Everything the dispatcher needs to arm one grace timer.
#[derive(Debug, Clone)]
pub struct GraceHandle {
    /// Session the timer guards.
    pub room_id: RoomId,
    /// Host that disconnected.
    pub host_id: ConnectionId,
    /// Matches only the newest timer for the session.
    pub generation: u64,
    /// Cancelled when the host comes back or the server shuts down.
    pub token: CancellationToken,
}

#[derive(Debug)]
struct GraceTimer {
    generation: u64,
    token: CancellationToken,
}

/// Table of live sessions and their pending disconnect timers.
#[derive(Debug, Default)]
pub struct LiveSessions {
    sessions: IndexMap<RoomId, LiveSession>,
    // At most one pending timer per session id.
    timers: HashMap<RoomId, GraceTimer>,
    next_generation: u64,
}

impl LiveSessions {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// `start(sessionId, hostConnectionId, title, hostMeta)`.
    ///
    /// With a pending grace timer this is a host reconnect: the timer is
    /// cancelled and the viewer set survives. Otherwise a fresh session with
    /// no viewers replaces whatever was stored under the id.
    pub fn start(
        &mut self,
        host_id: &str,
        request: StartLive,
        policy: HostTakeover,
    ) -> RealtimeResult<Started> {
        let StartLive { room_id, title, user, host_token } = request;

        if let Some(existing) = self.sessions.get(&room_id) {
            let foreign_host = existing.host_id != host_id;
            let token_ok = host_token.as_deref() == Some(existing.host_token.as_str());
            if policy == HostTakeover::Token && foreign_host && !token_ok {
                return Err(RealtimeError::HostTokenMismatch { room_id });
            }
        }

        let pending = self.timers.remove(&room_id);
        if let Some(timer) = &pending {
            timer.token.cancel();
        }

        if pending.is_some() {
            if let Some(session) = self.sessions.get_mut(&room_id) {
                session.host_id = host_id.to_string();
                session.title = title;
                session.host_data = user;
                return Ok(Started { host_token: session.host_token.clone(), resumed: true });
            }
        }

        let host_token = Uuid::new_v4().to_string();
        self.sessions.insert(
            room_id.clone(),
            LiveSession {
                room_id,
                host_id: host_id.to_string(),
                title,
                host_data: user,
                viewers: Vec::new(),
                host_token: host_token.clone(),
            },
        );
        Ok(Started { host_token, resumed: false })
    }

    /// Adds a viewer. `None` if the session does not exist (stale request).
    pub fn join(&mut self, room_id: &str, viewer_id: &str) -> Option<Joined> {
        let session = self.sessions.get_mut(room_id)?;
        let added = !session.viewers.iter().any(|v| v == viewer_id);
        if added {
            session.viewers.push(viewer_id.to_string());
        }
        Some(Joined { host_id: session.host_id.clone(), added })
    }

    /// Removes a viewer, returning the host to notify if it was listed.
    pub fn leave(&mut self, room_id: &str, viewer_id: &str) -> Option<ConnectionId> {
        let session = self.sessions.get_mut(room_id)?;
        let before = session.viewers.len();
        session.viewers.retain(|v| v != viewer_id);
        (session.viewers.len() != before).then(|| session.host_id.clone())
    }

    /// Removes a departed connection from every viewer set.
    /// Returns `(session id, host connection)` for each session it was in.
    pub fn drop_viewer(&mut self, viewer_id: &str) -> Vec<(RoomId, ConnectionId)> {
        let mut affected = Vec::new();
        for session in self.sessions.values_mut() {
            let before = session.viewers.len();
            session.viewers.retain(|v| v != viewer_id);
            if session.viewers.len() != before {
                affected.push((session.room_id.clone(), session.host_id.clone()));
            }
        }
        affected
    }

    /// Deletes the session and cancels any pending timer. `None` if absent.
    pub fn end(&mut self, room_id: &str) -> Option<LiveSession> {
        if let Some(timer) = self.timers.remove(room_id) {
            timer.token.cancel();
        }
        self.sessions.shift_remove(room_id)
    }

    /// Session ids whose host is `connection_id`.
    pub fn hosted_by(&self, connection_id: &str) -> Vec<RoomId> {
        self.sessions
            .values()
            .filter(|s| s.host_id == connection_id)
            .map(|s| s.room_id.clone())
            .collect()
    }

    /// Arms a grace timer for a session whose host dropped. Replaces (and
    /// cancels) any timer already pending for the id.
    pub fn begin_grace(&mut self, room_id: &str) -> Option<GraceHandle> {
        let host_id = self.sessions.get(room_id)?.host_id.clone();

        self.next_generation += 1;
        let generation = self.next_generation;
        let token = CancellationToken::new();

        if let Some(old) = self.timers.insert(
            room_id.to_string(),
            GraceTimer { generation, token: token.clone() },
        ) {
            old.token.cancel();
        }

        Some(GraceHandle { room_id: room_id.to_string(), host_id, generation, token })
    }

    /// Called when a grace timer fires. Tears the session down only if this
    /// timer is still the current one and the host connection is unchanged.
    pub fn expire(&mut self, room_id: &str, host_id: &str, generation: u64) -> Option<LiveSession> {
        match self.timers.get(room_id) {
            Some(timer) if timer.generation == generation => {}
            _ => return None,
        }
        self.timers.remove(room_id);

        let orphaned = self
            .sessions
            .get(room_id)
            .is_some_and(|s| s.host_id == host_id);
        if orphaned {
            self.sessions.shift_remove(room_id)
        } else {
            None
        }
    }

    /// Whether a grace timer is armed for the session.
    #[cfg(test)]
    pub fn is_grace_pending(&self, room_id: &str) -> bool {
        self.timers.contains_key(room_id)
    }

    /// Cancels every pending timer (process shutdown). Returns how many.
    pub fn cancel_all_timers(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.token.cancel();
        }
        count
    }

    /// The session stored under `room_id`.
    pub fn get(&self, room_id: &str) -> Option<&LiveSession> {
        self.sessions.get(room_id)
    }

    /// All sessions in creation order, as broadcast to clients.
    pub fn directory(&self) -> Vec<LiveSession> {
        self.sessions.values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` when nothing is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
