//! # Event Dispatcher
//!
//! The boundary between connections and the realtime core. It receives
//! decoded inbound events, routes them to the registry, room membership,
//! signaling relay and live session table, and fans outbound events to the
//! right connections.
//!
//! ## Ownership
//!
//! All state (client channels, presence, rooms, sessions, pending timers)
//! sits in one `HubState` behind a single mutex. Every operation takes the
//! lock once, mutates, and broadcasts the affected snapshot before releasing
//! it, so no client can observe a state change without the matching
//! directory update ("mutate-then-broadcast"). Nothing inside the lock
//! awaits.
//!
//! ## Fan-out
//!
//! Each connection owns an unbounded MPSC receiver. Outbound events are
//! wrapped in an `Arc` once and the pointer is cloned to every recipient.
//! Sends never block and never fail loudly: a closed receiver just means the
//! connection is on its way out. Delivery is at-most-once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::error::{RealtimeError, RealtimeResult};
use crate::core::events::{
    CallAnswer, CallInvite, ClientEvent, ConnectionId, JoinLive, RoomId, ServerEvent, StartLive,
    UserId,
};
use crate::core::live_sessions::{GraceHandle, HostTakeover, LiveSession, LiveSessions, Started};
use crate::core::registry::Registry;
use crate::core::rooms::Rooms;
use crate::core::signaling::{self, Delivery};

/// How long a live session survives its host's connection dropping.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Receiving half handed to each connection's writer task.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Tunables of the realtime core, decoupled from the CLI layer.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// How long a hosted session outlives its host's connection.
    pub grace_period: Duration,
    /// Who may restart a session id that is already in use.
    pub host_takeover: HostTakeover,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            host_takeover: HostTakeover::Open,
        }
    }
}

struct ClientHandle {
    // Identity claimed at connect time, `None` for anonymous connections.
    user_id: Option<UserId>,
    sender: mpsc::UnboundedSender<Arc<ServerEvent>>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<ConnectionId, ClientHandle>,
    registry: Registry,
    rooms: Rooms,
    sessions: LiveSessions,
}

impl HubState {
    fn send(&self, target: &str, event: Arc<ServerEvent>) -> bool {
        match self.clients.get(target) {
            Some(client) => client.sender.send(event).is_ok(),
            None => false,
        }
    }

    fn deliver(&self, delivery: Delivery) -> bool {
        self.send(&delivery.target, Arc::new(delivery.event))
    }

    fn send_all(&self, event: ServerEvent) {
        let event = Arc::new(event);
        for client in self.clients.values() {
            let _ = client.sender.send(Arc::clone(&event));
        }
    }

    fn send_room(&self, room_id: &str, event: ServerEvent, exclude: Option<&str>) -> usize {
        let event = Arc::new(event);
        self.rooms
            .recipients(room_id, exclude)
            .iter()
            .filter(|conn| self.send(conn, Arc::clone(&event)))
            .count()
    }

    fn broadcast_presence(&self) {
        self.send_all(ServerEvent::GetUsers(self.registry.directory()));
    }

    fn broadcast_live_directory(&self) {
        self.send_all(ServerEvent::UpdateLiveSessions(self.sessions.directory()));
    }

    // Shared tail of an explicit end and a grace expiry.
    fn finish_session(&self, session: &LiveSession) {
        let notified = self.send_room(
            &session.room_id,
            ServerEvent::LiveEnded(session.room_id.clone()),
            None,
        );
        log::info!(
            "Live session '{}' ended; notified {} room member(s)",
            session.room_id,
            notified
        );
        self.broadcast_live_directory();
    }
}

fn is_valid_identity(user_id: &str) -> bool {
    !user_id.is_empty() && user_id != "undefined" && user_id != "null"
}

/// # Core Dispatcher
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<Mutex<HubState>>,
    options: Arc<DispatcherOptions>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherOptions::default())
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new(options: DispatcherOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            options: Arc::new(options),
        }
    }

    /// The options this dispatcher was built with.
    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    // Poisoning is ignored: every mutation leaves the maps consistent.
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Connect
    ///
    /// Admits a new connection and returns its id plus the receiver its
    /// writer task drains. A usable `user_id` registers presence (last
    /// connection wins), joins the room named after the user and triggers a
    /// presence broadcast. Blank or `"undefined"` identities connect
    /// anonymously. The new connection is sent its own id and the current
    /// live-session directory.
    pub fn connect(&self, user_id: Option<&str>) -> (ConnectionId, EventReceiver) {
        let connection_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let user_id = user_id
            .map(str::trim)
            .filter(|id| is_valid_identity(id))
            .map(str::to_string);

        let mut state = self.lock();
        state.clients.insert(
            connection_id.clone(),
            ClientHandle { user_id: user_id.clone(), sender: tx },
        );
        state.send(
            &connection_id,
            Arc::new(ServerEvent::Connected { connection_id: connection_id.clone() }),
        );

        if let Some(user_id) = &user_id {
            if let Some(previous) = state.registry.register(user_id, &connection_id) {
                log::info!(
                    "User '{}' reconnected: {} supersedes {}",
                    user_id,
                    connection_id,
                    previous
                );
                state.rooms.leave(&previous, user_id);
            }
            state.rooms.join(&connection_id, user_id);
            state.broadcast_presence();
        }

        state.send(
            &connection_id,
            Arc::new(ServerEvent::UpdateLiveSessions(state.sessions.directory())),
        );

        log::info!(
            "Connection {} opened (user: {})",
            connection_id,
            user_id.as_deref().unwrap_or("anonymous")
        );
        (connection_id, rx)
    }

    /// # Disconnect
    ///
    /// Removes every trace of the connection. Presence is re-broadcast if it
    /// owned an identity, hosts are told about departed viewers, and any
    /// session it hosted enters its grace period.
    pub fn disconnect(&self, connection_id: &str) {
        let mut state = self.lock();
        let Some(client) = state.clients.remove(connection_id) else {
            return;
        };

        state.rooms.leave_all(connection_id);

        if state.registry.unregister(connection_id).is_some() {
            state.broadcast_presence();
        }

        let departed = state.sessions.drop_viewer(connection_id);
        for (_, host_id) in &departed {
            state.send(
                host_id,
                Arc::new(ServerEvent::ViewerLeft { viewer_id: connection_id.to_string() }),
            );
        }
        if !departed.is_empty() {
            state.broadcast_live_directory();
        }

        for room_id in state.sessions.hosted_by(connection_id) {
            if let Some(handle) = state.sessions.begin_grace(&room_id) {
                self.arm_grace_timer(handle);
            }
        }

        log::info!(
            "Connection {} closed (user: {})",
            connection_id,
            client.user_id.as_deref().unwrap_or("anonymous")
        );
    }

    fn arm_grace_timer(&self, handle: GraceHandle) {
        let grace = self.options.grace_period;
        log::info!(
            "Host {} of live session '{}' dropped; ending it in {:?} unless it returns",
            handle.host_id,
            handle.room_id,
            grace
        );

        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.token.cancelled() => {
                    log::debug!("Grace timer for '{}' cancelled", handle.room_id);
                }
                _ = tokio::time::sleep(grace) => {
                    dispatcher.expire_session(&handle.room_id, &handle.host_id, handle.generation);
                }
            }
        });
    }

    fn expire_session(&self, room_id: &str, host_id: &str, generation: u64) {
        let mut state = self.lock();
        match state.sessions.expire(room_id, host_id, generation) {
            Some(session) => {
                log::info!("Grace period for live session '{}' expired", room_id);
                state.finish_session(&session);
            }
            None => log::debug!("Stale grace timer for '{}' ignored", room_id),
        }
    }

    /// Decodes and handles one text frame from `connection_id`.
    pub fn handle_text(&self, connection_id: &str, text: &str) -> RealtimeResult<()> {
        let event = ClientEvent::parse(text)?;
        self.handle(connection_id, event)
    }

    /// Routes one inbound event to the component that owns it.
    pub fn handle(&self, connection_id: &str, event: ClientEvent) -> RealtimeResult<()> {
        match event {
            ClientEvent::JoinChannel(room_id) => {
                self.join_room(connection_id, &room_id);
            }
            ClientEvent::LeaveChannel(room_id) => {
                self.leave_room(connection_id, &room_id);
            }
            ClientEvent::Typing(room_id) => {
                let event = ServerEvent::Typing(room_id.clone());
                self.broadcast_to_room(&room_id, event, Some(connection_id));
            }
            ClientEvent::StopTyping(room_id) => {
                let event = ServerEvent::StopTyping(room_id.clone());
                self.broadcast_to_room(&room_id, event, Some(connection_id));
            }
            ClientEvent::CallUser(invite) => {
                self.relay_call_invite(connection_id, invite);
            }
            ClientEvent::AnswerCall(answer) => {
                self.relay_call_answer(connection_id, answer);
            }
            ClientEvent::StartLive(request) => {
                self.start_live(connection_id, request)?;
            }
            ClientEvent::JoinLive(request) => {
                self.join_live(connection_id, request);
            }
            ClientEvent::LeaveLive(room_id) => {
                self.leave_live(connection_id, &room_id);
            }
            ClientEvent::EndLive(room_id) => {
                self.end_live(connection_id, &room_id)?;
            }
            ClientEvent::LiveOffer(offer) => {
                self.deliver(signaling::relay_live_offer(connection_id, offer));
            }
            ClientEvent::LiveAnswer(answer) => {
                self.deliver(signaling::relay_live_answer(connection_id, answer));
            }
            ClientEvent::LiveIceCandidate(candidate) => {
                self.deliver(signaling::relay_ice_candidate(connection_id, candidate));
            }
        }
        Ok(())
    }

    // --- Room membership ---

    /// Joins `connection_id` to `room_id`. `false` if already a member or unknown.
    pub fn join_room(&self, connection_id: &str, room_id: &str) -> bool {
        let mut state = self.lock();
        if !state.clients.contains_key(connection_id) {
            return false;
        }
        let joined = state.rooms.join(connection_id, room_id);
        if joined {
            log::debug!("Connection {} joined room '{}'", connection_id, room_id);
        }
        joined
    }

    /// Removes `connection_id` from `room_id`. `false` if it was not a member.
    pub fn leave_room(&self, connection_id: &str, room_id: &str) -> bool {
        self.lock().rooms.leave(connection_id, room_id)
    }

    /// Sends `event` to every member of `room_id` except `exclude`.
    /// Returns how many connections it was handed to.
    pub fn broadcast_to_room(
        &self,
        room_id: &str,
        event: ServerEvent,
        exclude: Option<&str>,
    ) -> usize {
        self.lock().send_room(room_id, event, exclude)
    }

    /// Fans a stored chat message out to the chat's room.
    pub fn broadcast_message(&self, room_id: &str, message: Value) -> usize {
        self.broadcast_to_room(room_id, ServerEvent::ReceiveMessage(message), None)
    }

    /// Delivers to the user's current connection. `false` (and nothing
    /// sent) when the user is offline.
    pub fn deliver_to_user(&self, user_id: &str, event: ServerEvent) -> bool {
        let state = self.lock();
        match state.registry.lookup(user_id) {
            Some(connection_id) => state.send(connection_id, Arc::new(event)),
            None => false,
        }
    }

    /// Sends one event to a specific connection, if it is still open.
    pub fn deliver_to_connection(&self, connection_id: &str, event: ServerEvent) -> bool {
        self.lock().send(connection_id, Arc::new(event))
    }

    fn deliver(&self, delivery: Delivery) -> bool {
        let delivered = self.lock().deliver(delivery);
        if !delivered {
            log::debug!("Signaling payload dropped: target not connected");
        }
        delivered
    }

    // --- Signaling relay ---

    /// Forwards a `callUser` invite to the callee's current connection.
    pub fn relay_call_invite(&self, from_connection: &str, invite: CallInvite) -> bool {
        let state = self.lock();
        signaling::relay_call_invite(&state.registry, from_connection, invite)
            .is_some_and(|delivery| state.deliver(delivery))
    }

    /// Forwards an `answerCall` back to the caller's current connection.
    pub fn relay_call_answer(&self, from_connection: &str, answer: CallAnswer) -> bool {
        let state = self.lock();
        signaling::relay_call_answer(&state.registry, from_connection, answer)
            .is_some_and(|delivery| state.deliver(delivery))
    }

    // --- Live sessions ---

    /// # Start Live
    ///
    /// Creates the session (or resumes it if its host is within the grace
    /// period), joins the host to the session room, acknowledges the host
    /// with its host token and re-broadcasts the directory to everyone.
    pub fn start_live(&self, host_id: &str, request: StartLive) -> RealtimeResult<Started> {
        let mut state = self.lock();
        let room_id: RoomId = request.room_id.clone();

        let started = state
            .sessions
            .start(host_id, request, self.options.host_takeover)
            .inspect_err(|_| {
                log::warn!("Rejected start of live session '{}' by {}", room_id, host_id);
            })?;

        state.rooms.join(host_id, &room_id);
        state.send(
            host_id,
            Arc::new(ServerEvent::LiveStarted {
                room_id: room_id.clone(),
                host_token: started.host_token.clone(),
            }),
        );
        state.broadcast_live_directory();

        log::info!(
            "Live session '{}' {} by {}",
            room_id,
            if started.resumed { "resumed" } else { "started" },
            host_id
        );
        Ok(started)
    }

    /// Adds the viewer and tells the host. `false` for a stale session id.
    pub fn join_live(&self, viewer_id: &str, request: JoinLive) -> bool {
        let mut state = self.lock();
        let Some(joined) = state.sessions.join(&request.room_id, viewer_id) else {
            log::debug!("Join of unknown live session '{}' ignored", request.room_id);
            return false;
        };

        state.rooms.join(viewer_id, &request.room_id);
        state.send(
            &joined.host_id,
            Arc::new(ServerEvent::ViewerJoined {
                viewer_id: viewer_id.to_string(),
                user: request.user,
            }),
        );
        state.broadcast_live_directory();
        true
    }

    /// Removes a viewer from a session and tells the host.
    pub fn leave_live(&self, viewer_id: &str, room_id: &str) -> bool {
        let mut state = self.lock();
        let Some(host_id) = state.sessions.leave(room_id, viewer_id) else {
            return false;
        };

        state.rooms.leave(viewer_id, room_id);
        state.send(
            &host_id,
            Arc::new(ServerEvent::ViewerLeft { viewer_id: viewer_id.to_string() }),
        );
        state.broadcast_live_directory();
        true
    }

    /// # End Live
    ///
    /// Notifies the session room, deletes the session, cancels any pending
    /// timer and re-broadcasts the directory. `Ok(false)` if absent.
    pub fn end_live(&self, connection_id: &str, room_id: &str) -> RealtimeResult<bool> {
        let mut state = self.lock();

        if self.options.host_takeover == HostTakeover::Token {
            if let Some(session) = state.sessions.get(room_id) {
                if session.host_id != connection_id {
                    return Err(RealtimeError::NotHost { room_id: room_id.to_string() });
                }
            }
        }

        match state.sessions.end(room_id) {
            Some(session) => {
                state.finish_session(&session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // --- Snapshots ---

    /// Online user identities in first-seen order.
    pub fn presence_snapshot(&self) -> Vec<UserId> {
        self.lock().registry.snapshot()
    }

    /// Every live session in creation order.
    pub fn live_directory(&self) -> Vec<LiveSession> {
        self.lock().sessions.directory()
    }

    /// The connection currently speaking for `user_id`.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionId> {
        self.lock().registry.lookup(user_id).cloned()
    }

    /// Open connections, anonymous ones included.
    pub fn connection_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Users currently present.
    pub fn online_count(&self) -> usize {
        self.lock().registry.len()
    }

    /// Cancels every pending grace timer. Used on process shutdown.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.lock().sessions.cancel_all_timers();
        if cancelled > 0 {
            log::info!("Cancelled {} pending grace timer(s)", cancelled);
        }
        cancelled
    }
}
