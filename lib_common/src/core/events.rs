//! # Wire Events
//!
//! Every websocket text frame carries a `{"event": <name>, "data": <payload>}`
//! envelope. Event names are kept byte-compatible with the existing web
//! clients (`get-users`, `callUser`, `stop typing`, ...), which is why they
//! mix naming conventions.
//!
//! Inbound frames are decoded in two steps: the envelope first, then the
//! payload according to the event name. That lets a missing room id surface
//! as [`RealtimeError::MissingField`] instead of an opaque serde message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{RealtimeError, RealtimeResult};
use crate::core::live_sessions::LiveSession;

/// Process-local identifier of one live transport stream.
pub type ConnectionId = String;
/// Durable user identity as supplied by the external user directory.
pub type UserId = String;
/// Name of a delivery scope (a chat id, a live session id, a user id).
pub type RoomId = String;

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Payload of `callUser`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInvite {
    /// Identity of the callee.
    #[serde(default)]
    pub user_to_call: UserId,
    /// Caller's signaling blob, relayed verbatim.
    #[serde(default)]
    pub signal_data: Value,
    /// Caller identity as the client reports it.
    #[serde(default)]
    pub from: Value,
    /// Caller display name.
    #[serde(default)]
    pub name: Value,
}

/// Payload of `answerCall`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallAnswer {
    /// Identity of the original caller.
    #[serde(default)]
    pub to: UserId,
    /// Callee's signaling blob, relayed verbatim.
    #[serde(default)]
    pub signal: Value,
}

/// Payload of `start-live`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLive {
    /// Session identifier, also the room viewers join.
    #[serde(default)]
    pub room_id: RoomId,
    /// Display title, passed through as sent (string, `null`, anything).
    #[serde(default)]
    pub title: Value,
    /// Host display metadata, passed through unvalidated.
    #[serde(default)]
    pub user: Value,
    /// Only consulted under the `token` host takeover policy.
    #[serde(default)]
    pub host_token: Option<String>,
}

/// Payload of `join-live`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLive {
    /// Session to join.
    #[serde(default)]
    pub room_id: RoomId,
    /// Viewer display metadata, forwarded to the host.
    #[serde(default)]
    pub user: Value,
}

/// Payload of `live-offer` (host to viewer).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveOffer {
    /// SDP offer, opaque.
    #[serde(default)]
    pub offer: Value,
    /// Target viewer connection.
    #[serde(default)]
    pub viewer_id: ConnectionId,
}

/// Payload of `live-answer` (viewer to host).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveAnswer {
    /// SDP answer, opaque.
    #[serde(default)]
    pub answer: Value,
    /// Target host connection.
    #[serde(default)]
    pub host_id: ConnectionId,
}

/// Payload of `live-ice-candidate` (either direction).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveIceCandidate {
    /// ICE candidate, opaque.
    #[serde(default)]
    pub candidate: Value,
    /// Connection the candidate is meant for.
    #[serde(default)]
    pub target_id: ConnectionId,
}

/// A decoded, validated inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// `join_channel`: join a chat room.
    JoinChannel(RoomId),
    /// `leave_channel`
    LeaveChannel(RoomId),
    /// `typing`: relayed to the other room members.
    Typing(RoomId),
    /// `stop typing`
    StopTyping(RoomId),
    /// `callUser`: one-to-one call invite.
    CallUser(CallInvite),
    /// `answerCall`
    AnswerCall(CallAnswer),
    /// `start-live`: open or resume a live session.
    StartLive(StartLive),
    /// `join-live`
    JoinLive(JoinLive),
    /// `leave-live`
    LeaveLive(RoomId),
    /// `end-live`: host closes the session.
    EndLive(RoomId),
    /// `live-offer`
    LiveOffer(LiveOffer),
    /// `live-answer`
    LiveAnswer(LiveAnswer),
    /// `live-ice-candidate`
    LiveIceCandidate(LiveIceCandidate),
}

impl ClientEvent {
    /// Decodes one text frame into a validated event.
    pub fn parse(text: &str) -> RealtimeResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let data = envelope.data;

        let event = match envelope.event.as_str() {
            "join_channel" => ClientEvent::JoinChannel(room_from(data, "room")?),
            "leave_channel" => ClientEvent::LeaveChannel(room_from(data, "room")?),
            "typing" => ClientEvent::Typing(room_from(data, "room")?),
            "stop typing" => ClientEvent::StopTyping(room_from(data, "room")?),
            "leave-live" => ClientEvent::LeaveLive(room_from(data, "roomId")?),
            "end-live" => ClientEvent::EndLive(room_from(data, "roomId")?),
            "callUser" => {
                let invite: CallInvite = serde_json::from_value(data)?;
                require(&invite.user_to_call, "userToCall")?;
                ClientEvent::CallUser(invite)
            }
            "answerCall" => {
                let answer: CallAnswer = serde_json::from_value(data)?;
                require(&answer.to, "to")?;
                ClientEvent::AnswerCall(answer)
            }
            "start-live" => {
                let start: StartLive = serde_json::from_value(data)?;
                require(&start.room_id, "roomId")?;
                ClientEvent::StartLive(start)
            }
            "join-live" => {
                let join: JoinLive = serde_json::from_value(data)?;
                require(&join.room_id, "roomId")?;
                ClientEvent::JoinLive(join)
            }
            "live-offer" => {
                let offer: LiveOffer = serde_json::from_value(data)?;
                require(&offer.viewer_id, "viewerId")?;
                ClientEvent::LiveOffer(offer)
            }
            "live-answer" => {
                let answer: LiveAnswer = serde_json::from_value(data)?;
                require(&answer.host_id, "hostId")?;
                ClientEvent::LiveAnswer(answer)
            }
            "live-ice-candidate" => {
                let candidate: LiveIceCandidate = serde_json::from_value(data)?;
                require(&candidate.target_id, "targetId")?;
                ClientEvent::LiveIceCandidate(candidate)
            }
            other => return Err(RealtimeError::UnknownEvent(other.to_string())),
        };

        Ok(event)
    }
}

// Room-scoped events carry the bare room id as their payload.
fn room_from(data: Value, field: &'static str) -> RealtimeResult<RoomId> {
    match data {
        Value::String(room) if !room.trim().is_empty() => Ok(room),
        _ => Err(RealtimeError::MissingField(field)),
    }
}

fn require(value: &str, field: &'static str) -> RealtimeResult<()> {
    if value.trim().is_empty() {
        Err(RealtimeError::MissingField(field))
    } else {
        Ok(())
    }
}

/// One row of the presence directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// Identity of an online user.
    pub user_id: UserId,
}

/// Everything the server pushes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// First event on every connection.
    #[serde(rename = "connected")]
    Connected {
        /// Id assigned to this connection.
        connection_id: ConnectionId,
    },
    /// Full presence directory.
    #[serde(rename = "get-users")]
    GetUsers(Vec<PresenceEntry>),
    /// Full live session directory.
    #[serde(rename = "update-live-sessions")]
    UpdateLiveSessions(Vec<LiveSession>),
    /// Another member is typing in the room.
    #[serde(rename = "typing")]
    Typing(RoomId),
    /// Typing stopped.
    #[serde(rename = "stop typing")]
    StopTyping(RoomId),
    /// Incoming call invite.
    #[serde(rename = "callUser")]
    CallUser {
        /// Caller's signaling blob.
        signal: Value,
        /// Caller identity.
        from: Value,
        /// Caller display name.
        name: Value,
    },
    /// The callee's answer signal.
    #[serde(rename = "callAccepted")]
    CallAccepted(Value),
    /// Sent to the host only.
    #[serde(rename = "live-started")]
    LiveStarted {
        /// Session identifier.
        room_id: RoomId,
        /// Secret for restarting the session under the `token` policy.
        host_token: String,
    },
    /// A viewer joined one of the host's sessions.
    #[serde(rename = "viewer-joined")]
    ViewerJoined {
        /// Connection of the viewer.
        viewer_id: ConnectionId,
        /// Viewer display metadata.
        user: Value,
    },
    /// A viewer left or disconnected.
    #[serde(rename = "viewer-left")]
    ViewerLeft {
        /// Connection of the departed viewer.
        viewer_id: ConnectionId,
    },
    /// The session ended, by the host or by grace expiry.
    #[serde(rename = "live-ended")]
    LiveEnded(RoomId),
    /// Host's SDP offer for a viewer.
    #[serde(rename = "live-offer")]
    LiveOffer {
        /// Opaque SDP offer.
        offer: Value,
        /// Sending host connection.
        host_id: ConnectionId,
    },
    /// Viewer's SDP answer for the host.
    #[serde(rename = "live-answer")]
    LiveAnswer {
        /// Opaque SDP answer.
        answer: Value,
        /// Sending viewer connection.
        viewer_id: ConnectionId,
    },
    /// ICE candidate from the other side of a live link.
    #[serde(rename = "live-ice-candidate")]
    LiveIceCandidate {
        /// Opaque candidate.
        candidate: Value,
        /// Sending connection.
        sender_id: ConnectionId,
    },
    /// A persisted chat message fanned out to a room.
    #[serde(rename = "receive_message")]
    ReceiveMessage(Value),
    /// The last inbound event was rejected.
    #[serde(rename = "error")]
    Error {
        /// Human readable reason.
        message: String,
    },
}

impl ServerEvent {
    /// Serializes the event into the text frame sent over the websocket.
    pub fn to_json(&self) -> RealtimeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::GetUsers(_) => "get-users",
            ServerEvent::UpdateLiveSessions(_) => "update-live-sessions",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::StopTyping(_) => "stop typing",
            ServerEvent::CallUser { .. } => "callUser",
            ServerEvent::CallAccepted(_) => "callAccepted",
            ServerEvent::LiveStarted { .. } => "live-started",
            ServerEvent::ViewerJoined { .. } => "viewer-joined",
            ServerEvent::ViewerLeft { .. } => "viewer-left",
            ServerEvent::LiveEnded(_) => "live-ended",
            ServerEvent::LiveOffer { .. } => "live-offer",
            ServerEvent::LiveAnswer { .. } => "live-answer",
            ServerEvent::LiveIceCandidate { .. } => "live-ice-candidate",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_room_events() {
        let ev = ClientEvent::parse(r#"{"event":"join_channel","data":"chat-1"}"#).unwrap();
        assert_eq!(ev, ClientEvent::JoinChannel("chat-1".into()));

        let ev = ClientEvent::parse(r#"{"event":"stop typing","data":"chat-1"}"#).unwrap();
        assert_eq!(ev, ClientEvent::StopTyping("chat-1".into()));
    }

    #[test]
    fn test_parse_join_channel_without_room_is_missing_field() {
        let err = ClientEvent::parse(r#"{"event":"join_channel"}"#).unwrap_err();
        assert!(matches!(err, RealtimeError::MissingField("room")));

        let err = ClientEvent::parse(r#"{"event":"join_channel","data":""}"#).unwrap_err();
        assert!(matches!(err, RealtimeError::MissingField("room")));
    }

    #[test]
    fn test_parse_start_live_keeps_opaque_metadata() {
        let text = json!({
            "event": "start-live",
            "data": { "roomId": "room42", "title": "Demo", "user": { "name": "H", "pic": "x.png" } }
        })
        .to_string();

        match ClientEvent::parse(&text).unwrap() {
            ClientEvent::StartLive(start) => {
                assert_eq!(start.room_id, "room42");
                assert_eq!(start.title, "Demo");
                assert_eq!(start.user, json!({ "name": "H", "pic": "x.png" }));
                assert_eq!(start.host_token, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_start_live_accepts_any_title() {
        for title in [json!(null), json!(42), json!({ "text": "Demo" })] {
            let text = json!({ "event": "start-live", "data": { "roomId": "r", "title": title } })
                .to_string();
            match ClientEvent::parse(&text).unwrap() {
                ClientEvent::StartLive(start) => assert_eq!(start.title, title),
                other => panic!("unexpected event {:?}", other),
            }
        }

        // Absent title is the same as null.
        match ClientEvent::parse(r#"{"event":"start-live","data":{"roomId":"r"}}"#).unwrap() {
            ClientEvent::StartLive(start) => assert_eq!(start.title, Value::Null),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_signaling_requires_target() {
        let err = ClientEvent::parse(r#"{"event":"live-offer","data":{"offer":{"sdp":"v=0"}}}"#)
            .unwrap_err();
        assert!(matches!(err, RealtimeError::MissingField("viewerId")));

        let err = ClientEvent::parse(r#"{"event":"callUser","data":{"signalData":{}}}"#).unwrap_err();
        assert!(matches!(err, RealtimeError::MissingField("userToCall")));
    }

    #[test]
    fn test_parse_rejects_unknown_and_garbage() {
        let err = ClientEvent::parse(r#"{"event":"drop-tables","data":1}"#).unwrap_err();
        assert!(matches!(err, RealtimeError::UnknownEvent(name) if name == "drop-tables"));

        let err = ClientEvent::parse("not json at all").unwrap_err();
        assert!(matches!(err, RealtimeError::MalformedEvent(_)));
    }

    #[test]
    fn test_server_event_wire_shape() {
        let ev = ServerEvent::GetUsers(vec![PresenceEntry { user_id: "alice".into() }]);
        let value: Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({ "event": "get-users", "data": [{ "userId": "alice" }] }));

        let ev = ServerEvent::ViewerJoined { viewer_id: "c2".into(), user: json!({ "name": "V" }) };
        let value: Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "event": "viewer-joined", "data": { "viewerId": "c2", "user": { "name": "V" } } })
        );
        assert_eq!(ev.name(), "viewer-joined");
    }
}
