//! # Realtime Error Taxonomy
//!
//! Errors raised while interpreting a single inbound client event. None of
//! them is fatal: the gateway reports the message back to the offending
//! connection and keeps reading. An unreachable target (offline user, unknown
//! session) is deliberately *not* represented here, since best-effort
//! delivery treats it as a silent no-op.

use thiserror::Error;

/// Failure to act on one inbound event.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// A required field (room id, target id, ...) was absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The frame was not valid JSON or the payload did not match the event.
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    /// The event name is not part of the protocol.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// A `start-live` for an existing session came from a different
    /// connection without the session's host token.
    #[error("host token mismatch for live session {room_id}")]
    HostTokenMismatch {
        /// The session identifier the caller tried to take over.
        room_id: String,
    },

    /// Only the hosting connection may end a session under the `token`
    /// host takeover policy.
    #[error("connection is not the host of live session {room_id}")]
    NotHost {
        /// The session identifier the caller tried to end.
        room_id: String,
    },
}

/// Convenience alias for results produced by the realtime core.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_client_presentable() {
        assert_eq!(
            RealtimeError::MissingField("room").to_string(),
            "missing required field: room"
        );
        assert_eq!(
            RealtimeError::HostTokenMismatch { room_id: "room42".into() }.to_string(),
            "host token mismatch for live session room42"
        );
    }

    #[test]
    fn test_json_errors_convert_into_malformed_event() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: RealtimeError = parse_err.into();
        assert!(matches!(err, RealtimeError::MalformedEvent(_)));
    }
}
