//! # Signaling Relay
//!
//! Stateless pass-through of call setup and WebRTC negotiation payloads.
//! Each function only decides *where* a payload goes and what it looks like
//! on arrival; the `Dispatcher` does the actual send. Payloads (SDP, ICE,
//! simple-peer signal blobs) are never inspected.
//!
//! Call traffic is addressed by user identity and resolved through the
//! [`Registry`]; an offline target yields `None` and the payload is dropped.
//! Live-session negotiation is addressed by connection id directly.

use crate::core::events::{
    CallAnswer, CallInvite, ConnectionId, LiveAnswer, LiveIceCandidate, LiveOffer, ServerEvent,
};
use crate::core::registry::Registry;

/// A routed outbound event for exactly one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Receiving connection.
    pub target: ConnectionId,
    /// Event to send it.
    pub event: ServerEvent,
}

/// Routes a call invite to the callee's current connection. `None` if offline.
pub fn relay_call_invite(
    registry: &Registry,
    from_connection: &str,
    invite: CallInvite,
) -> Option<Delivery> {
    let Some(target) = registry.lookup(&invite.user_to_call) else {
        log::debug!(
            "Call invite from {} dropped: user {} is offline",
            from_connection,
            invite.user_to_call
        );
        return None;
    };
    Some(Delivery {
        target: target.clone(),
        event: ServerEvent::CallUser {
            signal: invite.signal_data,
            from: invite.from,
            name: invite.name,
        },
    })
}

/// Routes a call answer back to the caller. `None` if offline.
pub fn relay_call_answer(
    registry: &Registry,
    from_connection: &str,
    answer: CallAnswer,
) -> Option<Delivery> {
    let Some(target) = registry.lookup(&answer.to) else {
        log::debug!(
            "Call answer from {} dropped: user {} is offline",
            from_connection,
            answer.to
        );
        return None;
    };
    Some(Delivery {
        target: target.clone(),
        event: ServerEvent::CallAccepted(answer.signal),
    })
}

/// Host to viewer. The viewer learns which connection hosts the stream.
pub fn relay_live_offer(from_connection: &str, offer: LiveOffer) -> Delivery {
    Delivery {
        target: offer.viewer_id,
        event: ServerEvent::LiveOffer {
            offer: offer.offer,
            host_id: from_connection.to_string(),
        },
    }
}

/// Viewer to host.
pub fn relay_live_answer(from_connection: &str, answer: LiveAnswer) -> Delivery {
    Delivery {
        target: answer.host_id,
        event: ServerEvent::LiveAnswer {
            answer: answer.answer,
            viewer_id: from_connection.to_string(),
        },
    }
}

/// Either direction. The receiver learns who sent the candidate.
pub fn relay_ice_candidate(from_connection: &str, candidate: LiveIceCandidate) -> Delivery {
    Delivery {
        target: candidate.target_id,
        event: ServerEvent::LiveIceCandidate {
            candidate: candidate.candidate,
            sender_id: from_connection.to_string(),
        },
    }
}
