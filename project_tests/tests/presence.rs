//! Presence, room delivery and call relay through the dispatcher.

use lib_common::core::{Dispatcher, PresenceEntry, ServerEvent};
use project_tests::{drain, drain_named};
use serde_json::json;

#[tokio::test]
async fn test_reconnect_routes_to_newest_connection_only() {
    let dispatcher = Dispatcher::default();
    let (c1, mut rx1) = dispatcher.connect(Some("A"));
    let (c2, mut rx2) = dispatcher.connect(Some("A"));
    assert_ne!(c1, c2);
    assert_eq!(dispatcher.lookup("A"), Some(c2.clone()));
    assert_eq!(dispatcher.presence_snapshot(), vec!["A"]);
    drain(&mut rx1);
    drain(&mut rx2);

    assert!(dispatcher.deliver_to_user("A", ServerEvent::ReceiveMessage(json!({ "text": "hi" }))));
    assert!(drain(&mut rx1).is_empty());
    assert_eq!(drain(&mut rx2).len(), 1);

    // The user-id room follows the newest connection as well.
    assert_eq!(dispatcher.broadcast_to_room("A", ServerEvent::Typing("A".into()), None), 1);
    assert!(drain(&mut rx1).is_empty());
}

#[tokio::test]
async fn test_stale_connection_close_keeps_presence() {
    let dispatcher = Dispatcher::default();
    let (c1, _rx1) = dispatcher.connect(Some("A"));
    let (c2, _rx2) = dispatcher.connect(Some("A"));

    dispatcher.disconnect(&c1);
    assert_eq!(dispatcher.lookup("A"), Some(c2.clone()));

    dispatcher.disconnect(&c2);
    assert_eq!(dispatcher.lookup("A"), None);
    assert!(dispatcher.presence_snapshot().is_empty());
}

#[tokio::test]
async fn test_presence_directory_is_broadcast_on_every_change() {
    let dispatcher = Dispatcher::default();
    let (_a, mut rx_a) = dispatcher.connect(Some("alice"));
    let (b, _rx_b) = dispatcher.connect(Some("bob"));
    dispatcher.disconnect(&b);

    let snapshots: Vec<_> = drain_named(&mut rx_a, "get-users");
    let entry = |id: &str| PresenceEntry { user_id: id.to_string() };
    assert_eq!(
        snapshots,
        vec![
            ServerEvent::GetUsers(vec![entry("alice")]),
            ServerEvent::GetUsers(vec![entry("alice"), entry("bob")]),
            ServerEvent::GetUsers(vec![entry("alice")]),
        ]
    );
}

#[tokio::test]
async fn test_call_invite_and_answer_round_trip() {
    let dispatcher = Dispatcher::default();
    let (alice, mut alice_rx) = dispatcher.connect(Some("alice"));
    let (bob, mut bob_rx) = dispatcher.connect(Some("bob"));
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let invite = json!({
        "event": "callUser",
        "data": { "userToCall": "bob", "signalData": { "sdp": "x" }, "from": "alice", "name": "Alice" }
    });
    dispatcher.handle_text(&alice, &invite.to_string()).unwrap();
    assert_eq!(
        drain(&mut bob_rx),
        vec![ServerEvent::CallUser { signal: json!({ "sdp": "x" }), from: json!("alice"), name: json!("Alice") }]
    );

    let answer = json!({ "event": "answerCall", "data": { "to": "alice", "signal": { "sdp": "y" } } });
    dispatcher.handle_text(&bob, &answer.to_string()).unwrap();
    assert_eq!(drain(&mut alice_rx), vec![ServerEvent::CallAccepted(json!({ "sdp": "y" }))]);
}

#[tokio::test]
async fn test_call_to_offline_user_is_silent() {
    let dispatcher = Dispatcher::default();
    let (alice, mut alice_rx) = dispatcher.connect(Some("alice"));
    drain(&mut alice_rx);

    let invite = json!({ "event": "callUser", "data": { "userToCall": "nobody", "signalData": {} } });
    assert!(dispatcher.handle_text(&alice, &invite.to_string()).is_ok());
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn test_leave_channel_stops_delivery() {
    let dispatcher = Dispatcher::default();
    let (a, mut rx_a) = dispatcher.connect(Some("alice"));
    let (b, _rx_b) = dispatcher.connect(Some("bob"));
    dispatcher.handle_text(&a, r#"{"event":"join_channel","data":"chat-1"}"#).unwrap();
    dispatcher.handle_text(&a, r#"{"event":"leave_channel","data":"chat-1"}"#).unwrap();
    drain(&mut rx_a);

    dispatcher.handle_text(&b, r#"{"event":"typing","data":"chat-1"}"#).unwrap();
    assert_eq!(dispatcher.broadcast_message("chat-1", json!({ "text": "x" })), 0);
    assert!(drain(&mut rx_a).is_empty());
}
