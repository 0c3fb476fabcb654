//! Registry-level tests for presence bookkeeping, room routing, and the
//! typing relay. These drive the in-memory core directly, without a socket
//! in sight — transport coverage lives in ws_test.rs.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use pulse_server::chat::typing::TypingRelay;
use pulse_server::presence::PresenceRegistry;
use pulse_server::rooms::{RoomId, RoomRouter};
use pulse_server::ws::protocol::ServerEvent;
use pulse_server::ws::Session;

/// A session wired to an in-test receiver instead of a real socket.
fn test_session(user_id: &str) -> (Session, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Session::new(user_id.to_string(), tx), rx)
}

fn parse_event(msg: Message) -> serde_json::Value {
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("valid event JSON"),
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[test]
fn test_presence_set_tracks_live_sessions() {
    let registry = PresenceRegistry::new();
    let (alice_1, _rx1) = test_session("alice");
    let (alice_2, _rx2) = test_session("alice");
    let (bob, _rx3) = test_session("bob");

    let alice_1_id = alice_1.id;
    let alice_2_id = alice_2.id;

    registry.register(alice_1);
    registry.register(alice_2);
    registry.register(bob);

    assert_eq!(registry.snapshot(), vec!["alice", "bob"]);
    assert!(registry.is_online("alice"));

    // Closing one of two devices must not take the user offline
    registry.unregister("alice", alice_1_id);
    assert!(registry.is_online("alice"));
    assert_eq!(registry.snapshot(), vec!["alice", "bob"]);

    // The last session going away does
    registry.unregister("alice", alice_2_id);
    assert!(!registry.is_online("alice"));
    assert_eq!(registry.snapshot(), vec!["bob"]);
}

#[test]
fn test_snapshot_of_empty_registry() {
    let registry = PresenceRegistry::new();
    assert!(registry.snapshot().is_empty());
    assert!(!registry.is_online("nobody"));
}

#[test]
fn test_unregister_is_idempotent_and_never_double_broadcasts() {
    let registry = PresenceRegistry::new();
    let mut events = registry.subscribe();

    let (alice, _rx) = test_session("alice");
    let alice_id = alice.id;

    registry.register(alice);
    registry.unregister("alice", alice_id);
    // Flaky transports can deliver the disconnect twice
    registry.unregister("alice", alice_id);
    registry.unregister("alice", alice_id);

    let online = events.try_recv().expect("online event");
    assert_eq!(online.online, vec!["alice"]);
    let offline = events.try_recv().expect("offline event");
    assert!(offline.online.is_empty());
    assert!(
        events.try_recv().is_err(),
        "duplicate unregister must not emit again"
    );
}

#[test]
fn test_second_session_does_not_rebroadcast() {
    let registry = PresenceRegistry::new();
    let mut events = registry.subscribe();

    let (alice_1, _rx1) = test_session("alice");
    let (alice_2, _rx2) = test_session("alice");
    registry.register(alice_1);
    registry.register(alice_2);

    assert!(events.try_recv().is_ok(), "first session announces the user");
    assert!(
        events.try_recv().is_err(),
        "second session is not a Presence Set mutation"
    );
}

#[test]
fn test_room_delivery_reaches_all_user_sessions() {
    let router = RoomRouter::new();
    let (alice_1, mut rx1) = test_session("alice");
    let (alice_2, mut rx2) = test_session("alice");

    router.join(&alice_1, RoomId::User("alice".to_string()));
    router.join(&alice_2, RoomId::User("alice".to_string()));

    router.deliver(
        &RoomId::User("alice".to_string()),
        &ServerEvent::Typing {
            peer_id: "bob".to_string(),
        },
    );

    for rx in [&mut rx1, &mut rx2] {
        let event = parse_event(rx.try_recv().expect("each session gets the event"));
        assert_eq!(event["event"], "typing");
        assert_eq!(event["data"]["peer_id"], "bob");
    }
}

#[test]
fn test_delivery_to_empty_room_is_noop() {
    let router = RoomRouter::new();
    // Recipient offline is an expected condition, not an error
    router.deliver(
        &RoomId::User("nobody".to_string()),
        &ServerEvent::StopTyping {
            peer_id: "alice".to_string(),
        },
    );
}

#[test]
fn test_leave_all_removes_every_membership() {
    let router = RoomRouter::new();
    let (alice, mut rx) = test_session("alice");

    router.join(&alice, RoomId::User("alice".to_string()));
    router.join(&alice, RoomId::Conversation("conv-1".to_string()));
    router.leave_all(alice.id);
    // Second disconnect event for the same session
    router.leave_all(alice.id);

    router.deliver(
        &RoomId::User("alice".to_string()),
        &ServerEvent::GetOnlineUsers(vec![]),
    );
    router.deliver(
        &RoomId::Conversation("conv-1".to_string()),
        &ServerEvent::GetOnlineUsers(vec![]),
    );
    assert!(rx.try_recv().is_err(), "no delivery after leave_all");
}

#[test]
fn test_deliver_excluding_user_skips_their_sessions() {
    let router = RoomRouter::new();
    let (alice, mut alice_rx) = test_session("alice");
    let (bob, mut bob_rx) = test_session("bob");

    let room = RoomId::Conversation("conv-1".to_string());
    router.join(&alice, room.clone());
    router.join(&bob, room.clone());

    router.deliver_excluding_user(
        &room,
        &ServerEvent::Typing {
            peer_id: "alice".to_string(),
        },
        "alice",
    );

    assert!(bob_rx.try_recv().is_ok());
    assert!(alice_rx.try_recv().is_err(), "sender must not hear itself");
}

#[tokio::test]
async fn test_typing_forwarded_once_until_stop() {
    let relay = Arc::new(TypingRelay::new(Duration::from_secs(5)));
    let rooms = Arc::new(RoomRouter::new());

    let (alice, _alice_rx) = test_session("alice");
    let (bob, mut bob_rx) = test_session("bob");
    rooms.join(&bob, RoomId::User("bob".to_string()));

    relay.signal_start(&rooms, &alice, "bob", None);
    relay.signal_start(&rooms, &alice, "bob", None);
    relay.signal_start(&rooms, &alice, "bob", None);

    let event = parse_event(bob_rx.try_recv().expect("typing forwarded"));
    assert_eq!(event["event"], "typing");
    assert_eq!(event["data"]["peer_id"], "alice");
    assert!(
        bob_rx.try_recv().is_err(),
        "repeat signals refresh, they do not re-forward"
    );

    relay.signal_stop(&rooms, "alice", "bob", None);
    let event = parse_event(bob_rx.try_recv().expect("stop forwarded"));
    assert_eq!(event["event"], "stopTyping");
    assert_eq!(event["data"]["peer_id"], "alice");

    // Stopping an Idle pair forwards nothing
    relay.signal_stop(&rooms, "alice", "bob", None);
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_typing_to_self_is_dropped() {
    let relay = Arc::new(TypingRelay::new(Duration::from_secs(5)));
    let rooms = Arc::new(RoomRouter::new());

    let (alice, mut alice_rx) = test_session("alice");
    rooms.join(&alice, RoomId::User("alice".to_string()));

    relay.signal_start(&rooms, &alice, "alice", None);
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_typing_to_offline_peer_is_dropped() {
    let relay = Arc::new(TypingRelay::new(Duration::from_secs(5)));
    let rooms = Arc::new(RoomRouter::new());

    let (alice, mut alice_rx) = test_session("alice");
    // No room for bob anywhere: the signal just evaporates
    relay.signal_start(&rooms, &alice, "bob", None);
    relay.signal_stop(&rooms, "alice", "bob", None);
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_typing_idle_timeout_synthesizes_stop() {
    let relay = Arc::new(TypingRelay::new(Duration::from_millis(200)));
    let rooms = Arc::new(RoomRouter::new());

    let (alice, _alice_rx) = test_session("alice");
    let (bob, mut bob_rx) = test_session("bob");
    rooms.join(&bob, RoomId::User("bob".to_string()));

    relay.signal_start(&rooms, &alice, "bob", None);
    let event = parse_event(bob_rx.recv().await.expect("typing forwarded"));
    assert_eq!(event["event"], "typing");

    // No explicit stop: the relay delivers it when the idle window lapses
    let msg = tokio::time::timeout(Duration::from_secs(2), bob_rx.recv())
        .await
        .expect("synthesized stop within the idle window")
        .expect("channel open");
    let event = parse_event(msg);
    assert_eq!(event["event"], "stopTyping");
    assert_eq!(event["data"]["peer_id"], "alice");
}

#[tokio::test]
async fn test_typing_refresh_defers_idle_timeout() {
    let relay = Arc::new(TypingRelay::new(Duration::from_millis(400)));
    let rooms = Arc::new(RoomRouter::new());

    let (alice, _alice_rx) = test_session("alice");
    let (bob, mut bob_rx) = test_session("bob");
    rooms.join(&bob, RoomId::User("bob".to_string()));

    relay.signal_start(&rooms, &alice, "bob", None);
    let _ = bob_rx.recv().await.expect("typing forwarded");

    tokio::time::sleep(Duration::from_millis(200)).await;
    relay.signal_start(&rooms, &alice, "bob", None);

    // 450ms after the original start, but only 250ms after the refresh:
    // the first timer must have been invalidated
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(bob_rx.try_recv().is_err(), "refresh must defer the timeout");

    let msg = tokio::time::timeout(Duration::from_secs(2), bob_rx.recv())
        .await
        .expect("stop after the refreshed window")
        .expect("channel open");
    assert_eq!(parse_event(msg)["event"], "stopTyping");
}

#[tokio::test]
async fn test_conversation_scoped_typing_excludes_sender() {
    let relay = Arc::new(TypingRelay::new(Duration::from_secs(5)));
    let rooms = Arc::new(RoomRouter::new());

    let (alice, mut alice_rx) = test_session("alice");
    let (bob, mut bob_rx) = test_session("bob");
    let room = RoomId::Conversation("conv-1".to_string());
    rooms.join(&alice, room.clone());
    rooms.join(&bob, room);

    relay.signal_start(&rooms, &alice, "bob", Some("conv-1"));

    let event = parse_event(bob_rx.try_recv().expect("peer receives typing"));
    assert_eq!(event["event"], "typing");
    assert_eq!(event["data"]["peer_id"], "alice");
    assert!(alice_rx.try_recv().is_err(), "typist must not hear itself");
}
