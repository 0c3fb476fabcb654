//! Room Router: named delivery groups of sessions.
//!
//! Rooms are derived state — recomputed from session joins and leaves,
//! never stored durably. Every session is placed into its own identity
//! room right after registration, so delivering to `RoomId::User(x)`
//! reaches every socket x currently has open.

use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use crate::ws::protocol::ServerEvent;
use crate::ws::Session;

/// Typed room key. Identity mailboxes and conversation-scoped rooms live
/// in separate namespaces, so their ids can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Personal mailbox: every session of one user.
    User(String),
    /// Narrower scope joined explicitly via joinConversation.
    Conversation(String),
}

#[derive(Default)]
pub struct RoomRouter {
    /// room -> sessions currently joined
    rooms: DashMap<RoomId, Vec<Session>>,
    /// session -> rooms it belongs to, for disconnect cleanup
    memberships: DashMap<Uuid, HashSet<RoomId>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a room. Joining a room twice is a no-op.
    pub fn join(&self, session: &Session, room: RoomId) {
        {
            let mut members = self.rooms.entry(room.clone()).or_default();
            if members.iter().all(|s| s.id != session.id) {
                members.push(session.clone());
            }
        }
        self.memberships
            .entry(session.id)
            .or_default()
            .insert(room);
    }

    /// Remove a session from every room it joined, dropping rooms that end
    /// up empty. Idempotent; called once on disconnect so no membership can
    /// dangle.
    pub fn leave_all(&self, session_id: Uuid) {
        let Some((_, rooms)) = self.memberships.remove(&session_id) else {
            return;
        };
        for room in rooms {
            if let Some(mut members) = self.rooms.get_mut(&room) {
                members.retain(|s| s.id != session_id);
            }
            self.rooms.remove_if(&room, |_, members| members.is_empty());
        }
    }

    /// Push an event to every session in a room. An empty or unknown room
    /// is an expected condition (recipient offline), not an error.
    pub fn deliver(&self, room: &RoomId, event: &ServerEvent) {
        self.deliver_filtered(room, event, |_| true);
    }

    /// Deliver to a room, skipping every session of one user — used when
    /// the event's originator shares the room with its audience.
    pub fn deliver_excluding_user(&self, room: &RoomId, event: &ServerEvent, excluded: &str) {
        self.deliver_filtered(room, event, |s| s.user_id != excluded);
    }

    fn deliver_filtered(&self, room: &RoomId, event: &ServerEvent, keep: impl Fn(&Session) -> bool) {
        let Some(members) = self.rooms.get(room) else {
            tracing::debug!(?room, "delivery to empty room dropped");
            return;
        };
        let msg = event.to_message();
        for session in members.iter().filter(|s| keep(s)) {
            let _ = session.sender.send(msg.clone());
        }
    }
}
