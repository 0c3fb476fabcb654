//! JSON wire protocol for the realtime socket.
//!
//! Envelope: `{"event": <name>, "data": <payload>}` in both directions.
//! Decodes inbound client events and dispatches them to the room router,
//! the typing relay, or the conversation-join handler.

use axum::extract::ws::Message;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::rooms::RoomId;
use crate::state::AppState;
use crate::ws::Session;

/// Events a client may send after the handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join a conversation-scoped room, for typing signals scoped more
    /// narrowly than the identity mailbox.
    JoinConversation { conversation_id: String },
    /// The sender started typing to peer_id.
    Typing {
        peer_id: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// The sender stopped typing to peer_id.
    StopTyping {
        peer_id: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full online-user snapshot, sent whenever the Presence Set changes
    /// and once to each freshly connected session.
    GetOnlineUsers(Vec<String>),
    /// A message was persisted for a conversation this user participates in.
    MessageSent(MessagePayload),
    /// peer_id started typing to the receiving user.
    Typing { peer_id: String },
    /// peer_id stopped typing to the receiving user.
    StopTyping { peer_id: String },
    /// Handshake or in-band failure diagnostic.
    SocketError { reason: String },
}

/// Fully-populated message as delivered in messageSent events and returned
/// by the REST send/history endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub sender: Identity,
    pub content: String,
    pub sequence: i64,
    pub created_at: String,
}

impl ServerEvent {
    /// Encode as a WebSocket text frame. These enums always serialize; if
    /// that invariant is ever broken the client at least learns something
    /// went wrong instead of the frame being silently dropped.
    pub fn to_message(&self) -> Message {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"socketError","data":{"reason":"event encoding failure"}}"#.to_string()
        });
        Message::Text(json.into())
    }
}

/// Decode and dispatch one inbound text frame from an authenticated session.
pub async fn handle_client_event(text: &str, session: &Session, state: &AppState) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                user_id = %session.user_id,
                error = %e,
                "failed to decode client event"
            );
            session.send(&ServerEvent::SocketError {
                reason: "unrecognized event".to_string(),
            });
            return;
        }
    };

    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            handle_join_conversation(session, state, conversation_id).await;
        }
        ClientEvent::Typing {
            peer_id,
            conversation_id,
        } => {
            state
                .typing
                .signal_start(&state.rooms, session, &peer_id, conversation_id.as_deref());
        }
        ClientEvent::StopTyping {
            peer_id,
            conversation_id,
        } => {
            state.typing.signal_stop(
                &state.rooms,
                &session.user_id,
                &peer_id,
                conversation_id.as_deref(),
            );
        }
    }
}

/// Authorize and perform a conversation-room join. Only participants may
/// join; anyone else gets a socketError and the connection stays open.
async fn handle_join_conversation(session: &Session, state: &AppState, conversation_id: String) {
    let db = state.db.clone();
    let conv_id = conversation_id.clone();

    let participants = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT participant_a, participant_b FROM conversations WHERE id = ?1",
            rusqlite::params![conv_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .ok()
        .flatten()
    })
    .await
    .ok()
    .flatten();

    match participants {
        Some((a, b)) if a == session.user_id || b == session.user_id => {
            state
                .rooms
                .join(session, RoomId::Conversation(conversation_id));
        }
        _ => {
            session.send(&ServerEvent::SocketError {
                reason: "not a participant in this conversation".to_string(),
            });
        }
    }
}
