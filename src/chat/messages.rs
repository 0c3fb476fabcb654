//! Message delivery pipeline and history retrieval.
//!
//! A send persists first — message row, conversation link, last-activity
//! bump in one transaction — and only then pushes the live messageSent
//! event at the recipient's identity room. The push is best-effort: an
//! offline recipient reads the message from history on the next fetch, and
//! a push failure never unwinds a committed write.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::error::ChatError;
use crate::identity::Identity;
use crate::rooms::RoomId;
use crate::state::AppState;
use crate::ws::protocol::{MessagePayload, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// POST /api/chats/{recipient_id} — send a direct message. JWT auth
/// required. Persists, then pushes messageSent to the recipient's mailbox
/// (never back to the sender's own room).
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(recipient_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessagePayload>), ChatError> {
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return Err(ChatError::EmptyContent);
    }
    if claims.sub == recipient_id {
        return Err(ChatError::SelfRecipient);
    }

    let db = state.db.clone();
    let sender_id = claims.sub.clone();
    let recipient = recipient_id.clone();

    let message = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| ChatError::Persistence(None))?;
        persist_message(&mut conn, &sender_id, &recipient, &content)
    })
    .await
    .map_err(|_| ChatError::Persistence(None))??;

    // Post-commit live push, recipient's mailbox only. Best-effort: a miss
    // is logged, never surfaced — durability already succeeded.
    if state.presence.is_online(&recipient_id) {
        state.rooms.deliver(
            &RoomId::User(recipient_id.clone()),
            &ServerEvent::MessageSent(message.clone()),
        );
    } else {
        tracing::debug!(recipient = %recipient_id, "recipient offline, live push skipped");
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// Durable half of the pipeline, run on the blocking pool. The message
/// insert, conversation link, and last-activity bump commit atomically; a
/// failure anywhere rolls the whole send back.
fn persist_message(
    conn: &mut Connection,
    sender_id: &str,
    recipient_id: &str,
    content: &str,
) -> Result<MessagePayload, ChatError> {
    let tx = conn.transaction()?;

    // Recipient must resolve to an existing identity before any side
    // effect. The sender's row also feeds the event's display attributes;
    // it can only be missing if the account was deleted mid-flight, which
    // reads as a store inconsistency rather than a caller error.
    let sender = identity_row(&tx, sender_id)?.ok_or(ChatError::Persistence(None))?;
    identity_row(&tx, recipient_id)?.ok_or(ChatError::RecipientNotFound)?;

    let conversation_id = find_or_create_conversation(&tx, sender_id, recipient_id)?;

    let message_id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let sequence: i64 = tx.query_row(
        "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages WHERE conversation_id = ?1",
        rusqlite::params![conversation_id],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, sequence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![message_id, conversation_id, sender_id, content, sequence, created_at],
    )?;

    // Conversation list ordering runs on last activity
    tx.execute(
        "UPDATE conversations SET last_message_at = ?1 WHERE id = ?2",
        rusqlite::params![created_at, conversation_id],
    )?;

    tx.commit()?;

    Ok(MessagePayload {
        id: message_id,
        conversation_id,
        sender,
        content: content.to_string(),
        sequence,
        created_at,
    })
}

/// Find the conversation for the unordered {sender, recipient} pair,
/// creating it if absent. Participants are stored in normalized order and
/// the pair carries a UNIQUE constraint, so two racing first messages
/// cannot produce two rows — the loser catches the constraint violation
/// and re-fetches the winner's.
fn find_or_create_conversation(
    tx: &Transaction<'_>,
    user_a: &str,
    user_b: &str,
) -> Result<String, ChatError> {
    let (participant_a, participant_b) = if user_a < user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
            rusqlite::params![participant_a, participant_b],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let conversation_id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let inserted = tx.execute(
        "INSERT INTO conversations (id, participant_a, participant_b, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![conversation_id, participant_a, participant_b, created_at],
    );

    match inserted {
        Ok(_) => Ok(conversation_id),
        Err(err) if is_unique_violation(&err) => {
            // Lost a first-message race to a concurrent writer; the
            // winner's row is authoritative.
            Ok(tx.query_row(
                "SELECT id FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
                rusqlite::params![participant_a, participant_b],
                |row| row.get(0),
            )?)
        }
        Err(err) => Err(err.into()),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn identity_row(tx: &Transaction<'_>, user_id: &str) -> Result<Option<Identity>, ChatError> {
    tx.query_row(
        "SELECT id, name, username, profile_picture FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(Identity {
                id: row.get(0)?,
                name: row.get(1)?,
                username: row.get(2)?,
                profile_picture: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// GET /api/chats/{conversation_id} — message history, oldest first. JWT
/// auth required; the caller must be a participant in the conversation.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<MessagePayload>>, ChatError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ChatError::Persistence(None))?;

        let participants: Option<(String, String)> = conn
            .query_row(
                "SELECT participant_a, participant_b FROM conversations WHERE id = ?1",
                rusqlite::params![conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (participant_a, participant_b) =
            participants.ok_or(ChatError::ConversationNotFound)?;

        if user_id != participant_a && user_id != participant_b {
            return Err(ChatError::NotParticipant);
        }

        // Timestamp order, per-conversation sequence breaking ties. The
        // sender join is LEFT so history survives account deletion.
        let mut stmt = conn.prepare(
            "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.sequence, m.created_at,
                    u.name, u.username, u.profile_picture
             FROM messages m
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE m.conversation_id = ?1
             ORDER BY m.created_at ASC, m.sequence ASC",
        )?;

        let messages = stmt
            .query_map(rusqlite::params![conversation_id], |row| {
                Ok(MessagePayload {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    sender: Identity {
                        id: row.get(2)?,
                        name: row
                            .get::<_, Option<String>>(6)?
                            .unwrap_or_else(|| "Unknown".to_string()),
                        username: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                        profile_picture: row.get(8)?,
                    },
                    content: row.get(3)?,
                    sequence: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok::<_, ChatError>(messages)
    })
    .await
    .map_err(|_| ChatError::Persistence(None))??;

    Ok(Json(messages))
}
