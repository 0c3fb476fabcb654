//! Conversation listing for the chat sidebar.
//!
//! Conversations are created lazily by the delivery pipeline on first
//! message exchange and never deleted here; this endpoint only reads them.

use axum::{extract::State, Json};
use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::chat::error::ChatError;
use crate::identity::Identity;
use crate::state::AppState;

/// One row of the caller's conversation list: the other participant plus
/// activity timestamps for ordering.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub peer: Identity,
    pub created_at: String,
    pub last_message_at: Option<String>,
}

/// GET /api/chats — list all conversations for the authenticated user,
/// most recent activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationSummary>>, ChatError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let summaries = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ChatError::Persistence(None))?;

        let mut stmt = conn.prepare(
            "SELECT c.id, c.participant_a, c.participant_b, c.created_at, c.last_message_at
             FROM conversations c
             WHERE c.participant_a = ?1 OR c.participant_b = ?1
             ORDER BY CASE WHEN c.last_message_at IS NULL THEN 1 ELSE 0 END,
                      c.last_message_at DESC,
                      c.created_at DESC",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (id, participant_a, participant_b, created_at, last_message_at) in rows {
            let peer_id = if participant_a == user_id {
                participant_b
            } else {
                participant_a
            };

            // LEFT-join semantics by hand: a deleted peer still leaves the
            // conversation listed, with placeholder attributes.
            let peer = conn
                .query_row(
                    "SELECT id, name, username, profile_picture FROM users WHERE id = ?1",
                    rusqlite::params![peer_id],
                    |row| {
                        Ok(Identity {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            username: row.get(2)?,
                            profile_picture: row.get(3)?,
                        })
                    },
                )
                .optional()?
                .unwrap_or(Identity {
                    id: peer_id,
                    name: "Unknown".to_string(),
                    username: String::new(),
                    profile_picture: None,
                });

            summaries.push(ConversationSummary {
                id,
                peer,
                created_at,
                last_message_at,
            });
        }

        Ok::<_, ChatError>(summaries)
    })
    .await
    .map_err(|_| ChatError::Persistence(None))??;

    Ok(Json(summaries))
}
