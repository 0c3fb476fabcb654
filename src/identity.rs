//! Identity lookups against the externally-owned users table.
//!
//! Account lifecycle (registration, profile edits, deletion) belongs to the
//! main application; this core only reads identities — to authorize a
//! socket at handshake time and to carry display attributes in events.

use serde::Serialize;

use crate::auth::jwt;
use crate::db::DbPool;

/// A user as the realtime layer sees it: an opaque routing key plus the
/// display attributes clients render next to messages.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub username: String,
    pub profile_picture: Option<String>,
}

/// Why a socket handshake was refused. The connection gets exactly one
/// socketError event with the reason, then a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    MissingToken,
    Expired,
    Invalid,
    /// Token is valid but its subject no longer resolves to a user row
    /// (account deleted after issuance).
    UnknownUser,
}

impl AuthRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "authentication token is missing",
            Self::Expired => "authentication token has expired",
            Self::Invalid => "authentication token is invalid",
            Self::UnknownUser => "authenticated user no longer exists",
        }
    }
}

/// Resolve the credential presented at connect time to an Identity.
/// No session is created here; admission is the Presence Registry's job.
pub async fn resolve_socket_identity(
    db: &DbPool,
    secret: &[u8],
    token: Option<&str>,
) -> Result<Identity, AuthRejection> {
    let Some(token) = token else {
        return Err(AuthRejection::MissingToken);
    };

    let claims = jwt::validate_access_token(secret, token).map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthRejection::Expired,
        _ => AuthRejection::Invalid,
    })?;

    fetch_identity(db, &claims.sub)
        .await
        .ok_or(AuthRejection::UnknownUser)
}

/// Look up a user's display attributes by id. None covers both a missing
/// row and a store hiccup — callers treat the identity as nonexistent.
pub async fn fetch_identity(db: &DbPool, user_id: &str) -> Option<Identity> {
    let db = db.clone();
    let id = user_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT id, name, username, profile_picture FROM users WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(Identity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    username: row.get(2)?,
                    profile_picture: row.get(3)?,
                })
            },
        )
        .ok()
    })
    .await
    .ok()
    .flatten()
}
