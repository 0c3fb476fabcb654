use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Failures surfaced by the chat REST surface.
///
/// Recipient-offline is deliberately absent: a delivery miss is not an
/// error — the message is durable and the send still reports success.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message content is required")]
    EmptyContent,
    #[error("cannot send a message to yourself")]
    SelfRecipient,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("not a participant in this conversation")]
    NotParticipant,
    /// The store is unreachable or rejected the write. Transient — callers
    /// may retry; the failed operation left no partial state behind.
    #[error("message store unavailable")]
    Persistence(#[source] Option<rusqlite::Error>),
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(Some(err))
    }
}

impl ChatError {
    fn status(&self) -> StatusCode {
        match self {
            Self::EmptyContent | Self::SelfRecipient => StatusCode::BAD_REQUEST,
            Self::RecipientNotFound | Self::ConversationNotFound => StatusCode::NOT_FOUND,
            Self::NotParticipant => StatusCode::FORBIDDEN,
            Self::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let Self::Persistence(source) = &self {
            tracing::error!(source = ?source, "chat persistence failure");
        }
        let body = Json(serde_json::json!({ "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}
