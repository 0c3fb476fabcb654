use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::identity::{self, AuthRejection};
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::protocol::ServerEvent;

/// Query parameters for WebSocket connection. Auth is via query param
/// ?token=JWT. The token is optional at the type level so a missing
/// credential is rejected with a diagnostic event rather than a 400 from
/// the extractor.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token missing/invalid or unknown user
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates before admitting the session.
/// On failure the socket is upgraded just long enough to emit one
/// socketError event and a close frame — it never reaches the Presence
/// Registry. On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let resolved =
        identity::resolve_socket_identity(&state.db, &state.jwt_secret, params.token.as_deref())
            .await;

    match resolved {
        Ok(identity) => {
            tracing::info!(
                user_id = %identity.id,
                username = %identity.username,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        Err(rejection) => {
            let close_code = match rejection {
                AuthRejection::Expired => CLOSE_TOKEN_EXPIRED,
                _ => CLOSE_TOKEN_INVALID,
            };
            let reason = rejection.reason();

            tracing::warn!(close_code, reason, "WebSocket auth failed");

            // Upgrade the connection, emit the diagnostic, then close with
            // the error code
            ws.on_upgrade(move |mut socket| async move {
                let diagnostic = ServerEvent::SocketError {
                    reason: reason.to_string(),
                };
                let _ = socket.send(diagnostic.to_message()).await;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code,
                        reason: reason.into(),
                    })))
                    .await;
            })
        }
    }
}
