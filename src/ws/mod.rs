pub mod actor;
pub mod handler;
pub mod protocol;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ServerEvent;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// One live, authenticated connection. Immutable after creation; room
/// membership is tracked by the RoomRouter, not on the session itself.
/// A user may have any number of these open at once.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    pub sender: ConnectionSender,
}

impl Session {
    pub fn new(user_id: String, sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Serialize and push an event to this one connection. A closed
    /// receiver means the connection is tearing down; the send is dropped.
    pub fn send(&self, event: &ServerEvent) {
        let _ = self.sender.send(event.to_message());
    }
}
