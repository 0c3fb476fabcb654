use std::sync::Arc;

use crate::chat::typing::TypingRelay;
use crate::db::DbPool;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomRouter;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live sessions per user and the presence-change event channel
    pub presence: Arc<PresenceRegistry>,
    /// Room membership and targeted event delivery
    pub rooms: Arc<RoomRouter>,
    /// Ephemeral typing-indicator relay
    pub typing: Arc<TypingRelay>,
}
