//! Presence Registry: which users currently have at least one live session.
//!
//! State is in-memory only and rebuilt from nothing on restart. A user is
//! online iff they have ≥1 registered session; a second device neither
//! re-announces them nor does closing it take them offline. Mutations that
//! change the online set emit a PresenceUpdate on a broadcast channel; the
//! fan-out task spawned by `spawn_presence_broadcaster` turns those into
//! getOnlineUsers pushes. The registry itself never touches a socket for
//! broadcasts, which keeps bookkeeping and transport independently testable.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ws::protocol::ServerEvent;
use crate::ws::Session;

/// Full online-set snapshot attached to every presence mutation.
/// Carrying the whole set (not a delta) lets lost or reordered events
/// self-heal on the next mutation.
#[derive(Debug, Clone)]
pub struct PresenceUpdate {
    pub online: Vec<String>,
}

/// Process-wide session table. DashMap gives per-key locking, so concurrent
/// register/unregister calls for the same user serialize on that user's
/// entry without a global bottleneck.
pub struct PresenceRegistry {
    /// user_id -> live sessions (a user may have several devices/tabs)
    sessions: DashMap<String, Vec<Session>>,
    events: broadcast::Sender<PresenceUpdate>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sessions: DashMap::new(),
            events,
        }
    }

    /// Add a session under its identity. Emits a presence update only when
    /// the identity comes online (first session).
    pub fn register(&self, session: Session) {
        let user_id = session.user_id.clone();
        let came_online = {
            let mut entry = self.sessions.entry(user_id.clone()).or_default();
            let came_online = entry.is_empty();
            entry.push(session);
            came_online
        };

        tracing::debug!(user_id = %user_id, came_online, "session registered");

        if came_online {
            self.emit();
        }
    }

    /// Remove a session. Idempotent: unregistering a session that is
    /// already gone is a no-op and emits nothing (flaky transports can
    /// deliver duplicate disconnects). Emits only when the identity's last
    /// session goes away.
    pub fn unregister(&self, user_id: &str, session_id: Uuid) {
        let went_offline = match self.sessions.get_mut(user_id) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|s| s.id != session_id);
                entry.len() < before && entry.is_empty()
            }
            None => false,
        };

        if went_offline {
            // Drop the map entry only if it is still empty; a concurrent
            // register may have slipped in after the guard above released.
            self.sessions
                .remove_if(user_id, |_, sessions| sessions.is_empty());
            tracing::debug!(user_id = %user_id, "user went offline");
            self.emit();
        }
    }

    /// Current Presence Set: users with at least one live session.
    /// Sorted so broadcast payloads are stable.
    pub fn snapshot(&self) -> Vec<String> {
        let mut online: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        online.sort();
        online
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.sessions
            .get(user_id)
            .map(|entry| !entry.value().is_empty())
            .unwrap_or(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceUpdate> {
        self.events.subscribe()
    }

    /// Push an event to every live session across all users.
    pub fn broadcast_event(&self, event: &ServerEvent) {
        let msg = event.to_message();
        for entry in self.sessions.iter() {
            for session in entry.value() {
                let _ = session.sender.send(msg.clone());
            }
        }
    }

    /// Fire-and-forget: the snapshot is taken at emit time, so receivers
    /// always see the newest set even when mutations race each other.
    fn emit(&self) {
        let _ = self.events.send(PresenceUpdate {
            online: self.snapshot(),
        });
    }
}

/// Fan presence changes out to all connected sessions as getOnlineUsers.
/// A lagged receiver just skips to the next update, which carries the full
/// snapshot anyway.
pub fn spawn_presence_broadcaster(registry: Arc<PresenceRegistry>) -> tokio::task::JoinHandle<()> {
    let mut rx = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    registry.broadcast_event(&ServerEvent::GetOnlineUsers(update.online));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "presence broadcaster lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
