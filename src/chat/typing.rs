//! Ephemeral typing-indicator relay.
//!
//! Tracks an Idle/Typing state per ordered (typist, peer) pair. A start
//! signal on an Idle pair is forwarded exactly once; repeats refresh the
//! idle deadline without re-forwarding. The stop signal — explicit, or
//! synthesized when the deadline lapses because the client's stop was lost
//! — returns the pair to Idle. Nothing is persisted; an offline peer
//! simply receives nothing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::rooms::{RoomId, RoomRouter};
use crate::ws::protocol::ServerEvent;
use crate::ws::Session;

struct TypingState {
    /// Bumped on every refresh so an armed idle timer can tell it is stale.
    epoch: u64,
}

pub struct TypingRelay {
    /// (typist, peer) -> live typing state
    active: DashMap<(String, String), TypingState>,
    idle_timeout: Duration,
}

impl TypingRelay {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            active: DashMap::new(),
            idle_timeout,
        }
    }

    /// Handle a start-typing signal from `session` aimed at `peer_id`.
    pub fn signal_start(
        self: &Arc<Self>,
        rooms: &Arc<RoomRouter>,
        session: &Session,
        peer_id: &str,
        conversation_id: Option<&str>,
    ) {
        let typist = session.user_id.clone();
        if typist == peer_id {
            // A signal must never loop back to its own sender.
            return;
        }

        let key = (typist.clone(), peer_id.to_string());
        let epoch = {
            use dashmap::mapref::entry::Entry;
            match self.active.entry(key.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(TypingState { epoch: 0 });
                    // Idle -> Typing: forward exactly once.
                    deliver(
                        rooms,
                        &typist,
                        peer_id,
                        conversation_id,
                        &ServerEvent::Typing {
                            peer_id: typist.clone(),
                        },
                    );
                    0
                }
                Entry::Occupied(mut occupied) => {
                    // Already Typing: refresh the deadline, do not re-forward.
                    occupied.get_mut().epoch += 1;
                    occupied.get().epoch
                }
            }
        };

        self.arm_idle_timer(rooms, key, epoch, conversation_id.map(str::to_string));
    }

    /// Handle an explicit stop-typing signal. Idempotent: stopping an Idle
    /// pair forwards nothing.
    pub fn signal_stop(
        &self,
        rooms: &RoomRouter,
        typist: &str,
        peer_id: &str,
        conversation_id: Option<&str>,
    ) {
        if typist == peer_id {
            return;
        }
        let key = (typist.to_string(), peer_id.to_string());
        if self.active.remove(&key).is_some() {
            deliver(
                rooms,
                typist,
                peer_id,
                conversation_id,
                &ServerEvent::StopTyping {
                    peer_id: typist.to_string(),
                },
            );
        }
    }

    /// If the pair is still Typing at the same epoch when the idle window
    /// lapses, deliver the stop on the typist's behalf so a lost stop
    /// signal cannot wedge the peer's UI in Typing.
    fn arm_idle_timer(
        self: &Arc<Self>,
        rooms: &Arc<RoomRouter>,
        key: (String, String),
        epoch: u64,
        conversation_id: Option<String>,
    ) {
        let relay = Arc::clone(self);
        let rooms = Arc::clone(rooms);
        tokio::spawn(async move {
            tokio::time::sleep(relay.idle_timeout).await;

            let expired = relay
                .active
                .remove_if(&key, |_, state| state.epoch == epoch)
                .is_some();
            if expired {
                let (typist, peer_id) = key;
                tracing::debug!(typist = %typist, peer = %peer_id, "typing indicator expired");
                deliver(
                    &rooms,
                    &typist,
                    &peer_id,
                    conversation_id.as_deref(),
                    &ServerEvent::StopTyping {
                        peer_id: typist.clone(),
                    },
                );
            }
        });
    }
}

/// Route a typing event. Without a conversation id it lands in the peer's
/// identity mailbox; with one it goes to the conversation room, where the
/// typist's own sessions must be excluded because both parties join it.
fn deliver(
    rooms: &RoomRouter,
    typist: &str,
    peer_id: &str,
    conversation_id: Option<&str>,
    event: &ServerEvent,
) {
    match conversation_id {
        Some(conv) => {
            rooms.deliver_excluding_user(&RoomId::Conversation(conv.to_string()), event, typist)
        }
        None => rooms.deliver(&RoomId::User(peer_id.to_string()), event),
    }
}
