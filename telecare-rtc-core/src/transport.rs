//! Signaling transport implementations
//!
//! `LoopbackRelay` routes messages between participants living in the same
//! process. It behaves like the production relay: rooms hold at most two
//! participants, a sender never receives its own message, and subscribers
//! joining late get no replay.

use crate::identity::ParticipantId;
use crate::signaling::{SignalHandler, SignalingChannel, SignalingError, SignalingMessage, Subscription};
use crate::types::SessionId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Maximum participants per session room
const MAX_ROOM_SIZE: usize = 2;

#[derive(Default)]
struct Room {
    members: HashSet<ParticipantId>,
    handlers: HashMap<ParticipantId, (u64, SignalHandler)>,
}

#[derive(Default)]
struct RelayState {
    rooms: HashMap<SessionId, Room>,
    history: Vec<(ParticipantId, SignalingMessage)>,
}

/// In-process signaling relay
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    state: Arc<Mutex<RelayState>>,
    offline: Arc<AtomicBool>,
    next_token: Arc<AtomicU64>,
}

impl LoopbackRelay {
    /// Create an empty relay
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate loss of the underlying connection
    ///
    /// While offline every `send` fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        tracing::info!(offline, "Loopback relay connectivity changed");
    }

    /// Every message accepted by `send`, in order
    #[must_use]
    pub fn history(&self) -> Vec<(ParticipantId, SignalingMessage)> {
        self.state.lock().history.clone()
    }

    /// Messages sent by `participant` in `session`
    #[must_use]
    pub fn sent_by(&self, session: &SessionId, participant: &ParticipantId) -> Vec<SignalingMessage> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|(from, msg)| from == participant && msg.session_id() == session)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Current members of a session room
    #[must_use]
    pub fn members(&self, session: &SessionId) -> Vec<ParticipantId> {
        let state = self.state.lock();
        let mut members: Vec<_> = state
            .rooms
            .get(session)
            .map(|room| room.members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Whether `participant` currently has a handler registered
    #[must_use]
    pub fn is_subscribed(&self, session: &SessionId, participant: &ParticipantId) -> bool {
        self.state
            .lock()
            .rooms
            .get(session)
            .is_some_and(|room| room.handlers.contains_key(participant))
    }
}

#[async_trait]
impl SignalingChannel for LoopbackRelay {
    async fn join(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), SignalingError> {
        let mut state = self.state.lock();
        let room = state.rooms.entry(session.clone()).or_default();
        if room.members.contains(participant) {
            return Ok(());
        }
        if room.members.len() >= MAX_ROOM_SIZE {
            tracing::warn!(session_id = %session, participant = %participant, "Room full");
            return Err(SignalingError::RoomFull(session.clone()));
        }
        room.members.insert(participant.clone());
        tracing::debug!(session_id = %session, participant = %participant, members = room.members.len(), "Joined room");
        Ok(())
    }

    async fn leave(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), SignalingError> {
        let mut state = self.state.lock();
        if let Some(room) = state.rooms.get_mut(session) {
            room.members.remove(participant);
            room.handlers.remove(participant);
            if room.members.is_empty() && room.handlers.is_empty() {
                state.rooms.remove(session);
            }
        }
        tracing::debug!(session_id = %session, participant = %participant, "Left room");
        Ok(())
    }

    async fn send(
        &self,
        from: &ParticipantId,
        message: SignalingMessage,
    ) -> Result<(), SignalingError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SignalingError::TransportError(
                "relay is offline".to_string(),
            ));
        }

        let session = message.session_id().clone();
        let recipients: Vec<SignalHandler> = {
            let mut state = self.state.lock();
            let room = state
                .rooms
                .get(&session)
                .filter(|room| room.members.contains(from))
                .ok_or_else(|| SignalingError::NotJoined {
                    session: session.clone(),
                    participant: from.clone(),
                })?;
            let recipients = room
                .handlers
                .iter()
                .filter(|(pid, _)| *pid != from)
                .map(|(_, (_, handler))| handler.clone())
                .collect();
            state.history.push((from.clone(), message.clone()));
            recipients
        };

        if recipients.is_empty() {
            tracing::trace!(session_id = %session, kind = message.kind(), "No subscriber for message, dropped");
        }
        for handler in recipients {
            handler(message.clone());
        }
        Ok(())
    }

    fn subscribe(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
        handler: SignalHandler,
    ) -> Result<Subscription, SignalingError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            let room = state.rooms.entry(session.clone()).or_default();
            if room.handlers.contains_key(participant) {
                return Err(SignalingError::AlreadySubscribed {
                    session: session.clone(),
                    participant: participant.clone(),
                });
            }
            room.handlers
                .insert(participant.clone(), (token, handler));
        }

        let state = Arc::clone(&self.state);
        let session_key = session.clone();
        let participant_key = participant.clone();
        Ok(Subscription::new(
            session.clone(),
            participant.clone(),
            move || {
                let mut state = state.lock();
                if let Some(room) = state.rooms.get_mut(&session_key) {
                    if room
                        .handlers
                        .get(&participant_key)
                        .is_some_and(|(t, _)| *t == token)
                    {
                        room.handlers.remove(&participant_key);
                    }
                    if room.members.is_empty() && room.handlers.is_empty() {
                        state.rooms.remove(&session_key);
                    }
                }
            },
        ))
    }
}
