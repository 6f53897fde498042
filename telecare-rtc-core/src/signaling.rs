//! Call signaling protocol
//!
//! Carries offers, answers, ICE candidates and leave notifications between
//! the two participants of a session. The channel gives no ordering or
//! delivery guarantee; the session controller tolerates reordering.

use crate::identity::ParticipantId;
use crate::types::{IceCandidate, SdpKind, SessionDescription, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Signaling errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Sender has not joined the session room
    #[error("Participant {participant} has not joined session {session}")]
    NotJoined {
        /// Session room
        session: SessionId,
        /// Participant
        participant: ParticipantId,
    },

    /// Room already holds two participants
    #[error("Session {0} already has two participants")]
    RoomFull(SessionId),

    /// A handler is already registered for this participant
    #[error("Participant {participant} is already subscribed to session {session}")]
    AlreadySubscribed {
        /// Session room
        session: SessionId,
        /// Participant
        participant: ParticipantId,
    },

    /// Transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Signaling message envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// SDP offer
    Offer {
        /// Session ID
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// SDP content
        sdp: String,
    },

    /// SDP answer
    Answer {
        /// Session ID
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// SDP content
        sdp: String,
    },

    /// Trickled ICE candidate
    Candidate {
        /// Session ID
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Candidate descriptor
        candidate: IceCandidate,
    },

    /// Peer left the call
    Leave {
        /// Session ID
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Optional reason
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl SignalingMessage {
    /// Wrap a session description
    pub fn description(session_id: SessionId, description: SessionDescription) -> Self {
        match description.kind {
            SdpKind::Offer => Self::Offer {
                session_id,
                sdp: description.sdp,
            },
            SdpKind::Answer => Self::Answer {
                session_id,
                sdp: description.sdp,
            },
        }
    }

    /// Get the session ID
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Offer { session_id, .. }
            | Self::Answer { session_id, .. }
            | Self::Candidate { session_id, .. }
            | Self::Leave { session_id, .. } => session_id,
        }
    }

    /// Extract the carried session description, if any
    #[must_use]
    pub fn session_description(&self) -> Option<SessionDescription> {
        match self {
            Self::Offer { sdp, .. } => Some(SessionDescription::offer(sdp.clone())),
            Self::Answer { sdp, .. } => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }

    /// Short name used in logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Leave { .. } => "leave",
        }
    }
}

/// Inbound message handler
///
/// Invoked by the channel for every message addressed to the subscriber.
/// Must not block: implementations only enqueue.
pub type SignalHandler = Arc<dyn Fn(SignalingMessage) + Send + Sync>;

/// Unsubscribe capability returned by [`SignalingChannel::subscribe`]
///
/// Cancelling runs at most once, either through [`Subscription::unsubscribe`]
/// or when the value is dropped.
pub struct Subscription {
    session_id: SessionId,
    participant: ParticipantId,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` when released
    pub fn new(
        session_id: SessionId,
        participant: ParticipantId,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            session_id,
            participant,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Session this subscription belongs to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Stop receiving messages
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            tracing::debug!(
                session_id = %self.session_id,
                participant = %self.participant,
                "Signaling subscription released"
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("session_id", &self.session_id)
            .field("participant", &self.participant)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Duplex message bus keyed by session
///
/// Implement this for the real-time transport in use (websocket relay,
/// in-process loopback, ...). Authentication happens before a message
/// reaches this layer.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Enter the session room so messages can be routed to this participant
    async fn join(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), SignalingError>;

    /// Leave the session room
    async fn leave(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), SignalingError>;

    /// Fire-and-forget send to the other participant of the message's session
    async fn send(
        &self,
        from: &ParticipantId,
        message: SignalingMessage,
    ) -> Result<(), SignalingError>;

    /// Register the single handler for `participant` in `session`
    ///
    /// Past messages are not replayed.
    fn subscribe(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
        handler: SignalHandler,
    ) -> Result<Subscription, SignalingError>;
}

/// Session-scoped sender used by the session controller
#[derive(Clone)]
pub struct Signaler {
    channel: Arc<dyn SignalingChannel>,
    session_id: SessionId,
    local: ParticipantId,
}

impl Signaler {
    /// Bind a channel to one session and local participant
    pub fn new(channel: Arc<dyn SignalingChannel>, session_id: SessionId, local: ParticipantId) -> Self {
        Self {
            channel,
            session_id,
            local,
        }
    }

    /// Session this signaler is bound to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Join the session room
    ///
    /// # Errors
    ///
    /// Returns error if the room rejects the participant
    #[tracing::instrument(skip(self), fields(session_id = %self.session_id, participant = %self.local))]
    pub async fn join(&self) -> Result<(), SignalingError> {
        tracing::debug!("Joining session room");
        self.channel.join(&self.session_id, &self.local).await
    }

    /// Leave the session room
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails
    #[tracing::instrument(skip(self), fields(session_id = %self.session_id, participant = %self.local))]
    pub async fn leave(&self) -> Result<(), SignalingError> {
        tracing::debug!("Leaving session room");
        self.channel.leave(&self.session_id, &self.local).await
    }

    /// Subscribe the local participant
    ///
    /// # Errors
    ///
    /// Returns error if a handler is already registered
    pub fn subscribe(&self, handler: SignalHandler) -> Result<Subscription, SignalingError> {
        self.channel
            .subscribe(&self.session_id, &self.local, handler)
    }

    /// Send an offer or answer
    ///
    /// # Errors
    ///
    /// Returns error if sending fails
    #[tracing::instrument(skip(self, description), fields(session_id = %self.session_id, kind = ?description.kind, sdp_len = description.sdp.len()))]
    pub async fn send_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), SignalingError> {
        tracing::debug!("Sending session description");
        self.send(SignalingMessage::description(
            self.session_id.clone(),
            description,
        ))
        .await
    }

    /// Send a local ICE candidate
    ///
    /// # Errors
    ///
    /// Returns error if sending fails
    pub async fn send_candidate(&self, candidate: IceCandidate) -> Result<(), SignalingError> {
        tracing::trace!(session_id = %self.session_id, "Sending ICE candidate");
        self.send(SignalingMessage::Candidate {
            session_id: self.session_id.clone(),
            candidate,
        })
        .await
    }

    /// Tell the other participant we left
    ///
    /// # Errors
    ///
    /// Returns error if sending fails
    pub async fn send_leave(&self, reason: Option<String>) -> Result<(), SignalingError> {
        tracing::debug!(session_id = %self.session_id, reason = ?reason, "Sending leave");
        self.send(SignalingMessage::Leave {
            session_id: self.session_id.clone(),
            reason,
        })
        .await
    }

    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        let kind = message.kind();
        self.channel.send(&self.local, message).await.map_err(|e| {
            tracing::warn!(session_id = %self.session_id, kind, error = %e, "Signaling send failed");
            e
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_offer_wire_shape() {
        let msg = SignalingMessage::Offer {
            session_id: SessionId::new("S1"),
            sdp: "v=0\r\n".to_string(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["kind"], "offer");
        assert_eq!(v["sessionId"], "S1");
        assert_eq!(v["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_candidate_wire_shape() {
        let json = r#"{
            "sessionId": "S1",
            "kind": "candidate",
            "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        }"#;
        let msg: SignalingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind(), "candidate");
        assert_eq!(msg.session_id(), &SessionId::new("S1"));
        assert!(msg.session_description().is_none());
    }

    #[test]
    fn test_description_wrapping() {
        let msg = SignalingMessage::description(
            SessionId::new("S2"),
            SessionDescription::answer("v=0"),
        );
        assert_eq!(msg.kind(), "answer");
        assert_eq!(
            msg.session_description(),
            Some(SessionDescription::answer("v=0"))
        );
    }

    #[test]
    fn test_leave_without_reason_omits_field() {
        let msg = SignalingMessage::Leave {
            session_id: SessionId::new("S3"),
            reason: None,
        };
        let s = serde_json::to_string(&msg).unwrap();
        assert_eq!(s, r#"{"kind":"leave","sessionId":"S3"}"#);
    }

    #[test]
    fn test_subscription_cancels_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(SessionId::new("S1"), ParticipantId::new("a"), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_cancels_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        {
            let _sub = Subscription::new(SessionId::new("S1"), ParticipantId::new("a"), move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
