//! Call types and data structures

use crate::identity::{Participant, ParticipantId};
use crate::peer::RemoteTrackSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Identifier of a scheduled or ad-hoc call session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a session identifier from a string
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Create a new random session identifier
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session record errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session record violates the two-party invariant
    #[error("Invalid session {0}: {1}")]
    InvalidSession(SessionId, String),

    /// Participant is not part of the session
    #[error("Participant {participant} is not part of session {session}")]
    NotAParticipant {
        /// Session being joined
        session: SessionId,
        /// Participant that tried to join
        participant: ParticipantId,
    },
}

/// Session metadata as served by the session service
///
/// Created before either party joins and never mutated by the call engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier
    pub id: SessionId,
    /// The two role-tagged parties
    pub participants: Vec<Participant>,
    /// Scheduled start, absent for instant calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl Session {
    /// Create an instant (unscheduled) session between two participants
    pub fn instant(id: SessionId, a: Participant, b: Participant) -> Self {
        Self {
            id,
            participants: vec![a, b],
            scheduled_time: None,
        }
    }

    /// Check the two-party invariant
    ///
    /// # Errors
    ///
    /// Returns error unless there are exactly two participants with distinct
    /// identifiers and distinct roles.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.participants.len() != 2 {
            return Err(SessionError::InvalidSession(
                self.id.clone(),
                format!("expected 2 participants, found {}", self.participants.len()),
            ));
        }
        let ids: HashSet<_> = self.participants.iter().map(|p| &p.id).collect();
        if ids.len() != 2 {
            return Err(SessionError::InvalidSession(
                self.id.clone(),
                "participants must be distinct".to_string(),
            ));
        }
        if self.participants[0].role == self.participants[1].role {
            return Err(SessionError::InvalidSession(
                self.id.clone(),
                format!("both participants have role {}", self.participants[0].role),
            ));
        }
        Ok(())
    }

    /// Look up a participant by id
    #[must_use]
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// The other party of the call
    #[must_use]
    pub fn counterpart(&self, id: &ParticipantId) -> Option<&Participant> {
        if self.participant(id).is_none() {
            return None;
        }
        self.participants.iter().find(|p| &p.id != id)
    }
}

/// Kind of local or remote media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone / audio
    Audio,
    /// Camera / video
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Media constraints for local capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Capture audio
    pub audio: bool,
    /// Capture video
    pub video: bool,
}

impl MediaConstraints {
    /// Audio-only call
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    /// Video call with audio
    pub fn video_call() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    /// Media kinds requested by these constraints
    pub fn kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::new();
        if self.audio {
            kinds.push(MediaKind::Audio);
        }
        if self.video {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::video_call()
    }
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Session offer
    Offer,
    /// Session answer
    Answer,
}

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    pub kind: SdpKind,
    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// SDP media ID
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// SDP media line index
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate bound to the first media section
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Sub-state of negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationStage {
    /// We sent an offer and wait for the answer
    OfferSent,
    /// We received an offer and answer it / wait for connectivity
    AnswerPending,
}

/// Phase of a call as seen by its session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPhase {
    /// Nothing started yet
    Idle,
    /// Acquiring local media
    Initializing,
    /// Exchanging descriptions and candidates
    Negotiating(NegotiationStage),
    /// Media flows peer to peer
    Connected,
    /// Tearing down
    Ending,
    /// Ended normally
    Ended,
    /// Ended by an unrecoverable error
    Failed,
}

impl CallPhase {
    /// `Ended` and `Failed` are terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// Whether the call is negotiating, in any stage
    #[must_use]
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Negotiating(_))
    }
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initializing => write!(f, "initializing"),
            Self::Negotiating(NegotiationStage::OfferSent) => write!(f, "negotiating(offer sent)"),
            Self::Negotiating(NegotiationStage::AnswerPending) => {
                write!(f, "negotiating(answer pending)")
            }
            Self::Connected => write!(f, "connected"),
            Self::Ending => write!(f, "ending"),
            Self::Ended => write!(f, "ended"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Error taxonomy surfaced to the call UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallErrorKind {
    /// Media acquisition failed
    DeviceUnavailable,
    /// Malformed or out-of-sequence description
    NegotiationError,
    /// Signaling send/receive failure
    TransportError,
    /// Connection failed after being established
    ConnectionLost,
    /// Negotiation never reached `Connected`
    Timeout,
}

impl CallErrorKind {
    /// Whether this kind always ends the call
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TransportError)
    }
}

impl std::fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DeviceUnavailable => "device unavailable",
            Self::NegotiationError => "negotiation error",
            Self::TransportError => "transport error",
            Self::ConnectionLost => "connection lost",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Error record kept on the call state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    /// Error kind
    pub kind: CallErrorKind,
    /// Human readable detail
    pub detail: String,
    /// When it happened
    pub at: DateTime<Utc>,
}

impl CallFailure {
    /// Create a failure record stamped now
    pub fn new(kind: CallErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Description of a local track handed to the render surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTrackInfo {
    /// Track identifier
    pub id: String,
    /// Track kind
    pub kind: MediaKind,
    /// Whether the track is currently enabled
    pub enabled: bool,
}

/// Call event for notifications
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Phase transition
    PhaseChanged {
        /// Previous phase
        from: CallPhase,
        /// New phase
        to: CallPhase,
    },
    /// Local media acquired and ready to render
    LocalMedia(Vec<LocalTrackInfo>),
    /// Remote media surfaced by the peer link
    RemoteMedia(Arc<RemoteTrackSet>),
    /// Recoverable or fatal error
    Error {
        /// Error kind
        kind: CallErrorKind,
        /// Detail
        detail: String,
    },
    /// Microphone mute flag changed
    MuteChanged(bool),
    /// Camera off flag changed
    VideoOffChanged(bool),
}
