//! Peer link: one negotiated transport connection per call attempt
//!
//! [`PeerLink`] tracks the offer/answer signaling state on top of a
//! [`PeerBackend`] and resolves offer collisions deterministically: the
//! polite side rolls its own offer back, the other side ignores the
//! competing offer. Backend callbacks are delivered as [`PeerEvent`]s through
//! a sink that only enqueues, so no callback re-enters the controller.

use crate::config::IceServerConfig;
use crate::media::{LocalTrackSet, MediaError};
use crate::types::{IceCandidate, MediaKind, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use webrtc::track::track_local::TrackLocal;

/// Peer link errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// Underlying transport rejected an operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// Operation is not valid in the current signaling state
    #[error("Cannot {operation} in signaling state {state:?}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// State at the time
        state: SignalingState,
    },

    /// Local tracks were already attached to this link
    #[error("Local tracks already attached")]
    AlreadyAttached,

    /// Link was closed
    #[error("Peer link closed")]
    Closed,

    /// Media error while attaching tracks
    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}

/// Connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Created, nothing attempted
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Transient loss, may recover
    Disconnected,
    /// Unrecoverable
    Failed,
    /// Closed explicitly
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Offer/answer state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalingState {
    /// No exchange in flight
    Stable,
    /// Local offer applied, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answer not yet created
    HaveRemoteOffer,
}

/// Outcome of applying a remote description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// Applied directly
    Applied,
    /// Our pending offer was rolled back first (polite side of a collision)
    AppliedAfterRollback,
    /// Competing offer dropped, ours stands (impolite side of a collision)
    IgnoredGlare,
}

/// Track received from the other participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    /// Track identifier
    pub id: String,
    /// Audio or video
    pub kind: MediaKind,
    /// Remote stream the track belongs to
    pub stream_id: String,
}

/// Inbound tracks surfaced by a link
///
/// Owned by the link; call state and views only hold references.
#[derive(Debug)]
pub struct RemoteTrackSet {
    link_id: Uuid,
    tracks: RwLock<Vec<RemoteTrack>>,
}

impl RemoteTrackSet {
    fn new(link_id: Uuid) -> Self {
        Self {
            link_id,
            tracks: RwLock::new(Vec::new()),
        }
    }

    /// Link that owns this set
    #[must_use]
    pub fn link_id(&self) -> Uuid {
        self.link_id
    }

    /// Current tracks
    #[must_use]
    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.read().clone()
    }

    /// Number of tracks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    /// Whether no track arrived yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    fn insert(&self, track: RemoteTrack) -> bool {
        let mut tracks = self.tracks.write();
        if tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        tracks.push(track);
        true
    }
}

/// Asynchronous notification from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Locally gathered candidate to trickle to the other side
    LocalCandidate(IceCandidate),
    /// Candidate gathering finished
    GatheringComplete,
    /// Connection state transition
    ConnectionState(LinkState),
    /// Remote track arrived
    RemoteTrack(RemoteTrack),
}

/// Event sink handed to the backend; must only enqueue
pub type PeerEventSink = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// Transport connection primitive
///
/// `create_offer` and `create_answer` also apply the description locally and
/// start candidate gathering; candidates arrive through the event sink.
#[async_trait]
pub trait PeerBackend: Send + Sync {
    /// Add a local track
    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<(), PeerError>;

    /// Create and apply a local offer, returning its SDP
    async fn create_offer(&self) -> Result<String, PeerError>;

    /// Create and apply a local answer, returning its SDP
    async fn create_answer(&self) -> Result<String, PeerError>;

    /// Apply the other side's offer or answer
    async fn set_remote_description(&self, description: &SessionDescription)
        -> Result<(), PeerError>;

    /// Discard the pending local offer
    async fn rollback(&self) -> Result<(), PeerError>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError>;

    /// Release transport resources
    async fn close(&self) -> Result<(), PeerError>;
}

/// Creates one backend per peer link
#[async_trait]
pub trait PeerBackendFactory: Send + Sync {
    /// Build a backend reporting to `sink`
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        sink: PeerEventSink,
    ) -> Result<Arc<dyn PeerBackend>, PeerError>;
}

/// One call attempt's transport connection
pub struct PeerLink {
    id: Uuid,
    backend: Arc<dyn PeerBackend>,
    polite: bool,
    signaling: SignalingState,
    remote_description_set: bool,
    tracks_attached: bool,
    state: LinkState,
    remote: Arc<RemoteTrackSet>,
    closed: bool,
}

impl PeerLink {
    /// Wrap a fresh backend
    ///
    /// `polite` marks the side that yields in an offer collision.
    pub fn new(backend: Arc<dyn PeerBackend>, polite: bool) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(link_id = %id, polite, "Peer link created");
        Self {
            id,
            backend,
            polite,
            signaling: SignalingState::Stable,
            remote_description_set: false,
            tracks_attached: false,
            state: LinkState::New,
            remote: Arc::new(RemoteTrackSet::new(id)),
            closed: false,
        }
    }

    /// Link identifier
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this side yields on collision
    #[must_use]
    pub fn is_polite(&self) -> bool {
        self.polite
    }

    /// Offer/answer state
    #[must_use]
    pub fn signaling_state(&self) -> SignalingState {
        self.signaling
    }

    /// Whether a remote description has been applied
    #[must_use]
    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    /// Last reported connection state
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Inbound track set
    #[must_use]
    pub fn remote_tracks(&self) -> Arc<RemoteTrackSet> {
        Arc::clone(&self.remote)
    }

    /// Whether `close` ran
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.closed {
            return Err(PeerError::Closed);
        }
        Ok(())
    }

    /// Attach the call's local tracks; allowed once per link
    ///
    /// # Errors
    ///
    /// Returns error if tracks were already attached, the set belongs to
    /// another link, or the backend refuses a track
    #[tracing::instrument(skip(self, set), fields(link_id = %self.id, set_id = %set.id()))]
    pub async fn attach_local_tracks(&mut self, set: &LocalTrackSet) -> Result<usize, PeerError> {
        self.ensure_open()?;
        if self.tracks_attached {
            return Err(PeerError::AlreadyAttached);
        }
        set.claim(self.id)?;
        self.tracks_attached = true;

        let mut attached = 0;
        for track in set.tracks() {
            if let Some(rtc) = track.rtc_track() {
                self.backend.add_track(rtc).await?;
                attached += 1;
            }
        }
        tracing::debug!(attached, "Local tracks attached");
        Ok(attached)
    }

    /// Create the local offer; gathering starts as a side effect
    ///
    /// # Errors
    ///
    /// Returns error unless the link is stable, or if the backend fails
    #[tracing::instrument(skip(self), fields(link_id = %self.id))]
    pub async fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        if self.signaling != SignalingState::Stable {
            return Err(PeerError::InvalidState {
                operation: "create offer",
                state: self.signaling,
            });
        }
        let sdp = self.backend.create_offer().await?;
        self.signaling = SignalingState::HaveLocalOffer;
        tracing::debug!(sdp_len = sdp.len(), "Local offer created");
        Ok(SessionDescription::offer(sdp))
    }

    /// Create the answer to an applied remote offer
    ///
    /// # Errors
    ///
    /// Returns error unless a remote offer is pending, or if the backend fails
    #[tracing::instrument(skip(self), fields(link_id = %self.id))]
    pub async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        if self.signaling != SignalingState::HaveRemoteOffer {
            return Err(PeerError::InvalidState {
                operation: "create answer",
                state: self.signaling,
            });
        }
        let sdp = self.backend.create_answer().await?;
        self.signaling = SignalingState::Stable;
        tracing::debug!(sdp_len = sdp.len(), "Local answer created");
        Ok(SessionDescription::answer(sdp))
    }

    /// Apply the other side's offer or answer
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for an out-of-sequence description and
    /// `Backend` if the transport rejects it
    #[tracing::instrument(skip(self, description), fields(link_id = %self.id, kind = ?description.kind, state = ?self.signaling))]
    pub async fn accept_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<RemoteApply, PeerError> {
        self.ensure_open()?;
        let outcome = match (description.kind, self.signaling) {
            (SdpKind::Offer, SignalingState::Stable) => {
                self.backend.set_remote_description(description).await?;
                self.signaling = SignalingState::HaveRemoteOffer;
                RemoteApply::Applied
            }
            (SdpKind::Offer, SignalingState::HaveLocalOffer) if self.polite => {
                tracing::info!("Offer collision, rolling back local offer");
                self.backend.rollback().await?;
                self.signaling = SignalingState::Stable;
                self.backend.set_remote_description(description).await?;
                self.signaling = SignalingState::HaveRemoteOffer;
                RemoteApply::AppliedAfterRollback
            }
            (SdpKind::Offer, SignalingState::HaveLocalOffer) => {
                tracing::info!("Offer collision, keeping local offer");
                return Ok(RemoteApply::IgnoredGlare);
            }
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                self.backend.set_remote_description(description).await?;
                self.signaling = SignalingState::Stable;
                RemoteApply::Applied
            }
            (_, state) => {
                return Err(PeerError::InvalidState {
                    operation: match description.kind {
                        SdpKind::Offer => "apply remote offer",
                        SdpKind::Answer => "apply remote answer",
                    },
                    state,
                });
            }
        };
        self.remote_description_set = true;
        Ok(outcome)
    }

    /// Apply a remote candidate
    ///
    /// Never fails: a candidate that cannot be applied, including one that
    /// arrives before any remote description, is logged and dropped. Callers
    /// buffer until [`has_remote_description`](Self::has_remote_description).
    pub async fn add_remote_candidate(&self, candidate: &IceCandidate) -> bool {
        if self.closed {
            tracing::debug!(link_id = %self.id, "Candidate for closed link dropped");
            return false;
        }
        if !self.remote_description_set {
            tracing::debug!(link_id = %self.id, "Candidate before remote description dropped");
            return false;
        }
        match self.backend.add_ice_candidate(candidate).await {
            Ok(()) => {
                tracing::trace!(link_id = %self.id, "Remote candidate applied");
                true
            }
            Err(e) => {
                tracing::warn!(link_id = %self.id, error = %e, "Remote candidate rejected");
                false
            }
        }
    }

    /// Record an inbound track; duplicates are ignored
    pub fn register_remote_track(&self, track: RemoteTrack) -> bool {
        let added = self.remote.insert(track);
        if added {
            tracing::debug!(link_id = %self.id, tracks = self.remote.len(), "Remote track registered");
        }
        added
    }

    /// Record a connection state report
    ///
    /// Returns the previous state when it changed. Reports after `close`
    /// are ignored.
    pub fn note_state(&mut self, state: LinkState) -> Option<LinkState> {
        if self.closed || self.state == state {
            return None;
        }
        let old = self.state;
        self.state = state;
        tracing::debug!(link_id = %self.id, old_state = ?old, new_state = ?state, "Link state changed");
        Some(old)
    }

    /// Release transport resources
    ///
    /// Returns `true` the first time; later calls do nothing. Backend errors
    /// are logged, never returned.
    #[tracing::instrument(skip(self), fields(link_id = %self.id))]
    pub async fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        if let Err(e) = self.backend.close().await {
            tracing::warn!(error = %e, "Backend close failed, treating link as closed");
        }
        self.state = LinkState::Closed;
        tracing::debug!("Peer link closed");
        true
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id)
            .field("polite", &self.polite)
            .field("signaling", &self.signaling)
            .field("state", &self.state)
            .field("closed", &self.closed)
            .finish()
    }
}
