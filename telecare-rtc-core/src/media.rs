//! Local media acquisition for calls
//!
//! Capture devices live outside this crate and are reached through the
//! [`MediaDevice`] trait. [`MediaGate`] wraps a device, bounds acquisition
//! time and hands back a [`LocalTrackSet`] that is owned by exactly one call.
//!
//! Mute and camera-off are track-enable flags, never renegotiated media
//! lines, so they take effect without a signaling round-trip.

use crate::types::{LocalTrackInfo, MediaConstraints, MediaKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Media-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Permission denied, no matching device, or acquisition timed out
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Track set is already bound to another peer link
    #[error("Track set {set} is already attached to link {link}")]
    AlreadyClaimed {
        /// Track set
        set: Uuid,
        /// Link holding the claim
        link: Uuid,
    },

    /// Track set was released
    #[error("Track set {0} has been released")]
    Released(Uuid),
}

/// One captured local track
///
/// Implemented by the capture layer. `stop` must be safe to call more than
/// once.
pub trait CaptureTrack: Send + Sync {
    /// Track identifier
    fn id(&self) -> &str;

    /// Audio or video
    fn kind(&self) -> MediaKind;

    /// Enable or disable the track without renegotiation
    fn set_enabled(&self, enabled: bool);

    /// Whether the track currently produces media
    fn is_enabled(&self) -> bool;

    /// Stop capture and release the device
    fn stop(&self);

    /// Handle the peer connection sends from, if the track is backed by one
    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        None
    }
}

/// External capture device boundary
#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Open capture for the requested kinds
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if permission is denied or no device matches
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn CaptureTrack>>, MediaError>;
}

/// Local tracks acquired for one call
///
/// Deliberately not `Clone`: the owning call state is the only holder, and a
/// set can be attached to a single peer link.
pub struct LocalTrackSet {
    id: Uuid,
    tracks: Vec<Arc<dyn CaptureTrack>>,
    claimed_by: Mutex<Option<Uuid>>,
    released: AtomicBool,
}

impl LocalTrackSet {
    /// Wrap freshly acquired tracks
    pub fn new(tracks: Vec<Arc<dyn CaptureTrack>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
            claimed_by: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    /// Set identifier
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The captured tracks
    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn CaptureTrack>] {
        &self.tracks
    }

    /// Render-facing description of every track
    #[must_use]
    pub fn info(&self) -> Vec<LocalTrackInfo> {
        self.tracks
            .iter()
            .map(|t| LocalTrackInfo {
                id: t.id().to_string(),
                kind: t.kind(),
                enabled: t.is_enabled(),
            })
            .collect()
    }

    /// Whether a track of `kind` is present
    #[must_use]
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }

    /// Bind this set to a peer link
    ///
    /// Claiming again for the same link is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the set is released or bound to a different link
    pub fn claim(&self, link: Uuid) -> Result<(), MediaError> {
        if self.is_released() {
            return Err(MediaError::Released(self.id));
        }
        let mut claimed = self.claimed_by.lock();
        match *claimed {
            Some(existing) if existing != link => Err(MediaError::AlreadyClaimed {
                set: self.id,
                link: existing,
            }),
            _ => {
                *claimed = Some(link);
                Ok(())
            }
        }
    }

    /// Link currently holding the set
    #[must_use]
    pub fn claimed_by(&self) -> Option<Uuid> {
        *self.claimed_by.lock()
    }

    /// Whether `release` already ran
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalTrackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrackSet")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("claimed_by", &self.claimed_by())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Acquires and releases local media through a capture device
#[derive(Clone)]
pub struct MediaGate {
    device: Arc<dyn MediaDevice>,
    acquire_timeout: Duration,
}

impl MediaGate {
    /// Create a gate over `device`
    pub fn new(device: Arc<dyn MediaDevice>, acquire_timeout: Duration) -> Self {
        Self {
            device,
            acquire_timeout,
        }
    }

    /// Acquire local tracks matching `constraints`
    ///
    /// Not retried; a failed attempt is surfaced to the caller as is.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` on denial, timeout, or when a requested
    /// kind is missing from what the device returned
    #[tracing::instrument(skip(self), fields(audio = constraints.audio, video = constraints.video))]
    pub async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalTrackSet, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::DeviceUnavailable(
                "no media kind requested".to_string(),
            ));
        }

        let tracks = tokio::time::timeout(self.acquire_timeout, self.device.acquire(constraints))
            .await
            .map_err(|_| {
                tracing::warn!(timeout_ms = self.acquire_timeout.as_millis() as u64, "Media acquisition timed out");
                MediaError::DeviceUnavailable("acquisition timed out".to_string())
            })?
            .map_err(|e| match e {
                MediaError::DeviceUnavailable(_) => e,
                other => MediaError::DeviceUnavailable(other.to_string()),
            })?;

        let set = LocalTrackSet::new(tracks);
        for kind in constraints.kinds() {
            if !set.has_kind(kind) {
                self.release(&set);
                tracing::warn!(kind = %kind, "Device returned no track of requested kind");
                return Err(MediaError::DeviceUnavailable(format!(
                    "no {kind} device available"
                )));
            }
        }

        tracing::info!(set_id = %set.id(), tracks = set.tracks().len(), "Local media acquired");
        Ok(set)
    }

    /// Toggle every track of `kind`, returning how many were touched
    pub fn set_track_enabled(&self, set: &LocalTrackSet, kind: MediaKind, enabled: bool) -> usize {
        if set.is_released() {
            tracing::debug!(set_id = %set.id(), "Ignoring toggle on released track set");
            return 0;
        }
        let mut touched = 0;
        for track in set.tracks().iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        tracing::debug!(set_id = %set.id(), kind = %kind, enabled, touched, "Track enable flag set");
        touched
    }

    /// Stop every track in the set
    ///
    /// Returns `true` the first time; later calls do nothing.
    pub fn release(&self, set: &LocalTrackSet) -> bool {
        if set.released.swap(true, Ordering::SeqCst) {
            tracing::trace!(set_id = %set.id(), "Track set already released");
            return false;
        }
        for track in set.tracks() {
            track.stop();
        }
        tracing::info!(set_id = %set.id(), "Local media released");
        true
    }
}

/// Sample-fed track backed by a webrtc `TrackLocalStaticSample`
pub struct SyntheticTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    track: Arc<TrackLocalStaticSample>,
}

impl SyntheticTrack {
    fn new(kind: MediaKind, stream_id: &str) -> Self {
        let id = format!("{kind}-{}", Uuid::new_v4().simple());
        let codec = match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };
        tracing::debug!(track_id = %id, codec = %codec.mime_type, clock_rate = codec.clock_rate, "Synthetic track created");
        let track = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_string(),
        ));
        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            track,
        }
    }

    /// Whether `stop` has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CaptureTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && !self.is_stopped()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        let track: Arc<dyn TrackLocal + Send + Sync> = self.track.clone();
        Some(track)
    }
}

/// Capture device producing silent opus / blank VP8 tracks
///
/// Used by the demo binary where no camera or microphone is present.
#[derive(Debug, Clone, Default)]
pub struct SyntheticMediaDevice {
    denied: bool,
}

impl SyntheticMediaDevice {
    /// Device that grants every request
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that behaves like a denied permission prompt
    #[must_use]
    pub fn unavailable() -> Self {
        Self { denied: true }
    }
}

#[async_trait]
impl MediaDevice for SyntheticMediaDevice {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn CaptureTrack>>, MediaError> {
        if self.denied {
            return Err(MediaError::DeviceUnavailable(
                "permission denied".to_string(),
            ));
        }
        let stream_id = format!("local-{}", Uuid::new_v4().simple());
        Ok(constraints
            .kinds()
            .into_iter()
            .map(|kind| Arc::new(SyntheticTrack::new(kind, &stream_id)) as Arc<dyn CaptureTrack>)
            .collect())
    }
}
