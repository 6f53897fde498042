//! webrtc-rs peer backend
//!
//! Builds one `RTCPeerConnection` per peer link and forwards its callbacks
//! as [`PeerEvent`]s.

use crate::config::IceServerConfig;
use crate::peer::{
    LinkState, PeerBackend, PeerBackendFactory, PeerError, PeerEvent, PeerEventSink, RemoteTrack,
};
use crate::types::{IceCandidate, MediaKind, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn backend_err(context: &str, e: webrtc::Error) -> PeerError {
    PeerError::Backend(format!("{context}: {e}"))
}

/// Map a webrtc connection state to a link state
///
/// `Unspecified` carries no information and maps to `None`.
#[must_use]
pub fn map_connection_state(state: RTCPeerConnectionState) -> Option<LinkState> {
    match state {
        RTCPeerConnectionState::Unspecified => None,
        RTCPeerConnectionState::New => Some(LinkState::New),
        RTCPeerConnectionState::Connecting => Some(LinkState::Connecting),
        RTCPeerConnectionState::Connected => Some(LinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(LinkState::Failed),
        RTCPeerConnectionState::Closed => Some(LinkState::Closed),
    }
}

fn map_codec_type(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

fn to_rtc_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Factory producing webrtc-rs backed peer connections
#[derive(Debug, Clone, Default)]
pub struct RtcBackendFactory;

impl RtcBackendFactory {
    /// Create the factory
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build a backend reporting to `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the media engine or the peer connection cannot be
    /// set up
    #[tracing::instrument(skip(self, ice_servers, sink), fields(ice_servers = ice_servers.len()))]
    pub async fn connect(
        &self,
        ice_servers: &[IceServerConfig],
        sink: PeerEventSink,
    ) -> Result<RtcBackend, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| backend_err("register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| backend_err("register interceptors", e))?;

        let api = Arc::new(
            APIBuilder::new()
                .with_media_engine(media_engine)
                .with_interceptor_registry(registry)
                .build(),
        );
        let ice_servers = to_rtc_ice_servers(ice_servers);
        let epoch = Arc::new(AtomicU64::new(0));

        let pc = open_connection(&api, &ice_servers, gated(&sink, &epoch, 0)).await?;
        tracing::debug!("Peer connection created");
        Ok(RtcBackend {
            api,
            ice_servers,
            sink,
            epoch,
            pc: RwLock::new(pc),
            tracks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PeerBackendFactory for RtcBackendFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        sink: PeerEventSink,
    ) -> Result<Arc<dyn PeerBackend>, PeerError> {
        Ok(Arc::new(self.connect(ice_servers, sink).await?))
    }
}

/// Forward events only while `epoch` still equals `current`
fn gated(sink: &PeerEventSink, epoch: &Arc<AtomicU64>, current: u64) -> PeerEventSink {
    let sink = Arc::clone(sink);
    let epoch = Arc::clone(epoch);
    Arc::new(move |event| {
        if epoch.load(Ordering::SeqCst) == current {
            sink(event);
        }
    })
}

async fn open_connection(
    api: &API,
    ice_servers: &[RTCIceServer],
    sink: PeerEventSink,
) -> Result<Arc<RTCPeerConnection>, PeerError> {
    let config = RTCConfiguration {
        ice_servers: ice_servers.to_vec(),
        ..Default::default()
    };
    let pc = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to create peer connection");
        backend_err("create peer connection", e)
    })?);
    wire_callbacks(&pc, sink);
    Ok(pc)
}

fn wire_callbacks(pc: &RTCPeerConnection, sink: PeerEventSink) {
    let candidate_sink = Arc::clone(&sink);
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = Arc::clone(&candidate_sink);
        Box::pin(async move {
            let Some(candidate) = candidate else {
                sink(PeerEvent::GatheringComplete);
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink(PeerEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                })),
                Err(e) => tracing::warn!(error = %e, "Could not serialize local candidate"),
            }
        })
    }));

    let state_sink = Arc::clone(&sink);
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = Arc::clone(&state_sink);
        Box::pin(async move {
            tracing::debug!(state = %state, "Peer connection state changed");
            if let Some(state) = map_connection_state(state) {
                sink(PeerEvent::ConnectionState(state));
            }
        })
    }));

    let track_sink = sink;
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let sink = Arc::clone(&track_sink);
        Box::pin(async move {
            let Some(kind) = map_codec_type(track.kind()) else {
                tracing::debug!("Ignoring remote track of unspecified kind");
                return;
            };
            sink(PeerEvent::RemoteTrack(RemoteTrack {
                id: track.id(),
                kind,
                stream_id: track.stream_id(),
            }));
        })
    }));
}

/// One webrtc-rs peer connection
///
/// The connection is replaceable: a rollback that webrtc-rs refuses swaps in
/// a fresh connection carrying the same local tracks. Callbacks of a replaced
/// connection are silenced through `epoch`.
pub struct RtcBackend {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
    sink: PeerEventSink,
    epoch: Arc<AtomicU64>,
    pc: RwLock<Arc<RTCPeerConnection>>,
    tracks: Mutex<Vec<Arc<dyn TrackLocal + Send + Sync>>>,
}

impl RtcBackend {
    fn connection(&self) -> Arc<RTCPeerConnection> {
        self.pc.read().clone()
    }

    /// Replace the connection with a fresh one in the stable state
    async fn replace_connection(&self) -> Result<(), PeerError> {
        let current = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let fresh = open_connection(
            &self.api,
            &self.ice_servers,
            gated(&self.sink, &self.epoch, current),
        )
        .await?;
        let tracks = self.tracks.lock().clone();
        for track in tracks {
            fresh
                .add_track(track)
                .await
                .map_err(|e| backend_err("re-add track", e))?;
        }

        let stale = std::mem::replace(&mut *self.pc.write(), fresh);
        if let Err(e) = stale.close().await {
            tracing::debug!(error = %e, "Replaced peer connection did not close cleanly");
        }
        tracing::info!(epoch = current, "Peer connection replaced");
        Ok(())
    }
}

#[async_trait]
impl PeerBackend for RtcBackend {
    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<(), PeerError> {
        self.connection()
            .add_track(Arc::clone(&track))
            .await
            .map_err(|e| backend_err("add track", e))?;
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        let pc = self.connection();
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| backend_err("create offer", e))?;
        let sdp = offer.sdp.clone();
        pc.set_local_description(offer)
            .await
            .map_err(|e| backend_err("set local offer", e))?;
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        let pc = self.connection();
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| backend_err("create answer", e))?;
        let sdp = answer.sdp.clone();
        pc.set_local_description(answer)
            .await
            .map_err(|e| backend_err("set local answer", e))?;
        Ok(sdp)
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        if description.sdp.trim().is_empty() {
            return Err(PeerError::Backend(
                "session description cannot be empty".to_string(),
            ));
        }
        let rtc = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
        }
        .map_err(|e| backend_err("parse remote description", e))?;
        self.connection()
            .set_remote_description(rtc)
            .await
            .map_err(|e| backend_err("set remote description", e))
    }

    /// Roll back the pending local offer
    ///
    /// A rollback description must carry the SDP it discards; an empty one
    /// is rejected by `set_local_description`.
    async fn rollback(&self) -> Result<(), PeerError> {
        let pc = self.connection();
        let Some(mut pending) = pc.pending_local_description().await else {
            return Err(PeerError::Backend(
                "rollback: no local offer pending".to_string(),
            ));
        };
        pending.sdp_type = RTCSdpType::Rollback;
        match pc.set_local_description(pending).await {
            Ok(()) => {
                tracing::debug!("Local offer rolled back");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "Rollback refused, replacing peer connection");
                self.replace_connection().await
            }
        }
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.connection()
            .add_ice_candidate(init)
            .await
            .map_err(|e| backend_err("add candidate", e))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.connection()
            .close()
            .await
            .map_err(|e| backend_err("close", e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::media::{MediaDevice, SyntheticMediaDevice};
    use crate::types::MediaConstraints;
    use std::time::Duration;
    use webrtc::peer_connection::signaling_state::RTCSignalingState;

    fn recording_sink() -> (PeerEventSink, Arc<Mutex<Vec<PeerEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&events);
        let sink: PeerEventSink = Arc::new(move |event| recorded.lock().push(event));
        (sink, events)
    }

    async fn with_audio(sink: PeerEventSink) -> RtcBackend {
        let backend = RtcBackendFactory::new().connect(&[], sink).await.unwrap();
        let tracks = SyntheticMediaDevice::new()
            .acquire(MediaConstraints::audio_only())
            .await
            .unwrap();
        for track in &tracks {
            backend.add_track(track.rtc_track().unwrap()).await.unwrap();
        }
        backend
    }

    fn signaling_state(backend: &RtcBackend) -> RTCSignalingState {
        backend.connection().signaling_state()
    }

    fn saw_closed(events: &Mutex<Vec<PeerEvent>>) -> bool {
        events
            .lock()
            .iter()
            .any(|e| *e == PeerEvent::ConnectionState(LinkState::Closed))
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_connection_state(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Connected),
            Some(LinkState::Connected)
        );
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Disconnected),
            Some(LinkState::Disconnected)
        );
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Failed),
            Some(LinkState::Failed)
        );
    }

    #[test]
    fn test_ice_server_conversion() {
        let servers = vec![
            IceServerConfig::stun("stun:stun.l.google.com:19302"),
            IceServerConfig {
                urls: vec!["turn:turn.example:3478".to_string()],
                username: Some("u".to_string()),
                credential: Some("c".to_string()),
            },
        ];
        let rtc = to_rtc_ice_servers(&servers);
        assert_eq!(rtc.len(), 2);
        assert!(rtc[0].username.is_empty());
        assert_eq!(rtc[1].credential, "c");
    }

    #[tokio::test]
    async fn test_offer_carries_local_media() {
        let sink: PeerEventSink = Arc::new(|_event| {});
        let backend = RtcBackendFactory::new().create(&[], sink).await.unwrap();
        let tracks = SyntheticMediaDevice::new()
            .acquire(MediaConstraints::audio_only())
            .await
            .unwrap();
        for track in &tracks {
            backend.add_track(track.rtc_track().unwrap()).await.unwrap();
        }

        let sdp = backend.create_offer().await.unwrap();
        assert!(sdp.starts_with("v=0"));
        assert!(sdp.contains("m=audio"));
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_remote_description_rejected() {
        let sink: PeerEventSink = Arc::new(|_event| {});
        let backend = RtcBackendFactory::new().create(&[], sink).await.unwrap();
        let result = backend
            .set_remote_description(&SessionDescription::offer(""))
            .await;
        assert!(matches!(result, Err(PeerError::Backend(_))));
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_after_local_offer() {
        let (sink, events) = recording_sink();
        let patient = with_audio(sink).await;
        patient.create_offer().await.unwrap();
        assert_eq!(signaling_state(&patient), RTCSignalingState::HaveLocalOffer);

        patient.rollback().await.unwrap();
        assert_eq!(signaling_state(&patient), RTCSignalingState::Stable);

        // The competing offer is answered on the rolled-back connection
        let clinician = with_audio(Arc::new(|_event| {})).await;
        let offer = clinician.create_offer().await.unwrap();
        patient
            .set_remote_description(&SessionDescription::offer(offer))
            .await
            .unwrap();
        let answer = patient.create_answer().await.unwrap();
        assert!(answer.contains("m=audio"));
        assert_eq!(signaling_state(&patient), RTCSignalingState::Stable);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!saw_closed(&events));
        patient.close().await.unwrap();
        clinician.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_without_offer_rejected() {
        let backend = with_audio(Arc::new(|_event| {})).await;
        assert!(matches!(
            backend.rollback().await,
            Err(PeerError::Backend(_))
        ));
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_replaced_connection_is_silenced() {
        let (sink, events) = recording_sink();
        let backend = with_audio(sink).await;
        backend.create_offer().await.unwrap();
        let before = backend.connection();

        backend.replace_connection().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &backend.connection()));
        assert_eq!(signaling_state(&backend), RTCSignalingState::Stable);

        // Tracks are carried over to the fresh connection
        let sdp = backend.create_offer().await.unwrap();
        assert!(sdp.contains("m=audio"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!saw_closed(&events));
        backend.close().await.unwrap();
    }
}
