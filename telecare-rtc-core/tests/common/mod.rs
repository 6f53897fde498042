//! Shared fakes for integration tests
//!
//! `ScriptedBackend` stands in for a peer connection: it records every
//! operation, trickles two local candidates per description it creates and,
//! when `auto_connect` is set, reports `connected` once it holds a remote
//! description and at least one remote candidate.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telecare_rtc_core::{
    CallConfig, CallDeps, CallEvent, CallPhase, CaptureTrack, IceCandidate, IceServerConfig,
    LinkState, LoopbackRelay, MediaConstraints, MediaDevice, MediaError, MediaGate, MediaKind,
    Participant, ParticipantId, PeerBackend, PeerBackendFactory, PeerError, PeerEvent,
    PeerEventSink, RemoteTrack, SdpKind, Session, SessionController, SessionDescription,
    SessionHandle, SessionId,
};
use tokio::sync::broadcast;
use webrtc::track::track_local::TrackLocal;

pub const CLINICIAN: &str = "dr-osei";
pub const PATIENT: &str = "pt-17";
pub const SESSION: &str = "S1";

pub fn session() -> Session {
    Session::instant(
        SessionId::new(SESSION),
        Participant::clinician(CLINICIAN),
        Participant::patient(PATIENT),
    )
}

// ============================================================================
// Peer backend
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BackendLog {
    pub offers: usize,
    pub answers: usize,
    pub remote_descriptions: Vec<SdpKind>,
    pub candidates: Vec<String>,
    pub rollbacks: usize,
    pub closes: usize,
}

pub struct ScriptedBackend {
    name: String,
    sink: PeerEventSink,
    auto_connect: bool,
    reject_remote: bool,
    connected: AtomicBool,
    log: Mutex<BackendLog>,
}

impl ScriptedBackend {
    pub fn log(&self) -> BackendLog {
        self.log.lock().clone()
    }

    /// Inject a transport event as if the connection produced it
    pub fn emit(&self, event: PeerEvent) {
        (self.sink)(event);
    }

    fn trickle(&self, round: usize) {
        for i in 1..=2 {
            self.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!(
                "candidate:{}-{round}-{i} 1 udp 2122260223 10.0.0.{i} 5000{i} typ host",
                self.name
            ))));
        }
    }

    fn maybe_connect(&self) {
        if !self.auto_connect {
            return;
        }
        let ready = {
            let log = self.log.lock();
            !log.remote_descriptions.is_empty() && !log.candidates.is_empty()
        };
        if ready && !self.connected.swap(true, Ordering::SeqCst) {
            self.emit(PeerEvent::ConnectionState(LinkState::Connecting));
            self.emit(PeerEvent::ConnectionState(LinkState::Connected));
        }
    }
}

#[async_trait]
impl PeerBackend for ScriptedBackend {
    async fn add_track(&self, _track: Arc<dyn TrackLocal + Send + Sync>) -> Result<(), PeerError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        let round = {
            let mut log = self.log.lock();
            log.offers += 1;
            log.offers
        };
        self.trickle(round);
        Ok(format!("v=0\r\no={} offer {round}\r\n", self.name))
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        let round = {
            let mut log = self.log.lock();
            log.answers += 1;
            log.answers
        };
        self.trickle(round);
        Ok(format!("v=0\r\no={} answer {round}\r\n", self.name))
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        if self.reject_remote {
            return Err(PeerError::Backend("malformed description".to_string()));
        }
        let first = {
            let mut log = self.log.lock();
            log.remote_descriptions.push(description.kind);
            log.remote_descriptions.len() == 1
        };
        if first {
            self.emit(PeerEvent::RemoteTrack(RemoteTrack {
                id: format!("{}-remote-audio", self.name),
                kind: MediaKind::Audio,
                stream_id: "remote".to_string(),
            }));
        }
        self.maybe_connect();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), PeerError> {
        self.log.lock().rollbacks += 1;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        self.log.lock().candidates.push(candidate.candidate.clone());
        self.maybe_connect();
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.log.lock().closes += 1;
        self.emit(PeerEvent::ConnectionState(LinkState::Closed));
        Ok(())
    }
}

pub struct ScriptedBackendFactory {
    name: String,
    auto_connect: bool,
    reject_remote: bool,
    created: Mutex<Vec<Arc<ScriptedBackend>>>,
}

impl ScriptedBackendFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            auto_connect: true,
            reject_remote: false,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Never report `connected` on its own
    pub fn manual(name: &str) -> Self {
        Self {
            auto_connect: false,
            ..Self::new(name)
        }
    }

    /// Reject every remote description
    pub fn rejecting(name: &str) -> Self {
        Self {
            reject_remote: true,
            ..Self::new(name)
        }
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Arc<ScriptedBackend>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl PeerBackendFactory for ScriptedBackendFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServerConfig],
        sink: PeerEventSink,
    ) -> Result<Arc<dyn PeerBackend>, PeerError> {
        let backend = Arc::new(ScriptedBackend {
            name: self.name.clone(),
            sink,
            auto_connect: self.auto_connect,
            reject_remote: self.reject_remote,
            connected: AtomicBool::new(false),
            log: Mutex::new(BackendLog::default()),
        });
        self.created.lock().push(backend.clone());
        Ok(backend)
    }
}

// ============================================================================
// Capture device
// ============================================================================

pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stops: AtomicUsize,
}

impl FakeTrack {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl CaptureTrack for FakeTrack {
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
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeMediaDevice {
    denied: bool,
    acquisitions: AtomicUsize,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeMediaDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().clone()
    }

    pub fn track(&self, kind: MediaKind) -> Option<Arc<FakeTrack>> {
        self.tracks.lock().iter().find(|t| t.kind == kind).cloned()
    }

    /// Every acquired track was stopped exactly once
    pub fn all_stopped_once(&self) -> bool {
        let tracks = self.tracks.lock();
        !tracks.is_empty() && tracks.iter().all(|t| t.stops() == 1)
    }
}

#[async_trait]
impl MediaDevice for FakeMediaDevice {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn CaptureTrack>>, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.denied {
            return Err(MediaError::DeviceUnavailable(
                "permission denied".to_string(),
            ));
        }
        let mut acquired: Vec<Arc<dyn CaptureTrack>> = Vec::new();
        for kind in constraints.kinds() {
            let track = Arc::new(FakeTrack {
                id: format!("{kind}-{}", self.acquisitions()),
                kind,
                enabled: AtomicBool::new(true),
                stops: AtomicUsize::new(0),
            });
            self.tracks.lock().push(track.clone());
            acquired.push(track);
        }
        Ok(acquired)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Party {
    pub id: ParticipantId,
    pub handle: SessionHandle,
    pub media: Arc<FakeMediaDevice>,
    pub backends: Arc<ScriptedBackendFactory>,
    pub events: broadcast::Receiver<CallEvent>,
}

impl Party {
    pub fn backend(&self) -> Arc<ScriptedBackend> {
        self.backends.last().expect("no backend created")
    }

    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn phases(events: &[CallEvent]) -> Vec<CallPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            CallEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

pub fn test_config() -> CallConfig {
    CallConfig {
        ice_servers: Vec::new(),
        ..Default::default()
    }
}

pub async fn join(relay: &LoopbackRelay, who: &str) -> Party {
    join_with(
        relay,
        who,
        FakeMediaDevice::new(),
        ScriptedBackendFactory::new(who),
        test_config(),
    )
    .await
}

pub async fn join_with(
    relay: &LoopbackRelay,
    who: &str,
    media: FakeMediaDevice,
    backends: ScriptedBackendFactory,
    config: CallConfig,
) -> Party {
    let media = Arc::new(media);
    let backends = Arc::new(backends);
    let deps = CallDeps {
        channel: Arc::new(relay.clone()),
        media: MediaGate::new(media.clone(), config.media_acquire_timeout),
        backends: backends.clone(),
        config,
    };
    let id = ParticipantId::new(who);
    let handle = SessionController::spawn(session(), &id, deps)
        .await
        .expect("spawn controller");
    let events = handle.subscribe_events();
    Party {
        id,
        handle,
        media,
        backends,
        events,
    }
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait for a phase with a bound so a broken machine fails instead of hanging
pub async fn reach(handle: &SessionHandle, phase: CallPhase) {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for_phase(phase))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {phase}, at {}", handle.phase()))
        .unwrap_or_else(|e| panic!("never reached {phase}: {e}"));
}
