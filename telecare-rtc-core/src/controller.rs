//! Session controller
//!
//! One controller drives one call. It runs as an actor: a tokio task drains a
//! single queue holding user commands, inbound signaling messages, peer link
//! events and timer expiries, so no two transitions for a session are ever in
//! flight at once. Separate sessions run on separate tasks.
//!
//! ```text
//! Idle -> Initializing -> Negotiating(OfferSent | AnswerPending) -> Connected
//!                                   \______________ Ending -> Ended
//! any non-terminal -> Failed
//! ```

use crate::config::{CallConfig, ConfigError};
use crate::identity::{Participant, ParticipantId, ParticipantRole};
use crate::media::{LocalTrackSet, MediaGate};
use crate::peer::{
    LinkState, PeerBackendFactory, PeerEvent, PeerEventSink, PeerLink, RemoteApply,
    RemoteTrackSet,
};
use crate::signaling::{SignalHandler, SignalingChannel, SignalingError, SignalingMessage, Signaler, Subscription};
use crate::types::{
    CallErrorKind, CallEvent, CallFailure, CallPhase, IceCandidate, MediaKind, NegotiationStage,
    Session, SessionDescription, SessionError, SessionId,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Call control errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Operation not allowed in the current phase
    #[error("Cannot {operation} while {phase}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Phase at the time
        phase: CallPhase,
    },

    /// The call already reached `Ended` or `Failed`
    #[error("Call already terminated")]
    Terminated,

    /// The call failed while handling the request
    #[error("Call failed: {0}")]
    Failed(CallFailure),

    /// Signaling room error
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid session record
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Collaborators shared by every call of a service
#[derive(Clone)]
pub struct CallDeps {
    /// Signaling transport
    pub channel: Arc<dyn SignalingChannel>,
    /// Local media access
    pub media: MediaGate,
    /// Peer connection factory
    pub backends: Arc<dyn PeerBackendFactory>,
    /// Call configuration
    pub config: CallConfig,
}

/// Point-in-time view of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    /// Session
    pub session_id: SessionId,
    /// Current phase
    pub phase: CallPhase,
    /// Microphone muted by the user
    pub muted: bool,
    /// Camera turned off by the user
    pub video_off: bool,
    /// Candidates waiting for a remote description
    pub pending_candidates: usize,
    /// Local media currently held
    pub has_local_media: bool,
    /// Remote tracks are available for rendering
    pub has_remote_media: bool,
    /// Current peer link
    pub link_id: Option<Uuid>,
    /// Peer links constructed by this controller
    pub links_created: u64,
    /// Most recent error
    pub last_error: Option<CallFailure>,
}

enum Input {
    Start(oneshot::Sender<Result<(), CallError>>),
    Hangup(oneshot::Sender<Result<(), CallError>>),
    SetMuted(bool),
    SetVideoOff(bool),
    Signal(SignalingMessage),
    Peer { generation: u64, event: PeerEvent },
    NegotiationTimeout { generation: u64 },
    DisconnectGrace { generation: u64 },
}

/// Drives one call through its lifecycle
pub struct SessionController {
    session: Session,
    local: Participant,
    remote_role: ParticipantRole,
    config: CallConfig,
    signaler: Signaler,
    media: MediaGate,
    backends: Arc<dyn PeerBackendFactory>,
    tx: mpsc::UnboundedSender<Input>,
    subscription: Option<Subscription>,

    phase: CallPhase,
    muted: bool,
    video_off: bool,
    local_media: Option<LocalTrackSet>,
    link: Option<PeerLink>,
    links_created: u64,
    remote_media: Option<Weak<RemoteTrackSet>>,
    pending_candidates: Vec<IceCandidate>,
    last_error: Option<CallFailure>,

    negotiation_timer: Option<JoinHandle<()>>,
    grace_timer: Option<JoinHandle<()>>,

    events: broadcast::Sender<CallEvent>,
    snapshot: watch::Sender<CallSnapshot>,
}

impl SessionController {
    /// Join the session room as `local` and start the controller task
    ///
    /// # Errors
    ///
    /// Returns error if the configuration or session record is invalid,
    /// `local` is not a participant, or the room rejects the join
    #[tracing::instrument(skip(session, deps), fields(session_id = %session.id))]
    pub async fn spawn(
        session: Session,
        local: &ParticipantId,
        deps: CallDeps,
    ) -> Result<SessionHandle, CallError> {
        deps.config.validate()?;
        session.validate()?;
        let not_a_participant = || SessionError::NotAParticipant {
            session: session.id.clone(),
            participant: local.clone(),
        };
        let local = session
            .participant(local)
            .cloned()
            .ok_or_else(not_a_participant)?;
        let remote_role = session
            .counterpart(&local.id)
            .map(|p| p.role)
            .ok_or_else(not_a_participant)?;

        let signaler = Signaler::new(deps.channel, session.id.clone(), local.id.clone());

        // Subscribe before joining: a rejected duplicate must not evict the
        // participant's live controller from the room.
        let (tx, rx) = mpsc::unbounded_channel();
        let signal_tx = tx.clone();
        let handler: SignalHandler = Arc::new(move |message| {
            let _ = signal_tx.send(Input::Signal(message));
        });
        let subscription = signaler.subscribe(handler)?;
        if let Err(e) = signaler.join().await {
            subscription.unsubscribe();
            return Err(e.into());
        }

        let (events, _) = broadcast::channel(deps.config.event_capacity);
        let initial = CallSnapshot {
            session_id: session.id.clone(),
            phase: CallPhase::Idle,
            muted: false,
            video_off: false,
            pending_candidates: 0,
            has_local_media: false,
            has_remote_media: false,
            link_id: None,
            links_created: 0,
            last_error: None,
        };
        let (snapshot, snapshot_rx) = watch::channel(initial);

        let handle = SessionHandle {
            session_id: session.id.clone(),
            local: local.clone(),
            tx: tx.clone(),
            events: events.clone(),
            snapshot: snapshot_rx,
        };

        tracing::info!(participant = %local, "Session controller started");
        let controller = SessionController {
            session,
            local,
            remote_role,
            config: deps.config,
            signaler,
            media: deps.media,
            backends: deps.backends,
            tx,
            subscription: Some(subscription),
            phase: CallPhase::Idle,
            muted: false,
            video_off: false,
            local_media: None,
            link: None,
            links_created: 0,
            remote_media: None,
            pending_candidates: Vec::new(),
            last_error: None,
            negotiation_timer: None,
            grace_timer: None,
            events,
            snapshot,
        };
        tokio::spawn(controller.run(rx));
        Ok(handle)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = rx.recv().await {
            self.handle(input).await;
            self.publish();
            if self.phase.is_terminal() {
                break;
            }
        }

        rx.close();
        while let Ok(input) = rx.try_recv() {
            match input {
                Input::Start(reply) => {
                    let _ = reply.send(Err(CallError::Terminated));
                }
                Input::Hangup(reply) => {
                    let _ = reply.send(Ok(()));
                }
                _ => {}
            }
        }
        tracing::debug!(session_id = %self.session.id, phase = %self.phase, "Session controller stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Start(reply) => {
                let result = self.on_start().await;
                let _ = reply.send(result);
            }
            Input::Hangup(reply) => {
                self.on_hangup().await;
                let _ = reply.send(Ok(()));
            }
            Input::SetMuted(muted) => self.on_set_muted(muted),
            Input::SetVideoOff(off) => self.on_set_video_off(off),
            Input::Signal(message) => self.on_signal(message).await,
            Input::Peer { generation, event } => {
                if generation != self.links_created {
                    tracing::trace!(generation, "Dropping event from stale peer link");
                    return;
                }
                self.on_peer_event(event).await;
            }
            Input::NegotiationTimeout { generation } => {
                if generation == self.links_created && self.phase.is_negotiating() {
                    let detail = format!(
                        "negotiation did not complete within {:?}",
                        self.config.negotiation_timeout
                    );
                    self.fail(CallFailure::new(CallErrorKind::Timeout, detail))
                        .await;
                }
            }
            Input::DisconnectGrace { generation } => {
                let still_down = self
                    .link
                    .as_ref()
                    .is_some_and(|link| link.state() == LinkState::Disconnected);
                if generation == self.links_created && self.phase == CallPhase::Connected && still_down {
                    self.fail(CallFailure::new(
                        CallErrorKind::ConnectionLost,
                        "connection did not recover",
                    ))
                    .await;
                }
            }
        }
    }

    async fn on_start(&mut self) -> Result<(), CallError> {
        if self.phase.is_terminal() {
            return Err(CallError::Terminated);
        }
        if self.phase != CallPhase::Idle {
            return Err(CallError::InvalidState {
                operation: "start",
                phase: self.phase,
            });
        }

        self.transition(CallPhase::Initializing);
        let polite = self.remote_role.outranks(self.local.role);
        if let Err(failure) = self.prepare_link(polite).await {
            self.fail(failure.clone()).await;
            return Err(CallError::Failed(failure));
        }

        let offer = match self.link.as_mut() {
            Some(link) => link.create_offer().await,
            None => return Err(CallError::Terminated),
        };
        let offer = match offer {
            Ok(offer) => offer,
            Err(e) => {
                let failure = CallFailure::new(CallErrorKind::NegotiationError, e.to_string());
                self.fail(failure.clone()).await;
                return Err(CallError::Failed(failure));
            }
        };

        self.transition(CallPhase::Negotiating(NegotiationStage::OfferSent));
        self.arm_negotiation_timer();
        self.send_description(offer).await;
        Ok(())
    }

    /// Acquire media, build a fresh link and attach the tracks to it
    async fn prepare_link(&mut self, polite: bool) -> Result<(), CallFailure> {
        let set = self
            .media
            .acquire(self.config.constraints)
            .await
            .map_err(|e| CallFailure::new(CallErrorKind::DeviceUnavailable, e.to_string()))?;
        if self.muted {
            self.media.set_track_enabled(&set, MediaKind::Audio, false);
        }
        if self.video_off {
            self.media.set_track_enabled(&set, MediaKind::Video, false);
        }
        self.emit(CallEvent::LocalMedia(set.info()));
        self.local_media = Some(set);

        self.links_created += 1;
        let generation = self.links_created;
        let tx = self.tx.clone();
        let sink: PeerEventSink = Arc::new(move |event| {
            let _ = tx.send(Input::Peer { generation, event });
        });
        let backend = self
            .backends
            .create(&self.config.ice_servers, sink)
            .await
            .map_err(|e| CallFailure::new(CallErrorKind::NegotiationError, e.to_string()))?;

        let mut link = PeerLink::new(backend, polite);
        let attached = match self.local_media.as_ref() {
            Some(set) => link.attach_local_tracks(set).await,
            None => Ok(0),
        };
        self.link = Some(link);
        attached
            .map(|_| ())
            .map_err(|e| CallFailure::new(CallErrorKind::NegotiationError, e.to_string()))
    }

    async fn on_hangup(&mut self) {
        if self.phase.is_terminal() {
            tracing::debug!(session_id = %self.session.id, "Hangup on finished call ignored");
            return;
        }
        tracing::info!(session_id = %self.session.id, phase = %self.phase, "Local hangup");
        self.end(true, Some("hangup".to_string())).await;
    }

    fn on_set_muted(&mut self, muted: bool) {
        if self.phase.is_terminal() || self.muted == muted {
            return;
        }
        self.muted = muted;
        if let Some(set) = self.local_media.as_ref() {
            self.media.set_track_enabled(set, MediaKind::Audio, !muted);
        }
        self.emit(CallEvent::MuteChanged(muted));
    }

    fn on_set_video_off(&mut self, off: bool) {
        if self.phase.is_terminal() || self.video_off == off {
            return;
        }
        self.video_off = off;
        if let Some(set) = self.local_media.as_ref() {
            self.media.set_track_enabled(set, MediaKind::Video, !off);
        }
        self.emit(CallEvent::VideoOffChanged(off));
    }

    async fn on_signal(&mut self, message: SignalingMessage) {
        if message.session_id() != &self.session.id {
            tracing::debug!(session_id = %self.session.id, other = %message.session_id(), "Message for another session ignored");
            return;
        }
        tracing::debug!(session_id = %self.session.id, kind = message.kind(), phase = %self.phase, "Signal received");
        match message {
            SignalingMessage::Offer { sdp, .. } => {
                self.on_remote_offer(SessionDescription::offer(sdp)).await;
            }
            SignalingMessage::Answer { sdp, .. } => {
                self.on_remote_answer(SessionDescription::answer(sdp)).await;
            }
            SignalingMessage::Candidate { candidate, .. } => {
                self.on_remote_candidate(candidate).await;
            }
            SignalingMessage::Leave { reason, .. } => self.on_remote_leave(reason).await,
        }
    }

    async fn on_remote_offer(&mut self, offer: SessionDescription) {
        match self.phase {
            CallPhase::Idle => {
                self.transition(CallPhase::Initializing);
                let polite = self.remote_role.outranks(self.local.role);
                if let Err(failure) = self.prepare_link(polite).await {
                    self.fail(failure).await;
                    return;
                }
                self.transition(CallPhase::Negotiating(NegotiationStage::AnswerPending));
                self.arm_negotiation_timer();
                self.answer(offer).await;
            }
            CallPhase::Negotiating(_) | CallPhase::Connected => self.answer(offer).await,
            _ => {
                tracing::debug!(session_id = %self.session.id, phase = %self.phase, "Offer ignored");
            }
        }
    }

    /// Apply a remote offer, replay buffered candidates and reply
    async fn answer(&mut self, offer: SessionDescription) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.accept_remote_description(&offer).await {
            Ok(RemoteApply::IgnoredGlare) => return,
            Ok(RemoteApply::AppliedAfterRollback) => {
                self.transition(CallPhase::Negotiating(NegotiationStage::AnswerPending));
            }
            Ok(RemoteApply::Applied) => {}
            Err(e) => {
                self.fail(CallFailure::new(CallErrorKind::NegotiationError, e.to_string()))
                    .await;
                return;
            }
        }
        self.drain_pending_candidates().await;

        let answer = match self.link.as_mut() {
            Some(link) => link.create_answer().await,
            None => return,
        };
        match answer {
            Ok(answer) => self.send_description(answer).await,
            Err(e) => {
                self.fail(CallFailure::new(CallErrorKind::NegotiationError, e.to_string()))
                    .await;
            }
        }
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        if self.phase.is_terminal() || self.phase == CallPhase::Ending {
            return;
        }
        let Some(link) = self.link.as_mut() else {
            tracing::debug!(session_id = %self.session.id, phase = %self.phase, "Answer without a local offer ignored");
            return;
        };
        if let Err(e) = link.accept_remote_description(&answer).await {
            self.fail(CallFailure::new(CallErrorKind::NegotiationError, e.to_string()))
                .await;
            return;
        }
        self.drain_pending_candidates().await;
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.phase.is_terminal() || self.phase == CallPhase::Ending {
            return;
        }
        match self.link.as_ref() {
            Some(link) if link.has_remote_description() => {
                link.add_remote_candidate(&candidate).await;
            }
            _ => {
                self.pending_candidates.push(candidate);
                tracing::debug!(
                    session_id = %self.session.id,
                    pending = self.pending_candidates.len(),
                    "Candidate buffered until remote description"
                );
            }
        }
    }

    async fn drain_pending_candidates(&mut self) {
        let Some(link) = self.link.as_ref() else {
            return;
        };
        if self.pending_candidates.is_empty() || !link.has_remote_description() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_candidates);
        for candidate in &pending {
            link.add_remote_candidate(candidate).await;
        }
        tracing::debug!(session_id = %self.session.id, drained = pending.len(), "Buffered candidates replayed");
    }

    async fn on_remote_leave(&mut self, reason: Option<String>) {
        match self.phase {
            CallPhase::Negotiating(_) | CallPhase::Connected => {
                tracing::info!(session_id = %self.session.id, reason = ?reason, "Remote participant left");
                self.end(false, None).await;
            }
            _ => {
                tracing::debug!(session_id = %self.session.id, phase = %self.phase, "Leave ignored");
            }
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        if self.phase.is_terminal() || self.phase == CallPhase::Ending {
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.signaler.send_candidate(candidate).await {
                    self.report_transport_error(e);
                }
            }
            PeerEvent::GatheringComplete => {
                tracing::debug!(session_id = %self.session.id, "Candidate gathering complete");
            }
            PeerEvent::RemoteTrack(track) => {
                let Some(link) = self.link.as_ref() else {
                    return;
                };
                if link.register_remote_track(track) {
                    let tracks = link.remote_tracks();
                    self.remote_media = Some(Arc::downgrade(&tracks));
                    self.emit(CallEvent::RemoteMedia(tracks));
                }
            }
            PeerEvent::ConnectionState(state) => self.on_link_state(state).await,
        }
    }

    async fn on_link_state(&mut self, state: LinkState) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.note_state(state).is_none() {
            return;
        }
        match state {
            LinkState::Connected => {
                cancel(&mut self.grace_timer);
                if self.phase.is_negotiating() {
                    cancel(&mut self.negotiation_timer);
                    self.transition(CallPhase::Connected);
                }
            }
            LinkState::Disconnected => {
                if self.phase == CallPhase::Connected {
                    tracing::warn!(session_id = %self.session.id, grace = ?self.config.disconnect_grace, "Peer link disconnected");
                    let input = Input::DisconnectGrace {
                        generation: self.links_created,
                    };
                    cancel(&mut self.grace_timer);
                    self.grace_timer = Some(self.schedule(self.config.disconnect_grace, input));
                }
            }
            LinkState::Failed | LinkState::Closed => {
                let kind = if self.phase == CallPhase::Connected {
                    CallErrorKind::ConnectionLost
                } else {
                    CallErrorKind::NegotiationError
                };
                let detail = if state == LinkState::Failed {
                    "peer connection failed"
                } else {
                    "peer connection closed"
                };
                self.fail(CallFailure::new(kind, detail)).await;
            }
            LinkState::New | LinkState::Connecting => {}
        }
    }

    async fn send_description(&mut self, description: SessionDescription) {
        if let Err(e) = self.signaler.send_description(description).await {
            self.report_transport_error(e);
        }
    }

    fn report_transport_error(&mut self, error: SignalingError) {
        let failure = CallFailure::new(CallErrorKind::TransportError, error.to_string());
        self.emit(CallEvent::Error {
            kind: failure.kind,
            detail: failure.detail.clone(),
        });
        self.last_error = Some(failure);
    }

    fn arm_negotiation_timer(&mut self) {
        let input = Input::NegotiationTimeout {
            generation: self.links_created,
        };
        cancel(&mut self.negotiation_timer);
        self.negotiation_timer = Some(self.schedule(self.config.negotiation_timeout, input));
    }

    fn schedule(&self, after: Duration, input: Input) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(input);
        })
    }

    /// Orderly teardown through `Ending`
    async fn end(&mut self, notify_remote: bool, reason: Option<String>) {
        self.transition(CallPhase::Ending);
        self.cleanup(notify_remote, reason).await;
        self.transition(CallPhase::Ended);
    }

    /// Teardown after an unrecoverable error
    ///
    /// Resources are released before the error is published; the error is
    /// published before the terminal phase.
    async fn fail(&mut self, failure: CallFailure) {
        if self.phase.is_terminal() {
            return;
        }
        tracing::warn!(session_id = %self.session.id, phase = %self.phase, kind = ?failure.kind, detail = %failure.detail, "Call failed");
        self.cleanup(true, Some(failure.kind.to_string())).await;
        self.emit(CallEvent::Error {
            kind: failure.kind,
            detail: failure.detail.clone(),
        });
        self.last_error = Some(failure);
        self.transition(CallPhase::Failed);
    }

    /// Release everything the call holds; never fails
    async fn cleanup(&mut self, notify_remote: bool, reason: Option<String>) {
        cancel(&mut self.negotiation_timer);
        cancel(&mut self.grace_timer);

        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if notify_remote {
            let _ = self.signaler.send_leave(reason).await;
        }
        if let Some(set) = self.local_media.take() {
            self.media.release(&set);
        }
        if let Some(link) = self.link.as_mut() {
            link.close().await;
        }
        self.remote_media = None;
        self.pending_candidates.clear();
        if let Err(e) = self.signaler.leave().await {
            tracing::warn!(session_id = %self.session.id, error = %e, "Leaving session room failed");
        }
    }

    fn transition(&mut self, to: CallPhase) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;
        tracing::info!(session_id = %self.session.id, old_state = ?from, new_state = ?to, "Call phase changed");
        self.emit(CallEvent::PhaseChanged { from, to });
        self.publish();
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.snapshot.send_replace(CallSnapshot {
            session_id: self.session.id.clone(),
            phase: self.phase,
            muted: self.muted,
            video_off: self.video_off,
            pending_candidates: self.pending_candidates.len(),
            has_local_media: self.local_media.is_some(),
            has_remote_media: self
                .remote_media
                .as_ref()
                .and_then(Weak::upgrade)
                .is_some_and(|tracks| !tracks.is_empty()),
            link_id: self.link.as_ref().map(PeerLink::id),
            links_created: self.links_created,
            last_error: self.last_error.clone(),
        });
    }
}

fn cancel(timer: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = timer.take() {
        handle.abort();
    }
}

/// Cloneable handle used by views and services to drive a call
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    local: Participant,
    tx: mpsc::UnboundedSender<Input>,
    events: broadcast::Sender<CallEvent>,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl SessionHandle {
    /// Session this call belongs to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Local participant
    #[must_use]
    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Initiate the call by sending an offer
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless idle, `Failed` if media or negotiation
    /// setup fails, `Terminated` if the call already ended
    pub async fn start(&self) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Start(reply))
            .map_err(|_| CallError::Terminated)?;
        rx.await.map_err(|_| CallError::Terminated)?
    }

    /// End the call; succeeds on an already finished call
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for transports with async teardown
    pub async fn hangup(&self) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Input::Hangup(reply)).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Mute or unmute the microphone
    ///
    /// # Errors
    ///
    /// Returns `Terminated` if the call already ended
    pub fn set_muted(&self, muted: bool) -> Result<(), CallError> {
        self.tx
            .send(Input::SetMuted(muted))
            .map_err(|_| CallError::Terminated)
    }

    /// Turn the camera off or on
    ///
    /// # Errors
    ///
    /// Returns `Terminated` if the call already ended
    pub fn set_video_off(&self, off: bool) -> Result<(), CallError> {
        self.tx
            .send(Input::SetVideoOff(off))
            .map_err(|_| CallError::Terminated)
    }

    /// Latest published state
    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        self.snapshot.borrow().phase
    }

    /// Whether the call reached `Ended` or `Failed`
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Wait until the published state satisfies `predicate`
    ///
    /// # Errors
    ///
    /// Returns `Terminated` if the controller stopped without satisfying it
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&CallSnapshot) -> bool,
    ) -> Result<CallSnapshot, CallError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| CallError::Terminated)?;
        Ok(snapshot.clone())
    }

    /// Wait until the call reaches `phase`
    ///
    /// # Errors
    ///
    /// Returns `Terminated` if the controller stopped in another phase
    pub async fn wait_for_phase(&self, phase: CallPhase) -> Result<CallSnapshot, CallError> {
        self.wait_for(|s| s.phase == phase).await
    }

    /// Wait until the call is over
    ///
    /// # Errors
    ///
    /// Returns `Terminated` if the controller vanished before publishing a
    /// terminal phase
    pub async fn wait_finished(&self) -> Result<CallSnapshot, CallError> {
        self.wait_for(|s| s.phase.is_terminal()).await
    }

    /// Subscribe to call events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("local", &self.local)
            .field("phase", &self.phase())
            .finish()
    }
}
