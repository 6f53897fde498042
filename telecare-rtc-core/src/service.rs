//! Telecare service orchestration
//!
//! Owns the collaborators shared by every call (signaling channel, capture
//! device, peer backend factory, session directory) and spawns one session
//! controller per joined session.

use crate::config::{CallConfig, ConfigError};
use crate::controller::{CallDeps, CallError, SessionController, SessionHandle};
use crate::directory::{DirectoryError, SessionDirectory};
use crate::identity::ParticipantId;
use crate::media::{MediaDevice, MediaGate, SyntheticMediaDevice};
use crate::peer::PeerBackendFactory;
use crate::rtc::RtcBackendFactory;
use crate::signaling::SignalingChannel;
use crate::types::{CallPhase, SessionId};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Initialization error
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Session lookup failed
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Call could not be set up
    #[error("Call error: {0}")]
    Call(#[from] CallError),

    /// Too many concurrent sessions
    #[error("Session limit of {limit} reached")]
    CapacityExceeded {
        /// Configured limit
        limit: usize,
    },

    /// The participant already has a live call in this session
    #[error("Participant {participant} already active in session {session}")]
    AlreadyActive {
        /// Session
        session: SessionId,
        /// Participant
        participant: ParticipantId,
    },
}

impl From<ConfigError> for ServiceError {
    fn from(e: ConfigError) -> Self {
        Self::InitError(e.to_string())
    }
}

/// Service-level notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A controller was spawned
    SessionJoined {
        /// Session
        session_id: SessionId,
        /// Local participant
        participant: ParticipantId,
    },
    /// A controller reached a terminal phase
    SessionFinished {
        /// Session
        session_id: SessionId,
        /// Local participant
        participant: ParticipantId,
        /// `Ended` or `Failed`
        phase: CallPhase,
    },
}

type ActiveKey = (SessionId, ParticipantId);

/// Entry point for hosting telemedicine calls
pub struct TelecareService {
    deps: CallDeps,
    directory: Arc<dyn SessionDirectory>,
    active: Arc<RwLock<HashMap<ActiveKey, SessionHandle>>>,
    event_sender: broadcast::Sender<ServiceEvent>,
}

impl TelecareService {
    /// Create a builder
    #[must_use]
    pub fn builder() -> TelecareServiceBuilder {
        TelecareServiceBuilder::new()
    }

    /// Call configuration in use
    #[must_use]
    pub fn config(&self) -> &CallConfig {
        &self.deps.config
    }

    /// Join `session_id` as `participant` and spawn its controller
    ///
    /// The returned handle is idle: call `start()` to offer, or wait for the
    /// other participant's offer.
    ///
    /// # Errors
    ///
    /// Returns error if the session is unknown or invalid, the participant
    /// already has a live call there, or the session limit is reached
    #[tracing::instrument(skip(self), fields(session_id = %session_id, participant = %participant))]
    pub async fn join(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<SessionHandle, ServiceError> {
        let key = (session_id.clone(), participant.clone());
        let limit = self.deps.config.max_concurrent_sessions;
        Self::admit(&mut self.active.write(), &key, limit)?;

        let session = self.directory.fetch(session_id).await?;
        let handle = SessionController::spawn(session, participant, self.deps.clone()).await?;

        let admitted = {
            let mut active = self.active.write();
            Self::admit(&mut active, &key, limit).map(|()| {
                active.insert(key.clone(), handle.clone());
            })
        };
        if let Err(e) = admitted {
            let _ = handle.hangup().await;
            return Err(e);
        }

        let _ = self.event_sender.send(ServiceEvent::SessionJoined {
            session_id: session_id.clone(),
            participant: participant.clone(),
        });
        self.watch_session(key, handle.clone());

        tracing::info!("Session joined");
        Ok(handle)
    }

    fn admit(
        active: &mut HashMap<ActiveKey, SessionHandle>,
        key: &ActiveKey,
        limit: usize,
    ) -> Result<(), ServiceError> {
        active.retain(|_, h| !h.is_finished());
        if active.contains_key(key) {
            return Err(ServiceError::AlreadyActive {
                session: key.0.clone(),
                participant: key.1.clone(),
            });
        }
        if active.len() >= limit {
            tracing::warn!(limit, "Session limit reached");
            return Err(ServiceError::CapacityExceeded { limit });
        }
        Ok(())
    }

    fn watch_session(&self, key: ActiveKey, handle: SessionHandle) {
        let active = Arc::clone(&self.active);
        let events = self.event_sender.clone();
        tokio::spawn(async move {
            let phase = match handle.wait_finished().await {
                Ok(snapshot) => snapshot.phase,
                Err(_) => handle.phase(),
            };
            active.write().remove(&key);
            tracing::debug!(session_id = %key.0, participant = %key.1, phase = %phase, "Session finished");
            let _ = events.send(ServiceEvent::SessionFinished {
                session_id: key.0,
                participant: key.1,
                phase,
            });
        });
    }

    /// Handle of a live call
    #[must_use]
    pub fn handle(&self, session_id: &SessionId, participant: &ParticipantId) -> Option<SessionHandle> {
        self.active
            .read()
            .get(&(session_id.clone(), participant.clone()))
            .filter(|h| !h.is_finished())
            .cloned()
    }

    /// Sessions with a live controller
    #[must_use]
    pub fn active_sessions(&self) -> Vec<(SessionId, ParticipantId)> {
        let mut keys: Vec<_> = self
            .active
            .read()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Hang up every live call
    #[tracing::instrument(skip(self))]
    pub async fn hangup_all(&self) {
        let handles: Vec<SessionHandle> = self.active.read().values().cloned().collect();
        tracing::info!(calls = handles.len(), "Hanging up all calls");
        let results = join_all(handles.iter().map(SessionHandle::hangup)).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(session_id = %handle.session_id(), error = %e, "Hangup failed");
            }
        }
    }

    /// Subscribe to service events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_sender.subscribe()
    }
}

/// Telecare service builder
#[derive(Default)]
pub struct TelecareServiceBuilder {
    channel: Option<Arc<dyn SignalingChannel>>,
    directory: Option<Arc<dyn SessionDirectory>>,
    device: Option<Arc<dyn MediaDevice>>,
    backends: Option<Arc<dyn PeerBackendFactory>>,
    config: CallConfig,
}

impl TelecareServiceBuilder {
    /// Create new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signaling transport (required)
    #[must_use]
    pub fn with_signaling(mut self, channel: Arc<dyn SignalingChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Session directory (required)
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn SessionDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Capture device; defaults to [`SyntheticMediaDevice`]
    #[must_use]
    pub fn with_media_device(mut self, device: Arc<dyn MediaDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Peer backend factory; defaults to [`RtcBackendFactory`]
    #[must_use]
    pub fn with_backends(mut self, backends: Arc<dyn PeerBackendFactory>) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the service
    ///
    /// # Errors
    ///
    /// Returns error if a required collaborator is missing or the
    /// configuration is invalid
    pub fn build(self) -> Result<TelecareService, ServiceError> {
        self.config.validate()?;
        let channel = self
            .channel
            .ok_or_else(|| ServiceError::InitError("signaling channel is required".to_string()))?;
        let directory = self
            .directory
            .ok_or_else(|| ServiceError::InitError("session directory is required".to_string()))?;
        let device = self
            .device
            .unwrap_or_else(|| Arc::new(SyntheticMediaDevice::new()));
        let backends = self
            .backends
            .unwrap_or_else(|| Arc::new(RtcBackendFactory::new()));

        let (event_sender, _) = broadcast::channel(self.config.event_capacity);
        let media = MediaGate::new(device, self.config.media_acquire_timeout);
        tracing::info!(
            max_sessions = self.config.max_concurrent_sessions,
            ice_servers = self.config.ice_servers.len(),
            "Telecare service created"
        );
        Ok(TelecareService {
            deps: CallDeps {
                channel,
                media,
                backends,
                config: self.config,
            },
            directory,
            active: Arc::new(RwLock::new(HashMap::new())),
            event_sender,
        })
    }
}
