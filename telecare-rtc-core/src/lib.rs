//! Telecare RTC - two-party telemedicine call negotiation over WebRTC
//!
//! This library establishes, maintains and tears down a peer-to-peer
//! audio/video call between a clinician and a patient. It coordinates
//! out-of-order signaling messages, trickled ICE candidates, local device
//! availability and user intents into one consistent call state per session.
//!
//! - **Actor per session**: every transition for a call is serialized on one task
//! - **Candidate buffering**: candidates arriving before the description are replayed
//! - **Deterministic glare handling**: the clinician's offer wins a collision
//! - **Unconditional cleanup**: hangup and fatal errors always release media and the link
//!
//! # Examples
//!
//! ```rust,no_run
//! use telecare_rtc_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let relay = Arc::new(LoopbackRelay::new());
//! let directory = Arc::new(StaticSessionDirectory::with_sessions([Session::instant(
//!     SessionId::new("S1"),
//!     Participant::clinician("dr-osei"),
//!     Participant::patient("pt-17"),
//! )]));
//!
//! let service = TelecareService::builder()
//!     .with_signaling(relay)
//!     .with_directory(directory)
//!     .build()?;
//!
//! let call = service
//!     .join(&SessionId::new("S1"), &ParticipantId::new("dr-osei"))
//!     .await?;
//! call.start().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// Shared call data model
pub mod types;

/// Configuration
pub mod config;

/// Participant identity and roles
pub mod identity;

/// Signaling protocol and channel abstraction
pub mod signaling;

/// Signaling transport implementations
pub mod transport;

/// Local media acquisition
pub mod media;

/// Peer link and transport backend abstraction
pub mod peer;

/// webrtc-rs peer backend
pub mod rtc;

/// Per-session call state machine
pub mod controller;

/// Session metadata lookup
pub mod directory;

/// Service orchestration
pub mod service;

/// Render boundary
pub mod view;

// Re-export main types at crate root
pub use config::{CallConfig, ConfigError, IceServerConfig, SessionServiceConfig};
pub use controller::{CallDeps, CallError, CallSnapshot, SessionController, SessionHandle};
pub use directory::{DirectoryError, HttpSessionDirectory, SessionDirectory, StaticSessionDirectory};
pub use identity::{Participant, ParticipantId, ParticipantRole};
pub use media::{
    CaptureTrack, LocalTrackSet, MediaDevice, MediaError, MediaGate, SyntheticMediaDevice,
};
pub use peer::{
    LinkState, PeerBackend, PeerBackendFactory, PeerError, PeerEvent, PeerEventSink, PeerLink,
    RemoteApply, RemoteTrack, RemoteTrackSet, SignalingState,
};
pub use rtc::{RtcBackend, RtcBackendFactory};
pub use service::{ServiceError, ServiceEvent, TelecareService, TelecareServiceBuilder};
pub use signaling::{
    SignalHandler, Signaler, SignalingChannel, SignalingError, SignalingMessage, Subscription,
};
pub use transport::LoopbackRelay;
pub use types::*;
pub use view::{drive_view, CallView};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CallConfig, IceServerConfig};
    pub use crate::controller::{CallError, CallSnapshot, SessionHandle};
    pub use crate::directory::{HttpSessionDirectory, SessionDirectory, StaticSessionDirectory};
    pub use crate::identity::{Participant, ParticipantId, ParticipantRole};
    pub use crate::media::{MediaDevice, SyntheticMediaDevice};
    pub use crate::rtc::RtcBackendFactory;
    pub use crate::service::{TelecareService, TelecareServiceBuilder};
    pub use crate::signaling::{SignalingChannel, SignalingMessage};
    pub use crate::transport::LoopbackRelay;
    pub use crate::types::{
        CallErrorKind, CallEvent, CallPhase, MediaConstraints, NegotiationStage, Session,
        SessionId,
    };
    pub use crate::view::{drive_view, CallView};
}
