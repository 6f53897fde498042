//! Call engine configuration

use crate::types::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field has an unusable value
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (`stun:` / `turn:`)
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default)]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// A credential-less STUN server
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Per-call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// ICE servers handed to every peer link
    pub ice_servers: Vec<IceServerConfig>,
    /// Local capture constraints
    pub constraints: MediaConstraints,
    /// Upper bound for `Negotiating` before the call fails with a timeout
    pub negotiation_timeout: Duration,
    /// How long a `disconnected` link may take to self-heal
    pub disconnect_grace: Duration,
    /// Upper bound for local media acquisition
    pub media_acquire_timeout: Duration,
    /// Capacity of the per-call event broadcast channel
    pub event_capacity: usize,
    /// Maximum number of concurrently active sessions per service
    pub max_concurrent_sessions: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            constraints: MediaConstraints::video_call(),
            negotiation_timeout: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(10),
            media_acquire_timeout: Duration::from_secs(15),
            event_capacity: 100,
            max_concurrent_sessions: 10,
        }
    }
}

impl CallConfig {
    /// Check that timeouts and capacities are usable
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |field: &'static str| ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        };
        if self.negotiation_timeout.is_zero() {
            return Err(zero("negotiation_timeout"));
        }
        if self.disconnect_grace.is_zero() {
            return Err(zero("disconnect_grace"));
        }
        if self.media_acquire_timeout.is_zero() {
            return Err(zero("media_acquire_timeout"));
        }
        if self.event_capacity == 0 {
            return Err(zero("event_capacity"));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(zero("max_concurrent_sessions"));
        }
        if !self.constraints.audio && !self.constraints.video {
            return Err(ConfigError::Invalid {
                field: "constraints",
                reason: "at least one of audio or video is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Session metadata service endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionServiceConfig {
    /// Base URL, e.g. `https://clinic.example/api/telemedicine`
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/telemedicine".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.event_capacity, 100);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = CallConfig {
            negotiation_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "negotiation_timeout",
                ..
            })
        ));
    }

    #[test]
    fn test_no_media_rejected() {
        let config = CallConfig {
            constraints: MediaConstraints {
                audio: false,
                video: false,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "ice_servers": [{"urls": ["turn:turn.example:3478"], "username": "u", "credential": "c"}],
            "constraints": {"audio": true, "video": false},
            "negotiation_timeout": {"secs": 5, "nanos": 0},
            "disconnect_grace": {"secs": 2, "nanos": 0},
            "media_acquire_timeout": {"secs": 3, "nanos": 0},
            "event_capacity": 16,
            "max_concurrent_sessions": 2
        }"#;
        let config: CallConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.negotiation_timeout, Duration::from_secs(5));
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
        assert!(config.validate().is_ok());
    }
}
