//! Session metadata lookup
//!
//! Sessions are created by the clinic's session service before either
//! participant joins. The call engine only reads them.

use crate::config::SessionServiceConfig;
use crate::types::{Session, SessionId};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use thiserror::Error;

/// Session lookup errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// No session with that id
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// Service answered with an unexpected status
    #[error("Session service returned HTTP {status}: {body}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// Response body is not a session record
    #[error("Invalid session record: {0}")]
    Decode(String),

    /// Base URL cannot carry a `/sessions/{id}` path
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Request could not be sent
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Read access to session records
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Fetch one session
    async fn fetch(&self, id: &SessionId) -> Result<Session, DirectoryError>;
}

/// Session service client: `GET {base_url}/sessions/{id}`
pub struct HttpSessionDirectory {
    client: Client,
    base_url: Url,
}

impl HttpSessionDirectory {
    /// Build a client for `config`
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is not a hierarchical URL or the HTTP
    /// client cannot be constructed
    pub fn new(config: &SessionServiceConfig) -> Result<Self, DirectoryError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| DirectoryError::InvalidBaseUrl(format!("{}: {e}", config.base_url)))?;
        base_url
            .path_segments_mut()
            .map_err(|()| DirectoryError::InvalidBaseUrl(config.base_url.clone()))?
            .pop_if_empty();
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Record URL for `id`; the id is one percent-encoded path segment
    fn session_url(&self, id: &SessionId) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push("sessions").push(id.as_str());
        }
        url
    }
}

#[async_trait]
impl SessionDirectory for HttpSessionDirectory {
    #[tracing::instrument(skip(self), fields(session_id = %id))]
    async fn fetch(&self, id: &SessionId) -> Result<Session, DirectoryError> {
        let url = self.session_url(id);
        tracing::debug!(url = %url, "Fetching session");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::info!("Session not found");
            return Err(DirectoryError::NotFound(id.clone()));
        }

        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %body, "Session lookup failed");
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let session: Session =
            serde_json::from_str(&body).map_err(|e| DirectoryError::Decode(e.to_string()))?;
        if &session.id != id {
            return Err(DirectoryError::Decode(format!(
                "requested {id}, received {}",
                session.id
            )));
        }
        tracing::debug!(participants = session.participants.len(), "Session fetched");
        Ok(session)
    }
}

/// In-memory directory for demos and tests
#[derive(Default)]
pub struct StaticSessionDirectory {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl StaticSessionDirectory {
    /// Empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-filled with `sessions`
    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        let directory = Self::new();
        for session in sessions {
            directory.insert(session);
        }
        directory
    }

    /// Add or replace a session
    pub fn insert(&self, session: Session) {
        self.sessions.write().insert(session.id.clone(), session);
    }
}

#[async_trait]
impl SessionDirectory for StaticSessionDirectory {
    async fn fetch(&self, id: &SessionId) -> Result<Session, DirectoryError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::Participant;

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let directory = StaticSessionDirectory::with_sessions([Session::instant(
            SessionId::new("S1"),
            Participant::clinician("dr"),
            Participant::patient("pt"),
        )]);
        assert!(directory.fetch(&SessionId::new("S1")).await.is_ok());
        assert!(matches!(
            directory.fetch(&SessionId::new("S2")).await,
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let directory = HttpSessionDirectory::new(&SessionServiceConfig {
            base_url: "http://clinic.local/api/telemedicine/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(directory.base_url(), "http://clinic.local/api/telemedicine");
    }

    #[test]
    fn test_session_id_is_one_path_segment() {
        let directory = HttpSessionDirectory::new(&SessionServiceConfig {
            base_url: "http://clinic.local/api/telemedicine".to_string(),
            ..Default::default()
        })
        .unwrap();
        let url = directory.session_url(&SessionId::new("ward 3/a?b#c"));
        assert_eq!(
            url.as_str(),
            "http://clinic.local/api/telemedicine/sessions/ward%203%2Fa%3Fb%23c"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_opaque_base_url_rejected() {
        let result = HttpSessionDirectory::new(&SessionServiceConfig {
            base_url: "mailto:clinic@example.org".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(DirectoryError::InvalidBaseUrl(_))));
    }
}
