//! Participant identity
//!
//! A call always has exactly two parties: a clinician and a patient. The role
//! is carried alongside the identifier so the negotiation layer can break
//! offer collisions deterministically.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Opaque identifier of a call participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create a new participant identifier
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Role of a participant in a telemedicine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Care provider
    Clinician,
    /// Person receiving care
    Patient,
}

impl ParticipantRole {
    /// Whether this role's offer wins an offer collision against `other`.
    ///
    /// Clinician offers always win; equal roles never outrank each other.
    #[must_use]
    pub fn outranks(self, other: ParticipantRole) -> bool {
        matches!(
            (self, other),
            (ParticipantRole::Clinician, ParticipantRole::Patient)
        )
    }
}

impl Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clinician => write!(f, "clinician"),
            Self::Patient => write!(f, "patient"),
        }
    }
}

/// A role-tagged participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identifier
    pub id: ParticipantId,
    /// Participant role
    pub role: ParticipantRole,
}

impl Participant {
    /// Create a clinician participant
    pub fn clinician(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            role: ParticipantRole::Clinician,
        }
    }

    /// Create a patient participant
    pub fn patient(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            role: ParticipantRole::Patient,
        }
    }
}

impl Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.role)
    }
}
