//! Opaque connection identity.
//!
//! Every live connection gets a `PeerId` when its transport connects. The id
//! is the only thing the relay routes by; display names are never used to
//! address anyone. Clients echo ids back (e.g. as a call target), so ids are
//! also parsed from untrusted input, where the only requirement is that the
//! token is non-empty.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of one live connection, unique for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Mint a fresh random identity for a new connection.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PeerIdError::Empty);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PeerId {
    type Error = PeerIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err(PeerIdError::Empty);
        }
        Ok(Self(s))
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

/// Error parsing a peer identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerIdError {
    #[error("peer id cannot be empty")]
    Empty,
}
