//! Wire protocol.
//!
//! One JSON object per WebSocket text frame, internally tagged by `"type"`.
//! Offer, answer and candidate payloads are carried as opaque JSON values and
//! never inspected.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audio-only or audio+video. Defaults to video when a client omits it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    #[default]
    Video,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Attach (or replace) this connection's display name.
    Register {
        #[serde(alias = "username")]
        display_name: String,
    },
    /// Start a call. Any `callerInfo` the client sends is ignored; the relay
    /// attaches the caller's directory record itself.
    InitiateCall {
        #[serde(alias = "targetUserId")]
        target_id: PeerId,
        offer: Value,
        #[serde(default, alias = "callType")]
        call_kind: CallKind,
    },
    /// Accept the ringing call.
    AnswerCall { answer: Value },
    /// Decline the ringing call.
    RejectCall,
    /// Trickle a connectivity candidate to the counterpart.
    IceCandidate { candidate: Value },
    /// Hang up.
    EndCall,
    /// Media is flowing; the call is now active.
    CallConnected,
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::InitiateCall { .. } => "initiate-call",
            Self::AnswerCall { .. } => "answer-call",
            Self::RejectCall => "reject-call",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::EndCall => "end-call",
            Self::CallConnected => "call-connected",
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// First message on every connection.
    Welcome {
        id: PeerId,
        ice_servers: Vec<IceServer>,
    },
    /// Everyone the recipient can call (never includes the recipient).
    DirectoryUpdate { peers: Vec<PeerEntry> },
    IncomingCall {
        offer: Value,
        call_kind: CallKind,
        caller_info: PeerInfo,
    },
    CallAnswered { answer: Value },
    CallRejected,
    IceCandidate { candidate: Value, sender_id: PeerId },
    CallTerminated { reason: TerminationReason },
    TargetUnreachable { target_id: PeerId },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Why a call ended, as seen by the participant being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The counterpart hung up.
    Ended,
    /// The counterpart's connection went away.
    Disconnected,
    /// Nobody answered before the ringing timeout.
    NoAnswer,
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: PeerId,
    pub display_name: String,
}

/// Presence as shown in the directory. Anyone listed is online; busy peers
/// are not filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Online,
}

/// One row of a directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    pub id: PeerId,
    pub display_name: String,
    pub status: PeerStatus,
}

/// A STUN/TURN server handed to clients for NAT traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed client message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode server message: {0}")]
    Encode(#[source] serde_json::Error),
}
