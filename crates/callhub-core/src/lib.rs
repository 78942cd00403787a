//! Core of the callhub signaling relay.
//!
//! This crate knows nothing about sockets. It provides the wire protocol,
//! the live-peer [`Directory`] and the [`Switchboard`], which routes call
//! negotiation between exactly two connections and keeps their call states
//! consistent. The server crate wraps a switchboard behind a lock and carries
//! out the [`Effect`]s it returns.

mod directory;
mod identity;
pub mod protocol;
mod switchboard;

pub use directory::Directory;
pub use identity::{PeerId, PeerIdError};
pub use protocol::{
    CallKind, ClientMessage, IceServer, PeerEntry, PeerInfo, PeerStatus, ProtocolError,
    ServerMessage, TerminationReason,
};
pub use switchboard::{CallId, CallPhase, CallState, Effect, Link, Switchboard};
