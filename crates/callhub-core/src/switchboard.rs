//! Call routing and the per-connection call state machine.
//!
//! The switchboard owns the directory and one call state per live
//! connection. It performs no I/O: every operation returns the effects the
//! caller must carry out (deliveries and timers), so the whole state machine
//! can be driven and checked synchronously.
//!
//! A call exists only as a pair of mutual links: each participant's state
//! stores the counterpart's id, never a handle to it. A message is routed by
//! the sender's current link, so there is no call id on the wire and a
//! connection can be in at most one call.

use crate::directory::Directory;
use crate::protocol::{CallKind, ClientMessage, PeerInfo, ServerMessage, TerminationReason};
use crate::PeerId;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Internal call number, used to tell a stale ringing timer from the call
/// that currently occupies a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// One side's view of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub peer: PeerId,
    pub kind: CallKind,
    pub call: CallId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// Ringing, outbound: we placed the call and wait for an answer.
    Calling(Link),
    /// Ringing, inbound: someone is calling us.
    Ringing(Link),
    /// Answer relayed, media negotiation under way.
    Connecting(Link),
    Active(Link),
}

impl CallState {
    pub fn link(&self) -> Option<&Link> {
        match self {
            Self::Idle => None,
            Self::Calling(l) | Self::Ringing(l) | Self::Connecting(l) | Self::Active(l) => Some(l),
        }
    }

    pub fn phase(&self) -> CallPhase {
        match self {
            Self::Idle => CallPhase::Idle,
            Self::Calling(_) => CallPhase::Calling,
            Self::Ringing(_) => CallPhase::Ringing,
            Self::Connecting(_) => CallPhase::Connecting,
            Self::Active(_) => CallPhase::Active,
        }
    }

    fn is_ringing(&self) -> bool {
        matches!(self, Self::Calling(_) | Self::Ringing(_))
    }
}

/// Call state without the link payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Calling,
    Ringing,
    Connecting,
    Active,
}

/// Something the owner of the switchboard has to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver `message` to the connection `to`. Delivery is best effort.
    Send { to: PeerId, message: ServerMessage },
    /// Call [`Switchboard::expire_ringing`] for `call` once the ringing
    /// timeout has elapsed.
    ArmRingTimer { call: CallId },
    /// `call` stopped ringing; its timer can be dropped.
    CancelRingTimer { call: CallId },
}

impl Effect {
    fn send(to: &PeerId, message: ServerMessage) -> Self {
        Self::Send {
            to: to.clone(),
            message,
        }
    }
}

#[derive(Debug, Default)]
pub struct Switchboard {
    directory: Directory,
    lines: HashMap<PeerId, CallState>,
    next_call: u64,
}

impl Switchboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the directory.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn is_connected(&self, id: &PeerId) -> bool {
        self.lines.contains_key(id)
    }

    pub fn connection_count(&self) -> usize {
        self.lines.len()
    }

    pub fn state(&self, id: &PeerId) -> Option<&CallState> {
        self.lines.get(id)
    }

    pub fn phase(&self, id: &PeerId) -> Option<CallPhase> {
        self.lines.get(id).map(CallState::phase)
    }

    pub fn counterpart(&self, id: &PeerId) -> Option<&PeerId> {
        self.lines.get(id).and_then(CallState::link).map(|l| &l.peer)
    }

    /// A transport connected. The newcomer gets the current directory.
    pub fn connect(&mut self, id: &PeerId) -> Vec<Effect> {
        self.lines.insert(id.clone(), CallState::Idle);
        vec![Effect::send(
            id,
            ServerMessage::DirectoryUpdate {
                peers: self.directory.snapshot_excluding(id),
            },
        )]
    }

    /// A transport went away: hang up its call, delist it and tell everyone.
    pub fn disconnect(&mut self, id: &PeerId) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(state) = self.lines.remove(id) else {
            return effects;
        };

        if let Some(link) = state.link() {
            tracing::info!("{} disconnected during {}, notifying {}", id, link.call, link.peer);
            if state.is_ringing() {
                effects.push(Effect::CancelRingTimer { call: link.call });
            }
            if self.release(&link.peer, id, link.call) {
                effects.push(Effect::send(
                    &link.peer,
                    ServerMessage::CallTerminated {
                        reason: TerminationReason::Disconnected,
                    },
                ));
            }
        }

        if self.directory.remove(id).is_some() {
            self.broadcast_directory(&mut effects);
        }
        effects
    }

    /// Route one client message from `from`.
    pub fn handle(&mut self, from: &PeerId, msg: ClientMessage) -> Vec<Effect> {
        if !self.lines.contains_key(from) {
            tracing::debug!("{} from unknown connection {}", msg.kind(), from);
            return Vec::new();
        }

        match msg {
            ClientMessage::Register { display_name } => self.register(from, display_name),
            ClientMessage::InitiateCall {
                target_id,
                offer,
                call_kind,
            } => self.initiate(from, target_id, offer, call_kind),
            ClientMessage::AnswerCall { answer } => self.answer(from, answer),
            ClientMessage::RejectCall => self.reject(from),
            ClientMessage::IceCandidate { candidate } => self.relay_candidate(from, candidate),
            ClientMessage::EndCall => self.end(from),
            ClientMessage::CallConnected => self.mark_active(from),
        }
    }

    /// Ringing timeout for `call`. Does nothing if the call was answered,
    /// rejected or ended in the meantime.
    pub fn expire_ringing(&mut self, call: CallId) -> Vec<Effect> {
        let caller = self.lines.iter().find_map(|(id, state)| match state {
            CallState::Calling(link) if link.call == call => Some((id.clone(), link.peer.clone())),
            _ => None,
        });
        let Some((caller, callee)) = caller else {
            return Vec::new();
        };

        tracing::info!("{} between {} and {} was not answered", call, caller, callee);
        self.lines.insert(caller.clone(), CallState::Idle);
        let mut effects = vec![Effect::send(
            &caller,
            ServerMessage::CallTerminated {
                reason: TerminationReason::NoAnswer,
            },
        )];
        if self.release(&callee, &caller, call) {
            effects.push(Effect::send(
                &callee,
                ServerMessage::CallTerminated {
                    reason: TerminationReason::NoAnswer,
                },
            ));
        }
        effects
    }

    /// Forget every connection and directory entry.
    pub fn shutdown(&mut self) {
        self.lines.clear();
        self.directory.clear();
    }

    fn register(&mut self, from: &PeerId, display_name: String) -> Vec<Effect> {
        tracing::info!("{} registered as {:?}", from, display_name);
        self.directory.register(from, display_name);
        let mut effects = Vec::new();
        self.broadcast_directory(&mut effects);
        effects
    }

    fn initiate(
        &mut self,
        from: &PeerId,
        target: PeerId,
        offer: Value,
        kind: CallKind,
    ) -> Vec<Effect> {
        if self.phase(from) != Some(CallPhase::Idle) {
            tracing::debug!("{} is already in a call, ignoring initiate-call", from);
            return Vec::new();
        }
        let Some(caller_name) = self.directory.lookup(from) else {
            tracing::debug!("{} has not registered, ignoring initiate-call", from);
            return Vec::new();
        };
        if &target == from {
            tracing::debug!("{} tried to call itself", from);
            return Vec::new();
        }

        let target_phase = self.phase(&target);
        if !self.directory.contains(&target) || target_phase.is_none() {
            tracing::info!("{} called unreachable {}", from, target);
            return vec![Effect::send(
                from,
                ServerMessage::TargetUnreachable { target_id: target },
            )];
        }
        if target_phase != Some(CallPhase::Idle) {
            tracing::debug!("{} is busy, dropping call from {}", target, from);
            return Vec::new();
        }

        let call = CallId(self.next_call);
        self.next_call += 1;

        let caller_info = PeerInfo {
            id: from.clone(),
            display_name: caller_name.to_string(),
        };
        self.lines.insert(
            from.clone(),
            CallState::Calling(Link {
                peer: target.clone(),
                kind,
                call,
            }),
        );
        self.lines.insert(
            target.clone(),
            CallState::Ringing(Link {
                peer: from.clone(),
                kind,
                call,
            }),
        );
        tracing::info!("{} {:?} call {} -> {}", call, kind, from, target);

        vec![
            Effect::send(
                &target,
                ServerMessage::IncomingCall {
                    offer,
                    call_kind: kind,
                    caller_info,
                },
            ),
            Effect::ArmRingTimer { call },
        ]
    }

    fn answer(&mut self, from: &PeerId, answer: Value) -> Vec<Effect> {
        let Some(CallState::Ringing(link)) = self.lines.get(from).cloned() else {
            tracing::debug!("{} is not ringing, ignoring answer-call", from);
            return Vec::new();
        };
        let caller_waiting = matches!(
            self.lines.get(&link.peer),
            Some(CallState::Calling(l)) if &l.peer == from && l.call == link.call
        );
        if !caller_waiting {
            tracing::debug!("{} answered {} but the caller is gone", from, link.call);
            self.lines.insert(from.clone(), CallState::Idle);
            return Vec::new();
        }

        let caller = link.peer.clone();
        let link_call = link.call;
        self.lines.insert(
            caller.clone(),
            CallState::Connecting(Link {
                peer: from.clone(),
                ..link.clone()
            }),
        );
        self.lines.insert(from.clone(), CallState::Connecting(link));
        tracing::info!("{} answered call from {}", from, caller);

        vec![
            Effect::CancelRingTimer { call: link_call },
            Effect::send(&caller, ServerMessage::CallAnswered { answer }),
        ]
    }

    fn reject(&mut self, from: &PeerId) -> Vec<Effect> {
        let Some(CallState::Ringing(link)) = self.lines.get(from).cloned() else {
            tracing::debug!("{} is not ringing, ignoring reject-call", from);
            return Vec::new();
        };
        self.lines.insert(from.clone(), CallState::Idle);
        tracing::info!("{} rejected call from {}", from, link.peer);
        let mut effects = vec![Effect::CancelRingTimer { call: link.call }];
        if self.release(&link.peer, from, link.call) {
            effects.push(Effect::send(&link.peer, ServerMessage::CallRejected));
        }
        effects
    }

    fn relay_candidate(&mut self, from: &PeerId, candidate: Value) -> Vec<Effect> {
        let Some(peer) = self.counterpart(from).cloned() else {
            tracing::debug!("{} has no call, dropping ice-candidate", from);
            return Vec::new();
        };
        if &peer == from {
            return Vec::new();
        }
        vec![Effect::send(
            &peer,
            ServerMessage::IceCandidate {
                candidate,
                sender_id: from.clone(),
            },
        )]
    }

    fn end(&mut self, from: &PeerId) -> Vec<Effect> {
        let Some(state) = self.lines.get(from).cloned() else {
            return Vec::new();
        };
        let Some(link) = state.link() else {
            tracing::debug!("{} has no call, ignoring end-call", from);
            return Vec::new();
        };
        self.lines.insert(from.clone(), CallState::Idle);
        tracing::info!("{} ended {} with {}", from, link.call, link.peer);

        let mut effects = Vec::new();
        if state.is_ringing() {
            effects.push(Effect::CancelRingTimer { call: link.call });
        }
        if self.release(&link.peer, from, link.call) {
            effects.push(Effect::send(
                &link.peer,
                ServerMessage::CallTerminated {
                    reason: TerminationReason::Ended,
                },
            ));
        }
        effects
    }

    fn mark_active(&mut self, from: &PeerId) -> Vec<Effect> {
        let Some(CallState::Connecting(link)) = self.lines.get(from).cloned() else {
            tracing::debug!("{} is not connecting, ignoring call-connected", from);
            return Vec::new();
        };
        if let Some(CallState::Connecting(other)) = self.lines.get(&link.peer).cloned()
            && &other.peer == from
            && other.call == link.call
        {
            self.lines.insert(link.peer.clone(), CallState::Active(other));
            self.lines.insert(from.clone(), CallState::Active(link));
        }
        Vec::new()
    }

    /// Put `peer` back to Idle if it is still linked to `from` on `call`.
    /// Returns whether it was.
    fn release(&mut self, peer: &PeerId, from: &PeerId, call: CallId) -> bool {
        match self.lines.get_mut(peer) {
            Some(state) if state.link().is_some_and(|l| &l.peer == from && l.call == call) => {
                *state = CallState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Send every connection the directory minus itself. The ordered
    /// snapshot is built once per change.
    fn broadcast_directory(&self, effects: &mut Vec<Effect>) {
        let snapshot = self.directory.snapshot();
        for id in self.lines.keys() {
            let peers = snapshot.iter().filter(|e| &e.id != id).cloned().collect();
            effects.push(Effect::send(id, ServerMessage::DirectoryUpdate { peers }));
        }
    }
}
