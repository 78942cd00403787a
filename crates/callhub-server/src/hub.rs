//! Shared relay state.
//!
//! The hub is the single serialization point of the relay: one lock guards
//! the switchboard together with the outbound queue of every connection.
//! Effects are dispatched before the lock is released, so what a connection
//! receives is always in the order the switchboard decided it.
//!
//! A connection whose queue overflows is disconnected on the spot, under the
//! same lock, whether or not its socket task is still able to notice.

use crate::config::Config;
use callhub_core::{
    CallId, CallPhase, ClientMessage, Effect, IceServer, PeerId, ServerMessage, Switchboard,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;

struct HubState {
    board: Switchboard,
    outboxes: HashMap<PeerId, mpsc::Sender<ServerMessage>>,
    /// Pending ringing timeouts, aborted once their call stops ringing.
    ring_timers: HashMap<CallId, AbortHandle>,
}

pub struct Hub {
    state: Mutex<HubState>,
    ring_timeout: Option<Duration>,
    ice_servers: Vec<IceServer>,
    queue_len: usize,
}

impl Hub {
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                board: Switchboard::new(),
                outboxes: HashMap::new(),
                ring_timers: HashMap::new(),
            }),
            ring_timeout: config.ring_timeout(),
            ice_servers: config.ice_servers.clone(),
            queue_len: config.outbound_queue,
        })
    }

    /// Admit a new connection. Returns its id and the queue the connection
    /// task drains into the socket. The queue closes when the hub gives up on
    /// the connection.
    pub async fn connect(self: &Arc<Self>) -> (PeerId, mpsc::Receiver<ServerMessage>) {
        let id = PeerId::generate();
        let (tx, rx) = mpsc::channel(self.queue_len);

        let mut state = self.state.lock().await;
        let welcome = ServerMessage::Welcome {
            id: id.clone(),
            ice_servers: self.ice_servers.clone(),
        };
        if tx.try_send(welcome).is_ok() {
            state.outboxes.insert(id.clone(), tx);
        }
        let effects = state.board.connect(&id);
        self.dispatch(&mut state, effects);
        (id, rx)
    }

    pub async fn handle(self: &Arc<Self>, from: &PeerId, msg: ClientMessage) {
        let mut state = self.state.lock().await;
        tracing::trace!("{} from {}", msg.kind(), from);
        let effects = state.board.handle(from, msg);
        self.dispatch(&mut state, effects);
    }

    pub async fn disconnect(self: &Arc<Self>, id: &PeerId) {
        let mut state = self.state.lock().await;
        state.outboxes.remove(id);
        let effects = state.board.disconnect(id);
        self.dispatch(&mut state, effects);
    }

    /// Drop every connection and directory entry.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        tracing::info!(
            "Shutting down with {} connection(s)",
            state.board.connection_count()
        );
        state.outboxes.clear();
        for (_, timer) in state.ring_timers.drain() {
            timer.abort();
        }
        state.board.shutdown();
    }

    pub async fn phase(&self, id: &PeerId) -> Option<CallPhase> {
        self.state.lock().await.board.phase(id)
    }

    pub async fn directory_len(&self) -> usize {
        self.state.lock().await.board.directory().len()
    }

    pub async fn pending_ring_timers(&self) -> usize {
        self.state.lock().await.ring_timers.len()
    }

    async fn expire(self: &Arc<Self>, call: CallId) {
        let mut state = self.state.lock().await;
        state.ring_timers.remove(&call);
        let effects = state.board.expire_ringing(call);
        self.dispatch(&mut state, effects);
    }

    /// Carry out `effects`. Connections evicted along the way are
    /// disconnected afterwards, and the effects of that run in turn; each
    /// round removes at least one line, so this terminates.
    fn dispatch(self: &Arc<Self>, state: &mut HubState, effects: Vec<Effect>) {
        let mut pending = effects;
        while !pending.is_empty() {
            let mut evicted = Vec::new();
            for effect in pending {
                match effect {
                    Effect::Send { to, message } => {
                        if !deliver(state, &to, message) {
                            evicted.push(to);
                        }
                    }
                    Effect::ArmRingTimer { call } => self.arm_ring_timer(state, call),
                    Effect::CancelRingTimer { call } => {
                        if let Some(timer) = state.ring_timers.remove(&call) {
                            timer.abort();
                        }
                    }
                }
            }

            pending = Vec::new();
            for id in evicted {
                pending.extend(state.board.disconnect(&id));
            }
        }
    }

    fn arm_ring_timer(self: &Arc<Self>, state: &mut HubState, call: CallId) {
        let Some(timeout) = self.ring_timeout else {
            return;
        };
        let hub = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            hub.expire(call).await;
        });
        state.ring_timers.insert(call, task.abort_handle());
    }
}

/// Queue `message` for `to` without waiting. Returns `false` when the queue
/// is full: the message is lost, the outbox is dropped, and the caller must
/// disconnect `to`.
fn deliver(state: &mut HubState, to: &PeerId, message: ServerMessage) -> bool {
    let Some(tx) = state.outboxes.get(to) else {
        tracing::debug!("dropping message for departed {}", to);
        return true;
    };
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("{} is not keeping up, disconnecting it", to);
            state.outboxes.remove(to);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            // The socket task is gone and runs its own disconnect.
            state.outboxes.remove(to);
            true
        }
    }
}
