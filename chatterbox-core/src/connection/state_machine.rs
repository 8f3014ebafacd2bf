// Connection state machine for the realtime channel

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::info;

const HISTORY_LIMIT: usize = 50;

/// Connection states of the realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The server refused the handshake credential; only a new login and an
    /// explicit `connect()` leave this state.
    AuthFailed,
}

/// Events that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    HandshakeAccepted,
    HandshakeRejected,
    TransportDropped,
    Disconnect,
}

/// Pure transition table
pub fn next_state(current: ConnectionState, event: ConnectionEvent) -> ConnectionState {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (current, event) {
        (S::Disconnected | S::AuthFailed, E::Connect) => S::Connecting,
        (S::Connecting | S::Connected, E::Connect) => current,

        (S::Connecting, E::HandshakeAccepted) => S::Connected,
        (S::Connecting | S::Connected, E::HandshakeRejected) => S::AuthFailed,
        (S::Connecting | S::Connected, E::TransportDropped) => S::Disconnected,

        (_, E::Disconnect) => S::Disconnected,

        _ => current,
    }
}

#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub event: ConnectionEvent,
    pub at: Instant,
}

/// Holds the single connection state value
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: Mutex<ConnectionState>,
    history: Mutex<VecDeque<StateTransition>>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Apply an event; returns the transition if the state changed
    pub fn apply(&self, event: ConnectionEvent) -> Option<StateTransition> {
        let mut state = self.state.lock();
        let from = *state;
        let to = next_state(from, event);
        if to == from {
            return None;
        }
        *state = to;
        drop(state);

        info!("State transition: {:?} -> {:?} (event: {:?})", from, to, event);
        let transition = StateTransition {
            from,
            to,
            event,
            at: Instant::now(),
        };

        let mut history = self.history.lock();
        history.push_back(transition.clone());
        if history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        Some(transition)
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.history.lock().iter().cloned().collect()
    }
}
