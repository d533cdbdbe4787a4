//! Connection state tracking.
//!
//! The polling loop is the only writer. Every receive attempt reports whether
//! it succeeded; the tracker turns that stream of outcomes into edge-triggered
//! state changes, so a run of identical outcomes produces one notification.

use std::sync::atomic::{AtomicU8, Ordering};

/// Connectivity as observed from receive outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Nothing observed yet. Never re-entered.
    Unknown = 0,
    Connected = 1,
    Disconnected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        // ---
        match value {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnected,
            _ => ConnectionState::Unknown,
        }
    }
}

/// State-machine step: the new state, or `None` if nothing changes.
pub(crate) fn transition(current: ConnectionState, succeeded: bool) -> Option<ConnectionState> {
    // ---
    match (current, succeeded) {
        (ConnectionState::Connected, true) => None,
        (_, true) => Some(ConnectionState::Connected),
        (ConnectionState::Disconnected, false) => None,
        (_, false) => Some(ConnectionState::Disconnected),
    }
}

/// Shared connection state: single writer, many readers.
#[derive(Debug)]
pub(crate) struct ConnectionTracker {
    state: AtomicU8,
}

impl ConnectionTracker {
    // ---
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Unknown as u8),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record one outcome; returns the new state on an actual change.
    pub(crate) fn observe(&self, succeeded: bool) -> Option<ConnectionState> {
        // ---
        let next = transition(self.state(), succeeded)?;
        self.state.store(next as u8, Ordering::Release);
        Some(next)
    }
}
