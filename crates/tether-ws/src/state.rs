//! Connection and socket state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Client-level connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// No socket, and none being opened.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting for or running a reconnect attempt.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Socket-level ready state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,
    /// Frames can be written.
    Open = 1,
    /// Close frame queued.
    Closing = 2,
    /// Socket gone.
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Ready state shared between a socket's owner and its writer task.
#[derive(Debug)]
pub(crate) struct SharedReadyState(AtomicU8);

impl SharedReadyState {
    pub(crate) fn new(state: ReadyState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_ready_state_round_trips() {
        let ready = SharedReadyState::new(ReadyState::Connecting);
        assert_eq!(ready.get(), ReadyState::Connecting);
        ready.set(ReadyState::Open);
        assert_eq!(ready.get(), ReadyState::Open);
        ready.set(ReadyState::Closed);
        assert_eq!(ready.get(), ReadyState::Closed);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
