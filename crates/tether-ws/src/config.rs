//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::backoff::BackoffPolicy;

/// WebSocket client configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Reconnect attempts after an unexpected close before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub initial_reconnect_delay_ms: u64,
    /// Upper bound on any reconnect delay.
    pub max_reconnect_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_factor: f64,
    /// Interval between heartbeat pings; `0` disables them.
    pub heartbeat_interval_ms: u64,
    /// Send heartbeat pings while connected.
    pub enable_keep_alive: bool,
    /// Default timeout for outbound calls made through an [`RpcPeer`](crate::RpcPeer).
    pub call_timeout_ms: u64,
    /// Bound on the opening handshake; `0` waits indefinitely.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            initial_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            backoff_factor: 2.0,
            heartbeat_interval_ms: 30_000,
            enable_keep_alive: true,
            call_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    /// Reconnect backoff parameters.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay_ms: self.initial_reconnect_delay_ms,
            max_delay_ms: self.max_reconnect_delay_ms,
            factor: self.backoff_factor,
        }
    }

    /// Heartbeat interval, if pings are enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.enable_keep_alive && self.heartbeat_interval_ms > 0)
            .then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Connect timeout, if bounded.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}
