//! WebSocket client errors.

use tether_rpc::RpcError;

/// Errors raised by [`WebSocketClient`](crate::WebSocketClient) and [`RpcPeer`](crate::RpcPeer).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The URL is not a `ws://` or `wss://` URL.
    #[error("Invalid WebSocket URL '{0}': expected ws:// or wss://")]
    InvalidUrl(String),

    /// The opening handshake failed.
    #[error("WebSocket connect failed: {0}")]
    Connect(String),

    /// The opening handshake did not finish in time.
    #[error("WebSocket connect timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Configured connect timeout.
        timeout_ms: u64,
    },

    /// No open socket to write to.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// The engine behind a peer failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            ClientError::InvalidUrl("http://x".into()).to_string(),
            "Invalid WebSocket URL 'http://x': expected ws:// or wss://"
        );
        assert_eq!(
            ClientError::ConnectTimeout { timeout_ms: 10 }.to_string(),
            "WebSocket connect timed out after 10ms"
        );
        assert_eq!(ClientError::NotConnected.to_string(), "WebSocket is not connected");
    }

    #[test]
    fn wraps_rpc_errors() {
        let err: ClientError = RpcError::DuplicateMethod("echo".into()).into();
        assert_eq!(err.to_string(), "Method 'echo' is already registered");
    }
}
