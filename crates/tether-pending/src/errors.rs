//! Registry and operation error types.

use serde_json::Value;

/// Errors returned by registry calls themselves.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    /// An operation with the requested custom id is already tracked.
    #[error("Operation with id '{0}' already exists")]
    DuplicateId(String),

    /// The registry configuration failed validation.
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),

    /// The registry was destroyed and accepts no new operations.
    #[error("{0} has been destroyed")]
    Destroyed(String),
}

/// Why an operation settled without a result.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OperationError {
    /// The per-operation timer (or an expiry sweep) fired first.
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation's timeout.
        timeout_ms: u64,
    },

    /// Explicitly rejected by the owner.
    #[error("{0}")]
    Rejected(String),

    /// The remote peer answered with an error object.
    #[error("{message}")]
    Remote {
        /// Error code sent by the peer.
        code: i32,
        /// Error message sent by the peer.
        message: String,
        /// Optional structured data sent by the peer.
        data: Option<Value>,
    },

    /// The owning registry was destroyed; carries the destroy reason.
    #[error("{0}")]
    Destroyed(String),

    /// The operation was removed without being settled.
    #[error("Operation {id} was dropped before settling")]
    Dropped {
        /// Id of the dropped operation.
        id: String,
    },
}

impl OperationError {
    /// Whether this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message() {
        let err = OperationError::Timeout { timeout_ms: 50 };
        assert_eq!(err.to_string(), "Operation timed out after 50ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn destroyed_message_is_reason() {
        let err = OperationError::Destroyed("RpcEngine destroyed".into());
        assert_eq!(err.to_string(), "RpcEngine destroyed");
        assert!(!err.is_timeout());
    }

    #[test]
    fn remote_message() {
        let err = OperationError::Remote {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.to_string(), "Method not found");
    }

    #[test]
    fn duplicate_id_message() {
        let err = PendingError::DuplicateId("abc".into());
        assert_eq!(err.to_string(), "Operation with id 'abc' already exists");
    }
}
