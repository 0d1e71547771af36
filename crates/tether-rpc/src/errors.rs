//! Engine, handler, and transport errors.

use std::sync::Arc;

use serde_json::{Value, json};
use tether_pending::{OperationError, PendingError};

use crate::codes::ErrorCode;
use crate::types::ErrorObject;

/// Errors returned by [`RpcEngine`](crate::RpcEngine) calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A handler is already registered under this name.
    #[error("Method '{0}' is already registered")]
    DuplicateMethod(String),

    /// The pending-operation registry refused the call.
    #[error(transparent)]
    Pending(#[from] PendingError),

    /// The outbound call settled with an error.
    #[error(transparent)]
    Call(#[from] OperationError),

    /// The transport could not send.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Params could not be serialized or a result could not be decoded.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A transport failed to deliver a message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    /// Wrap any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Error raised by a method handler.
///
/// An explicit `code` selects the wire code directly; without one the
/// [`ErrorMapper`] decides.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable message, sent as the error message.
    pub message: String,
    /// Explicit wire code.
    pub code: Option<ErrorCode>,
    /// Structured details sent as `error.data`.
    pub data: Option<Value>,
    /// Short name of the error kind, reported as `data.errorType` for internal errors.
    pub error_type: String,
}

impl HandlerError {
    /// Error with no explicit code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
            error_type: "Error".into(),
        }
    }

    /// Error with an explicit code.
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            ..Self::new(message)
        }
    }

    /// `INVALID_PARAMS` error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::InvalidParams, message)
    }

    /// Attach structured data.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the error kind name.
    #[must_use]
    pub fn error_type(mut self, name: impl Into<String>) -> Self {
        self.error_type = name.into();
        self
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_params(err.to_string()).error_type("SerdeError")
    }
}

impl From<OperationError> for HandlerError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::Timeout { .. } => {
                Self::with_code(ErrorCode::Timeout, err.to_string()).error_type("TimeoutError")
            }
            OperationError::Remote { code, message, data } => Self {
                message,
                code: Some(ErrorCode::from_code(code)),
                data,
                error_type: "RemoteError".into(),
            },
            other => Self::new(other.to_string()),
        }
    }
}

/// Converts a handler error into the wire error object.
pub type ErrorMapper = Arc<dyn Fn(&HandlerError) -> ErrorObject + Send + Sync>;

/// Default mapping from handler errors to wire errors.
///
/// An explicit code wins. Otherwise the message is matched case-insensitively:
/// "timeout" maps to `TIMEOUT_ERROR`, "connection" to `CONNECTION_ERROR`, and
/// anything else is `INTERNAL_ERROR` with `data.errorType` set. The substring
/// match can misfire on unrelated messages; set an explicit code when the
/// distinction matters.
pub fn default_error_mapper(err: &HandlerError) -> ErrorObject {
    if let Some(code) = err.code {
        let object = ErrorObject::new(code, err.message.clone());
        return match &err.data {
            Some(data) => object.with_data(data.clone()),
            None => object,
        };
    }

    let lower = err.message.to_lowercase();
    let code = if lower.contains("timeout") {
        ErrorCode::Timeout
    } else if lower.contains("connection") {
        ErrorCode::Connection
    } else {
        ErrorCode::InternalError
    };

    let mut data = match &err.data {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = serde_json::Map::new();
            let _ = map.insert("details".into(), other.clone());
            map
        }
        None => serde_json::Map::new(),
    };
    if code == ErrorCode::InternalError {
        let _ = data.insert("errorType".into(), json!(err.error_type));
    }

    let object = ErrorObject::new(code, err.message.clone());
    if data.is_empty() {
        object
    } else {
        object.with_data(Value::Object(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_code_wins() {
        let err = HandlerError::with_code(ErrorCode::RateLimit, "connection timeout");
        let obj = default_error_mapper(&err);
        assert_eq!(obj.code, -32005);
        assert_eq!(obj.message, "connection timeout");
        assert!(obj.data.is_none());
    }

    #[test]
    fn timeout_substring_maps_to_timeout() {
        let obj = default_error_mapper(&HandlerError::new("upstream Timeout reached"));
        assert_eq!(obj.error_code(), ErrorCode::Timeout);
    }

    #[test]
    fn connection_substring_maps_to_connection() {
        let obj = default_error_mapper(&HandlerError::new("connection refused"));
        assert_eq!(obj.error_code(), ErrorCode::Connection);
    }

    #[test]
    fn other_messages_are_internal_with_error_type() {
        let err = HandlerError::new("boom").error_type("DbError");
        let obj = default_error_mapper(&err);
        assert_eq!(obj.error_code(), ErrorCode::InternalError);
        assert_eq!(obj.message, "boom");
        assert_eq!(obj.data, Some(json!({"errorType": "DbError"})));
    }

    #[test]
    fn handler_data_is_kept_for_internal_errors() {
        let err = HandlerError::new("boom").data(json!({"row": 3}));
        let obj = default_error_mapper(&err);
        assert_eq!(obj.data, Some(json!({"row": 3, "errorType": "Error"})));
    }

    #[test]
    fn explicit_code_carries_data() {
        let err = HandlerError::invalid_params("missing a").data(json!(["a"]));
        let obj = default_error_mapper(&err);
        assert_eq!(obj.code, -32602);
        assert_eq!(obj.data, Some(json!(["a"])));
    }

    #[test]
    fn operation_timeout_converts_to_timeout_code() {
        let err: HandlerError = OperationError::Timeout { timeout_ms: 50 }.into();
        assert_eq!(err.code, Some(ErrorCode::Timeout));
        assert_eq!(err.message, "Operation timed out after 50ms");
    }

    #[test]
    fn serde_error_is_invalid_params() {
        let serde_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err: HandlerError = serde_err.into();
        assert_eq!(err.code, Some(ErrorCode::InvalidParams));
    }

    #[test]
    fn rpc_error_messages() {
        assert_eq!(
            RpcError::DuplicateMethod("echo".into()).to_string(),
            "Method 'echo' is already registered"
        );
        let call: RpcError = OperationError::Destroyed("RpcEngine destroyed".into()).into();
        assert_eq!(call.to_string(), "RpcEngine destroyed");
    }
}
