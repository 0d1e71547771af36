//! JSON-RPC error codes.
//!
//! `-32700..=-32600` are defined by JSON-RPC 2.0. The application range
//! `-32001..=-32006` covers the reserved error kinds handlers can select with
//! an explicit code.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON is not a valid message.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal error, including a failed handler.
pub const INTERNAL_ERROR: i32 = -32603;
/// An operation or handler timed out.
pub const TIMEOUT_ERROR: i32 = -32001;
/// A connection-level failure.
pub const CONNECTION_ERROR: i32 = -32002;
/// The caller is not authenticated.
pub const AUTHENTICATION_ERROR: i32 = -32003;
/// The caller is not allowed to do this.
pub const AUTHORIZATION_ERROR: i32 = -32004;
/// The caller is being rate limited.
pub const RATE_LIMIT_ERROR: i32 = -32005;
/// Application-level validation failed.
pub const VALIDATION_ERROR: i32 = -32006;

/// Typed view of an error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
    /// `-32700`
    ParseError,
    /// `-32600`
    InvalidRequest,
    /// `-32601`
    MethodNotFound,
    /// `-32602`
    InvalidParams,
    /// `-32603`
    InternalError,
    /// `-32001`
    Timeout,
    /// `-32002`
    Connection,
    /// `-32003`
    Authentication,
    /// `-32004`
    Authorization,
    /// `-32005`
    RateLimit,
    /// `-32006`
    Validation,
    /// Any other code.
    Other(i32),
}

impl ErrorCode {
    /// Numeric wire value.
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => PARSE_ERROR,
            Self::InvalidRequest => INVALID_REQUEST,
            Self::MethodNotFound => METHOD_NOT_FOUND,
            Self::InvalidParams => INVALID_PARAMS,
            Self::InternalError => INTERNAL_ERROR,
            Self::Timeout => TIMEOUT_ERROR,
            Self::Connection => CONNECTION_ERROR,
            Self::Authentication => AUTHENTICATION_ERROR,
            Self::Authorization => AUTHORIZATION_ERROR,
            Self::RateLimit => RATE_LIMIT_ERROR,
            Self::Validation => VALIDATION_ERROR,
            Self::Other(code) => code,
        }
    }

    /// Map a numeric code back to its variant.
    pub const fn from_code(code: i32) -> Self {
        match code {
            PARSE_ERROR => Self::ParseError,
            INVALID_REQUEST => Self::InvalidRequest,
            METHOD_NOT_FOUND => Self::MethodNotFound,
            INVALID_PARAMS => Self::InvalidParams,
            INTERNAL_ERROR => Self::InternalError,
            TIMEOUT_ERROR => Self::Timeout,
            CONNECTION_ERROR => Self::Connection,
            AUTHENTICATION_ERROR => Self::Authentication,
            AUTHORIZATION_ERROR => Self::Authorization,
            RATE_LIMIT_ERROR => Self::RateLimit,
            VALIDATION_ERROR => Self::Validation,
            other => Self::Other(other),
        }
    }

    /// Stock message for this code.
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Timeout => "Timeout error",
            Self::Connection => "Connection error",
            Self::Authentication => "Authentication error",
            Self::Authorization => "Authorization error",
            Self::RateLimit => "Rate limit exceeded",
            Self::Validation => "Validation error",
            Self::Other(_) => "Server error",
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.code())
    }
}
