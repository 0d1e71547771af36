//! # tether-rpc
//!
//! Transport-agnostic JSON-RPC 2.0 engine.
//!
//! - [`types`]: wire messages and inbound classification
//! - [`codes`]: standard and application error codes
//! - [`errors`]: engine, handler, and transport errors plus the default error mapper
//! - [`handler`]: the [`MethodHandler`] trait and method registry
//! - [`transport`]: the [`Transport`] capability the engine sends through
//! - [`engine`]: [`RpcEngine`], which validates, dispatches, batches, and
//!   correlates responses to outbound calls

#![deny(unsafe_code)]

pub mod codes;
pub mod context;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod transport;
pub mod types;

pub use codes::ErrorCode;
pub use context::RpcContext;
pub use engine::{CallOptions, EngineConfig, EngineHooks, EngineStats, OutboundCall, RpcEngine};
pub use errors::{ErrorMapper, HandlerError, RpcError, TransportError, default_error_mapper};
pub use handler::{FnHandler, MethodHandler, MethodRegistry};
pub use transport::{ChannelTransport, Transport};
pub use types::{
    ErrorObject, JSONRPC_VERSION, Message, MessageError, Notification, Request, RequestId,
    Response, ResponsePayload,
};
