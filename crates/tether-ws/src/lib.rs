//! # tether-ws
//!
//! WebSocket transport for the tether JSON-RPC engine.
//!
//! - [`WebSocketClient`]: connection state machine with capped exponential
//!   reconnect, heartbeat pings, and `server.connected` interception
//! - [`writer`]: the [`FrameWriter`] write strategy shared by the primary
//!   socket and the lazily created alternate stream
//! - [`RpcPeer`]: an [`RpcEngine`](tether_rpc::RpcEngine) wired behind a client

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod handler;
pub mod heartbeat;
pub mod peer;
pub mod state;
pub mod writer;

pub use client::WebSocketClient;
pub use config::ClientConfig;
pub use errors::ClientError;
pub use handler::InboundHandler;
pub use heartbeat::{HeartbeatResult, PING_METHOD};
pub use peer::RpcPeer;
pub use state::{ConnectionState, ReadyState};
pub use writer::{FrameWriter, SecondarySocketFactory, SocketWriter, StreamWriterFactory};
