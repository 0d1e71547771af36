//! The send capability the engine delivers outbound messages through.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::RpcContext;
use crate::errors::TransportError;
use crate::types::Message;

/// Delivers serialized messages to the peer.
///
/// The engine never touches sockets; WebSocket, stdio, or HTTP transports
/// implement this.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message (possibly a batch) to the peer.
    async fn send_message(&self, message: &Message, ctx: &RpcContext) -> Result<(), TransportError>;
}

/// Transport that forwards messages into an mpsc channel.
///
/// Useful for in-process peers and for observing what an engine sends.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(Message, RpcContext)>,
}

impl ChannelTransport {
    /// Create the transport and the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Message, RpcContext)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_message(
        &self,
        message: &Message,
        ctx: &RpcContext,
    ) -> Result<(), TransportError> {
        self.tx
            .send((message.clone(), ctx.clone()))
            .map_err(|_| TransportError::new("channel closed"))
    }
}
