//! Application callback for inbound messages.

use async_trait::async_trait;
use tether_rpc::Message;
use tracing::warn;

use crate::client::WebSocketClient;

/// Receives every inbound data frame except the reserved `server.connected`
/// notification.
///
/// Frames of one socket are delivered one at a time, in arrival order: the
/// next frame waits until the current call returns. A handler that waits on
/// a later frame (for example the response to its own outbound call) must
/// move that work onto a task of its own.
///
/// The client carries no application semantics; replies go back through
/// `client`.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one valid message.
    async fn handle_message(&self, message: Message, client: &WebSocketClient);

    /// Handle one raw frame.
    ///
    /// The default classifies the frame and passes it to
    /// [`handle_message`](Self::handle_message); frames that are not valid
    /// JSON-RPC are logged and dropped. Override it to see invalid input too.
    async fn handle_frame(&self, frame: &[u8], client: &WebSocketClient) {
        match Message::parse(frame) {
            Ok(message) => self.handle_message(message, client).await,
            Err(e) => warn!(url = client.url(), error = %e, "dropping invalid inbound frame"),
        }
    }
}
