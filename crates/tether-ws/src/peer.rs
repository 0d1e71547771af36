//! An [`RpcEngine`] running over a [`WebSocketClient`].

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tether_rpc::{EngineConfig, Message, RpcContext, RpcEngine, Transport, TransportError};
use tracing::trace;

use crate::client::WebSocketClient;
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::handler::InboundHandler;

#[async_trait]
impl Transport for WebSocketClient {
    async fn send_message(
        &self,
        message: &Message,
        _ctx: &RpcContext,
    ) -> Result<(), TransportError> {
        let frame = serde_json::to_string(message).map_err(TransportError::new)?;
        self.send_frame(frame).await.map_err(TransportError::new)
    }
}

/// Forwards inbound frames from the client into the engine.
///
/// Responses and notifications are processed in arrival order. Frames that
/// carry requests run on their own task, since a request handler may call
/// back into the peer and wait for a response that arrives after it.
struct EngineBridge {
    engine: Weak<RpcEngine>,
}

impl EngineBridge {
    fn context(client: &WebSocketClient) -> RpcContext {
        match client.connection_id() {
            Some(id) => RpcContext::for_connection(id),
            None => RpcContext::default(),
        }
    }
}

#[async_trait]
impl InboundHandler for EngineBridge {
    async fn handle_message(&self, message: Message, client: &WebSocketClient) {
        let Some(engine) = self.engine.upgrade() else {
            trace!("engine dropped; ignoring inbound message");
            return;
        };
        let _reply = engine.dispatch(message, &Self::context(client)).await;
    }

    async fn handle_frame(&self, frame: &[u8], client: &WebSocketClient) {
        let Some(engine) = self.engine.upgrade() else {
            trace!("engine dropped; ignoring inbound frame");
            return;
        };
        let ctx = Self::context(client);
        let Ok(value) = serde_json::from_slice::<Value>(frame) else {
            // the engine answers with PARSE_ERROR
            let _reply = engine.validate_message(frame, &ctx).await;
            return;
        };
        if carries_request(&value) {
            let _task = tokio::spawn(async move {
                let _reply = engine.validate_value(value, &ctx).await;
            });
        } else {
            let _reply = engine.validate_value(value, &ctx).await;
        }
    }
}

fn carries_request(value: &Value) -> bool {
    let is_request = |item: &Value| item.get("method").is_some() && item.get("id").is_some();
    match value {
        Value::Array(items) => items.iter().any(is_request),
        item => is_request(item),
    }
}

/// Bidirectional JSON-RPC peer: outbound calls and inbound method handling
/// share one WebSocket connection.
#[derive(Clone)]
pub struct RpcPeer {
    engine: Arc<RpcEngine>,
    client: WebSocketClient,
}

impl RpcPeer {
    /// Build the client and the engine and wire them together.
    ///
    /// The engine's default call timeout is the client's `callTimeoutMs`.
    pub fn new(
        url: impl Into<String>,
        client_config: ClientConfig,
        engine_config: EngineConfig,
    ) -> Result<Self, ClientError> {
        let engine_config = EngineConfig {
            default_timeout_ms: client_config.call_timeout_ms,
            ..engine_config
        };
        let client = WebSocketClient::new(url, client_config)?;
        let engine = Arc::new(RpcEngine::new(engine_config, Arc::new(client.clone()))?);
        client.set_handler(Arc::new(EngineBridge {
            engine: Arc::downgrade(&engine),
        }));
        Ok(Self { engine, client })
    }

    /// Open the connection.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.client.connect().await
    }

    /// Close the connection. Outstanding calls keep waiting for their timeout.
    pub fn disconnect(&self) {
        self.client.disconnect();
    }

    /// Close the connection and reject every outstanding call.
    pub fn close(&self) {
        self.client.disconnect();
        self.engine.destroy();
    }

    /// The engine; register inbound methods here.
    pub fn engine(&self) -> &Arc<RpcEngine> {
        &self.engine
    }

    /// The underlying client.
    pub fn client(&self) -> &WebSocketClient {
        &self.client
    }

    /// Call a remote method and wait for its result.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        Ok(self.engine.call(method, params).await?)
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        Ok(self.engine.notify(method, params).await?)
    }
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("client", &self.client)
            .field("engine", &self.engine)
            .finish()
    }
}
