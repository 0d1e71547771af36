//! Reconnecting WebSocket client.
//!
//! One [`WebSocketClient`] owns at most one socket at a time. Each successful
//! open bumps a generation counter; close events from an older generation are
//! ignored, so a replaced or manually closed socket can never trigger a
//! reconnect.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::SplitStream;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tether_rpc::JSONRPC_VERSION;
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::handler::InboundHandler;
use crate::heartbeat::run_heartbeat;
use crate::state::{ConnectionState, ReadyState};
use crate::writer::{FrameWriter, SocketWriter, StreamWriterFactory, WsStream, open_socket};

/// Reserved notification carrying the server-assigned connection id.
pub const SERVER_CONNECTED_METHOD: &str = "server.connected";

/// Close reason sent by [`WebSocketClient::disconnect`].
pub const MANUAL_DISCONNECT_REASON: &str = "Manual disconnect";

struct SocketHandle {
    generation: u64,
    writer: SocketWriter,
    reader: CancellationToken,
}

struct Inner {
    url: String,
    config: ClientConfig,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    stream_factory: RwLock<Option<Arc<dyn StreamWriterFactory>>>,
    state_tx: watch::Sender<ConnectionState>,
    socket: Mutex<Option<SocketHandle>>,
    generation: AtomicU64,
    manual_disconnect: AtomicBool,
    reconnect_attempts: AtomicU32,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<CancellationToken>>,
    connection_id: RwLock<Option<String>>,
    alternate: OnceCell<Arc<dyn FrameWriter>>,
}

/// JSON-RPC WebSocket client with reconnect and heartbeat.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct WebSocketClient {
    inner: Arc<Inner>,
}

impl WebSocketClient {
    /// Create a client for `url`. Nothing is opened until [`connect`](Self::connect).
    ///
    /// Fails with [`ClientError::InvalidUrl`] unless `url` is a `ws://` or
    /// `wss://` URL with a host.
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Result<Self, ClientError> {
        let url = url.into();
        validate_url(&url)?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                url,
                config,
                handler: RwLock::new(None),
                stream_factory: RwLock::new(None),
                state_tx,
                socket: Mutex::new(None),
                generation: AtomicU64::new(0),
                manual_disconnect: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                reconnect_task: Mutex::new(None),
                heartbeat: Mutex::new(None),
                connection_id: RwLock::new(None),
                alternate: OnceCell::new(),
            }),
        })
    }

    /// Install the inbound message handler.
    #[must_use]
    pub fn with_handler(self, handler: impl InboundHandler + 'static) -> Self {
        self.set_handler(Arc::new(handler));
        self
    }

    /// Replace the inbound message handler.
    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    /// Install the factory for the alternate write path.
    #[must_use]
    pub fn with_stream_factory(self, factory: impl StreamWriterFactory + 'static) -> Self {
        self.set_stream_factory(Arc::new(factory));
        self
    }

    /// Replace the factory for the alternate write path.
    pub fn set_stream_factory(&self, factory: Arc<dyn StreamWriterFactory>) {
        *self.inner.stream_factory.write() = Some(factory);
    }

    /// Open the socket.
    ///
    /// Clears a previous manual disconnect. A failed first attempt returns the
    /// error and leaves the client disconnected; reconnects only follow the
    /// loss of an established connection.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }
        self.inner.manual_disconnect.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        Arc::clone(&self.inner).connect_inner(true).await
    }

    /// Close the socket with 1000 / "Manual disconnect" and suppress reconnects.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        inner.manual_disconnect.store(true, Ordering::SeqCst);
        if let Some(task) = inner.reconnect_task.lock().take() {
            task.abort();
        }
        let handle = inner.socket.lock().take();
        inner.stop_heartbeat();
        if let Some(handle) = handle {
            handle.writer.close(CloseCode::Normal, MANUAL_DISCONNECT_REASON);
            handle.reader.cancel();
            info!(url = %inner.url, generation = handle.generation, "websocket disconnected");
        }
        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        inner.set_state(ConnectionState::Disconnected);
    }

    /// Wrap `data` in the JSON-RPC envelope and write it.
    ///
    /// `data` must be an object (or an array of objects for a batch). Returns
    /// `false` instead of failing: when the primary socket is not open, or
    /// when the alternate stream is unsupported, cannot be created, or
    /// rejects the write.
    pub async fn send(&self, data: Value, use_alternate_stream: bool) -> bool {
        let Some(frame) = envelope(data) else {
            warn!("send expects a JSON object or array");
            return false;
        };
        if use_alternate_stream {
            return self.send_alternate(frame).await;
        }

        let writer = self.current_writer();
        match writer {
            Some(writer) if writer.is_open() => writer.write_frame(frame).await.is_ok(),
            _ => {
                debug!(url = %self.inner.url, "send skipped: socket not open");
                false
            }
        }
    }

    async fn send_alternate(&self, frame: String) -> bool {
        let factory = self.inner.stream_factory.read().clone();
        let Some(factory) = factory else {
            debug!("alternate stream not supported: no factory installed");
            return false;
        };
        let url = self.inner.url.clone();
        let writer = match self
            .inner
            .alternate
            .get_or_try_init(|| async move { factory.create(&url).await })
            .await
        {
            Ok(writer) => Arc::clone(writer),
            Err(e) => {
                warn!(error = %e, "alternate stream unavailable");
                return false;
            }
        };
        match writer.write_frame(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "alternate stream write failed");
                false
            }
        }
    }

    /// Write an already serialized frame to the primary socket.
    pub async fn send_frame(&self, frame: String) -> Result<(), ClientError> {
        let writer = self.current_writer().ok_or(ClientError::NotConnected)?;
        writer.write_frame(frame).await
    }

    fn current_writer(&self) -> Option<SocketWriter> {
        self.inner.socket.lock().as_ref().map(|h| h.writer.clone())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// State of the primary socket.
    pub fn ready_state(&self) -> ReadyState {
        if let Some(writer) = self.current_writer() {
            return writer.ready_state();
        }
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Reconnecting => ReadyState::Connecting,
            ConnectionState::Connected | ConnectionState::Disconnected => ReadyState::Closed,
        }
    }

    /// Whether the primary socket is open.
    pub fn is_connected(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Id announced by the server in `server.connected`, if any.
    pub fn connection_id(&self) -> Option<String> {
        self.inner.connection_id.read().clone()
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(url = %self.url, state = %next, "connection state changed");
        }
    }

    fn connect_inner(
        self: Arc<Self>,
        initial: bool,
    ) -> BoxFuture<'static, Result<(), ClientError>> {
        async move {
            if initial {
                self.set_state(ConnectionState::Connecting);
            }
            debug!(url = %self.url, "opening websocket");

            let ws = match open_socket(&self.url, self.config.connect_timeout()).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(url = %self.url, error = %e, "websocket connect failed");
                    if initial {
                        self.set_state(ConnectionState::Disconnected);
                    }
                    return Err(e);
                }
            };

            self.install_socket(ws)
        }
        .boxed()
    }

    /// Adopt a freshly opened socket unless `disconnect` ran during the
    /// handshake.
    fn install_socket(self: &Arc<Self>, ws: WsStream) -> Result<(), ClientError> {
        // `disconnect` raises the flag before it takes `socket`
        let mut socket = self.socket.lock();
        if self.manual_disconnect.load(Ordering::SeqCst) {
            drop(socket);
            debug!(url = %self.url, "disconnected during handshake; dropping socket");
            return Err(ClientError::NotConnected);
        }

        let (sink, stream) = ws.split();
        let writer = SocketWriter::spawn(sink);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = CancellationToken::new();
        let previous = socket.replace(SocketHandle {
            generation,
            writer: writer.clone(),
            reader: reader.clone(),
        });
        if let Some(old) = previous {
            old.reader.cancel();
            old.writer.close(CloseCode::Normal, "Replaced");
        }

        *self.connection_id.write() = None;
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.start_heartbeat(&writer);
        self.set_state(ConnectionState::Connected);
        drop(socket);
        info!(url = %self.url, generation, "websocket connected");

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(self);
        let _dispatcher = tokio::spawn(dispatch_loop(weak.clone(), frames_rx));
        let _reader = tokio::spawn(read_loop(weak, generation, stream, reader, frames_tx));
        Ok(())
    }

    fn start_heartbeat(&self, writer: &SocketWriter) {
        let Some(interval) = self.config.heartbeat_interval() else {
            return;
        };
        let token = CancellationToken::new();
        if let Some(old) = self.heartbeat.lock().replace(token.clone()) {
            old.cancel();
        }
        let writer: Arc<dyn FrameWriter> = Arc::new(writer.clone());
        let _task = tokio::spawn(async move {
            let result = run_heartbeat(writer, interval, token).await;
            trace!(?result, "heartbeat ended");
        });
    }

    fn stop_heartbeat(&self) {
        if let Some(token) = self.heartbeat.lock().take() {
            token.cancel();
        }
    }

    /// Consume the `server.connected` notification. Returns whether `raw`
    /// was one.
    fn intercept_connected(&self, raw: &[u8]) -> bool {
        let Ok(Value::Object(frame)) = serde_json::from_slice::<Value>(raw) else {
            return false;
        };
        let field = |key: &str| frame.get(key).and_then(Value::as_str);
        let is_connected_note = field("jsonrpc") == Some(JSONRPC_VERSION)
            && field("method") == Some(SERVER_CONNECTED_METHOD)
            && !frame.contains_key("id");
        if !is_connected_note {
            return false;
        }
        let Some(id) = frame
            .get("params")
            .and_then(|p| p.get("connectionId"))
            .and_then(connection_id_from)
        else {
            return false;
        };
        info!(url = %self.url, connection_id = %id, "server assigned connection id");
        *self.connection_id.write() = Some(id);
        true
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        let handle = {
            let mut socket = self.socket.lock();
            if socket.as_ref().is_some_and(|h| h.generation == generation) {
                socket.take()
            } else {
                None
            }
        };
        let Some(handle) = handle else {
            trace!(generation, "ignoring close of stale socket");
            return;
        };
        handle.writer.mark_closed();
        self.stop_heartbeat();

        if self.manual_disconnect.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        info!(url = %self.url, generation, "websocket closed unexpectedly");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let attempt = self.reconnect_attempts.load(Ordering::SeqCst);
        if attempt >= self.config.max_reconnect_attempts {
            warn!(url = %self.url, attempts = attempt, "giving up reconnecting");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        let delay = self.config.backoff().delay_for(attempt);
        self.reconnect_attempts.store(attempt + 1, Ordering::SeqCst);
        self.set_state(ConnectionState::Reconnecting);
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        info!(url = %self.url, attempt = attempt + 1, delay_ms, "scheduling reconnect");

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.manual_disconnect.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = Arc::clone(&inner).connect_inner(false).await {
                debug!(error = %e, "reconnect attempt failed");
                if !inner.manual_disconnect.load(Ordering::SeqCst) {
                    inner.schedule_reconnect();
                }
            }
        });
        // The previous task, if any, is the one running this call or has finished.
        drop(self.reconnect_task.lock().replace(task));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect_task.get_mut().take() {
            task.abort();
        }
        if let Some(token) = self.heartbeat.get_mut().take() {
            token.cancel();
        }
        if let Some(handle) = self.socket.get_mut().take() {
            handle.writer.close(CloseCode::Away, "Client dropped");
            handle.reader.cancel();
        }
    }
}

async fn read_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut stream: SplitStream<WsStream>,
    cancel: CancellationToken,
    frames: mpsc::UnboundedSender<Vec<u8>>,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        let Some(this) = inner.upgrade() else {
            return;
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                if !this.intercept_connected(text.as_bytes()) {
                    let _ = frames.send(text.as_bytes().to_vec());
                }
            }
            Some(Ok(WsMessage::Binary(data))) => {
                if !this.intercept_connected(&data) {
                    let _ = frames.send(data.to_vec());
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(generation, ?frame, "close frame received");
                this.handle_close(generation);
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(generation, error = %e, "websocket read failed");
                this.handle_close(generation);
                return;
            }
            None => {
                this.handle_close(generation);
                return;
            }
        }
    }
}

/// Hand frames of one socket to the inbound handler, one at a time.
async fn dispatch_loop(inner: Weak<Inner>, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        let Some(this) = inner.upgrade() else {
            return;
        };
        let handler = this.handler.read().clone();
        let Some(handler) = handler else {
            trace!("no inbound handler installed");
            continue;
        };
        let client = WebSocketClient { inner: this };
        handler.handle_frame(&frame, &client).await;
    }
}

fn validate_url(url: &str) -> Result<(), ClientError> {
    let uri: Uri = url.parse().map_err(|_| ClientError::InvalidUrl(url.to_owned()))?;
    match uri.scheme_str() {
        Some("ws" | "wss") if uri.host().is_some_and(|h| !h.is_empty()) => Ok(()),
        _ => Err(ClientError::InvalidUrl(url.to_owned())),
    }
}

fn connection_id_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn tag(mut map: Map<String, Value>) -> Map<String, Value> {
    let _ = map.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
    map
}

fn envelope(data: Value) -> Option<String> {
    let tagged = match data {
        Value::Object(map) => Value::Object(tag(map)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Value::Object(tag(map)),
                    other => other,
                })
                .collect(),
        ),
        _ => return None,
    };
    Some(tagged.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn accepts_ws_and_wss() {
        assert!(WebSocketClient::new("ws://x", ClientConfig::default()).is_ok());
        assert!(WebSocketClient::new("wss://example.com/rpc", ClientConfig::default()).is_ok());
        assert!(
            WebSocketClient::new("ws://127.0.0.1:9000/ws?token=a", ClientConfig::default()).is_ok()
        );
    }

    #[test]
    fn rejects_other_schemes() {
        for url in ["http://x", "https://x", "x", "", "ws://", "ftp://host/ws"] {
            assert_matches!(
                WebSocketClient::new(url, ClientConfig::default()),
                Err(ClientError::InvalidUrl(u)) if u == url,
                "url {url:?}"
            );
        }
    }

    #[test]
    fn envelope_tags_objects_and_batches() {
        let single: Value =
            serde_json::from_str(&envelope(json!({"method": "test"})).unwrap()).unwrap();
        assert_eq!(single, json!({"jsonrpc": "2.0", "method": "test"}));

        let frame = envelope(json!([{"method": "a"}, {"method": "b", "id": 1}])).unwrap();
        let batch: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            batch,
            json!([
                {"jsonrpc": "2.0", "method": "a"},
                {"jsonrpc": "2.0", "method": "b", "id": 1}
            ])
        );

        assert!(envelope(json!("text")).is_none());
        assert!(envelope(json!(3)).is_none());
    }

    #[test]
    fn connection_id_accepts_strings_and_numbers() {
        assert_eq!(connection_id_from(&json!("abc")), Some("abc".into()));
        assert_eq!(connection_id_from(&json!(42)), Some("42".into()));
        assert_eq!(connection_id_from(&json!("")), None);
        assert_eq!(connection_id_from(&json!(null)), None);
    }

    #[tokio::test]
    async fn send_before_connect_returns_false() {
        let client = WebSocketClient::new("ws://127.0.0.1:1", ClientConfig::default()).unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.ready_state(), ReadyState::Closed);
        assert!(!client.send(json!({"method": "test"}), false).await);
        assert_matches!(client.send_frame("{}".into()).await, Err(ClientError::NotConnected));
    }

    #[tokio::test]
    async fn alternate_without_factory_returns_false() {
        let client = WebSocketClient::new("ws://127.0.0.1:1", ClientConfig::default()).unwrap();
        assert!(!client.send(json!({"method": "test"}), true).await);
    }

    #[tokio::test]
    async fn non_object_payload_is_refused() {
        let client = WebSocketClient::new("ws://127.0.0.1:1", ClientConfig::default()).unwrap();
        assert!(!client.send(json!(null), false).await);
    }

    #[test]
    fn disconnect_without_socket_is_harmless() {
        let client = WebSocketClient::new("ws://x", ClientConfig::default()).unwrap();
        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[test]
    fn only_server_connected_notifications_are_intercepted() {
        let client = WebSocketClient::new("ws://x", ClientConfig::default()).unwrap();
        let inner = &client.inner;
        let note = json!({
            "jsonrpc": "2.0",
            "method": "server.connected",
            "params": {"connectionId": "c-9"}
        });

        let mut with_id = note.clone();
        with_id["id"] = json!(1);
        let mut without_version = note.clone();
        let _ = without_version.as_object_mut().unwrap().remove("jsonrpc");
        let mut without_id_param = note.clone();
        without_id_param["params"] = json!({});
        let batched = json!([note.clone()]);

        for frame in [with_id, without_version, without_id_param, batched] {
            assert!(!inner.intercept_connected(frame.to_string().as_bytes()), "{frame}");
        }
        assert!(!inner.intercept_connected(b"not json"));
        assert_eq!(client.connection_id(), None);

        assert!(inner.intercept_connected(note.to_string().as_bytes()));
        assert_eq!(client.connection_id().as_deref(), Some("c-9"));
    }

    #[test]
    fn clones_share_state() {
        let client = WebSocketClient::new("ws://x", ClientConfig::default()).unwrap();
        let other = client.clone();
        *client.inner.connection_id.write() = Some("c-1".into());
        assert_eq!(other.connection_id().as_deref(), Some("c-1"));
        assert_eq!(other.url(), "ws://x");
    }
}
