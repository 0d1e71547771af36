//! Write strategies.
//!
//! Both send paths of the client go through [`FrameWriter`]: the primary
//! socket uses a [`SocketWriter`] created on every (re)connect, and the
//! alternate stream is produced once, on first use, by a
//! [`StreamWriterFactory`]. Either path can be replaced without touching the
//! other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::errors::ClientError;
use crate::state::{ReadyState, SharedReadyState};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Destination for serialized text frames.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Queue one text frame.
    async fn write_frame(&self, frame: String) -> Result<(), ClientError>;

    /// Current socket state.
    fn ready_state(&self) -> ReadyState;

    /// Whether frames can be written.
    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }
}

/// Creates the alternate write path.
#[async_trait]
pub trait StreamWriterFactory: Send + Sync {
    /// Open a writer. `url` is the client's endpoint.
    async fn create(&self, url: &str) -> Result<Arc<dyn FrameWriter>, ClientError>;
}

/// Writer backed by a task that owns the sink half of a WebSocket.
#[derive(Clone)]
pub struct SocketWriter {
    tx: mpsc::UnboundedSender<WsMessage>,
    ready: Arc<SharedReadyState>,
}

impl SocketWriter {
    /// Spawn the writer task for `sink`. The writer starts `Open`.
    pub(crate) fn spawn<S>(sink: S) -> Self
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let ready = Arc::new(SharedReadyState::new(ReadyState::Open));
        let _task = tokio::spawn(write_loop(sink, rx, ready.clone()));
        Self { tx, ready }
    }

    /// Queue a close frame. Later writes fail.
    pub(crate) fn close(&self, code: CloseCode, reason: &'static str) {
        if matches!(self.ready.get(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.ready.set(ReadyState::Closing);
        let _ = self.tx.send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }

    pub(crate) fn mark_closed(&self) {
        self.ready.set(ReadyState::Closed);
    }
}

#[async_trait]
impl FrameWriter for SocketWriter {
    async fn write_frame(&self, frame: String) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.tx
            .send(WsMessage::Text(frame.into()))
            .map_err(|_| ClientError::NotConnected)
    }

    fn ready_state(&self) -> ReadyState {
        self.ready.get()
    }
}

impl std::fmt::Debug for SocketWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketWriter")
            .field("ready", &self.ready.get())
            .finish_non_exhaustive()
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<WsMessage>,
    ready: Arc<SharedReadyState>,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    while let Some(message) = rx.recv().await {
        let closing = message.is_close();
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "websocket write failed");
            break;
        }
        if closing {
            trace!("close frame written");
            break;
        }
    }
    ready.set(ReadyState::Closed);
}

/// Open a WebSocket, optionally bounded by `timeout`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) async fn open_socket(
    url: &str,
    timeout: Option<Duration>,
) -> Result<WsStream, ClientError> {
    let connecting = connect_async(url);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                timeout_ms: limit.as_millis() as u64,
            })?,
        None => connecting.await,
    };
    let (ws, _response) = result.map_err(|e| ClientError::Connect(e.to_string()))?;
    Ok(ws)
}

/// Opens a second, write-only WebSocket as the alternate stream.
///
/// Inbound frames on the secondary socket are read and discarded so control
/// frames keep flowing.
#[derive(Clone, Debug, Default)]
pub struct SecondarySocketFactory {
    url: Option<String>,
    connect_timeout: Option<Duration>,
}

impl SecondarySocketFactory {
    /// Factory that connects to the client's own URL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to `url` instead of the client's URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Bound the handshake.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl StreamWriterFactory for SecondarySocketFactory {
    async fn create(&self, url: &str) -> Result<Arc<dyn FrameWriter>, ClientError> {
        let target = self.url.as_deref().unwrap_or(url);
        let ws = open_socket(target, self.connect_timeout).await?;
        let (sink, mut stream) = ws.split();
        let writer = SocketWriter::spawn(sink);

        let ready = writer.ready.clone();
        let _drain = tokio::spawn(async move {
            while let Some(Ok(_frame)) = stream.next().await {}
            ready.set(ReadyState::Closed);
        });

        debug!(url = target, "alternate stream opened");
        Ok(Arc::new(writer))
    }
}
