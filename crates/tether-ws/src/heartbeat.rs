//! Keep-alive pings.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::writer::FrameWriter;

/// Method name of the heartbeat notification.
pub const PING_METHOD: &str = "ping";

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The heartbeat was cancelled externally.
    Cancelled,
    /// The socket stopped accepting frames.
    WriterClosed,
}

pub(crate) fn ping_frame() -> String {
    serde_json::json!({"jsonrpc": "2.0", "method": PING_METHOD}).to_string()
}

/// Send a `ping` notification through `writer` every `interval`.
///
/// The first ping goes out one full interval after start. The loop ends when
/// `cancel` fires or a write fails.
pub async fn run_heartbeat(
    writer: Arc<dyn FrameWriter>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            _ = ticker.tick() => {
                if let Err(e) = writer.write_frame(ping_frame()).await {
                    debug!(error = %e, "heartbeat stopped");
                    return HeartbeatResult::WriterClosed;
                }
                trace!("heartbeat ping sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use crate::state::ReadyState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingWriter {
        frames: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl FrameWriter for RecordingWriter {
        async fn write_frame(&self, frame: String) -> Result<(), ClientError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::NotConnected);
            }
            self.frames.lock().push(frame);
            Ok(())
        }

        fn ready_state(&self) -> ReadyState {
            if self.closed.load(Ordering::SeqCst) {
                ReadyState::Closed
            } else {
                ReadyState::Open
            }
        }
    }

    #[test]
    fn ping_is_a_notification() {
        let frame: Value = serde_json::from_str(&ping_frame()).unwrap();
        assert_eq!(frame, json!({"jsonrpc": "2.0", "method": "ping"}));
    }

    #[tokio::test(start_paused = true)]
    async fn pings_once_per_interval() {
        let writer = Arc::new(RecordingWriter::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            writer.clone(),
            Duration::from_millis(100),
            cancel.clone(),
        ));

        time::sleep(Duration::from_millis(50)).await;
        assert!(writer.frames.lock().is_empty());

        time::sleep(Duration::from_millis(260)).await;
        assert_eq!(writer.frames.lock().len(), 3);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_writer_closes() {
        let writer = Arc::new(RecordingWriter::default());
        writer.closed.store(true, Ordering::SeqCst);

        let result =
            run_heartbeat(writer.clone(), Duration::from_millis(10), CancellationToken::new())
                .await;
        assert_eq!(result, HeartbeatResult::WriterClosed);
        assert!(writer.frames.lock().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_first_tick() {
        let writer = Arc::new(RecordingWriter::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_heartbeat(writer.clone(), Duration::from_secs(60), cancel).await;
        assert_eq!(result, HeartbeatResult::Cancelled);
        assert!(writer.frames.lock().is_empty());
    }
}
