//! Caller-side specialization: each operation hands out a future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::{OperationError, PendingError};
use crate::registry::{
    AddOptions, OperationHooks, OperationKind, OperationPayload, PendingOperationRegistry,
    RegistryConfig,
};
use crate::stats::RegistryStats;

/// Sending half of a promise operation.
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T, OperationError>>,
}

impl<T: Send + 'static> OperationPayload for Completer<T> {
    type Output = T;
    const KIND: OperationKind = OperationKind::Promise;

    fn settle(self, outcome: Result<T, OperationError>) {
        // Receiver may have been dropped by a caller that stopped waiting.
        let _ = self.tx.send(outcome);
    }
}

/// Future resolving when the matching operation settles.
///
/// Resolves to [`OperationError::Dropped`] if the operation was removed
/// without settling.
#[must_use = "a pending result does nothing unless awaited"]
pub struct PendingResult<T> {
    id: String,
    rx: oneshot::Receiver<Result<T, OperationError>>,
}

impl<T> PendingResult<T> {
    /// Id of the operation this future waits on.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T, OperationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(OperationError::Dropped {
                id: self.id.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult").field("id", &self.id).finish()
    }
}

/// Registry of operations that each settle a [`PendingResult`].
pub struct PromiseOperations<T: Send + 'static = Value> {
    registry: PendingOperationRegistry<Completer<T>>,
}

impl<T: Send + 'static> PromiseOperations<T> {
    /// Create with the given config and no hooks.
    pub fn new(config: RegistryConfig) -> Result<Self, PendingError> {
        Ok(Self {
            registry: PendingOperationRegistry::new(config)?,
        })
    }

    /// Wrap a fully configured registry.
    pub fn from_registry(registry: PendingOperationRegistry<Completer<T>>) -> Self {
        Self { registry }
    }

    /// Create with lifecycle hooks.
    pub fn with_hooks(
        config: RegistryConfig,
        hooks: OperationHooks<Completer<T>>,
    ) -> Result<Self, PendingError> {
        Ok(Self {
            registry: PendingOperationRegistry::with_hooks(config, hooks)?,
        })
    }

    /// Register an operation and return its id and result future.
    pub fn add(&self, options: AddOptions) -> Result<(String, PendingResult<T>), PendingError> {
        let (tx, rx) = oneshot::channel();
        let id = self.registry.add(Completer { tx }, options)?;
        Ok((id.clone(), PendingResult { id, rx }))
    }

    /// Fulfil the future for `id`.
    pub fn resolve(&self, id: &str, value: T) -> bool {
        self.registry.resolve(id, value)
    }

    /// Fail the future for `id`.
    pub fn reject(&self, id: &str, error: OperationError) -> bool {
        self.registry.reject(id, error)
    }

    /// Drop `id` without settling; its future yields [`OperationError::Dropped`].
    pub fn remove(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Number of outstanding operations.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// See [`PendingOperationRegistry::cleanup_expired`].
    pub fn cleanup_expired(&self) -> usize {
        self.registry.cleanup_expired()
    }

    /// See [`PendingOperationRegistry::get_stats`].
    pub fn get_stats(&self) -> RegistryStats {
        self.registry.get_stats()
    }

    /// Reject every outstanding future with `reason`.
    pub fn destroy(&self, reason: &str) {
        self.registry.destroy(reason);
    }

    /// Underlying registry.
    pub fn registry(&self) -> &PendingOperationRegistry<Completer<T>> {
        &self.registry
    }
}

impl<T: Send + 'static> std::fmt::Debug for PromiseOperations<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PromiseOperations").field(&self.registry).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;

    fn ops() -> PromiseOperations {
        PromiseOperations::new(RegistryConfig::named("promises")).unwrap()
    }

    #[tokio::test]
    async fn resolve_fulfils_future() {
        let ops = ops();
        let (id, fut) = ops.add(AddOptions::default()).unwrap();
        assert_eq!(fut.id(), id);
        assert!(ops.resolve(&id, json!({"ok": true})));
        assert_eq!(fut.await.unwrap(), json!({"ok": true}));
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn reject_fails_future() {
        let ops = ops();
        let (id, fut) = ops.add(AddOptions::default()).unwrap();
        assert!(ops.reject(&id, OperationError::Rejected("boom".into())));
        assert_eq!(fut.await.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn remove_yields_dropped() {
        let ops = ops();
        let (id, fut) = ops.add(AddOptions::with_id("r1")).unwrap();
        assert!(ops.remove(&id));
        assert_matches!(fut.await, Err(OperationError::Dropped { id }) if id == "r1");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let ops = ops();
        let (_id, fut) = ops
            .add(AddOptions::with_timeout(Duration::from_millis(100)))
            .unwrap();
        assert_matches!(fut.await, Err(OperationError::Timeout { timeout_ms: 100 }));
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn destroy_rejects_with_reason() {
        let ops = ops();
        let (_a, fa) = ops.add(AddOptions::default()).unwrap();
        let (_b, fb) = ops.add(AddOptions::default()).unwrap();
        ops.destroy("engine gone");
        for fut in [fa, fb] {
            let err = fut.await.unwrap_err();
            assert_eq!(err, OperationError::Destroyed("engine gone".into()));
        }
    }

    #[tokio::test]
    async fn dropped_future_does_not_break_resolve() {
        let ops = ops();
        let (id, fut) = ops.add(AddOptions::default()).unwrap();
        drop(fut);
        assert!(ops.resolve(&id, json!(1)));
    }

    #[tokio::test]
    async fn stats_count_promise_kind() {
        let ops = ops();
        let _ = ops.add(AddOptions::default()).unwrap();
        let stats = ops.get_stats();
        assert_eq!(stats.by_kind.promise, 1);
        assert_eq!(stats.by_kind.data, 0);
    }
}
