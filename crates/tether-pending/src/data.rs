//! Server-side specialization: each operation stores arbitrary data.
//!
//! Nothing is awaited; settlement is observed through the registry hooks.

use std::marker::PhantomData;

use serde_json::Value;

use crate::errors::{OperationError, PendingError};
use crate::registry::{
    AddOptions, OperationHooks, OperationKind, OperationPayload, PendingOperationRegistry,
    RegistryConfig,
};
use crate::stats::RegistryStats;

/// Data stored with a data operation. `R` is the type it resolves with.
pub struct DataPayload<D, R = Value> {
    /// Caller-supplied data.
    pub data: D,
    _resolves: PhantomData<fn() -> R>,
}

impl<D, R> DataPayload<D, R> {
    /// Wrap `data`.
    pub fn new(data: D) -> Self {
        Self {
            data,
            _resolves: PhantomData,
        }
    }
}

impl<D: Send + 'static, R: Send + 'static> OperationPayload for DataPayload<D, R> {
    type Output = R;
    const KIND: OperationKind = OperationKind::Data;

    fn settle(self, _outcome: Result<R, OperationError>) {}
}

/// Registry of data operations.
pub struct DataOperations<D: Send + 'static, R: Send + 'static = Value> {
    registry: PendingOperationRegistry<DataPayload<D, R>>,
}

impl<D: Send + 'static, R: Send + 'static> DataOperations<D, R> {
    /// Create with the given config and no hooks.
    pub fn new(config: RegistryConfig) -> Result<Self, PendingError> {
        Ok(Self {
            registry: PendingOperationRegistry::new(config)?,
        })
    }

    /// Create with lifecycle hooks.
    pub fn with_hooks(
        config: RegistryConfig,
        hooks: OperationHooks<DataPayload<D, R>>,
    ) -> Result<Self, PendingError> {
        Ok(Self {
            registry: PendingOperationRegistry::with_hooks(config, hooks)?,
        })
    }

    /// Store `data` under a new operation id.
    pub fn add(&self, data: D, options: AddOptions) -> Result<String, PendingError> {
        self.registry.add(DataPayload::new(data), options)
    }

    /// Inspect the data for `id` without removing it.
    pub fn data<U>(&self, id: &str, f: impl FnOnce(&D) -> U) -> Option<U> {
        self.registry.with_operation(id, |op| f(&op.payload.data))
    }

    /// Resolve `id`; fires `on_resolve`.
    pub fn resolve(&self, id: &str, value: R) -> bool {
        self.registry.resolve(id, value)
    }

    /// Reject `id`; fires `on_reject`.
    pub fn reject(&self, id: &str, error: OperationError) -> bool {
        self.registry.reject(id, error)
    }

    /// Drop `id`; fires `on_cleanup`.
    pub fn remove(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Number of tracked operations.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether nothing is tracked.
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

    /// Reject every tracked operation with `reason`.
    pub fn destroy(&self, reason: &str) {
        self.registry.destroy(reason);
    }
}

impl<D: Clone + Send + 'static, R: Send + 'static> DataOperations<D, R> {
    /// Clone of the data stored for `id`.
    pub fn get(&self, id: &str) -> Option<D> {
        self.data(id, D::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::registry::PendingOperation;

    #[derive(Clone, Debug, PartialEq)]
    struct Ctx {
        connection: String,
    }

    #[tokio::test]
    async fn stores_and_returns_data() {
        let ops: DataOperations<Ctx> = DataOperations::new(RegistryConfig::default()).unwrap();
        let id = ops
            .add(Ctx { connection: "c1".into() }, AddOptions::default())
            .unwrap();
        assert_eq!(ops.get(&id), Some(Ctx { connection: "c1".into() }));
        assert_eq!(ops.data(&id, |d| d.connection.len()), Some(2));
        assert_eq!(ops.get("missing"), None);
    }

    #[tokio::test]
    async fn resolve_fires_hook_with_data() {
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let sink = seen.clone();
        let hooks = OperationHooks::<DataPayload<Ctx>>::new().on_resolve(
            move |op: &PendingOperation<DataPayload<Ctx>>, value| {
                sink.lock().push((op.payload.data.connection.clone(), value.clone()));
            },
        );
        let ops = DataOperations::with_hooks(RegistryConfig::default(), hooks).unwrap();
        let id = ops
            .add(Ctx { connection: "c9".into() }, AddOptions::default())
            .unwrap();

        assert!(ops.resolve(&id, json!("done")));
        assert!(!ops.contains(&id));
        assert_eq!(seen.lock().as_slice(), &[("c9".to_owned(), json!("done"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_runs_timeout_then_reject_hooks() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let on_timeout = order.clone();
        let on_reject = order.clone();
        let hooks = OperationHooks::<DataPayload<u32>>::new()
            .on_timeout(move |_op| on_timeout.lock().push("timeout"))
            .on_reject(move |_op, err| {
                assert!(err.is_timeout());
                on_reject.lock().push("reject");
            });
        let ops = DataOperations::with_hooks(RegistryConfig::default(), hooks).unwrap();
        let _ = ops
            .add(5, AddOptions::with_timeout(Duration::from_millis(20)))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(order.lock().as_slice(), &["timeout", "reject"]);
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn remove_fires_cleanup() {
        let cleaned: Arc<Mutex<Vec<u32>>> = Arc::default();
        let sink = cleaned.clone();
        let hooks = OperationHooks::<DataPayload<u32>>::new()
            .on_cleanup(move |op| sink.lock().push(op.payload.data));
        let ops = DataOperations::with_hooks(RegistryConfig::default(), hooks).unwrap();
        let id = ops.add(42, AddOptions::default()).unwrap();

        assert!(ops.remove(&id));
        assert!(!ops.remove(&id));
        assert_eq!(cleaned.lock().as_slice(), &[42]);
    }

    #[tokio::test]
    async fn stats_count_data_kind() {
        let ops: DataOperations<u8> = DataOperations::new(RegistryConfig::default()).unwrap();
        let _ = ops.add(1, AddOptions::default()).unwrap();
        let _ = ops.add(2, AddOptions::default()).unwrap();
        assert_eq!(ops.get_stats().by_kind.data, 2);
    }
}
