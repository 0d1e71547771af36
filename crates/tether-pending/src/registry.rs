//! Generic pending-operation registry.
//!
//! Each operation owns exactly one timer task (unless its timeout is zero).
//! Every settle path removes the entry from the map under the lock before
//! anything else runs, so an operation settles at most once. Hooks and
//! payload settlement run after the lock is released, which lets hooks call
//! back into the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_core::ids::SharedIdGenerator;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::errors::{OperationError, PendingError};
use crate::stats::{EXPIRING_SOON_WINDOW, RegistryStats};

/// Default timeout applied when `add` is called without one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Which specialization an operation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    /// Settles a future handed to the caller.
    Promise,
    /// Holds arbitrary data; settlement is observed via hooks.
    Data,
}

/// Kind-specific state stored with each operation.
pub trait OperationPayload: Send + 'static {
    /// Value an operation resolves with.
    type Output: Send + 'static;

    /// Kind reported in stats.
    const KIND: OperationKind;

    /// Deliver the final outcome. Called at most once.
    fn settle(self, outcome: Result<Self::Output, OperationError>);
}

/// A tracked operation, as seen by hooks.
pub struct PendingOperation<P> {
    /// Operation id.
    pub id: String,
    /// Monotonic creation time.
    pub created_at: Instant,
    /// Wall-clock creation time, for reporting.
    pub created_at_utc: DateTime<Utc>,
    /// Zero means the operation never expires on its own.
    pub timeout: Duration,
    /// Kind-specific payload.
    pub payload: P,
}

impl<P> PendingOperation<P> {
    /// Whether `now` is at or past this operation's deadline.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        !self.timeout.is_zero() && self.created_at + self.timeout <= now
    }

    /// Timeout in whole milliseconds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl<P> fmt::Debug for PendingOperation<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("created_at_utc", &self.created_at_utc)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hooks
// ─────────────────────────────────────────────────────────────────────────────

type OpHook<P> = Arc<dyn Fn(&PendingOperation<P>) + Send + Sync>;
type ResolveHook<P> =
    Arc<dyn Fn(&PendingOperation<P>, &<P as OperationPayload>::Output) + Send + Sync>;
type RejectHook<P> = Arc<dyn Fn(&PendingOperation<P>, &OperationError) + Send + Sync>;

/// Optional lifecycle callbacks.
///
/// On expiry `on_timeout` fires first, then the reject path (`on_reject`).
/// `destroy` goes through the reject path for every outstanding operation.
pub struct OperationHooks<P: OperationPayload> {
    on_timeout: Option<OpHook<P>>,
    on_resolve: Option<ResolveHook<P>>,
    on_reject: Option<RejectHook<P>>,
    on_cleanup: Option<OpHook<P>>,
}

impl<P: OperationPayload> OperationHooks<P> {
    /// No callbacks.
    pub fn new() -> Self {
        Self {
            on_timeout: None,
            on_resolve: None,
            on_reject: None,
            on_cleanup: None,
        }
    }

    /// Called when an operation expires, before it is rejected.
    #[must_use]
    pub fn on_timeout(mut self, f: impl Fn(&PendingOperation<P>) + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    /// Called when an operation resolves.
    #[must_use]
    pub fn on_resolve(
        mut self,
        f: impl Fn(&PendingOperation<P>, &P::Output) + Send + Sync + 'static,
    ) -> Self {
        self.on_resolve = Some(Arc::new(f));
        self
    }

    /// Called when an operation is rejected (explicitly, by expiry, or by destroy).
    #[must_use]
    pub fn on_reject(
        mut self,
        f: impl Fn(&PendingOperation<P>, &OperationError) + Send + Sync + 'static,
    ) -> Self {
        self.on_reject = Some(Arc::new(f));
        self
    }

    /// Called when an operation is removed without settling.
    #[must_use]
    pub fn on_cleanup(mut self, f: impl Fn(&PendingOperation<P>) + Send + Sync + 'static) -> Self {
        self.on_cleanup = Some(Arc::new(f));
        self
    }
}

impl<P: OperationPayload> Default for OperationHooks<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Registry configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Name used in logs and in the destroyed error.
    pub name: String,
    /// Timeout for operations added without one. Must be greater than zero.
    pub default_timeout_ms: u64,
    /// Interval of the background expiry sweep; `None` disables it.
    pub auto_cleanup_interval_ms: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "PendingOperations".into(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            auto_cleanup_interval_ms: None,
        }
    }
}

impl RegistryConfig {
    /// Config with the given name and defaults otherwise.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Reject a zero default timeout or a zero sweep interval.
    pub fn validate(&self) -> Result<(), PendingError> {
        if self.default_timeout_ms == 0 {
            return Err(PendingError::InvalidConfig(
                "defaultTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.auto_cleanup_interval_ms == Some(0) {
            return Err(PendingError::InvalidConfig(
                "autoCleanupIntervalMs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Default timeout as a `Duration`.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Per-call options for `add`.
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    /// Overrides the default timeout. `Some(Duration::ZERO)` disables expiry.
    pub timeout: Option<Duration>,
    /// Use this id instead of generating one.
    pub custom_id: Option<String>,
}

impl AddOptions {
    /// Options with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            custom_id: None,
        }
    }

    /// Options with a custom id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            timeout: None,
            custom_id: Some(id.into()),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the custom id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.custom_id = Some(id.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct Entry<P> {
    op: PendingOperation<P>,
    /// Distinguishes reuses of the same id so a stale timer never expires a newer entry.
    seq: u64,
    timer: Option<JoinHandle<()>>,
}

impl<P> Entry<P> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner<P: OperationPayload> {
    config: RegistryConfig,
    hooks: OperationHooks<P>,
    ids: SharedIdGenerator,
    ops: Mutex<HashMap<String, Entry<P>>>,
    seq: AtomicU64,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl<P: OperationPayload> Inner<P> {
    fn take(&self, id: &str) -> Option<PendingOperation<P>> {
        let mut entry = self.ops.lock().remove(id)?;
        entry.cancel_timer();
        Some(entry.op)
    }

    fn resolve_op(&self, op: PendingOperation<P>, value: P::Output) {
        trace!(registry = %self.config.name, id = %op.id, "operation resolved");
        if let Some(hook) = &self.hooks.on_resolve {
            hook(&op, &value);
        }
        op.payload.settle(Ok(value));
    }

    fn reject_op(&self, op: PendingOperation<P>, error: OperationError) {
        debug!(registry = %self.config.name, id = %op.id, error = %error, "operation rejected");
        if let Some(hook) = &self.hooks.on_reject {
            hook(&op, &error);
        }
        op.payload.settle(Err(error));
    }

    fn time_out_op(&self, op: PendingOperation<P>) {
        let timeout_ms = op.timeout_ms();
        warn!(registry = %self.config.name, id = %op.id, timeout_ms, "operation timed out");
        if let Some(hook) = &self.hooks.on_timeout {
            hook(&op);
        }
        self.reject_op(op, OperationError::Timeout { timeout_ms });
    }

    /// Timer callback. Only expires the entry the timer was created for.
    fn expire(&self, id: &str, seq: u64) {
        let op = {
            let mut ops = self.ops.lock();
            match ops.get(id) {
                Some(entry) if entry.seq == seq => ops.remove(id).map(|e| e.op),
                _ => None,
            }
        };
        if let Some(op) = op {
            self.time_out_op(op);
        }
    }

    fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PendingOperation<P>> = {
            let mut ops = self.ops.lock();
            let ids: Vec<String> = ops
                .values()
                .filter(|e| e.op.is_expired_at(now))
                .map(|e| e.op.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| ops.remove(id))
                .map(|mut e| {
                    e.cancel_timer();
                    e.op
                })
                .collect()
        };

        let count = expired.len();
        for op in expired {
            self.time_out_op(op);
        }
        if count > 0 {
            debug!(registry = %self.config.name, count, "expired operations cleaned up");
        }
        count
    }

    fn stop_auto_cleanup(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
    }
}

impl<P: OperationPayload> Drop for Inner<P> {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.get_mut().take() {
            task.abort();
        }
        for entry in self.ops.get_mut().values_mut() {
            entry.cancel_timer();
        }
    }
}

/// Map of operation id → pending operation, with expiry.
pub struct PendingOperationRegistry<P: OperationPayload> {
    inner: Arc<Inner<P>>,
}

impl<P: OperationPayload> PendingOperationRegistry<P> {
    /// Create a registry with random UUID ids and no hooks.
    pub fn new(config: RegistryConfig) -> Result<Self, PendingError> {
        Self::with_parts(config, OperationHooks::new(), SharedIdGenerator::default())
    }

    /// Create a registry with hooks.
    pub fn with_hooks(
        config: RegistryConfig,
        hooks: OperationHooks<P>,
    ) -> Result<Self, PendingError> {
        Self::with_parts(config, hooks, SharedIdGenerator::default())
    }

    /// Create a registry with hooks and a custom id generator.
    ///
    /// Starts the background sweep when `auto_cleanup_interval_ms` is set and
    /// a tokio runtime is available.
    pub fn with_parts(
        config: RegistryConfig,
        hooks: OperationHooks<P>,
        ids: SharedIdGenerator,
    ) -> Result<Self, PendingError> {
        config.validate()?;
        let interval = config.auto_cleanup_interval_ms;
        let registry = Self {
            inner: Arc::new(Inner {
                config,
                hooks,
                ids,
                ops: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                cleanup_task: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        };
        if let Some(ms) = interval {
            registry.start_auto_cleanup(Duration::from_millis(ms));
        }
        Ok(registry)
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Track a new operation and start its timer.
    ///
    /// Fails with [`PendingError::DuplicateId`] if `custom_id` is already
    /// tracked (the existing operation is untouched) and with
    /// [`PendingError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn add(&self, payload: P, options: AddOptions) -> Result<String, PendingError> {
        let id = options
            .custom_id
            .unwrap_or_else(|| self.inner.ids.next_id());
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.default_timeout());

        let mut ops = self.inner.ops.lock();
        // checked under the lock so a concurrent destroy cannot miss this entry
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(PendingError::Destroyed(self.inner.config.name.clone()));
        }
        if ops.contains_key(&id) {
            return Err(PendingError::DuplicateId(id));
        }

        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let timer = self.spawn_timer(&id, seq, timeout);
        let _ = ops.insert(
            id.clone(),
            Entry {
                op: PendingOperation {
                    id: id.clone(),
                    created_at: Instant::now(),
                    created_at_utc: Utc::now(),
                    timeout,
                    payload,
                },
                seq,
                timer,
            },
        );
        drop(ops);

        debug!(
            registry = %self.inner.config.name,
            id = %id,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "operation added"
        );
        Ok(id)
    }

    fn spawn_timer(&self, id: &str, seq: u64, timeout: Duration) -> Option<JoinHandle<()>> {
        if timeout.is_zero() {
            return None;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                registry = %self.inner.config.name,
                id,
                "no tokio runtime; operation relies on cleanup_expired for expiry"
            );
            return None;
        };
        let weak: Weak<Inner<P>> = Arc::downgrade(&self.inner);
        let id = id.to_owned();
        Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&id, seq);
            }
        }))
    }

    /// Resolve an operation. Returns `false` if the id is unknown.
    pub fn resolve(&self, id: &str, value: P::Output) -> bool {
        let Some(op) = self.inner.take(id) else {
            trace!(registry = %self.inner.config.name, id, "resolve for unknown operation");
            return false;
        };
        self.inner.resolve_op(op, value);
        true
    }

    /// Reject an operation. Returns `false` if the id is unknown.
    pub fn reject(&self, id: &str, error: OperationError) -> bool {
        let Some(op) = self.inner.take(id) else {
            trace!(registry = %self.inner.config.name, id, "reject for unknown operation");
            return false;
        };
        self.inner.reject_op(op, error);
        true
    }

    /// Drop an operation without settling it. Fires `on_cleanup`.
    pub fn remove(&self, id: &str) -> bool {
        let Some(op) = self.inner.take(id) else {
            return false;
        };
        debug!(registry = %self.inner.config.name, id, "operation removed");
        if let Some(hook) = &self.inner.hooks.on_cleanup {
            hook(&op);
        }
        true
    }

    /// Time out every operation whose deadline has passed. Returns the count.
    pub fn cleanup_expired(&self) -> usize {
        self.inner.cleanup_expired()
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.ops.lock().contains_key(id)
    }

    /// Number of tracked operations.
    pub fn len(&self) -> usize {
        self.inner.ops.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.ops.lock().is_empty()
    }

    /// Ids of all tracked operations (sorted).
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.ops.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `f` against a tracked operation without removing it.
    pub fn with_operation<U>(
        &self,
        id: &str,
        f: impl FnOnce(&PendingOperation<P>) -> U,
    ) -> Option<U> {
        self.inner.ops.lock().get(id).map(|entry| f(&entry.op))
    }

    /// Snapshot of registry statistics.
    pub fn get_stats(&self) -> RegistryStats {
        let now = Instant::now();
        let ops = self.inner.ops.lock();
        let mut stats = RegistryStats::default();
        let mut total_age_ms = 0.0_f64;

        for entry in ops.values() {
            let op = &entry.op;
            stats.total += 1;
            stats.by_kind.increment(P::KIND);
            if !op.timeout.is_zero() {
                let deadline = op.created_at + op.timeout;
                if deadline.saturating_duration_since(now) <= EXPIRING_SOON_WINDOW {
                    stats.expiring_soon += 1;
                }
            }
            total_age_ms += now.saturating_duration_since(op.created_at).as_secs_f64() * 1000.0;
            stats.oldest_created_at = Some(match stats.oldest_created_at {
                Some(oldest) if oldest <= op.created_at_utc => oldest,
                _ => op.created_at_utc,
            });
        }

        if stats.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            let total = stats.total as f64;
            stats.average_age_ms = total_age_ms / total;
        }
        stats
    }

    /// Start (or restart) the background expiry sweep.
    ///
    /// Requires a tokio runtime; without one this logs and does nothing.
    pub fn start_auto_cleanup(&self, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(registry = %self.inner.config.name, "no tokio runtime; auto cleanup not started");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            let _ = ticker.tick().await;
            loop {
                let _ = ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let _ = inner.cleanup_expired();
            }
        });
        if let Some(previous) = self.inner.cleanup_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop the background expiry sweep, if running.
    pub fn stop_auto_cleanup(&self) {
        self.inner.stop_auto_cleanup();
    }

    /// Whether the background sweep is running.
    pub fn is_auto_cleanup_running(&self) -> bool {
        self.inner
            .cleanup_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Reject every outstanding operation with `reason`, clear all timers,
    /// and stop the sweep. Safe to call more than once.
    pub fn destroy(&self, reason: &str) {
        self.inner.stop_auto_cleanup();

        let drained: Vec<PendingOperation<P>> = {
            let mut ops = self.inner.ops.lock();
            self.inner.destroyed.store(true, Ordering::Release);
            ops.drain()
                .map(|(_, mut e)| {
                    e.cancel_timer();
                    e.op
                })
                .collect()
        };

        if !drained.is_empty() {
            info!(
                registry = %self.inner.config.name,
                count = drained.len(),
                reason,
                "rejecting outstanding operations"
            );
        }
        for op in drained {
            self.inner
                .reject_op(op, OperationError::Destroyed(reason.to_owned()));
        }
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }
}

impl<P: OperationPayload> fmt::Debug for PendingOperationRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperationRegistry")
            .field("name", &self.inner.config.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
