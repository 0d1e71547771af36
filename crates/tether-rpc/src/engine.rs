//! JSON-RPC engine.
//!
//! Inbound data enters through [`RpcEngine::validate_message`] (raw bytes) or
//! [`RpcEngine::dispatch`] (an already classified [`Message`]). Every inbound
//! message ends in at most one outbound reply:
//!
//! | Inbound | Reply |
//! |---|---|
//! | malformed JSON | `PARSE_ERROR`, `id: null` |
//! | invalid shape | `INVALID_REQUEST`, echoed id |
//! | request | result, or mapped handler error |
//! | notification | none, even on failure |
//! | response | none; settles the pending outbound call |
//! | batch | one array of request replies, or nothing |
//!
//! Outbound calls register a promise operation keyed by the request id and
//! settle when the matching response arrives, the timeout fires, or the
//! engine is destroyed.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::ids::{IdGenerator, SharedIdGenerator};
use tether_pending::{
    AddOptions, OperationError, PendingResult, PromiseOperations, RegistryConfig, RegistryStats,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::codes::ErrorCode;
use crate::context::RpcContext;
use crate::errors::{ErrorMapper, HandlerError, RpcError, default_error_mapper};
use crate::handler::{FnHandler, MethodHandler, MethodRegistry};
use crate::transport::Transport;
use crate::types::{
    ErrorObject, Message, MessageError, Notification, Request, RequestId, Response,
    ResponsePayload, classify,
};

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Name used in logs and in the destroy reason.
    pub name: String,
    /// Timeout for outbound calls made without one.
    pub default_timeout_ms: u64,
    /// Largest inbound batch processed; larger batches get one error.
    pub max_batch_size: usize,
    /// Maximum time a single handler may run; `0` disables the limit.
    pub handler_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "RpcEngine".into(),
            default_timeout_ms: 30_000,
            max_batch_size: 100,
            handler_timeout_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Default configuration under another name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            name: format!("{}.pending", self.name),
            default_timeout_ms: self.default_timeout_ms,
            auto_cleanup_interval_ms: None,
        }
    }

    fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_ms > 0).then(|| Duration::from_millis(self.handler_timeout_ms))
    }
}

/// Options for an outbound call.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Overrides the engine's default timeout. `Some(Duration::ZERO)` waits forever.
    pub timeout: Option<Duration>,
    /// Use this request id instead of generating one.
    pub custom_id: Option<String>,
    /// Context handed to the transport.
    pub context: RpcContext,
}

impl CallOptions {
    /// Options with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Options with a custom request id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            custom_id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// A sent request and the future for its response.
#[derive(Debug)]
pub struct OutboundCall {
    /// The request as sent.
    pub request: Message,
    /// Settles with the response result or an error.
    pub response: PendingResult<Value>,
}

impl OutboundCall {
    /// Request id.
    pub fn id(&self) -> &str {
        self.response.id()
    }
}

type CallHook = Arc<dyn Fn(&str, Option<&Value>, &RpcContext) + Send + Sync>;
type ResponseHook = Arc<dyn Fn(&str, &Value, &RpcContext) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str, &HandlerError, &RpcContext) + Send + Sync>;

/// Optional observers of inbound method dispatch.
#[derive(Clone, Default)]
pub struct EngineHooks {
    on_method_call: Option<CallHook>,
    on_method_response: Option<ResponseHook>,
    on_method_error: Option<ErrorHook>,
}

impl EngineHooks {
    /// Called before a handler runs.
    #[must_use]
    pub fn on_method_call(
        mut self,
        f: impl Fn(&str, Option<&Value>, &RpcContext) + Send + Sync + 'static,
    ) -> Self {
        self.on_method_call = Some(Arc::new(f));
        self
    }

    /// Called after a handler succeeds.
    #[must_use]
    pub fn on_method_response(
        mut self,
        f: impl Fn(&str, &Value, &RpcContext) + Send + Sync + 'static,
    ) -> Self {
        self.on_method_response = Some(Arc::new(f));
        self
    }

    /// Called after a handler fails or times out.
    #[must_use]
    pub fn on_method_error(
        mut self,
        f: impl Fn(&str, &HandlerError, &RpcContext) + Send + Sync + 'static,
    ) -> Self {
        self.on_method_error = Some(Arc::new(f));
        self
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    notifications: AtomicU64,
    responses: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of engine activity.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Engine name.
    pub name: String,
    /// Number of registered methods.
    pub registered_methods: usize,
    /// Outstanding outbound calls.
    pub pending: RegistryStats,
    /// Inbound requests dispatched.
    pub requests_handled: u64,
    /// Inbound notifications dispatched.
    pub notifications_handled: u64,
    /// Inbound responses matched to a pending call.
    pub responses_correlated: u64,
    /// Error responses sent.
    pub errors_sent: u64,
}

/// Transport-agnostic JSON-RPC 2.0 engine.
pub struct RpcEngine {
    config: EngineConfig,
    methods: RwLock<MethodRegistry>,
    pending: PromiseOperations<Value>,
    transport: Arc<dyn Transport>,
    hooks: EngineHooks,
    error_mapper: ErrorMapper,
    ids: SharedIdGenerator,
    counters: Counters,
}

impl RpcEngine {
    /// Create an engine that sends through `transport`.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self, RpcError> {
        if config.max_batch_size == 0 {
            return Err(tether_pending::PendingError::InvalidConfig(
                "maxBatchSize must be greater than 0".into(),
            )
            .into());
        }
        let pending = PromiseOperations::new(config.registry_config())?;
        Ok(Self {
            config,
            methods: RwLock::new(MethodRegistry::new()),
            pending,
            transport,
            hooks: EngineHooks::default(),
            error_mapper: Arc::new(default_error_mapper),
            ids: SharedIdGenerator::default(),
            counters: Counters::default(),
        })
    }

    /// Install dispatch hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: EngineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the handler-error → wire-error mapping.
    #[must_use]
    pub fn with_error_mapper(
        mut self,
        mapper: impl Fn(&HandlerError) -> ErrorObject + Send + Sync + 'static,
    ) -> Self {
        self.error_mapper = Arc::new(mapper);
        self
    }

    /// Replace the outbound request id generator.
    #[must_use]
    pub fn with_id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.ids = SharedIdGenerator::new(generator);
        self
    }

    /// Engine name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Method registry ─────────────────────────────────────────────

    /// Register a handler. Fails if `name` is already registered.
    pub fn register_method(
        &self,
        name: &str,
        handler: impl MethodHandler + 'static,
    ) -> Result<(), RpcError> {
        self.methods.write().register(name, Arc::new(handler))?;
        debug!(engine = %self.config.name, method = name, "method registered");
        Ok(())
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&self, name: &str, f: F) -> Result<(), RpcError>
    where
        F: Fn(Option<Value>, RpcContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register_method(name, FnHandler(f))
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister_method(&self, name: &str) -> bool {
        self.methods.write().unregister(name)
    }

    /// Registered method names (sorted).
    pub fn get_registered_methods(&self) -> Vec<String> {
        self.methods.read().methods()
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Entry point for raw inbound data.
    ///
    /// Parses, classifies, and dispatches `raw`, sends the reply (if any)
    /// through the transport, and returns it. Never fails: every problem
    /// with the input becomes an error reply.
    pub async fn validate_message(&self, raw: &[u8], ctx: &RpcContext) -> Option<Message> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => self.validate_value(value, ctx).await,
            Err(e) => {
                warn!(
                    engine = %self.config.name,
                    error = %e,
                    "inbound message is not valid JSON"
                );
                let reply = Message::Response(MessageError::Parse(e.to_string()).to_response());
                self.send_reply(Some(reply), ctx).await
            }
        }
    }

    /// Like [`validate_message`](Self::validate_message) for input that is
    /// already parsed JSON.
    ///
    /// Batch items are classified one by one, so an invalid item gets its own
    /// `INVALID_REQUEST` while its siblings are still answered.
    #[instrument(
        skip_all,
        fields(engine = %self.config.name, connection_id = ctx.connection_id.as_deref())
    )]
    pub async fn validate_value(&self, value: Value, ctx: &RpcContext) -> Option<Message> {
        let reply = match value {
            Value::Array(items) => {
                let items = items.into_iter().map(classify).collect();
                self.process_batch(items, ctx).await
            }
            value => match classify(value) {
                Ok(message) => self.process_single(message, ctx).await,
                Err(err) => Some(self.invalid_reply(&err)),
            },
        };
        self.send_reply(reply, ctx).await
    }

    /// Dispatch an already classified message and send the reply, if any.
    pub async fn dispatch(&self, message: Message, ctx: &RpcContext) -> Option<Message> {
        let reply = match message {
            Message::Batch(items) => {
                self.process_batch(items.into_iter().map(Ok).collect(), ctx)
                    .await
            }
            single => self.process_single(single, ctx).await,
        };
        self.send_reply(reply, ctx).await
    }

    async fn send_reply(&self, reply: Option<Message>, ctx: &RpcContext) -> Option<Message> {
        let reply = reply?;
        let errors = count_errors(&reply);
        if errors > 0 {
            let _ = self.counters.errors.fetch_add(errors, Ordering::Relaxed);
        }
        if let Err(err) = self.transport.send_message(&reply, ctx).await {
            warn!(engine = %self.config.name, error = %err, "failed to send reply");
        }
        Some(reply)
    }

    fn invalid_reply(&self, err: &MessageError) -> Message {
        debug!(engine = %self.config.name, error = %err, "invalid inbound message");
        Message::Response(err.to_response())
    }

    async fn process_batch(
        &self,
        items: Vec<Result<Message, MessageError>>,
        ctx: &RpcContext,
    ) -> Option<Message> {
        if items.is_empty() {
            return Some(Message::Response(Response::error(
                RequestId::Null,
                ErrorObject::new(ErrorCode::InvalidRequest, "Invalid Request: empty batch"),
            )));
        }
        if items.len() > self.config.max_batch_size {
            warn!(
                engine = %self.config.name,
                size = items.len(),
                max = self.config.max_batch_size,
                "batch rejected"
            );
            return Some(Message::Response(Response::error(
                RequestId::Null,
                ErrorObject::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "Batch size {} exceeds maximum of {}",
                        items.len(),
                        self.config.max_batch_size
                    ),
                ),
            )));
        }

        trace!(engine = %self.config.name, size = items.len(), "dispatching batch");
        let replies = join_all(items.into_iter().map(|item| async move {
            match item {
                Ok(message) => self.process_single(message, ctx).await,
                Err(err) => Some(self.invalid_reply(&err)),
            }
        }))
        .await;

        let replies: Vec<Message> = replies.into_iter().flatten().collect();
        (!replies.is_empty()).then_some(Message::Batch(replies))
    }

    async fn process_single(&self, message: Message, ctx: &RpcContext) -> Option<Message> {
        match message {
            Message::Request(request) => Some(Message::Response(
                self.handle_inbound_request(request, ctx).await,
            )),
            Message::Notification(notification) => {
                self.handle_inbound_notification(notification, ctx).await;
                None
            }
            Message::Response(response) => {
                self.correlate(response);
                None
            }
            Message::Batch(_) => Some(self.invalid_reply(&MessageError::Invalid {
                id: RequestId::Null,
                reason: "nested batch".into(),
            })),
        }
    }

    async fn handle_inbound_request(&self, request: Request, ctx: &RpcContext) -> Response {
        let _ = self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let Request { method, params, id } = request;

        let handler = self.methods.read().get(&method);
        let Some(handler) = handler else {
            debug!(engine = %self.config.name, method, "method not found");
            return Response::error(
                id,
                ErrorObject::new(ErrorCode::MethodNotFound, format!("Method '{method}' not found")),
            );
        };

        match self.run_handler(handler.as_ref(), &method, params, ctx).await {
            Ok(result) => Response::success(id, result),
            Err(err) => {
                warn!(engine = %self.config.name, method, error = %err, "handler failed");
                Response::error(id, (self.error_mapper)(&err))
            }
        }
    }

    async fn handle_inbound_notification(&self, notification: Notification, ctx: &RpcContext) {
        let _ = self.counters.notifications.fetch_add(1, Ordering::Relaxed);
        let Notification { method, params } = notification;

        let handler = self.methods.read().get(&method);
        let Some(handler) = handler else {
            trace!(
                engine = %self.config.name,
                method,
                "ignoring notification for unregistered method"
            );
            return;
        };

        if let Err(err) = self.run_handler(handler.as_ref(), &method, params, ctx).await {
            warn!(engine = %self.config.name, method, error = %err, "notification handler failed");
        }
    }

    async fn run_handler(
        &self,
        handler: &dyn MethodHandler,
        method: &str,
        params: Option<Value>,
        ctx: &RpcContext,
    ) -> Result<Value, HandlerError> {
        if let Some(hook) = &self.hooks.on_method_call {
            hook(method, params.as_ref(), ctx);
        }

        let guarded = AssertUnwindSafe(handler.handle(params, ctx)).catch_unwind();
        let outcome = match self.config.handler_timeout() {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    tracing::error!(
                        engine = %self.config.name,
                        method,
                        timeout_ms = self.config.handler_timeout_ms,
                        "handler timed out"
                    );
                    Ok(Err(HandlerError::with_code(
                        ErrorCode::Timeout,
                        format!(
                            "Handler for '{method}' timed out after {}ms",
                            self.config.handler_timeout_ms
                        ),
                    )
                    .error_type("TimeoutError")))
                }
            },
            None => guarded.await,
        };
        let result = outcome.unwrap_or_else(|_panic| {
            tracing::error!(engine = %self.config.name, method, "handler panicked");
            Err(HandlerError::with_code(
                ErrorCode::InternalError,
                format!("Handler for '{method}' panicked"),
            )
            .error_type("Panic"))
        });

        match &result {
            Ok(value) => {
                if let Some(hook) = &self.hooks.on_method_response {
                    hook(method, value, ctx);
                }
            }
            Err(err) => {
                if let Some(hook) = &self.hooks.on_method_error {
                    hook(method, err, ctx);
                }
            }
        }
        result
    }

    fn correlate(&self, response: Response) {
        let Some(id) = response.id.as_str() else {
            debug!(
                engine = %self.config.name,
                id = %response.id,
                "response id matches no outbound call"
            );
            return;
        };
        let matched = match response.payload {
            ResponsePayload::Result(value) => self.pending.resolve(id, value),
            ResponsePayload::Error(error) => self.pending.reject(
                id,
                OperationError::Remote {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                },
            ),
        };
        if matched {
            let _ = self.counters.responses.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(engine = %self.config.name, id, "response for unknown or settled call");
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send a request and return it together with its response future.
    ///
    /// The pending operation is registered before sending so a fast reply
    /// cannot be missed. If the transport fails the operation is removed.
    #[instrument(skip_all, fields(engine = %self.config.name, method = %method))]
    pub async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: CallOptions,
    ) -> Result<OutboundCall, RpcError> {
        let id = options.custom_id.unwrap_or_else(|| self.ids.next_id());
        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.config.default_timeout_ms));

        let (id, response) = self.pending.add(AddOptions {
            timeout: Some(timeout),
            custom_id: Some(id),
        })?;
        let request = Message::request(method, params, id.clone());

        if let Err(err) = self.transport.send_message(&request, &options.context).await {
            let _ = self.pending.remove(&id);
            warn!(id, error = %err, "failed to send request");
            return Err(err.into());
        }

        debug!(id, "request sent");
        Ok(OutboundCall { request, response })
    }

    /// Send a request and wait for its result using the default timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// Send a request with options and wait for its result.
    pub async fn call_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        let call = self.handle_request(method, params, options).await?;
        Ok(call.response.await?)
    }

    /// Send a notification. No response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.notify_with(method, params, &RpcContext::default()).await
    }

    /// Send a notification with a transport context.
    pub async fn notify_with(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &RpcContext,
    ) -> Result<(), RpcError> {
        let message = Message::notification(method, params);
        self.transport.send_message(&message, ctx).await?;
        trace!(engine = %self.config.name, method, "notification sent");
        Ok(())
    }

    /// Outstanding outbound calls.
    pub fn pending(&self) -> &PromiseOperations<Value> {
        &self.pending
    }

    /// Activity snapshot.
    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            name: self.config.name.clone(),
            registered_methods: self.methods.read().len(),
            pending: self.pending.get_stats(),
            requests_handled: self.counters.requests.load(Ordering::Relaxed),
            notifications_handled: self.counters.notifications.load(Ordering::Relaxed),
            responses_correlated: self.counters.responses.load(Ordering::Relaxed),
            errors_sent: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Reject every outstanding call with `"<name> destroyed"`. Idempotent.
    pub fn destroy(&self) {
        if self.pending.registry().is_destroyed() {
            return;
        }
        info!(engine = %self.config.name, "destroying engine");
        self.pending.destroy(&format!("{} destroyed", self.config.name));
    }
}

impl std::fmt::Debug for RpcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEngine")
            .field("config", &self.config)
            .field("methods", &self.get_registered_methods())
            .finish_non_exhaustive()
    }
}

fn count_errors(message: &Message) -> u64 {
    match message {
        Message::Response(r) => u64::from(r.error_object().is_some()),
        Message::Batch(items) => items.iter().map(count_errors).sum(),
        Message::Request(_) | Message::Notification(_) => 0,
    }
}
