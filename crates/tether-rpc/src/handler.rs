//! Method handlers and the name → handler registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RpcContext;
use crate::errors::{HandlerError, RpcError};

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, HandlerError>;
}

/// Adapts an async closure into a [`MethodHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Option<Value>, RpcContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, HandlerError> {
        (self.0)(params, ctx.clone()).await
    }
}

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Fails if `method` is already taken.
    pub fn register(
        &mut self,
        method: &str,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<(), RpcError> {
        if self.handlers.contains_key(method) {
            return Err(RpcError::DuplicateMethod(method.to_owned()));
        }
        let _ = self.handlers.insert(method.to_owned(), handler);
        Ok(())
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&mut self, method: &str) -> bool {
        self.handlers.remove(method).is_some()
    }

    /// Handler for `method`.
    pub fn get(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(method).cloned()
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(
            &self,
            params: Option<Value>,
            _ctx: &RpcContext,
        ) -> Result<Value, HandlerError> {
            Ok(params.unwrap_or(Value::Null))
        }
    }

    #[test]
    fn register_and_list_sorted() {
        let mut reg = MethodRegistry::new();
        reg.register("b.second", Arc::new(EchoHandler)).unwrap();
        reg.register("a.first", Arc::new(EchoHandler)).unwrap();
        assert_eq!(reg.methods(), vec!["a.first", "b.second"]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", Arc::new(EchoHandler)).unwrap();
        assert_matches!(
            reg.register("echo", Arc::new(EchoHandler)),
            Err(RpcError::DuplicateMethod(name)) if name == "echo"
        );
    }

    #[test]
    fn unregister_reports_presence() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", Arc::new(EchoHandler)).unwrap();
        assert!(reg.unregister("echo"));
        assert!(!reg.unregister("echo"));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn fn_handler_runs_closure() {
        let handler = FnHandler(|params: Option<Value>, ctx: RpcContext| async move {
            Ok::<_, HandlerError>(json!({"params": params, "conn": ctx.connection_id}))
        });
        let out = handler
            .handle(Some(json!([1])), &RpcContext::for_connection("c1"))
            .await
            .unwrap();
        assert_eq!(out, json!({"params": [1], "conn": "c1"}));
    }

    #[tokio::test]
    async fn registry_handler_is_callable() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", Arc::new(EchoHandler)).unwrap();
        let handler = reg.get("echo").unwrap();
        let out = handler.handle(Some(json!({"x": 1})), &RpcContext::default()).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
        assert!(reg.get("missing").is_none());
    }
}
