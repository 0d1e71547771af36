//! Per-message context passed to handlers and transports.

use serde_json::{Map, Value};

/// Where a message came from (inbound) or is going (outbound).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RpcContext {
    /// Connection the message belongs to, when the transport knows it.
    pub connection_id: Option<String>,
    /// Free-form transport metadata.
    pub metadata: Map<String, Value>,
}

impl RpcContext {
    /// Context for a known connection.
    pub fn for_connection(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.metadata.insert(key.into(), value);
        self
    }
}
