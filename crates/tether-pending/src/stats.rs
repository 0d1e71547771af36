//! Registry statistics snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::OperationKind;

/// Operations whose deadline falls within this window count as expiring soon.
pub const EXPIRING_SOON_WINDOW: Duration = Duration::from_secs(60);

/// Count of tracked operations per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindCounts {
    /// Promise operations.
    pub promise: usize,
    /// Data operations.
    pub data: usize,
}

impl KindCounts {
    pub(crate) fn increment(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::Promise => self.promise += 1,
            OperationKind::Data => self.data += 1,
        }
    }
}

/// Point-in-time view of a registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Number of tracked operations.
    pub total: usize,
    /// Tracked operations per kind.
    pub by_kind: KindCounts,
    /// Operations that expire within the next 60 seconds.
    pub expiring_soon: usize,
    /// Mean age of tracked operations in milliseconds; zero when empty.
    pub average_age_ms: f64,
    /// Creation time of the oldest tracked operation.
    pub oldest_created_at: Option<DateTime<Utc>>,
}
