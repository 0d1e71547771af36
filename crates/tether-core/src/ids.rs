//! Pluggable id generation.
//!
//! Operation ids and outbound request ids come from an [`IdGenerator`].
//! Production code uses [`UuidGenerator`] (random v4 UUIDs); tests inject
//! [`SequentialGenerator`] or a closure for deterministic ids.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Source of unique string ids.
pub trait IdGenerator: Send + Sync {
    /// Produce the next id.
    fn next_id(&self) -> String;
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn next_id(&self) -> String {
        self()
    }
}

/// Random UUID v4 ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Monotonic `"<prefix><n>"` ids starting at 1.
#[derive(Debug)]
pub struct SequentialGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialGenerator {
    /// Create a generator that yields `prefix1`, `prefix2`, ...
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialGenerator {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{n}", self.prefix)
    }
}

/// Shared handle to an id generator.
#[derive(Clone)]
pub struct SharedIdGenerator(Arc<dyn IdGenerator>);

impl SharedIdGenerator {
    /// Wrap a generator.
    pub fn new(generator: impl IdGenerator + 'static) -> Self {
        Self(Arc::new(generator))
    }

    /// Produce the next id.
    pub fn next_id(&self) -> String {
        self.0.next_id()
    }
}

impl Default for SharedIdGenerator {
    fn default() -> Self {
        Self::new(UuidGenerator)
    }
}

impl fmt::Debug for SharedIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedIdGenerator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_generator_yields_v4() {
        let id = UuidGenerator.next_id();
        let parsed = Uuid::parse_str(&id).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn uuid_ids_are_unique() {
        assert_ne!(UuidGenerator.next_id(), UuidGenerator.next_id());
    }

    #[test]
    fn sequential_generator_counts_from_one() {
        let generator = SequentialGenerator::new("op-");
        assert_eq!(generator.next_id(), "op-1");
        assert_eq!(generator.next_id(), "op-2");
        assert_eq!(generator.next_id(), "op-3");
    }

    #[test]
    fn closure_is_a_generator() {
        let generator = || "fixed".to_owned();
        assert_eq!(generator.next_id(), "fixed");
    }

    #[test]
    fn shared_generator_delegates() {
        let shared = SharedIdGenerator::new(SequentialGenerator::new("x"));
        let clone = shared.clone();
        assert_eq!(shared.next_id(), "x1");
        assert_eq!(clone.next_id(), "x2");
    }

    #[test]
    fn shared_default_is_uuid() {
        let id = SharedIdGenerator::default().next_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
