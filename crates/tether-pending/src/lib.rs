//! # tether-pending
//!
//! Tracks in-flight asynchronous operations by id until they are resolved,
//! rejected, removed, or expire.
//!
//! - [`PendingOperationRegistry`]: the generic map with one timer per operation,
//!   an optional background expiry sweep, stats, and `destroy`
//! - [`PromiseOperations`]: caller-side specialization handing out a
//!   [`PendingResult`] future per operation
//! - [`DataOperations`]: stores an arbitrary payload per operation and reports
//!   settlement through [`OperationHooks`]

#![deny(unsafe_code)]

pub mod data;
pub mod errors;
pub mod promise;
pub mod registry;
pub mod stats;

pub use data::{DataOperations, DataPayload};
pub use errors::{OperationError, PendingError};
pub use promise::{Completer, PendingResult, PromiseOperations};
pub use registry::{
    AddOptions, OperationHooks, OperationKind, OperationPayload, PendingOperation,
    PendingOperationRegistry, RegistryConfig,
};
pub use stats::{KindCounts, RegistryStats};
