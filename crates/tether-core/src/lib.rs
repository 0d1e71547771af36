//! # tether-core
//!
//! Shared vocabulary for the tether crates:
//!
//! - **Backoff**: capped exponential delay used by reconnect loops
//! - **IDs**: pluggable [`ids::IdGenerator`] (random UUIDs by default, sequential for tests)
//! - **Logging**: `tracing` subscriber setup and an in-memory capture layer for tests
//! - **Settings**: JSON file loading with deep merge and env var parsing helpers

#![deny(unsafe_code)]

pub mod backoff;
pub mod ids;
pub mod logging;
pub mod settings;
