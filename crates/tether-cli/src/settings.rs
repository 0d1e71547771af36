//! `~/.tether/settings.json` plus `TETHER_*` environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tether_core::logging::DEFAULT_LEVEL;
use tether_core::settings::{
    SettingsError, load_settings_from_path, read_env_bool, read_env_f64, read_env_string,
    read_env_u32, read_env_u64, read_env_usize,
};
use tether_rpc::EngineConfig;
use tether_ws::ClientConfig;

/// Everything the binary can be configured with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// WebSocket client behavior.
    pub client: ClientConfig,
    /// JSON-RPC engine behavior.
    pub engine: EngineConfig,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.into(),
            json: false,
        }
    }
}

/// `$HOME/.tether/settings.json`.
pub fn default_settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from `path` and apply environment overrides.
pub fn load(path: &Path) -> Result<TetherSettings, SettingsError> {
    load_settings_from_path(path, apply_env_overrides)
}

/// Apply `TETHER_*` overrides. Out-of-range values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = read_env_u32("TETHER_MAX_RECONNECT_ATTEMPTS", 0, 1000) {
        settings.client.max_reconnect_attempts = v;
    }
    if let Some(v) = read_env_u64("TETHER_RECONNECT_DELAY_MS", 1, 600_000) {
        settings.client.initial_reconnect_delay_ms = v;
    }
    if let Some(v) = read_env_u64("TETHER_MAX_RECONNECT_DELAY_MS", 1, 3_600_000) {
        settings.client.max_reconnect_delay_ms = v;
    }
    if let Some(v) = read_env_f64("TETHER_BACKOFF_FACTOR", 1.0, 10.0) {
        settings.client.backoff_factor = v;
    }
    if let Some(v) = read_env_u64("TETHER_HEARTBEAT_INTERVAL_MS", 0, 600_000) {
        settings.client.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_bool("TETHER_KEEP_ALIVE") {
        settings.client.enable_keep_alive = v;
    }
    if let Some(v) = read_env_u64("TETHER_CALL_TIMEOUT_MS", 1, 3_600_000) {
        settings.client.call_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("TETHER_CONNECT_TIMEOUT_MS", 0, 600_000) {
        settings.client.connect_timeout_ms = v;
    }

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_ENGINE_NAME") {
        settings.engine.name = v;
    }
    if let Some(v) = read_env_usize("TETHER_MAX_BATCH_SIZE", 1, 10_000) {
        settings.engine.max_batch_size = v;
    }
    if let Some(v) = read_env_u64("TETHER_HANDLER_TIMEOUT_MS", 0, 3_600_000) {
        settings.engine.handler_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("TETHER_LOG_JSON") {
        settings.logging.json = v;
    }
}
