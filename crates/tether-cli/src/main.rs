//! # tether
//!
//! Command-line JSON-RPC 2.0 client over WebSocket.

#![deny(unsafe_code)]

mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tether_core::logging::{init_json_subscriber, init_subscriber};
use tether_rpc::Message;
use tether_ws::{InboundHandler, RpcPeer, WebSocketClient};
use tracing::info;

use crate::settings::TetherSettings;

/// JSON-RPC 2.0 over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "JSON-RPC 2.0 over WebSocket")]
struct Cli {
    /// Settings file (defaults to ~/.tether/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `tether_ws=trace`. `RUST_LOG` wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a method and print its result.
    Call {
        /// Endpoint (`ws://` or `wss://`).
        url: String,
        /// Method name.
        method: String,
        /// Params as a JSON object or array.
        params: Option<String>,
        /// Call timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send a notification.
    Notify {
        /// Endpoint (`ws://` or `wss://`).
        url: String,
        /// Method name.
        method: String,
        /// Params as a JSON object or array.
        params: Option<String>,
    },
    /// Print every inbound message until interrupted.
    Listen {
        /// Endpoint (`ws://` or `wss://`).
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(settings::default_settings_path);
    let settings = settings::load(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if cli.json_logs || settings.logging.json {
        init_json_subscriber(level);
    } else {
        init_subscriber(level);
    }

    match cli.command {
        Command::Call {
            url,
            method,
            params,
            timeout_ms,
        } => call(&settings, &url, &method, params.as_deref(), timeout_ms).await,
        Command::Notify { url, method, params } => {
            notify(&settings, &url, &method, params.as_deref()).await
        }
        Command::Listen { url } => listen(&settings, &url).await,
    }
}

/// Parse command-line params. JSON-RPC params must be structured.
fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("params must be valid JSON")?;
    match value {
        Value::Object(_) | Value::Array(_) => Ok(Some(value)),
        Value::Null => Ok(None),
        _ => bail!("params must be a JSON object or array"),
    }
}

async fn call(
    settings: &TetherSettings,
    url: &str,
    method: &str,
    params: Option<&str>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let params = parse_params(params)?;
    let mut client_config = settings.client.clone();
    if let Some(timeout_ms) = timeout_ms {
        client_config.call_timeout_ms = timeout_ms;
    }

    let peer = RpcPeer::new(url, client_config, settings.engine.clone())?;
    peer.connect().await.with_context(|| format!("Failed to connect to {url}"))?;
    let result = peer.call(method, params).await;
    peer.close();

    let value = result.with_context(|| format!("Call to '{method}' failed"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn notify(
    settings: &TetherSettings,
    url: &str,
    method: &str,
    params: Option<&str>,
) -> Result<()> {
    let params = parse_params(params)?;
    let peer = RpcPeer::new(url, settings.client.clone(), settings.engine.clone())?;
    peer.connect().await.with_context(|| format!("Failed to connect to {url}"))?;
    let sent = peer.notify(method, params).await;
    peer.close();
    sent.with_context(|| format!("Notification '{method}' failed"))?;
    Ok(())
}

/// Prints inbound messages as JSON lines on stdout.
struct Printer;

#[async_trait]
impl InboundHandler for Printer {
    async fn handle_message(&self, message: Message, _client: &WebSocketClient) {
        match serde_json::to_string(&message) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to print message"),
        }
    }
}

async fn listen(settings: &TetherSettings, url: &str) -> Result<()> {
    let client = WebSocketClient::new(url, settings.client.clone())?.with_handler(Printer);
    client.connect().await.with_context(|| format!("Failed to connect to {url}"))?;
    info!(url, "listening; press Ctrl-C to stop");

    let mut states = client.subscribe_state();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to wait for Ctrl-C")?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                let connection_id = client.connection_id();
                info!(%state, connection_id = connection_id.as_deref(), "connection state");
                if state == tether_ws::ConnectionState::Disconnected {
                    bail!("Connection to {url} lost");
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_call_with_params() {
        let cli = Cli::try_parse_from([
            "tether",
            "call",
            "ws://localhost:9000",
            "math.add",
            r#"{"a":2,"b":3}"#,
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        match cli.command {
            Command::Call {
                url,
                method,
                params,
                timeout_ms,
            } => {
                assert_eq!(url, "ws://localhost:9000");
                assert_eq!(method, "math.add");
                assert_eq!(params.as_deref(), Some(r#"{"a":2,"b":3}"#));
                assert_eq!(timeout_ms, Some(500));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tether",
            "listen",
            "ws://x",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.json_logs);
    }

    #[test]
    fn params_must_be_structured() {
        assert_eq!(parse_params(None).unwrap(), None);
        assert_eq!(parse_params(Some("null")).unwrap(), None);
        assert_eq!(parse_params(Some("[1,2]")).unwrap(), Some(serde_json::json!([1, 2])));
        assert!(parse_params(Some("5")).is_err());
        assert!(parse_params(Some("{oops")).is_err());
    }
}
