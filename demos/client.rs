//! Example: line reader
//!
//! Connects to the line publisher, requests a snapshot on every (re)connect
//! and logs the size of each snapshot and update batch it receives.
//!
//! Run with: `cargo run --example client`

use serde_json::json;
use torpedo_msg::config::NetworkConfig;
use torpedo_msg::utils::logging::init_logging;
use torpedo_msg::ReconnectingClient;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging);

    let client = ReconnectingClient::with_config(config.client, config.protocol)?;

    let requester = client.clone();
    client.set_connect_callback(move |peer| {
        info!(peer = %peer, "connected");
        if let Err(e) = requester.send(&json!({"cmd": "snapshot"})) {
            warn!(error = %e, "Failed to request snapshot");
        }
    });
    client.set_disconnect_callback(|peer| info!(peer = %peer, "disconnected"));
    client.set_message_callback(|_, msg| {
        let cmd = msg["cmd"].as_str().unwrap_or_default();
        if cmd == "updates" || cmd == "snapshot" {
            let count = msg["data"].as_array().map_or(0, Vec::len);
            info!(count, "{cmd}");
        }
    });

    let signal = tokio::signal::ctrl_c().await;
    warn!(ok = signal.is_ok(), "received signal");

    client.close();
    client.log_metrics();
    Ok(())
}
