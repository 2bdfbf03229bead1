//! Example: line publisher
//!
//! Answers `{"cmd": "snapshot"}` requests with a full data set and publishes
//! a random batch of updates to every connected reader every 200-800 ms.
//!
//! Run with: `cargo run --example server`
//! Pair with: `cargo run --example client`

use rand::Rng;
use serde_json::json;
use std::time::Duration;
use torpedo_msg::config::NetworkConfig;
use torpedo_msg::utils::logging::init_logging;
use torpedo_msg::Broker;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging);

    let broker = Broker::with_config(config.server, config.protocol).await?;

    broker.set_connect_callback(|peer| info!(peer = %peer, "connected"));
    broker.set_disconnect_callback(|peer| info!(peer = %peer, "disconnected"));

    let responder = broker.clone();
    broker.set_message_callback(move |peer, msg| {
        info!(peer = %peer, msg = %msg, "received");
        if msg["cmd"] == "snapshot" {
            let data: Vec<u32> = (0..1000).collect();
            info!(count = data.len(), "snapshot");
            if let Err(e) = responder.send(&peer, &json!({"cmd": "snapshot", "data": data})) {
                warn!(peer = %peer, error = %e, "Failed to send snapshot");
            }
        }
    });

    let publisher = broker.clone();
    let publish_loop = async move {
        loop {
            let (data, pause) = {
                let mut rng = rand::rng();
                let data: Vec<u32> = (0..rng.random_range(0..300)).collect();
                (data, Duration::from_millis(rng.random_range(200..800)))
            };
            if !data.is_empty() {
                info!(count = data.len(), "updates");
            }
            if let Err(e) = publisher.publish(&json!({"cmd": "updates", "data": data})) {
                warn!(error = %e, "Failed to publish updates");
            }
            tokio::time::sleep(pause).await;
        }
    };

    tokio::select! {
        _ = publish_loop => {}
        signal = shutdown_signal() => warn!(signal, "received signal"),
    }

    broker.close();
    broker.log_metrics();
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return "SIGINT";
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
