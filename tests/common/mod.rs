#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use torpedo_msg::config::{ClientConfig, ProtocolConfig, ServerConfig};
use torpedo_msg::protocol::handshake::Handshake;
use torpedo_msg::{Broker, ReconnectingClient};

pub const RECONNECT: Duration = Duration::from_millis(50);

pub async fn start_broker() -> Broker {
    start_broker_with(ProtocolConfig::default()).await
}

pub async fn start_broker_with(protocol: ProtocolConfig) -> Broker {
    let config = ServerConfig {
        address: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    Broker::with_config(config, protocol).await.expect("broker binds")
}

pub fn client_config(address: SocketAddr) -> ClientConfig {
    ClientConfig {
        reconnect_interval: RECONNECT,
        connect_timeout: Duration::from_secs(1),
        ..ClientConfig::new(address.to_string())
    }
}

pub fn start_client(address: SocketAddr) -> ReconnectingClient {
    ReconnectingClient::with_config(client_config(address), ProtocolConfig::default())
        .expect("client starts")
}

/// A peer that completes the handshake by hand and then speaks raw frames.
pub async fn raw_peer(address: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(address).await.expect("connect");
    Handshake::default()
        .exchange(&mut stream)
        .await
        .expect("handshake");
    stream
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
