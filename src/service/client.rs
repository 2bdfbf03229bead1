//! Client role: one outbound connection to a fixed broker address, re-established
//! after every failure until [`ReconnectingClient::close`] is called.
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Connected -> Disconnected -> (wait) -> Connecting ...
//!        \______________ close() from any state ______________/--> Closed
//! ```
//!
//! A failed connect, a self-connection, a failed handshake and a closed
//! session all lead to the same place: `Disconnected`, then another attempt
//! after `reconnect_interval`. Messages sent while not connected are dropped.

use crate::config::{ensure_valid, ClientConfig, ProtocolConfig};
use crate::core::codec::pack_frame;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::session::{Connection, ConnectionSession, Lifecycle, SessionContext};
use crate::transport::tcp;
use crate::utils::metrics::MetricsSnapshot;
use crate::utils::timeout::with_timeout_error;
use crate::Message;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Closed,
}

/// Handle to a reconnecting client. Clones share the same connection.
#[derive(Clone)]
pub struct ReconnectingClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    local_address: Option<SocketAddr>,
    ctx: SessionContext,
    current: Mutex<Option<Connection>>,
    state: watch::Sender<ClientState>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl ReconnectingClient {
    /// Connect to `address` (`host:port`) with default settings.
    pub fn connect(address: &str) -> Result<Self> {
        Self::with_config(ClientConfig::new(address), ProtocolConfig::default())
    }

    /// Start the connect loop.
    ///
    /// # Errors
    /// `ConfigError` if either configuration fails validation (for example a
    /// reconnect interval under 10ms), `TransportError` when called outside a
    /// tokio runtime.
    pub fn with_config(config: ClientConfig, protocol: ProtocolConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ProtocolError::TransportError(constants::ERR_NO_RUNTIME.into()))?;

        let mut errors = config.validate();
        errors.extend(protocol.validate());
        ensure_valid(errors)?;

        let local_address = config
            .local_address
            .as_deref()
            .map(|local| {
                local.parse::<SocketAddr>().map_err(|e| {
                    ProtocolError::ConfigError(format!("Invalid local address '{local}': {e}"))
                })
            })
            .transpose()?;

        let (state, _) = watch::channel(ClientState::Disconnected);
        let inner = Arc::new(ClientInner {
            config,
            local_address,
            ctx: SessionContext::new(&protocol),
            current: Mutex::new(None),
            state,
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        runtime.spawn(connect_loop(inner.clone()));
        Ok(Self { inner })
    }

    pub fn set_connect_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.inner.ctx.callbacks.set_connect(callback);
    }

    pub fn set_disconnect_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.inner.ctx.callbacks.set_disconnect(callback);
    }

    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddr, Message) + Send + Sync + 'static,
    {
        self.inner.ctx.callbacks.set_message(callback);
    }

    /// Send `msg` to the broker if connected.
    ///
    /// Returns `Ok(false)` if the message was dropped because there is no open
    /// connection. Nothing is queued for later.
    ///
    /// # Errors
    /// `ProtocolError::SerializeError` / `OversizedPacket` if `msg` cannot be
    /// framed.
    pub fn send<T>(&self, msg: &T) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let frame = pack_frame(&self.inner.ctx.codec, msg)?;
        let connection = self.inner.current().clone();
        Ok(connection.is_some_and(|conn| conn.write(frame)))
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.ctx.metrics.snapshot()
    }

    /// Emit the current counters as one `info` event.
    pub fn log_metrics(&self) {
        self.inner.ctx.metrics.log_metrics();
    }

    /// Stop reconnecting, close the active connection and drop all callbacks.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.ctx.callbacks.clear();
        if let Some(conn) = self.inner.current().take() {
            conn.close();
        }
        self.inner.state.send_replace(ClientState::Closed);
        info!(address = %self.inner.config.address, "Client closed");
    }
}

impl ClientInner {
    fn current(&self) -> MutexGuard<'_, Option<Connection>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Closed` is terminal; later transitions are ignored.
    fn set_state(&self, next: ClientState) {
        self.state.send_if_modified(|state| {
            if *state == ClientState::Closed || *state == next {
                return false;
            }
            debug!(from = ?*state, to = ?next, "Client state change");
            *state = next;
            true
        });
    }

    async fn handle_stream(&self, stream: TcpStream) {
        match tcp::is_self_connection(&stream) {
            Ok(false) => {}
            Ok(true) => {
                self.ctx.metrics.self_connection();
                warn!(address = %self.config.address, "{}, retrying", constants::ERR_SELF_CONNECTION);
                return;
            }
            Err(e) => {
                debug!(error = %e, "Could not inspect connection endpoints");
                return;
            }
        }

        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                debug!(error = %e, "Connection lost before the handshake");
                return;
            }
        };

        tcp::configure(&stream);
        self.ctx.metrics.connection_established();
        self.set_state(ClientState::Handshaking);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut session =
            ConnectionSession::new(id, peer, self.shutdown.child_token(), self.ctx.clone());
        let outcome = session.run(stream, self).await;
        debug!(peer = %peer, outcome = ?outcome, "Session finished");
    }
}

impl Lifecycle for ClientInner {
    fn connected(&self, connection: &Connection) {
        if self.shutdown.is_cancelled() {
            connection.close();
            return;
        }
        *self.current() = Some(connection.clone());
        self.set_state(ClientState::Connected);
        info!(peer = %connection.address(), "Connected");
    }

    fn disconnected(&self, connection: &Connection) {
        let was_current = {
            let mut current = self.current();
            let matches = current
                .as_ref()
                .is_some_and(|c| c.id() == connection.id());
            if matches {
                *current = None;
            }
            matches
        };
        // a superseded session ending leaves the newer one's state alone
        if was_current {
            self.set_state(ClientState::Disconnected);
        }
        info!(peer = %connection.address(), "Disconnected");
    }
}

#[instrument(skip_all, fields(address = %inner.config.address))]
async fn connect_loop(inner: Arc<ClientInner>) {
    while !inner.shutdown.is_cancelled() {
        inner.set_state(ClientState::Connecting);
        inner.ctx.metrics.connect_attempt();

        let attempt = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = with_timeout_error(
                tcp::connect(&inner.config.address, inner.local_address),
                inner.config.connect_timeout,
            ) => res,
        };

        match attempt {
            Ok(stream) => inner.handle_stream(stream).await,
            Err(e) => {
                inner.ctx.metrics.connect_failed();
                debug!(error = %e, "Connect attempt failed");
            }
        }

        if inner.shutdown.is_cancelled() {
            break;
        }
        inner.set_state(ClientState::Disconnected);

        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(inner.config.reconnect_interval) => {}
        }
    }

    inner.set_state(ClientState::Closed);
    debug!("Connect loop stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn idle_client() -> ReconnectingClient {
        // the listener drops at the end of the statement, so nothing answers
        let target = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        ReconnectingClient::with_config(ClientConfig::new(target.to_string()), ProtocolConfig::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_newer_connection() {
        let client = idle_client();
        let inner = &*client.inner;
        let broker = SocketAddr::from(([127, 0, 0, 1], 40125));
        let (older, mut older_rx) = Connection::detached(1, broker, inner.ctx.metrics.clone());
        let (newer, mut newer_rx) = Connection::detached(2, broker, inner.ctx.metrics.clone());

        inner.connected(&older);
        inner.connected(&newer);
        inner.disconnected(&older);

        assert!(client.send(&json!("still routed")).unwrap());
        assert!(newer_rx.try_recv().is_ok());
        assert!(older_rx.try_recv().is_err());

        inner.disconnected(&newer);
        assert!(!client.send(&json!("gone")).unwrap());

        client.close();
    }

    #[tokio::test]
    async fn test_zero_reconnect_interval_rejected() {
        let config = ClientConfig {
            reconnect_interval: Duration::ZERO,
            ..ClientConfig::new("127.0.0.1:8888")
        };
        assert!(matches!(
            ReconnectingClient::with_config(config, ProtocolConfig::default()),
            Err(ProtocolError::ConfigError(ref m)) if m.contains("Reconnect interval too short")
        ));
    }

    #[tokio::test]
    async fn test_invalid_protocol_id_rejected() {
        let protocol = ProtocolConfig {
            protocol_id: String::new(),
            ..ProtocolConfig::default()
        };
        assert!(matches!(
            ReconnectingClient::with_config(ClientConfig::default(), protocol),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
