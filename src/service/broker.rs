//! Server role: accepts peers, keeps the address registry, and offers unicast
//! [`Broker::send`] and broadcast [`Broker::publish`].
//!
//! Every accepted connection runs its own session task, so a slow handshake
//! or a busy read loop never holds up the accept loop or other peers.

use crate::config::{ProtocolConfig, ServerConfig};
use crate::core::codec::pack_frame;
use crate::error::Result;
use crate::protocol::session::{Connection, ConnectionSession, Lifecycle, SessionContext};
use crate::transport::tcp;
use crate::utils::metrics::MetricsSnapshot;
use crate::Message;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Handle to a running broker. Clones share the same broker.
///
/// The broker keeps accepting until [`close`](Broker::close) is called, even
/// if every handle has been dropped.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    local_addr: SocketAddr,
    config: ServerConfig,
    ctx: SessionContext,
    registry: Mutex<HashMap<SocketAddr, Connection>>,
    open_sessions: AtomicUsize,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Broker {
    /// Listen on `address` with default settings.
    pub async fn listen(address: &str) -> Result<Self> {
        let config = ServerConfig {
            address: address.to_string(),
            ..ServerConfig::default()
        };
        Self::with_config(config, ProtocolConfig::default()).await
    }

    /// Bind and start accepting connections.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all, fields(address = %config.address))]
    pub async fn with_config(config: ServerConfig, protocol: ProtocolConfig) -> Result<Self> {
        let listener = tcp::bind(&config.address).await?;
        let local_addr = listener.local_addr()?;

        let inner = Arc::new(BrokerInner {
            local_addr,
            config,
            ctx: SessionContext::new(&protocol),
            registry: Mutex::new(HashMap::new()),
            open_sessions: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(accept_loop(inner.clone(), listener));
        info!(local = %local_addr, format = %protocol.format, "Broker listening");

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
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

    /// Send `msg` to the peer registered under `address`.
    ///
    /// Returns `Ok(false)` when no open connection is registered for it.
    ///
    /// # Errors
    /// `ProtocolError::SerializeError` / `OversizedPacket` if `msg` cannot be
    /// framed.
    pub fn send<T>(&self, address: &SocketAddr, msg: &T) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let frame = pack_frame(&self.inner.ctx.codec, msg)?;
        let connection = self.inner.registry().get(address).cloned();
        Ok(connection.is_some_and(|conn| conn.write(frame)))
    }

    /// Send `msg` to every registered peer; returns how many frames were queued.
    ///
    /// The message is encoded once and every peer receives identical bytes.
    /// Connections closing concurrently are skipped and not counted.
    pub fn publish<T>(&self, msg: &T) -> Result<usize>
    where
        T: Serialize + ?Sized,
    {
        let frame = pack_frame(&self.inner.ctx.codec, msg)?;
        let registry = self.inner.registry();
        let count = registry
            .values()
            .filter(|conn| conn.write(frame.clone()))
            .count();
        debug!(peers = count, bytes = frame.len(), "Published frame");
        Ok(count)
    }

    /// Addresses of all currently registered peers.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.registry().keys().copied().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.ctx.metrics.snapshot()
    }

    /// Emit the current counters as one `info` event.
    pub fn log_metrics(&self) {
        self.inner.ctx.metrics.log_metrics();
    }

    /// Stop accepting, force-close every connection and drop all callbacks.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.ctx.callbacks.clear();

        let connections: Vec<Connection> = self.inner.registry().drain().map(|(_, c)| c).collect();
        for conn in &connections {
            conn.close();
        }
        info!(local = %self.inner.local_addr, closed = connections.len(), "Broker closed");
    }
}

impl BrokerInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<SocketAddr, Connection>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Lifecycle for BrokerInner {
    fn connected(&self, connection: &Connection) {
        if self.shutdown.is_cancelled() {
            connection.close();
            return;
        }
        let replaced = self
            .registry()
            .insert(connection.address(), connection.clone());
        if replaced.is_some() {
            debug!(peer = %connection.address(), "Registry entry replaced by a newer connection");
        }
        info!(peer = %connection.address(), "Peer connected");
    }

    fn disconnected(&self, connection: &Connection) {
        let mut registry = self.registry();
        if registry
            .get(&connection.address())
            .is_some_and(|current| current.id() == connection.id())
        {
            registry.remove(&connection.address());
        }
        drop(registry);
        info!(peer = %connection.address(), "Peer disconnected");
    }
}

/// Decrements the open session count when a session task ends.
struct SessionSlot(Arc<BrokerInner>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.open_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn accept_loop(inner: Arc<BrokerInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Error accepting connection");
                continue;
            }
        };

        if inner.open_sessions.load(Ordering::Acquire) >= inner.config.max_connections {
            warn!(
                peer = %peer,
                limit = inner.config.max_connections,
                "Connection limit reached, dropping connection"
            );
            continue;
        }

        tcp::configure(&stream);
        inner.ctx.metrics.connection_established();
        inner.open_sessions.fetch_add(1, Ordering::AcqRel);

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut session =
            ConnectionSession::new(id, peer, inner.shutdown.child_token(), inner.ctx.clone());
        let slot = SessionSlot(inner.clone());

        tokio::spawn(async move {
            let outcome = session.run(stream, &*slot.0).await;
            debug!(peer = %peer, outcome = ?outcome, "Session finished");
        });
    }

    debug!(local = %inner.local_addr, "Accept loop stopped");
}
