//! Connection session engine shared by the broker and the client.
//!
//! A [`ConnectionSession`] owns one transport connection for its whole life:
//!
//! ```text
//! Disconnected -> Handshaking -> Connected -> Closed
//!                      |                        ^
//!                      +------------------------+  (handshake failure)
//! ```
//!
//! Once connected it runs two loops on the same task: a read loop that
//! decodes frames and dispatches them to the message callback, and a write
//! loop that drains frames queued through [`Connection::write`]. Either loop
//! ending (peer close, protocol error, write failure, local close) ends the
//! other. Connect and disconnect callbacks are always paired: a disconnect is
//! reported exactly once, and only for sessions that reported a connect.

use crate::config::ProtocolConfig;
use crate::core::codec::FrameCodec;
use crate::core::serialization::Codec;
use crate::error::ProtocolError;
use crate::protocol::callbacks::Callbacks;
use crate::protocol::handshake::Handshake;
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connected,
    Closed,
}

/// Why a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection
    PeerClosed,
    /// The peer sent an oversized or undecodable frame
    ProtocolError,
    /// Reading or writing failed at the transport level
    TransportError,
    /// The owning role closed the connection
    LocalClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Identifiers did not match (or never arrived); no callbacks fired
    HandshakeFailed,
    /// The session was connected and has now closed
    Closed(CloseReason),
}

/// Observer the owning role uses to track sessions.
///
/// `connected` runs before the application's connect callback and
/// `disconnected` before its disconnect callback.
pub trait Lifecycle: Send + Sync {
    fn connected(&self, connection: &Connection);
    fn disconnected(&self, connection: &Connection);
}

/// Everything a role shares with each of its sessions
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub codec: Codec,
    pub handshake: Handshake,
    pub handshake_timeout: Duration,
    pub callbacks: Arc<Callbacks>,
    pub metrics: Arc<Metrics>,
}

impl SessionContext {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            codec: Codec::new(config.format),
            handshake: Handshake::from_config(config),
            handshake_timeout: config.handshake_timeout,
            callbacks: Arc::new(Callbacks::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }
}

/// Write handle for a connected session.
///
/// Writes are fire-and-forget: `write` only tells whether the frame was
/// queued to an open connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: u64,
    address: SocketAddr,
    frames: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.frames.is_closed()
    }

    /// Queue an already framed message. Returns `false` if the connection is closed.
    pub fn write(&self, frame: Bytes) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let len = frame.len() as u64;
        if self.frames.send(frame).is_err() {
            return false;
        }
        self.metrics.message_sent(len);
        true
    }

    /// Force the session to close. Pending frames are discarded.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// A handle not backed by a running session; frames pile up in the
    /// returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(
        id: u64,
        address: SocketAddr,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (frames, rx) = mpsc::unbounded_channel();
        let connection = Self {
            id,
            address,
            frames,
            shutdown: CancellationToken::new(),
            metrics,
        };
        (connection, rx)
    }
}

pub struct ConnectionSession {
    id: u64,
    address: SocketAddr,
    state: SessionState,
    shutdown: CancellationToken,
    ctx: SessionContext,
}

impl ConnectionSession {
    /// `shutdown` closes the session from outside; roles pass a child of their
    /// own token so closing the role closes every session.
    pub fn new(
        id: u64,
        address: SocketAddr,
        shutdown: CancellationToken,
        ctx: SessionContext,
    ) -> Self {
        Self {
            id,
            address,
            state: SessionState::Disconnected,
            shutdown,
            ctx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn transition(&mut self, next: SessionState) {
        debug!(peer = %self.address, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    /// Drive the connection until it closes.
    pub async fn run<S, L>(&mut self, mut stream: S, lifecycle: &L) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
        L: Lifecycle + ?Sized,
    {
        self.transition(SessionState::Handshaking);

        let handshake = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
            res = self.ctx.handshake.exchange_with_timeout(&mut stream, self.ctx.handshake_timeout) => res,
        };
        if let Err(e) = handshake {
            self.ctx.metrics.handshake_failed();
            warn!(peer = %self.address, error = %e, "Handshake failed, closing connection");
            self.transition(SessionState::Closed);
            return SessionOutcome::HandshakeFailed;
        }
        self.ctx.metrics.handshake_success();

        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection {
            id: self.id,
            address: self.address,
            frames: tx,
            shutdown: self.shutdown.clone(),
            metrics: self.ctx.metrics.clone(),
        };

        self.transition(SessionState::Connected);
        self.ctx.metrics.session_opened();
        lifecycle.connected(&connection);
        if !self.ctx.callbacks.dispatch_connect(self.address) {
            self.ctx.metrics.callback_panic();
        }

        let read = async {
            let reason = self.read_loop(reader).await;
            self.shutdown.cancel();
            reason
        };
        let write = write_loop(writer, rx, self.shutdown.clone(), self.address);
        let (reason, ()) = tokio::join!(read, write);

        self.transition(SessionState::Closed);
        self.ctx.metrics.session_closed();
        lifecycle.disconnected(&connection);
        if !self.ctx.callbacks.dispatch_disconnect(self.address) {
            self.ctx.metrics.callback_panic();
        }

        debug!(peer = %self.address, reason = ?reason, "Session closed");
        SessionOutcome::Closed(reason)
    }

    async fn read_loop<R>(&self, reader: R) -> CloseReason
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, FrameCodec);

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return CloseReason::LocalClose,
                next = frames.next() => next,
            };

            let body = match next {
                Some(Ok(body)) => body,
                None | Some(Err(ProtocolError::ConnectionClosed)) => {
                    return CloseReason::PeerClosed;
                }
                Some(Err(e)) if e.is_protocol_violation() => {
                    self.ctx.metrics.protocol_error();
                    error!(peer = %self.address, error = %e, "Invalid data received. Closing connection");
                    return CloseReason::ProtocolError;
                }
                Some(Err(e)) => {
                    debug!(peer = %self.address, error = %e, "Read failed");
                    return CloseReason::TransportError;
                }
            };

            let msg = match self.ctx.codec.decode(&body) {
                Ok(msg) => msg,
                Err(e) => {
                    self.ctx.metrics.protocol_error();
                    error!(peer = %self.address, error = %e, "Invalid data received. Closing connection");
                    return CloseReason::ProtocolError;
                }
            };

            self.ctx.metrics.message_received(body.len() as u64);
            if !self.ctx.callbacks.dispatch_message(self.address, msg) {
                self.ctx.metrics.callback_panic();
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
    peer: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let written = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = writer.write_all(&frame) => res,
        };
        if let Err(e) = written {
            debug!(peer = %peer, error = %e, "Write failed");
            shutdown.cancel();
            break;
        }
    }
}
