//! Protocol identifier exchange.
//!
//! Immediately after a connection is established, and before any framed
//! traffic, each side writes its identifier (`"<name>-<version>"`, raw, no
//! length prefix) and reads back exactly as many bytes from the peer. Any
//! difference means the two ends cannot parse each other's frames, so the
//! connection is abandoned without ever being reported as connected.
//!
//! The exchange is symmetric: brokers and clients run the same code.

use crate::config::{default_protocol_id, ProtocolConfig};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout::with_timeout_error;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

/// The identifier one side expects to see from its peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    identifier: Bytes,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new(default_protocol_id())
    }
}

impl Handshake {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Bytes::from(identifier.into()),
        }
    }

    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(config.protocol_id.clone())
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    /// Write our identifier and verify the peer's.
    ///
    /// # Errors
    /// `ProtocolError::HandshakeError` if the peer sends a different
    /// identifier or closes before sending a complete one; `Io` for other
    /// transport failures.
    #[instrument(skip_all, level = "debug")]
    pub async fn exchange<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(&self.identifier).await?;
        stream.flush().await?;

        let mut remote = vec![0u8; self.identifier.len()];
        match stream.read_exact(&mut remote).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_HANDSHAKE_CLOSED.into(),
                ));
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }

        if remote != self.identifier {
            return Err(ProtocolError::HandshakeError(format!(
                "{}: {:?} != {:?}",
                constants::ERR_HANDSHAKE_MISMATCH,
                String::from_utf8_lossy(&remote),
                String::from_utf8_lossy(&self.identifier),
            )));
        }

        debug!("Protocol identifiers match");
        Ok(())
    }

    /// [`exchange`](Self::exchange) bounded by `limit`; an expired deadline is
    /// reported as a handshake failure.
    pub async fn exchange_with_timeout<S>(&self, stream: &mut S, limit: Duration) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        with_timeout_error(self.exchange(stream), limit)
            .await
            .map_err(|e| match e {
                ProtocolError::Timeout => {
                    ProtocolError::HandshakeError(format!("no identifier within {limit:?}"))
                }
                other => other,
            })
    }
}
