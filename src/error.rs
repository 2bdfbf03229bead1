//! # Error Types
//!
//! Error handling for the messaging layer.
//!
//! This module defines every error variant that can surface from framing,
//! handshaking, configuration and the transport underneath.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket failures reported by the transport
//! - **Protocol Errors**: Oversized frames, undecodable bodies, handshake mismatches
//! - **Encode Errors**: Values the serializer refuses to represent
//! - **Configuration Errors**: Invalid or unreadable configuration
//!
//! Protocol errors are fatal to a single connection only. Encode errors are
//! returned to the caller of `send`/`publish` because they indicate a bug at
//! the call site.
//!
//! ## Example Usage
//! ```rust
//! use torpedo_msg::core::serialization::Codec;
//! use torpedo_msg::error::{ProtocolError, Result};
//!
//! fn decode_or_null(bytes: &[u8]) -> Result<serde_json::Value> {
//!     match Codec::default().decode(bytes) {
//!         Err(ProtocolError::DeserializeError(_)) => Ok(serde_json::Value::Null),
//!         other => other,
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake errors
    pub const ERR_HANDSHAKE_MISMATCH: &str = "Protocol identifier mismatch";
    pub const ERR_HANDSHAKE_CLOSED: &str = "Peer closed the connection during handshake";

    /// Connection errors
    pub const ERR_SELF_CONNECTION: &str = "Connection looped back to the local endpoint";

    /// Lifecycle errors
    pub const ERR_NO_RUNTIME: &str = "Must be called from within a tokio runtime";
}

/// ProtocolError is the primary error type for all messaging operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error ends a session because the peer broke the protocol,
    /// as opposed to the transport simply going away.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::OversizedPacket(_)
                | ProtocolError::DeserializeError(_)
                | ProtocolError::HandshakeError(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
