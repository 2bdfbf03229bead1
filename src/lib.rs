//! # torpedo-msg
//!
//! Minimal pub/sub messaging over TCP.
//!
//! A [`Broker`] accepts connections, keeps a registry of connected peers keyed
//! by address, and can [`send`](Broker::send) to one peer or
//! [`publish`](Broker::publish) to all of them. A [`ReconnectingClient`]
//! keeps a single connection to a broker alive, retrying at a fixed interval.
//!
//! Messages are schema-less trees ([`Message`]) carried in length-prefixed
//! frames:
//!
//! ```text
//! [Length(4, big-endian)] [MessagePack or JSON body]
//! ```
//!
//! Before the first frame both ends exchange a protocol identifier; peers
//! speaking a different version are disconnected without ever being reported.
//!
//! Delivery is best-effort and at-most-once: nothing is queued while a client
//! is disconnected and nothing is acknowledged.
//!
//! ## Example
//! ```no_run
//! use serde_json::json;
//! use torpedo_msg::{Broker, ReconnectingClient};
//!
//! # async fn run() -> torpedo_msg::Result<()> {
//! let broker = Broker::listen("127.0.0.1:8888").await?;
//! let responder = broker.clone();
//! broker.set_message_callback(move |peer, msg| {
//!     if msg["cmd"] == "snapshot" {
//!         let _ = responder.send(&peer, &json!({"cmd": "snapshot", "data": [1, 2, 3]}));
//!     }
//! });
//!
//! let client = ReconnectingClient::connect("127.0.0.1:8888")?;
//! let requester = client.clone();
//! client.set_connect_callback(move |_| {
//!     let _ = requester.send(&json!({"cmd": "snapshot"}));
//! });
//!
//! broker.publish(&json!({"cmd": "updates", "data": [4, 5]}))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::codec::{pack_frame, read_frame, FrameCodec, PACKET_SIZE_LIMIT};
pub use crate::core::serialization::{Codec, Message, SerializationFormat};
pub use crate::error::{ProtocolError, Result};
pub use crate::service::broker::Broker;
pub use crate::service::client::{ClientState, ReconnectingClient};
