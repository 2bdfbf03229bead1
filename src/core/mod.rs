//! # Core Protocol Components
//!
//! Message serialization and length-prefixed framing.
//!
//! This module is transport-agnostic: it turns values into frames and byte
//! streams back into values, and knows nothing about sockets or peers.
//!
//! ## Components
//! - **Serialization**: `Codec` turning any serializable value into a body and
//!   bodies back into schema-less `Message` trees
//! - **Codec**: `FrameCodec` for tokio framing plus `pack_frame` / `read_frame`
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Body(Length)]
//! ```
//!
//! ## Limits
//! - Maximum body size: 2^24 - 1 bytes, checked on encode and as soon as a
//!   header is read (before the body is buffered)

pub mod codec;
pub mod serialization;
