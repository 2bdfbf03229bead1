//! # Protocol Layer
//!
//! Connection-level behavior shared by both roles.
//!
//! ## Components
//! - **Handshake**: raw protocol identifier exchange before framed traffic
//! - **Callbacks**: replaceable connect/message/disconnect handler slots
//! - **Session**: the per-connection handshake, read loop and write queue

pub mod callbacks;
pub mod handshake;
pub mod session;
