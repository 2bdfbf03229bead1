//! # Roles
//!
//! - **Broker**: listens, tracks peers by address, unicasts and broadcasts
//! - **ReconnectingClient**: keeps one connection to a broker alive

pub mod broker;
pub mod client;
