//! # Transport Layer
//!
//! TCP plumbing underneath the sessions: binding, connecting (optionally from
//! a fixed local endpoint) and self-connection detection.

pub mod tcp;
