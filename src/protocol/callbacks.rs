//! Application callback slots.
//!
//! One replaceable handler per event. An empty slot is a no-op. Handlers are
//! taken out of their slot before being invoked, so a handler may freely call
//! back into the broker or client (including replacing itself). A panicking
//! handler is caught and logged; it never takes the read loop down with it.

use crate::core::serialization::Message;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

/// Handler for connect and disconnect events
pub type PeerCallback = Arc<dyn Fn(SocketAddr) + Send + Sync + 'static>;

/// Handler for received messages
pub type MessageCallback = Arc<dyn Fn(SocketAddr, Message) + Send + Sync + 'static>;

#[derive(Default)]
pub struct Callbacks {
    on_connect: RwLock<Option<PeerCallback>>,
    on_disconnect: RwLock<Option<PeerCallback>>,
    on_message: RwLock<Option<MessageCallback>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &load(&self.on_connect).is_some())
            .field("on_disconnect", &load(&self.on_disconnect).is_some())
            .field("on_message", &load(&self.on_message).is_some())
            .finish()
    }
}

fn load<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn store<T>(slot: &RwLock<Option<T>>, value: Option<T>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = value;
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connect<F>(&self, callback: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        store(&self.on_connect, Some(Arc::new(callback)));
    }

    pub fn set_disconnect<F>(&self, callback: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        store(&self.on_disconnect, Some(Arc::new(callback)));
    }

    pub fn set_message<F>(&self, callback: F)
    where
        F: Fn(SocketAddr, Message) + Send + Sync + 'static,
    {
        store(&self.on_message, Some(Arc::new(callback)));
    }

    /// Empty every slot. Handlers that capture their owner are released here.
    pub fn clear(&self) {
        store(&self.on_connect, None);
        store(&self.on_disconnect, None);
        store(&self.on_message, None);
    }

    /// Returns `false` if the handler panicked.
    pub fn dispatch_connect(&self, peer: SocketAddr) -> bool {
        match load(&self.on_connect) {
            Some(callback) => isolate("connect", peer, || callback(peer)),
            None => true,
        }
    }

    /// Returns `false` if the handler panicked.
    pub fn dispatch_disconnect(&self, peer: SocketAddr) -> bool {
        match load(&self.on_disconnect) {
            Some(callback) => isolate("disconnect", peer, || callback(peer)),
            None => true,
        }
    }

    /// Returns `false` if the handler panicked.
    pub fn dispatch_message(&self, peer: SocketAddr, msg: Message) -> bool {
        match load(&self.on_message) {
            Some(callback) => isolate("message", peer, || callback(peer, msg)),
            None => true,
        }
    }
}

fn isolate<F: FnOnce()>(event: &'static str, peer: SocketAddr, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                event,
                peer = %peer,
                panic = panic_message(payload.as_ref()),
                "Error in {event} handler"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
