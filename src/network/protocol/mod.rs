//! Per-channel protocols
//!
//! A protocol is attached to one channel, subscribes to the messages it
//! cares about, and reports a single completion code through the handler
//! passed to `start`. Protocols hold only a weak reference to their channel.

pub mod address;
pub mod events;
pub mod ping;
pub mod seed;
pub mod timer;
pub mod version;

pub use address::ProtocolAddress;
pub use events::ProtocolEvents;
pub use ping::ProtocolPing;
pub use seed::ProtocolSeed;
pub use timer::ProtocolTimer;
pub use version::ProtocolVersion;

use crate::error::{Error, Result};
use crate::network::channel::Channel;
use std::sync::{Arc, Mutex, PoisonError};

/// Receives every event of a started protocol.
pub type EventHandler = Arc<dyn Fn(Result<()>) + Send + Sync>;

/// Receives a protocol's single completion code.
pub type CompletionHandler = Box<dyn FnOnce(Result<()>) + Send>;

pub trait Protocol: Send + Sync + 'static {
    const NAME: &'static str;

    fn events(&self) -> &ProtocolEvents;

    /// Attach to the channel. `handler` is called once with the outcome.
    fn start(self: &Arc<Self>, handler: CompletionHandler);

    fn channel(&self) -> Option<Arc<Channel>> {
        self.events().channel()
    }

    fn stopped(&self) -> bool {
        self.events().stopped()
    }

    fn stop(&self, code: Error) {
        self.events().stop(code);
    }
}

/// One-shot holder for a [`CompletionHandler`].
#[derive(Default)]
pub struct Completion {
    handler: Mutex<Option<CompletionHandler>>,
}

impl Completion {
    pub fn set(&self, handler: CompletionHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Fire the handler if still pending. Returns true if it fired.
    pub fn complete(&self, code: Result<()>) -> bool {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handler {
            Some(handler) => {
                handler(code);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
