//! Event delivery shared by all protocols
//!
//! A protocol starts once. Events then reach its handler until the channel
//! stops, at which point the handler sees `ChannelStopped` exactly once and
//! is released.

use super::EventHandler;
use crate::error::{Error, Result};
use crate::network::channel::Channel;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Stopped,
}

struct Inner {
    name: &'static str,
    channel: Weak<Channel>,
    state: Mutex<State>,
    handler: Mutex<Option<EventHandler>>,
}

#[derive(Clone)]
pub struct ProtocolEvents {
    inner: Arc<Inner>,
}

impl ProtocolEvents {
    pub fn new(channel: &Arc<Channel>, name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                channel: Arc::downgrade(channel),
                state: Mutex::new(State::Idle),
                handler: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.inner.channel.upgrade()
    }

    /// Peer address for log lines.
    pub fn authority(&self) -> String {
        self.channel()
            .map(|channel| channel.authority().to_string())
            .unwrap_or_else(|| "released".to_string())
    }

    /// Install `handler` and bind to the channel's stop. Later calls are
    /// ignored.
    pub fn start(&self, handler: EventHandler) {
        {
            let mut state = lock(&self.inner.state);
            if *state != State::Idle {
                log::warn!("Protocol {} started twice", self.inner.name);
                return;
            }
            *state = State::Started;
            *lock(&self.inner.handler) = Some(handler);
        }

        match self.channel() {
            Some(channel) => {
                let events = self.clone();
                channel.subscribe_stop(move |_| events.set_event(Err(Error::ChannelStopped)));
            }
            None => self.set_event(Err(Error::ChannelStopped)),
        }
    }

    /// Deliver an event. No-op unless started and not yet stopped;
    /// `ChannelStopped` is terminal.
    pub fn set_event(&self, code: Result<()>) {
        let terminal = code == Err(Error::ChannelStopped);
        let handler = {
            let mut state = lock(&self.inner.state);
            if *state != State::Started || (!terminal && self.channel_stopped()) {
                return;
            }
            if terminal {
                *state = State::Stopped;
                lock(&self.inner.handler).take()
            } else {
                lock(&self.inner.handler).clone()
            }
        };

        if let Some(handler) = handler {
            handler(code);
        }
    }

    /// True once stopped, or when the channel is stopped or released.
    pub fn stopped(&self) -> bool {
        *lock(&self.inner.state) == State::Stopped || self.channel_stopped()
    }

    /// Stop the channel this protocol runs on.
    pub fn stop(&self, code: Error) {
        if let Some(channel) = self.channel() {
            channel.stop(code);
        }
    }

    fn channel_stopped(&self) -> bool {
        self.channel().map_or(true, |channel| channel.stopped())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
