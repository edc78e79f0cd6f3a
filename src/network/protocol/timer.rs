//! Protocol events plus a deadline
//!
//! Expiry is delivered as a `ChannelTimeout` event inside the channel's
//! synchronized section. A perpetual timer re-arms after each expiry; a
//! single-shot one fires at most once. Stopping the channel cancels the timer.

use super::events::ProtocolEvents;
use super::EventHandler;
use crate::concurrency::Deadline;
use crate::error::{Error, Result};
use crate::network::channel::Channel;
use std::sync::Arc;
use std::time::Duration;

struct TimerState {
    deadline: Deadline,
    perpetual: bool,
}

#[derive(Clone)]
pub struct ProtocolTimer {
    events: ProtocolEvents,
    timer: Arc<TimerState>,
}

impl ProtocolTimer {
    pub fn new(
        channel: &Arc<Channel>,
        name: &'static str,
        timeout: Duration,
        perpetual: bool,
    ) -> Self {
        Self {
            events: ProtocolEvents::new(channel, name),
            timer: Arc::new(TimerState {
                deadline: Deadline::new(channel.context().clone(), timeout),
                perpetual,
            }),
        }
    }

    pub fn events(&self) -> &ProtocolEvents {
        &self.events
    }

    /// Start event delivery and arm the timer.
    pub fn start(&self, handler: EventHandler) {
        let timer = self.timer.clone();
        self.events.start(Arc::new(move |code| {
            if code == Err(Error::ChannelStopped) {
                timer.deadline.stop();
            }
            handler(code);
        }));
        self.reset_timer();
    }

    /// Restart the countdown from now.
    pub fn reset_timer(&self) {
        if self.events.stopped() {
            return;
        }
        let this = self.clone();
        self.timer.deadline.start(move |result| this.handle_timer(result));
    }

    pub fn set_event(&self, code: Result<()>) {
        self.events.set_event(code);
    }

    pub fn stopped(&self) -> bool {
        self.events.stopped()
    }

    fn handle_timer(self, result: Result<()>) {
        // Canceled by restart or stop.
        if result.is_err() || self.events.stopped() {
            return;
        }

        let Some(channel) = self.events.channel() else {
            return;
        };
        channel.strand().synchronized(move || {
            if self.events.stopped() {
                return;
            }
            self.events.set_event(Err(Error::ChannelTimeout));
            if self.timer.perpetual {
                self.reset_timer();
            }
        });
    }
}
