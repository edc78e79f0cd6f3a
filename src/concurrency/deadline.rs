//! One-shot timers with exactly-once completion
//!
//! A started deadline delivers `Ok(())` on expiry or
//! `Err(OperationCanceled)` when stopped or restarted, never both. Whichever
//! of expiry and cancellation takes the handler first wins.

use super::ExecutionContext;
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type TimerHandler = Box<dyn FnOnce(Result<()>) + Send + 'static>;
type Slot = Arc<Mutex<Option<TimerHandler>>>;

struct Armed {
    slot: Slot,
    token: CancellationToken,
}

impl Armed {
    fn cancel(self) {
        self.token.cancel();
        if let Some(handler) = take(&self.slot) {
            handler(Err(Error::OperationCanceled));
        }
    }
}

pub struct Deadline {
    context: ExecutionContext,
    duration: Duration,
    armed: Mutex<Option<Armed>>,
}

impl Deadline {
    pub fn new(context: ExecutionContext, duration: Duration) -> Self {
        Self {
            context,
            duration,
            armed: Mutex::new(None),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Arm with the configured duration.
    pub fn start<H>(&self, handler: H)
    where
        H: FnOnce(Result<()>) + Send + 'static,
    {
        self.start_with(self.duration, handler);
    }

    /// Arm with an explicit duration, canceling any previous arming.
    pub fn start_with<H>(&self, duration: Duration, handler: H)
    where
        H: FnOnce(Result<()>) + Send + 'static,
    {
        let slot: Slot = Arc::new(Mutex::new(Some(Box::new(handler))));
        let token = CancellationToken::new();

        let previous = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Armed {
                slot: slot.clone(),
                token: token.clone(),
            });
        if let Some(previous) = previous {
            previous.cancel();
        }

        self.context.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    if let Some(handler) = take(&slot) {
                        handler(Ok(()));
                    }
                }
                _ = token.cancelled() => {}
            }
        });
    }

    /// Cancel the pending expiry. Once this returns the handler has either
    /// already fired or received `OperationCanceled`.
    pub fn stop(&self) {
        let armed = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(armed) = armed {
            armed.cancel();
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn take(slot: &Slot) -> Option<TimerHandler> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}
