//! Notification fan-out
//!
//! [`Subscriber`] handlers are one-shot: each fires once and is dropped.
//! [`Resubscriber`] handlers return `true` to stay registered. After `stop`,
//! both deliver the stop arguments exactly once to every handler, including
//! handlers registered later, and never notify again.

use super::ExecutionContext;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type OneShot<A> = Box<dyn FnOnce(A) + Send + 'static>;
type Repeating<A> = Box<dyn FnMut(A) -> bool + Send + 'static>;

struct State<A, H> {
    stopped: Option<A>,
    handlers: Vec<H>,
}

impl<A, H> State<A, H> {
    fn new() -> Self {
        Self {
            stopped: None,
            handlers: Vec::new(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Subscriber
// ============================================================================

pub struct Subscriber<A> {
    name: &'static str,
    context: ExecutionContext,
    state: Mutex<State<A, OneShot<A>>>,
}

impl<A: Clone + Send + 'static> Subscriber<A> {
    pub fn new(context: ExecutionContext, name: &'static str) -> Self {
        Self {
            name,
            context,
            state: Mutex::new(State::new()),
        }
    }

    /// Register a handler. If already stopped the handler is invoked
    /// immediately with the stop arguments.
    pub fn subscribe<H>(&self, handler: H)
    where
        H: FnOnce(A) + Send + 'static,
    {
        let mut state = lock(&self.state);
        match state.stopped.clone() {
            Some(args) => {
                drop(state);
                handler(args);
            }
            None => state.handlers.push(Box::new(handler)),
        }
    }

    /// Deliver to all current handlers on the calling thread.
    pub fn invoke(&self, args: A) {
        let handlers = std::mem::take(&mut lock(&self.state).handlers);
        for handler in handlers {
            handler(args.clone());
        }
    }

    /// Deliver to all current handlers without blocking the caller.
    pub fn relay(&self, args: A) {
        let handlers = std::mem::take(&mut lock(&self.state).handlers);
        for handler in handlers {
            let args = args.clone();
            self.context.post(move || handler(args));
        }
    }

    /// Enter the stopped state and notify current handlers. Returns false if
    /// already stopped.
    pub fn stop(&self, args: A) -> bool {
        let handlers = {
            let mut state = lock(&self.state);
            if state.stopped.is_some() {
                return false;
            }
            state.stopped = Some(args.clone());
            std::mem::take(&mut state.handlers)
        };

        log::trace!("Stopping {} subscriber ({} handlers)", self.name, handlers.len());
        for handler in handlers {
            handler(args.clone());
        }
        true
    }

    pub fn stopped(&self) -> bool {
        lock(&self.state).stopped.is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Resubscriber
// ============================================================================

pub struct Resubscriber<A> {
    name: &'static str,
    context: ExecutionContext,
    state: Mutex<State<A, Repeating<A>>>,
}

impl<A: Clone + Send + 'static> Resubscriber<A> {
    pub fn new(context: ExecutionContext, name: &'static str) -> Self {
        Self {
            name,
            context,
            state: Mutex::new(State::new()),
        }
    }

    /// Register a handler that stays subscribed while it returns true.
    pub fn subscribe<H>(&self, mut handler: H)
    where
        H: FnMut(A) -> bool + Send + 'static,
    {
        let mut state = lock(&self.state);
        match state.stopped.clone() {
            Some(args) => {
                drop(state);
                handler(args);
            }
            None => state.handlers.push(Box::new(handler)),
        }
    }

    /// Deliver to all current handlers on the calling thread.
    pub fn invoke(&self, args: A) {
        let handlers = std::mem::take(&mut lock(&self.state).handlers);
        let mut kept = Vec::with_capacity(handlers.len());
        for mut handler in handlers {
            if handler(args.clone()) {
                kept.push(handler);
            }
        }
        self.restore(kept);
    }

    /// Deliver to all current handlers without blocking the caller.
    pub fn relay(self: &Arc<Self>, args: A) {
        let this = self.clone();
        self.context.post(move || this.invoke(args));
    }

    /// Enter the stopped state and notify current handlers. Returns false if
    /// already stopped.
    pub fn stop(&self, args: A) -> bool {
        let handlers = {
            let mut state = lock(&self.state);
            if state.stopped.is_some() {
                return false;
            }
            state.stopped = Some(args.clone());
            std::mem::take(&mut state.handlers)
        };

        log::trace!("Stopping {} resubscriber ({} handlers)", self.name, handlers.len());
        for mut handler in handlers {
            handler(args.clone());
        }
        true
    }

    pub fn stopped(&self) -> bool {
        lock(&self.state).stopped.is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Handlers kept by an invoke that raced a stop still owe their stop call.
    fn restore(&self, mut kept: Vec<Repeating<A>>) {
        if kept.is_empty() {
            return;
        }

        let mut state = lock(&self.state);
        match state.stopped.clone() {
            Some(args) => {
                drop(state);
                for mut handler in kept {
                    handler(args.clone());
                }
            }
            None => {
                kept.append(&mut state.handlers);
                state.handlers = kept;
            }
        }
    }
}
