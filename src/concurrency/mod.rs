//! Concurrency primitives
//!
//! The execution context, dispatch disciplines, one-shot deadlines and
//! notification fan-out used by every networking component.

pub mod deadline;
pub mod dispatcher;
pub mod subscriber;
pub mod threadpool;

pub use deadline::Deadline;
pub use dispatcher::Dispatcher;
pub use subscriber::{Resubscriber, Subscriber};
pub use threadpool::{ExecutionContext, Threadpool};
