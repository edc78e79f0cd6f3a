//! Worker pool and the execution context handed to every component

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// A fixed set of worker threads driving all asynchronous work.
pub struct Threadpool {
    runtime: Runtime,
    size: usize,
}

impl Threadpool {
    /// Create a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let size = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name("network")
            .enable_all()
            .build()
            .map_err(|e| {
                log::error!("Failed to start {} worker threads: {}", size, e);
                Error::OperationFailed
            })?;

        Ok(Self { runtime, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Handle for posting work onto this pool.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::from(self.runtime.handle().clone())
    }

    /// Run a future to completion on the pool, blocking the caller.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Stop accepting work and join the workers, abandoning tasks still
    /// running after `timeout`.
    pub fn shutdown(self, timeout: Duration) {
        self.runtime.shutdown_timeout(timeout);
    }
}

/// Cloneable handle to the worker pool.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    handle: Handle,
}

impl ExecutionContext {
    /// Context of the runtime the caller is running on.
    ///
    /// Panics when called outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::from(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a future onto the pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a closure on some worker at a later time.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { job() });
    }
}

impl From<Handle> for ExecutionContext {
    fn from(handle: Handle) -> Self {
        Self { handle }
    }
}
