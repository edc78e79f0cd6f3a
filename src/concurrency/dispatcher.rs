//! Work dispatch disciplines
//!
//! - `ordered`: jobs run one at a time in submission order.
//! - `unordered`: jobs run concurrently in any order.
//! - `synchronized`: jobs never overlap with each other or with any holder
//!   of [`Dispatcher::lock`], but carry no ordering guarantee.

use super::ExecutionContext;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Dispatcher {
    name: &'static str,
    context: ExecutionContext,
    queue: mpsc::UnboundedSender<Job>,
    exclusive: Arc<Mutex<()>>,
}

impl Dispatcher {
    /// Create a dispatcher on `context`. The ordered queue is drained by a
    /// single task that ends when the dispatcher is dropped.
    pub fn new(context: ExecutionContext, name: &'static str) -> Self {
        let (queue, mut jobs) = mpsc::unbounded_channel::<Job>();
        context.spawn(async move {
            while let Some(job) = jobs.recv().await {
                job();
            }
        });

        Self {
            name,
            context,
            queue,
            exclusive: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn ordered<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.queue.send(Box::new(job)).is_err() {
            log::debug!("Dispatcher {} dropped an ordered job", self.name);
        }
    }

    pub fn unordered<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.context.post(job);
    }

    pub fn synchronized<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let exclusive = self.exclusive.clone();
        self.context.spawn(async move {
            let _guard = exclusive.lock().await;
            job();
        });
    }

    /// Enter the synchronized section directly from async code.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.exclusive.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ordered_preserves_submission_order() {
        let dispatcher = Dispatcher::new(ExecutionContext::current(), "test");
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            dispatcher.ordered(move || seen.lock().unwrap().push(i));
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        dispatcher.ordered(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_synchronized_never_overlaps() {
        let dispatcher = Dispatcher::new(ExecutionContext::current(), "test");
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let active = active.clone();
            let overlaps = overlaps.clone();
            let done = done.clone();
            dispatcher.synchronized(move || {
                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_micros(200));
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        while done.load(Ordering::SeqCst) < 50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unordered_runs_all() {
        let dispatcher = Dispatcher::new(ExecutionContext::current(), "test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..10 {
            let tx = tx.clone();
            dispatcher.unordered(move || {
                let _ = tx.send(i);
            });
        }
        drop(tx);

        let mut received = Vec::new();
        while let Some(i) = rx.recv().await {
            received.push(i);
        }
        received.sort();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }
}
