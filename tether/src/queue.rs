//! The primary dispatch queue.
//!
//! One thread per endpoint drains posted closures in order. State that the
//! contract declares primary-queue-only is mutated exclusively from here;
//! handlers verify that with an [`Affinity`] token instead of taking a lock,
//! and fail fast when the check does not hold.

use std::sync::mpsc;
use std::thread::{self, ThreadId};

use tracing::warn;

type Task = Box<dyn FnOnce() + Send>;

pub(crate) struct DispatchQueue {
    tx: mpsc::Sender<Task>,
    thread_id: ThreadId,
}

impl DispatchQueue {
    /// Spawn the queue thread. It exits when the owning endpoint is dropped.
    pub(crate) fn start(label: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name(format!("{label}-primary"))
            .spawn(move || {
                for task in rx {
                    task();
                }
            })
            .expect("failed to spawn primary dispatch thread");
        Self {
            tx,
            thread_id: handle.thread().id(),
        }
    }

    pub(crate) fn post(&self, task: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            warn!("primary dispatch queue stopped; dropping task");
        }
    }

    /// Run `f` on the queue and block for its result. Runs inline when the
    /// current thread already is the queue.
    pub(crate) fn run<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> R {
        if self.is_current() {
            return f();
        }
        let (tx, rx) = mpsc::channel();
        self.post(move || {
            let _ = tx.send(f());
        });
        rx.recv().expect("primary dispatch queue stopped")
    }

    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub(crate) fn affinity(&self) -> Affinity {
        Affinity {
            thread_id: self.thread_id,
        }
    }
}

/// Identifies an endpoint's primary dispatch thread
///
/// Captured when a service is constructed, checked when it runs. The check is
/// the sole guard on primary-queue-only state: a failed check is a broken
/// precondition of the contract, answered with a fatal fault rather than a
/// fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affinity {
    thread_id: ThreadId,
}

impl Affinity {
    /// Whether the current thread is the primary dispatch thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_in_order_on_one_thread() {
        let queue = DispatchQueue::start("test");
        let first = queue.run(|| thread::current().id());
        let second = queue.run(|| thread::current().id());
        assert_eq!(first, second);
        assert_ne!(first, thread::current().id());
    }

    #[test]
    fn affinity_holds_only_on_the_queue() {
        let queue = DispatchQueue::start("test");
        let affinity = queue.affinity();
        assert!(!affinity.is_current());
        assert!(queue.run(move || affinity.is_current()));
    }

    #[test]
    fn run_is_reentrant() {
        let queue = std::sync::Arc::new(DispatchQueue::start("test"));
        let inner = queue.clone();
        // A nested run from the queue thread must execute inline, not deadlock.
        assert_eq!(queue.run(move || inner.run(|| 7)), 7);
    }
}
