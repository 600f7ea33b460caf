use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

use crate::queue::ExecutionQueue;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot notification that a virtual display has been torn down.
///
/// Clones share the same state. The callback is claimed by exactly one
/// caller of [`fire`](Self::fire), [`fire_on`](Self::fire_on) or
/// [`cancel`](Self::cancel); every later attempt is a no-op that reports
/// `false`.
#[derive(Clone)]
pub struct TerminationHandler {
    inner: Arc<Inner>,
}

struct Inner {
    callback: Mutex<Option<Callback>>,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    finished_tx: watch::Sender<bool>,
}

impl Inner {
    fn run(&self, callback: Callback) {
        if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            log::error!("termination handler panicked");
        }
        self.finish();
    }

    fn finish(&self) {
        let mut finished = self.finished.lock();
        *finished = true;
        self.finished_cv.notify_all();
        drop(finished);
        self.finished_tx.send_replace(true);
    }
}

impl TerminationHandler {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        let (finished_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                callback: Mutex::new(Some(Box::new(callback))),
                finished: Mutex::new(false),
                finished_cv: Condvar::new(),
                finished_tx,
            }),
        }
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    fn claim(&self) -> Option<Callback> {
        self.inner.callback.lock().take()
    }

    /// Runs the callback on the current thread.
    pub fn fire(&self) -> bool {
        match self.claim() {
            Some(callback) => {
                self.inner.run(callback);
                true
            }
            None => false,
        }
    }

    /// Schedules the callback on `queue` without waiting for it.
    pub fn fire_on(&self, queue: &ExecutionQueue) -> bool {
        let Some(callback) = self.claim() else {
            return false;
        };
        let inner = self.inner.clone();
        queue.dispatch(move || inner.run(callback));
        true
    }

    /// Runs the callback on `queue` and blocks until it has finished.
    ///
    /// When another caller already claimed the callback this still waits for
    /// that run to complete, unless the current thread is `queue` itself.
    pub fn fire_on_and_wait(&self, queue: &ExecutionQueue) -> bool {
        match self.claim() {
            Some(callback) => {
                let inner = self.inner.clone();
                queue.dispatch_and_wait(move || inner.run(callback));
                true
            }
            None => {
                if !queue.is_current() {
                    self.wait_blocking();
                }
                false
            }
        }
    }

    /// Drops the callback without running it. Waiters are released.
    pub fn cancel(&self) -> bool {
        match self.claim() {
            Some(_) => {
                self.inner.finish();
                true
            }
            None => false,
        }
    }

    /// Whether some caller has already claimed the callback.
    pub fn is_claimed(&self) -> bool {
        self.inner.callback.lock().is_none()
    }

    /// Whether the callback has finished (or was cancelled).
    pub fn has_fired(&self) -> bool {
        *self.inner.finished.lock()
    }

    /// Blocks the current thread until the callback has finished.
    pub fn wait_blocking(&self) {
        let mut finished = self.inner.finished.lock();
        while !*finished {
            self.inner.finished_cv.wait(&mut finished);
        }
    }

    /// Resolves once the callback has finished.
    pub async fn wait(&self) {
        let mut finished_rx = self.inner.finished_tx.subscribe();
        while !*finished_rx.borrow() {
            if finished_rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for TerminationHandler {
    fn default() -> Self {
        Self::noop()
    }
}

impl Debug for TerminationHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationHandler")
            .field("claimed", &self.is_claimed())
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_handler() -> (TerminationHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handler = TerminationHandler::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[test]
    fn test_fire_runs_callback_once() {
        let (handler, count) = counting_handler();

        assert!(handler.fire());
        assert!(!handler.fire());
        assert!(!handler.clone().fire());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handler.has_fired());
    }

    #[test]
    fn test_cancel_skips_callback() {
        let (handler, count) = counting_handler();

        assert!(handler.cancel());
        assert!(!handler.fire());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(handler.has_fired());
    }

    #[test]
    fn test_fire_on_and_wait_waits_for_other_claimant() {
        let queue = ExecutionQueue::new("test.termination.wait").unwrap();
        let (handler, count) = {
            let count = Arc::new(AtomicUsize::new(0));
            let counter = count.clone();
            let handler = TerminationHandler::new(move || {
                std::thread::sleep(Duration::from_millis(50));
                counter.fetch_add(1, Ordering::SeqCst);
            });
            (handler, count)
        };

        assert!(handler.fire_on(&queue));
        assert!(!handler.fire_on_and_wait(&queue));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_still_finishes() {
        let queue = ExecutionQueue::new("test.termination.panic").unwrap();
        let handler = TerminationHandler::new(|| panic!("boom"));

        assert!(handler.fire_on_and_wait(&queue));
        assert!(handler.has_fired());

        // The worker survives the panic.
        let (again, count) = counting_handler();
        assert!(again.fire_on_and_wait(&queue));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_resolves_after_fire() {
        let queue = ExecutionQueue::new("test.termination.async").unwrap();
        let (handler, count) = counting_handler();

        let waiter = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.wait().await })
        };
        handler.fire_on(&queue);

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("termination was not observed")
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Already fired: resolves immediately.
        handler.wait().await;
    }
}
