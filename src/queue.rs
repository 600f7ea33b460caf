use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial execution context for termination callbacks.
///
/// Jobs run one at a time, in submission order, on a dedicated worker
/// thread. Displays that share a queue therefore see their termination
/// callbacks totally ordered.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    label: String,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

fn run_job(label: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("job on queue '{}' panicked", label);
    }
}

fn worker_loop(label: String, receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        run_job(&label, job);
    }
    debug!("queue '{}' stopped", label);
}

impl ExecutionQueue {
    pub fn new(label: impl Into<String>) -> anyhow::Result<Self> {
        let label = label.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let worker_label = label.clone();
        let worker = thread::Builder::new()
            .name(label.clone())
            .spawn(move || worker_loop(worker_label, receiver))
            .map_err(|e| anyhow::anyhow!("can not start queue '{}': {}", label, e))?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                worker_id: worker.thread().id(),
                label,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the caller is running on this queue's worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.worker_id
    }

    /// Enqueues `job` and returns immediately.
    ///
    /// Once the queue has been shut down jobs run on the caller's thread so
    /// that no notification is lost.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        let rejected = match self.inner.sender.lock().as_ref() {
            Some(sender) => sender.send(job).err().map(|e| e.0),
            None => Some(job),
        };

        if let Some(job) = rejected {
            warn!(
                "queue '{}' is shut down, running job on the calling thread",
                self.inner.label
            );
            run_job(&self.inner.label, job);
        }
    }

    /// Enqueues `job` and blocks until it has run.
    pub fn dispatch_and_wait(&self, job: impl FnOnce() + Send + 'static) {
        if self.is_current() {
            run_job(&self.inner.label, Box::new(job));
            return;
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        self.dispatch(move || {
            job();
            let _ = done_tx.send(());
        });
        // A panicking job drops `done_tx`, which also ends the wait.
        let _ = done_rx.recv();
    }

    /// Stops accepting jobs, lets the worker drain what is queued and joins it.
    pub fn shutdown(&self) {
        self.inner.sender.lock().take();
        if self.is_current() {
            return;
        }
        if let Some(worker) = self.inner.worker.lock().take() {
            if worker.join().is_err() {
                error!("queue '{}' worker exited abnormally", self.inner.label);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.sender.lock().is_none()
    }
}

impl Debug for ExecutionQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("label", &self.inner.label)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = ExecutionQueue::new("test.queue.order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..32 {
            let seen = seen.clone();
            queue.dispatch(move || seen.lock().push(i));
        }
        queue.dispatch_and_wait(|| {});

        assert_eq!(*seen.lock(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_jobs_run_on_worker_thread() {
        let queue = ExecutionQueue::new("test.queue.thread").unwrap();
        assert!(!queue.is_current());

        let on_worker = Arc::new(AtomicBool::new(false));
        let flag = on_worker.clone();
        let probe = queue.clone();
        queue.dispatch_and_wait(move || flag.store(probe.is_current(), Ordering::SeqCst));

        assert!(on_worker.load(Ordering::SeqCst));
    }

    #[test]
    fn test_nested_dispatch_and_wait_does_not_deadlock() {
        let queue = ExecutionQueue::new("test.queue.nested").unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let inner_queue = queue.clone();
        let flag = ran.clone();
        queue.dispatch_and_wait(move || {
            inner_queue.dispatch_and_wait(move || flag.store(true, Ordering::SeqCst));
        });

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dispatch_after_shutdown_runs_inline() {
        let queue = ExecutionQueue::new("test.queue.shutdown").unwrap();
        queue.shutdown();
        assert!(queue.is_shut_down());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        queue.dispatch(move || flag.store(true, Ordering::SeqCst));

        assert!(ran.load(Ordering::SeqCst));
    }
}
