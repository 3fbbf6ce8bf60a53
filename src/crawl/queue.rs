// src/crawl/queue.rs
// =============================================================================
// This module implements the work queue every render runs on.
//
// How it works:
// 1. `WorkQueue::new(n)` spawns n worker tasks sharing one channel receiver
// 2. `add()` pushes a task onto the channel and returns immediately
// 3. Each worker pulls the next task, runs it to completion, pulls again
// 4. Tasks may call `add()` themselves; new work lands on the same channel
// 5. `done()` waits until nothing is queued and nothing is running
//
// The queue keeps one counter of outstanding tasks (queued + running). A task
// is counted from the moment it is added until it finishes, and a running
// task adds its children before it finishes, so the counter only reaches
// zero once the whole work graph has been explored.
//
// Failures:
// - A failing task does not cancel its siblings or stop the queue
// - The first failure is kept and handed back by `done()`
// - There are no retries
//
// Rust concepts:
// - Arc: shared ownership of the queue state between workers and tasks
// - mpsc channels: hand tasks to whichever worker is free
// - watch channels: broadcast the outstanding-task count to `done()`
// =============================================================================

use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};

type Job = BoxFuture<'static, ()>;

/// A bounded-concurrency queue of async tasks.
///
/// Cloning gives another handle onto the same queue. Must be created inside a
/// tokio runtime because the workers are spawned right away.
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
    concurrency: usize,
}

// State the workers can see without holding the sender, so that dropping every
// `WorkQueue` handle closes the channel and lets the workers exit.
struct Shared {
    outstanding: watch::Sender<usize>,
    first_error: Mutex<Option<anyhow::Error>>,
}

impl Shared {
    fn record_failure(&self, error: anyhow::Error) {
        let mut first = lock(&self.first_error);
        if first.is_none() {
            *first = Some(error);
        }
    }
}

// Decrements the outstanding count when a task finishes, or when its future is
// dropped because it panicked
struct Outstanding(Arc<Shared>);

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.0.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Completion handle for one task
pub struct TaskHandle {
    receiver: oneshot::Receiver<Result<(), String>>,
}

impl TaskHandle {
    /// Waits for the task and returns its outcome
    pub async fn join(self) -> Result<()> {
        match self.receiver.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(anyhow!(message)),
            Err(_) => Err(anyhow!("task was dropped before it completed")),
        }
    }
}

impl WorkQueue {
    /// Creates a queue that runs at most `concurrency` tasks at once
    /// (a concurrency of 0 is treated as 1)
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let (outstanding, _) = watch::channel(0usize);

        let shared = Arc::new(Shared {
            outstanding,
            first_error: Mutex::new(None),
        });

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        for _ in 0..concurrency {
            tokio::spawn(worker(Arc::clone(&receiver), Arc::clone(&shared)));
        }

        Self {
            sender,
            shared,
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queues a task. Never blocks; the task starts once a worker is free.
    pub fn add<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, receiver) = oneshot::channel();

        self.shared.outstanding.send_modify(|n| *n += 1);
        let guard = Outstanding(Arc::clone(&self.shared));

        let job = async move {
            let outcome = match task.await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let message = format!("{:#}", e);
                    guard.0.record_failure(e);
                    Err(message)
                }
            };
            let _ = tx.send(outcome);
            drop(guard);
        }
        .boxed();

        // Only fails once every worker is gone (runtime shutting down); the
        // job is dropped, which releases its count and closes its handle
        let _ = self.sender.send(job);

        TaskHandle { receiver }
    }

    /// Number of tasks queued or running right now
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Waits until there are zero queued and zero running tasks, including
    /// tasks added while waiting. Returns the first task failure, if any.
    pub async fn done(&self) -> Result<()> {
        let mut outstanding = self.shared.outstanding.subscribe();
        outstanding
            .wait_for(|n| *n == 0)
            .await
            .map_err(|_| anyhow!("work queue shut down"))?;

        match lock(&self.shared.first_error).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

async fn worker(
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    shared: Arc<Shared>,
) {
    loop {
        // Only the worker waiting for the next job holds the receiver lock
        let job = { receiver.lock().await.recv().await };

        let Some(job) = job else {
            break;
        };

        // Run on its own task so a panicking job doesn't take the worker down
        if let Err(e) = tokio::spawn(job).await {
            if e.is_panic() {
                shared.record_failure(anyhow!("prerender task panicked"));
            }
        }
    }
}

// Locks a mutex, recovering the data if another thread panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. Why a channel instead of recursion?
//    - A rendered page can discover more pages, which discover more pages...
//    - Recursing would make the call depth grow with the size of the site
//    - With a channel, discovered work is just pushed back onto the queue
//
// 2. What does watch::channel do?
//    - It holds one value (here: the outstanding-task count)
//    - Receivers can wait until the value satisfies a condition
//    - wait_for(|n| *n == 0) is "sleep until the queue is idle"
//
// 3. Why is the counter decremented in Drop?
//    - Drop runs whether the task finished normally or panicked
//    - If we forgot to decrement, done() would wait forever
//
// 4. What is BoxFuture?
//    - Every async block has its own anonymous type
//    - Boxing them gives one type we can send down a channel
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_done_on_empty_queue() {
        let queue = WorkQueue::new(2);
        assert!(queue.done().await.is_ok());
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let queue = WorkQueue::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue.add(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        queue.done().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_done_waits_for_tasks_added_by_tasks() {
        let queue = WorkQueue::new(2);
        let finished = Arc::new(AtomicUsize::new(0));

        fn spawn_tree(queue: WorkQueue, finished: Arc<AtomicUsize>, depth: usize) {
            let inner = queue.clone();
            queue.add(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                if depth > 0 {
                    spawn_tree(inner.clone(), Arc::clone(&finished), depth - 1);
                    spawn_tree(inner, Arc::clone(&finished), depth - 1);
                }
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        spawn_tree(queue.clone(), Arc::clone(&finished), 4);
        queue.done().await.unwrap();

        // a full binary tree of depth 4 has 31 nodes
        assert_eq!(finished.load(Ordering::SeqCst), 31);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let queue = WorkQueue::new(1);
        let finished = Arc::new(AtomicUsize::new(0));

        let failing = queue.add(async { Err::<(), _>(anyhow!("boom")) });
        for _ in 0..5 {
            let finished = Arc::clone(&finished);
            queue.add(async move {
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let err = queue.done().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(finished.load(Ordering::SeqCst), 5);

        let handle_err = failing.join().await.unwrap_err();
        assert!(handle_err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let queue = WorkQueue::new(1);
        let handle = queue.add(async {
            if true {
                panic!("render exploded");
            }
            Ok(())
        });
        let after = queue.add(async { Ok(()) });

        assert!(handle.join().await.is_err());
        assert!(after.join().await.is_ok());
        let err = queue.done().await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}
