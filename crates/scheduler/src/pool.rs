//! PriorityScheduler - fixed worker pool behind one priority queue
//!
//! Workers park on a [`Notify`] when the queue is empty. Every task runs in
//! its own tokio task, awaited by the worker, so a panicking task only
//! takes itself down and concurrency stays bounded by the pool size.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use contracts::TaskPriority;

use crate::{AgedPriority, PriorityQueue, SchedulerError};

/// Unit of work accepted by the scheduler
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Shared<K> {
    queue: Mutex<PriorityQueue<K, Task>>,
    notify: Notify,
    shutdown: AtomicBool,
    active: AtomicUsize,
}

impl<K> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, PriorityQueue<K, Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct PriorityScheduler<K> {
    name: String,
    shared: Arc<Shared<K>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<K> PriorityScheduler<K>
where
    K: Ord + Send + 'static,
{
    /// Spawn `workers` workers. Must be called within a tokio runtime.
    pub fn new(name: impl Into<String>, workers: usize) -> Result<Self, SchedulerError> {
        if workers == 0 {
            return Err(SchedulerError::NoWorkers);
        }

        let name = name.into();
        let shared = Arc::new(Shared {
            queue: Mutex::new(PriorityQueue::new()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        });

        let handles = (0..workers)
            .map(|id| {
                let shared = Arc::clone(&shared);
                let name = name.clone();
                tokio::spawn(async move { worker_loop(shared, name, id).await })
            })
            .collect();

        info!(scheduler = %name, workers, "Scheduler started");
        Ok(Self {
            name,
            shared,
            workers: Mutex::new(handles),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue one task
    pub fn submit<F>(&self, key: K, task: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_batch([(key, Box::pin(task) as Task)])
    }

    /// Queue several tasks atomically.
    ///
    /// No worker observes a partial batch, so the batch is executed in key
    /// order even with a single idle worker.
    pub fn submit_batch<I>(&self, tasks: I) -> Result<(), SchedulerError>
    where
        I: IntoIterator<Item = (K, Task)>,
    {
        {
            let mut queue = self.shared.lock();
            // Checked under the lock so nothing lands after shutdown cleared the queue
            if self.is_shut_down() {
                return Err(SchedulerError::ShutDown);
            }
            for (key, task) in tasks {
                queue.push(key, task);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Tasks queued but not started
    pub fn pending(&self) -> usize {
        self.shared.lock().len()
    }

    /// Tasks currently executing
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Drop every pending task and wait for running ones to finish.
    ///
    /// Idempotent; returns the number of pending tasks dropped by this call.
    #[instrument(name = "scheduler_shutdown", skip(self), fields(scheduler = %self.name))]
    pub async fn shutdown(&self) -> usize {
        let dropped = {
            let mut queue = self.shared.lock();
            self.shared.shutdown.store(true, Ordering::SeqCst);
            queue.clear()
        };
        self.shared.notify.notify_waiters();

        let handles: Vec<_> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                error!(scheduler = %self.name, error = ?e, "Worker task panicked");
            }
        }

        debug!(scheduler = %self.name, dropped, "Scheduler shutdown complete");
        dropped
    }
}

impl PriorityScheduler<AgedPriority> {
    /// Queue a task under its priority class, aged from `submitted_at_ms`
    pub fn submit_with_priority<F>(
        &self,
        priority: TaskPriority,
        submitted_at_ms: i64,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(AgedPriority::new(priority, submitted_at_ms), task)
    }
}

async fn worker_loop<K>(shared: Arc<Shared<K>>, name: String, id: usize)
where
    K: Ord + Send + 'static,
{
    debug!(scheduler = %name, worker = id, "Worker started");

    loop {
        // Register interest before looking at the queue so a submit in
        // between is not missed
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let next = shared.lock().pop();
        match next {
            Some((_, task)) => {
                shared.active.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = tokio::spawn(task).await {
                    error!(scheduler = %name, worker = id, error = %e, "Task failed");
                }
                shared.active.fetch_sub(1, Ordering::SeqCst);
            }
            None => notified.await,
        }
    }

    debug!(scheduler = %name, worker = id, "Worker stopped");
}
