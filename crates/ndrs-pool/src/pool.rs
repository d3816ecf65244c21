//! Thread pool implementation.
//!
//! Workers sleep on a condvar until a task is queued or shutdown is
//! requested. Only the queue mutex is shared; tasks themselves carry
//! whatever state they need.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads consuming a FIFO task queue.
pub struct TaskPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
}

/// Shared state between the submitting threads and the workers.
struct PoolInner {
    /// Pending tasks plus the shutdown flag, guarded together so a worker
    /// can atomically decide "run this" vs "exit".
    queue: Mutex<QueueState>,

    /// Signalled when a task is pushed or shutdown begins.
    condvar: Condvar,
}

struct QueueState {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

impl TaskPool {
    /// Create a pool with `workers` threads.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is 0.
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "task pool must have at least 1 worker");

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let workers = (0..workers)
            .map(|_| {
                let inner = Arc::clone(&inner);
                thread::spawn(move || worker_loop(inner))
            })
            .collect();

        TaskPool { inner, workers }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task. Tasks start in submission order; completion order is
    /// up to the scheduler.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.shutdown {
                return;
            }
            queue.tasks.push_back(Box::new(task));
        }
        self.inner.condvar.notify_one();
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(crate::default_worker_count())
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.shutdown = true;
            queue.tasks.clear();
        }
        self.inner.condvar.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let task = {
            let mut queue = inner.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.shutdown {
                    return;
                }
                queue = inner.condvar.wait(queue).unwrap();
            }
        };
        task();
    }
}
