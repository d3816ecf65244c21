//! Worker pool with a FIFO submit queue.
//!
//! The pool keeps a fixed set of worker threads alive for the lifetime of
//! the process. Callers hand in boxed tasks; workers pull them in
//! submission order. Completion order is not guaranteed - a slow task on
//! one worker does not block the others.
//!
//! Shutdown happens on drop: the queue is closed, sleeping workers are
//! woken, queued-but-unstarted tasks are discarded, and running tasks are
//! allowed to finish before the threads are joined.

mod pool;

pub use pool::TaskPool;

/// Default worker count: one per logical CPU, clamped to [1, 64].
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, 64)
}
