//! Work-stealing thread pool hosting the per-peer writer tasks.
//!
//! Each worker owns a deque it pushes and pops at the front; idle workers
//! steal from the back of their neighbors' deques. External threads submit
//! through a global FIFO guarded by a lock and condition variable; a worker
//! submitting from inside a task goes straight to its own deque. Local
//! deques keep the common case contention-free, and back-end stealing leaves
//! the owner the cache-warm front of its queue.

use crate::error::TransferError;
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A unit of work. Ownership moves with the task between queues.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    // (pool identity, worker index) of the pool this thread belongs to.
    static WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Per-worker deque: owner-side LIFO at the front, thief-side FIFO at the
/// back, one lock for both ends.
pub struct WorkStealQueue {
    deque: Mutex<VecDeque<Task>>,
}

impl WorkStealQueue {
    fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
        }
    }

    /// Push a task onto the front of the queue.
    pub fn push(&self, task: Task) {
        self.deque.lock().unwrap().push_front(task);
    }

    /// Owner-side pop from the front.
    pub fn try_pop(&self) -> Option<Task> {
        self.deque.lock().unwrap().pop_front()
    }

    /// Thief-side steal from the back.
    pub fn try_steal(&self) -> Option<Task> {
        self.deque.lock().unwrap().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.lock().unwrap().is_empty()
    }
}

struct Shared {
    queues: Vec<WorkStealQueue>,
    global: Mutex<VecDeque<Task>>,
    idle: Condvar,
    done: AtomicBool,
}

impl Shared {
    fn local_queues_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }
}

/// Identity of a pool, used to tell whether the current thread is one of
/// its workers.
fn pool_id(shared: &Arc<Shared>) -> usize {
    Arc::as_ptr(shared) as usize
}

/// Fixed pool of workers sized to the hardware's parallelism.
///
/// Dropping the pool blocks until every queue has drained, then joins all
/// workers; tasks submitted after shutdown has begun are rejected.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// A pool with one worker per available hardware thread.
    pub fn new() -> Self {
        let count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_workers(count)
    }

    /// A pool with an explicit worker count.
    pub fn with_workers(count: usize) -> Self {
        assert!(count > 0, "thread pool needs at least one worker");
        let shared = Arc::new(Shared {
            queues: (0..count).map(|_| WorkStealQueue::new()).collect(),
            global: Mutex::new(VecDeque::new()),
            idle: Condvar::new(),
            done: AtomicBool::new(false),
        });

        let workers = (0..count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(shared, index))
            })
            .collect();

        Self { shared, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Submit a task for execution.
    ///
    /// Called from one of this pool's workers, the task lands on that
    /// worker's own deque; from any other thread it goes through the global
    /// queue.
    pub fn submit<F>(&self, f: F) -> Result<(), TransferError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.done.load(Ordering::Acquire) {
            return Err(TransferError::ExecutorShutdown);
        }
        let task: Task = Box::new(f);
        let local = WORKER
            .with(|w| w.get())
            .filter(|&(pool, _)| pool == pool_id(&self.shared));
        match local {
            Some((_, index)) => self.shared.queues[index].push(task),
            None => self.shared.global.lock().unwrap().push_back(task),
        }
        Ok(())
    }

    /// Whether every deque and the global queue is currently empty.
    pub fn is_empty(&self) -> bool {
        let global = self.shared.global.lock().unwrap();
        global.is_empty() && self.shared.local_queues_empty()
    }

    /// Block until every queued task has been picked up and finished.
    pub fn wait(&self) {
        let shared = &self.shared;
        let guard = shared.global.lock().unwrap();
        let _guard = shared
            .idle
            .wait_while(guard, |global| {
                !(global.is_empty() && shared.local_queues_empty())
            })
            .unwrap();
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.wait();
        self.shared.done.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    WORKER.with(|w| w.set(Some((pool_id(&shared), index))));
    let count = shared.queues.len();

    while !shared.done.load(Ordering::Acquire) {
        let task = shared.queues[index]
            .try_pop()
            .or_else(|| shared.global.lock().unwrap().pop_front())
            .or_else(|| {
                (1..count).find_map(|i| shared.queues[(index + i) % count].try_steal())
            });

        match task {
            Some(task) => {
                task();
                // Take the queue lock before signalling so a thread inside
                // wait() cannot miss the wakeup between its emptiness check
                // and its sleep.
                drop(shared.global.lock().unwrap());
                shared.idle.notify_all();
            }
            None => thread::yield_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_worksteal_queue_ends() {
        let q = WorkStealQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            q.push(Box::new(move || log.lock().unwrap().push(i)));
        }
        // Owner pops the most recently pushed task.
        q.try_pop().unwrap()();
        // A thief steals the oldest one.
        q.try_steal().unwrap()();
        q.try_pop().unwrap()();
        assert!(q.is_empty());
        assert_eq!(*log.lock().unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_submitted_tasks_all_run() {
        let pool = ThreadPool::with_workers(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_drop_drains_all_queues() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::with_workers(2);
            for _ in 0..50 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }
        // The destructor must not return before every task has been drained.
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_worker_local_submit() {
        let pool = Arc::new(ThreadPool::with_workers(2));
        let counter = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(crate::channel::Channel::bounded(1));

        let inner_pool = Arc::clone(&pool);
        let inner_counter = Arc::clone(&counter);
        let done_tx = Arc::clone(&done);
        pool.submit(move || {
            // Runs on a worker: these land on the worker's own deque and are
            // eligible for stealing by the other worker.
            for _ in 0..10 {
                let counter = Arc::clone(&inner_counter);
                inner_pool
                    .submit(move || {
                        thread::sleep(Duration::from_millis(2));
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
            // Release the task's pool handle before signalling, so the
            // handle held by the test body is always the last one and the
            // pool is never torn down from one of its own workers.
            drop(inner_pool);
            let _ = done_tx.send(());
        })
        .unwrap();

        done.recv().unwrap();
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_blocked_task_does_not_starve_others() {
        let pool = ThreadPool::with_workers(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(crate::channel::Channel::<()>::bounded(1));

        let gate_task = Arc::clone(&gate);
        pool.submit(move || {
            // Parks one worker until the gate opens.
            let _ = gate_task.recv();
        })
        .unwrap();
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        // The remaining worker must pick up all 20 tasks.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 20 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        gate.send(()).unwrap();
        pool.wait();
    }

    #[test]
    fn test_wait_returns_on_empty_pool() {
        let pool = ThreadPool::with_workers(2);
        pool.wait();
        assert!(pool.is_empty());
    }
}
