//! The worker pool.
//!
//! A fixed set of OS threads resumes ready tasks popped from one
//! mutex-protected FIFO, with a condition variable signalled on enqueue.
//! A task runs until it completes or suspends on an awaitable; its waker
//! re-enqueues it, so wakes from the I/O reaper (or anywhere else) always
//! resume work on a pool thread. FIFO order, no priorities, no affinity
//! between tasks and workers.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};

struct QueueState {
    ready: VecDeque<Arc<TaskCell>>,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<QueueState>,
    available: Condvar,
}

impl PoolShared {
    fn enqueue(&self, cell: Arc<TaskCell>) {
        let mut state = self.queue.lock().unwrap();
        if state.shutdown {
            return;
        }
        state.ready.push_back(cell);
        drop(state);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Arc<TaskCell>> {
        let state = self.queue.lock().unwrap();
        let mut state = self
            .available
            .wait_while(state, |s| s.ready.is_empty() && !s.shutdown)
            .unwrap();
        state.ready.pop_front()
    }
}

/// One spawned task: its future, re-enqueued on every wake.
struct TaskCell {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    pool: Weak<PoolShared>,
}

impl ArcWake for TaskCell {
    fn wake_by_ref(cell: &Arc<Self>) {
        if let Some(pool) = cell.pool.upgrade() {
            pool.enqueue(cell.clone());
        }
    }
}

/// Fixed-size pool of worker threads executing cooperative tasks.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "worker pool needs at least one thread");
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(QueueState { ready: VecDeque::new(), shutdown: false }),
            available: Condvar::new(),
        });

        let threads = (0..workers)
            .map(|n| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("emberdb-worker-{n}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers: threads }
    }

    /// Enqueue a task for execution. It begins running when a worker
    /// pops it, and thereafter resumes on whichever worker pops its
    /// wakes.
    pub fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        let cell = Arc::new(TaskCell {
            future: Mutex::new(Some(Box::pin(future))),
            pool: Arc::downgrade(&self.shared),
        });
        self.shared.enqueue(cell);
    }

    /// Stop all workers and wait for them to exit. Queued tasks that
    /// have not started are dropped.
    pub fn shutdown(mut self) {
        {
            let mut state = self.shared.queue.lock().unwrap();
            state.shutdown = true;
            state.ready.clear();
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.queue.lock().unwrap();
            state.shutdown = true;
            state.ready.clear();
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    while let Some(cell) = shared.pop() {
        // The slot lock is held across the poll: a concurrent wake may
        // re-enqueue the cell, and whichever worker pops it next blocks
        // here until the future is parked again, so no wake is lost.
        let mut slot = cell.future.lock().unwrap();
        let Some(mut future) = slot.take() else {
            continue;
        };
        let waker = waker_ref(&cell);
        let mut cx = Context::from_waker(&waker);
        if future.as_mut().poll(&mut cx).is_pending() {
            *slot = Some(future);
        }
    }
}

/// Awaitable that suspends the current task and re-enqueues it on the
/// worker pool, letting other ready tasks run first.
pub fn yield_to_pool() -> YieldToPool {
    YieldToPool { yielded: false }
}

pub struct YieldToPool {
    yielded: bool,
}

impl Future for YieldToPool {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
