//! Bridging synchronous code into task code.
//!
//! Tasks are ordinary futures: one-shot by construction, composed by
//! `.await` (awaiting a child suspends the caller until the child
//! produces its value). [`sync_wait`] is the sole legal bridge from a
//! synchronous caller: it moves the future onto the worker pool and
//! blocks the calling OS thread on an atomic completion flag until the
//! value is produced. Never call it from a worker thread; a worker
//! blocking on its own pool can deadlock the pool.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::Thread;
use std::time::Duration;

use futures::FutureExt;

use crate::runtime::pool::WorkerPool;

type TaskOutput<T> = std::thread::Result<T>;

struct Completion<T> {
    done: AtomicBool,
    result: Mutex<Option<TaskOutput<T>>>,
    caller: Thread,
}

/// Run `future` to completion on the worker pool, blocking the calling
/// thread until its value is produced. A panic inside the task resumes
/// on the calling thread.
pub fn sync_wait<T, F>(pool: &WorkerPool, future: F) -> T
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let completion = Arc::new(Completion {
        done: AtomicBool::new(false),
        result: Mutex::new(None),
        caller: std::thread::current(),
    });

    let signal = completion.clone();
    pool.spawn(async move {
        let result = AssertUnwindSafe(future).catch_unwind().await;
        *signal.result.lock().unwrap() = Some(result);
        signal.done.store(true, Ordering::Release);
        signal.caller.unpark();
    });

    while !completion.done.load(Ordering::Acquire) {
        std::thread::park_timeout(Duration::from_millis(10));
    }

    let result = completion.result.lock().unwrap().take();
    match result.expect("task completed without producing a value") {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
