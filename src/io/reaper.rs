//! The I/O reaper thread.
//!
//! A single dedicated thread drives the ring: it executes submitted
//! entries, then drains the completion queue, recording status and
//! selected buffer into each request's descriptor and waking the task
//! that awaits it. The wake enqueues the task on the worker pool; the
//! reaper never resumes a task inline and never takes a page-cache frame
//! lock beyond the ring's own buffer fills.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::io::ring::IoRing;

const IDLE_WAIT: Duration = Duration::from_millis(20);

pub struct IoReaper {
    ring: Arc<IoRing>,
    thread: Option<JoinHandle<()>>,
}

impl IoReaper {
    pub fn start(ring: Arc<IoRing>) -> Self {
        let loop_ring = ring.clone();
        let thread = std::thread::Builder::new()
            .name("emberdb-io".into())
            .spawn(move || reap_loop(loop_ring))
            .expect("failed to spawn io reaper thread");

        Self { ring, thread: Some(thread) }
    }

    /// Stop the reaper and wait for it to exit. Any entries still in
    /// flight are executed and completed first.
    pub fn stop(mut self) {
        self.ring.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for IoReaper {
    fn drop(&mut self) {
        self.ring.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn reap_loop(ring: Arc<IoRing>) {
    tracing::debug!("io reaper started");
    loop {
        let alive = ring.wait_for_work(IDLE_WAIT);
        ring.process_submissions();
        ring.drain_completions(|entry| {
            if entry.status() < 0 {
                tracing::warn!(status = entry.status(), "io completion failed");
            }
            entry.finish();
        });
        if !alive {
            break;
        }
    }
    tracing::debug!("io reaper stopped");
}
