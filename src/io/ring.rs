//! Ring-style asynchronous page I/O.
//!
//! One process-wide [`IoRing`] carries every page read and write. Callers
//! prepare requests onto a submission queue and `submit` them; the reaper
//! thread executes submitted entries and posts completion entries, each
//! carrying a status code and, for reads, the id of the registered buffer
//! the data landed in. Reads never name a destination: the ring picks a
//! free buffer from the registered ring, and the completion tells the
//! caller which frame now holds the page.
//!
//! The ring mutex guards only queue and buffer-ring state. It is never
//! held while a task is woken, and tasks are never resumed on the thread
//! draining completions.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::io::file::DataFile;
use crate::storage::page::{PageBuf, PAGE_SIZE};

/// Frames published to the ring as its registered buffer ring. The page
/// cache's IO bundle shares the same allocation.
pub type SharedFrames = Arc<Vec<RwLock<PageBuf>>>;

/// Status code posted when a read is submitted with no free registered
/// buffer available. Mirrors `-ENOBUFS`.
pub const STATUS_NO_BUFFERS: i32 = -105;

/// Per-request descriptor. The submitter allocates one per read or write;
/// the reaper records the completion status (and selected buffer, for
/// reads) into it and wakes the suspended task.
#[derive(Debug)]
pub struct SqeData {
    done: AtomicBool,
    status: AtomicI32,
    buff_id: AtomicI32,
    waker: Mutex<Option<Waker>>,
}

impl SqeData {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: AtomicBool::new(false),
            status: AtomicI32::new(0),
            buff_id: AtomicI32::new(-1),
            waker: Mutex::new(None),
        })
    }

    fn complete(&self, status: i32, buff_id: i32) {
        self.status.store(status, Ordering::Relaxed);
        self.buff_id.store(buff_id, Ordering::Relaxed);
        self.done.store(true, Ordering::Release);
        let waker = self.waker.lock().unwrap().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

enum IoOp {
    Read,
    /// Write of a caller-owned page snapshot.
    Write(Box<PageBuf>),
}

/// One submission queue entry.
struct Sqe {
    file: DataFile,
    offset: u64,
    op: IoOp,
    data: Arc<SqeData>,
}

/// One completion queue entry, as handed to `drain_completions`.
pub struct CompletionEntry {
    status: i32,
    buff_id: i32,
    data: Arc<SqeData>,
}

impl CompletionEntry {
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Record status and selected buffer into the descriptor and wake the
    /// task that awaits it. Must not be called under the ring mutex.
    pub fn finish(self) {
        self.data.complete(self.status, self.buff_id);
    }
}

struct RingState {
    /// Prepared entries, not yet visible to the executor side.
    sq: VecDeque<Sqe>,
    /// Submitted entries awaiting execution.
    submitted: VecDeque<Sqe>,
    /// Completed entries awaiting draining.
    cq: VecDeque<CompletionEntry>,
    /// Free ids in the registered buffer ring.
    buf_ring: VecDeque<i32>,
    shutdown: bool,
}

/// The process-wide submission/completion ring.
pub struct IoRing {
    state: Mutex<RingState>,
    work: Condvar,
    buffers: Mutex<Option<SharedFrames>>,
}

impl IoRing {
    /// Create a ring whose registered buffer ring holds `entries` buffers.
    /// `entries` must be a power of two.
    pub fn new(entries: usize) -> Arc<Self> {
        assert!(
            entries.is_power_of_two(),
            "buffer ring size {entries} is not a power of two"
        );
        Arc::new(Self {
            state: Mutex::new(RingState {
                sq: VecDeque::new(),
                submitted: VecDeque::new(),
                cq: VecDeque::new(),
                buf_ring: VecDeque::with_capacity(entries),
                shutdown: false,
            }),
            work: Condvar::new(),
            buffers: Mutex::new(None),
        })
    }

    /// Publish the IO bundle's frames as the registered buffer ring and
    /// mark every buffer id free.
    pub fn register_buffer_ring(&self, frames: SharedFrames) {
        let mut state = self.state.lock().unwrap();
        assert!(state.buf_ring.is_empty(), "buffer ring already registered");
        for id in 0..frames.len() {
            state.buf_ring.push_back(id as i32);
        }
        *self.buffers.lock().unwrap() = Some(frames);
    }

    /// Re-publish a buffer after the frame it backed was evicted.
    pub fn return_buffer(&self, buff_id: i32) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(!state.buf_ring.contains(&buff_id));
        state.buf_ring.push_back(buff_id);
    }

    /// Enqueue a one-page read at `(file, page_num)`. The destination
    /// buffer is chosen at execution time from the registered ring and
    /// reported through the completion entry.
    pub fn read_request(&self, file: DataFile, page_num: i32) -> Arc<SqeData> {
        let data = SqeData::new();
        let sqe = Sqe {
            file,
            offset: page_num as u64 * PAGE_SIZE as u64,
            op: IoOp::Read,
            data: data.clone(),
        };
        self.state.lock().unwrap().sq.push_back(sqe);
        data
    }

    /// Enqueue a one-page write of a caller-owned page at `(file, page_num)`.
    pub fn write_request(&self, file: DataFile, page_num: i32, page: Box<PageBuf>) -> Arc<SqeData> {
        let data = SqeData::new();
        let sqe = Sqe {
            file,
            offset: page_num as u64 * PAGE_SIZE as u64,
            op: IoOp::Write(page),
            data: data.clone(),
        };
        self.state.lock().unwrap().sq.push_back(sqe);
        data
    }

    /// Submit all prepared entries, making them visible to the executor
    /// side. Returns the number submitted.
    pub fn submit(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let n = state.sq.len();
        while let Some(sqe) = state.sq.pop_front() {
            state.submitted.push_back(sqe);
        }
        drop(state);
        if n > 0 {
            self.work.notify_one();
        }
        n
    }

    /// Block until submitted work or shutdown, up to `timeout`. Returns
    /// false once shut down with nothing left to execute.
    pub(crate) fn wait_for_work(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .work
            .wait_timeout_while(state, timeout, |s| s.submitted.is_empty() && !s.shutdown)
            .unwrap();
        !(state.shutdown && state.submitted.is_empty())
    }

    /// Execute every submitted entry, posting one completion entry each.
    /// This is the executor half of the facility: reads land in a
    /// ring-selected registered buffer, writes drain the caller's page.
    /// Runs on the reaper thread.
    pub(crate) fn process_submissions(&self) {
        loop {
            // Hold the mutex only to pop one entry (and claim a buffer id
            // for reads); the I/O itself runs unlocked.
            let (sqe, buff_id) = {
                let mut state = self.state.lock().unwrap();
                let Some(sqe) = state.submitted.pop_front() else {
                    return;
                };
                let buff_id = match sqe.op {
                    IoOp::Read => state.buf_ring.pop_front(),
                    IoOp::Write(_) => None,
                };
                (sqe, buff_id)
            };

            let Sqe { file, offset, op, data } = sqe;
            let entry = match op {
                IoOp::Read => self.execute_read(&file, offset, buff_id, data),
                IoOp::Write(page) => {
                    let status = match file.write_all_at(&page, offset) {
                        Ok(()) => PAGE_SIZE as i32,
                        Err(e) => -e.raw_os_error().unwrap_or(5),
                    };
                    CompletionEntry { status, buff_id: -1, data }
                }
            };

            self.state.lock().unwrap().cq.push_back(entry);
        }
    }

    fn execute_read(
        &self,
        file: &DataFile,
        offset: u64,
        buff_id: Option<i32>,
        data: Arc<SqeData>,
    ) -> CompletionEntry {
        let Some(buff_id) = buff_id else {
            return CompletionEntry { status: STATUS_NO_BUFFERS, buff_id: -1, data };
        };

        let buffers = self.buffers.lock().unwrap().clone();
        let frames = buffers.expect("read submitted before buffer ring registration");
        let mut page = frames[buff_id as usize].write().unwrap();

        match file.read_at(&mut page, offset) {
            Ok(n) => {
                // A short read is a page past the flushed tail; the
                // remainder must not leak the buffer's previous contents.
                page[n..].fill(0);
                CompletionEntry { status: n as i32, buff_id, data }
            }
            Err(e) => {
                drop(page);
                // Failed reads never admit a frame; hand the buffer back.
                self.return_buffer(buff_id);
                CompletionEntry {
                    status: -e.raw_os_error().unwrap_or(5),
                    buff_id: -1,
                    data,
                }
            }
        }
    }

    /// Apply `f` to each completion entry in order, marking them seen.
    pub fn drain_completions<F: FnMut(CompletionEntry)>(&self, mut f: F) {
        let drained: Vec<CompletionEntry> = {
            let mut state = self.state.lock().unwrap();
            state.cq.drain(..).collect()
        };
        for entry in drained {
            f(entry);
        }
    }

    /// Stop the ring: wakes the reaper so it can observe shutdown.
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.work.notify_all();
    }
}

/// Awaitable for one submitted request. Resolves to the completion's
/// selected buffer id (reads) or `-1` (writes); a negative status
/// surfaces as [`Error::IoFailure`].
pub struct IoRequest {
    data: Arc<SqeData>,
}

impl IoRequest {
    pub fn new(data: Arc<SqeData>) -> Self {
        Self { data }
    }
}

impl Future for IoRequest {
    type Output = Result<i32>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.data.done.load(Ordering::Acquire) {
            *self.data.waker.lock().unwrap() = Some(cx.waker().clone());
            // Re-check: completion may have landed between the load and
            // the waker registration.
            if !self.data.done.load(Ordering::Acquire) {
                return Poll::Pending;
            }
        }

        let status = self.data.status.load(Ordering::Relaxed);
        if status < 0 {
            return Poll::Ready(Err(Error::IoFailure(format!(
                "request completed with status {status}"
            ))));
        }
        Poll::Ready(Ok(self.data.buff_id.load(Ordering::Relaxed)))
    }
}
