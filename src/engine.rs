//! The engine context: explicit ownership of every process-wide service.
//!
//! One [`Engine`] owns the I/O ring, the reaper thread, the worker pool,
//! and the page cache, and hands them to the table and index layers.
//! Shutdown is ordered: the reaper stops, the workers stop, the ring is
//! torn down, and only then are dirty frames flushed (with direct
//! writes, since the ring is gone).

use std::future::Future;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::io::reaper::IoReaper;
use crate::io::ring::IoRing;
use crate::runtime::pool::WorkerPool;
use crate::runtime::task::sync_wait;
use crate::storage::buffer_pool::BufferPool;

pub struct Engine {
    config: EngineConfig,
    ring: Arc<IoRing>,
    pool: Arc<BufferPool>,
    reaper: Option<IoReaper>,
    workers: Option<WorkerPool>,
}

impl Engine {
    /// Bring up the ring, register the cache's IO frames with it, and
    /// start the reaper and worker threads.
    pub fn start(config: EngineConfig) -> Self {
        let ring = IoRing::new(config.io_frames);
        let pool = BufferPool::new(&config, ring.clone());
        let reaper = IoReaper::start(ring.clone());
        let workers = WorkerPool::new(config.workers);
        tracing::info!(
            dir = %config.dir.display(),
            io_frames = config.io_frames,
            scratch_frames = config.scratch_frames,
            workers = config.workers,
            "engine started"
        );

        Self { config, ring, pool, reaper: Some(reaper), workers: Some(workers) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn workers(&self) -> &WorkerPool {
        self.workers.as_ref().expect("engine is shut down")
    }

    /// Run a task to completion on the worker pool, blocking the calling
    /// thread. The sole bridge from synchronous code.
    pub fn sync_wait<T, F>(&self, future: F) -> T
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        sync_wait(self.workers(), future)
    }

    /// Orderly shutdown: reaper, workers, ring, then flush dirty frames.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_threads();
        self.pool.flush_sync()?;
        tracing::info!("engine stopped");
        Ok(())
    }

    fn stop_threads(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.stop();
        }
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
        self.ring.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_threads();
        if let Err(e) = self.pool.flush_sync() {
            tracing::error!(error = %e, "failed to flush page cache at shutdown");
        }
    }
}
