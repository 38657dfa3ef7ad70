use std::path::PathBuf;

/// Configuration for the storage engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory of the database; one subdirectory per table.
    pub dir: PathBuf,

    /// Number of frames in the IO bundle, registered with the I/O ring.
    /// Must be a power of two (default: 512).
    pub io_frames: usize,

    /// Number of scratch frames for newly created pages (default: 128).
    pub scratch_frames: usize,

    /// Number of worker threads resuming ready tasks (default: 4).
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            io_frames: 512,
            scratch_frames: 128,
            workers: 4,
        }
    }
}

impl EngineConfig {
    /// Create a new config rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the IO bundle size (must be a power of two).
    pub fn io_frames(mut self, frames: usize) -> Self {
        self.io_frames = frames;
        self
    }

    /// Set the scratch bundle size.
    pub fn scratch_frames(mut self, frames: usize) -> Self {
        self.scratch_frames = frames;
        self
    }

    /// Set the worker thread count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.dir, PathBuf::from("./emberdb"));
        assert_eq!(config.io_frames, 512);
        assert_eq!(config.scratch_frames, 128);
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new("/tmp/emberdb")
            .io_frames(8)
            .scratch_frames(4)
            .workers(2);

        assert_eq!(config.dir, PathBuf::from("/tmp/emberdb"));
        assert_eq!(config.io_frames, 8);
        assert_eq!(config.scratch_frames, 4);
        assert_eq!(config.workers, 2);
    }
}
