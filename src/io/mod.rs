//! Asynchronous page I/O: files, the submission/completion ring, and the
//! reaper thread that turns completions into task wakes.

pub mod file;
pub mod reaper;
pub mod ring;
