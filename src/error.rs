//! Error handling utils.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Internally
//! the scheduler mostly does *not* propagate errors: per the log-and-continue
//! philosophy (see the crate-level docs), failures that happen inside the
//! scheduler's own bookkeeping are logged via the [`log`] crate and the
//! system keeps running with whatever counters could be rebalanced. Only
//! failures that are directly attributable to a single caller (stack
//! allocation for a new task, a wrapped I/O operation, a contended
//! `try_lock`) are surfaced here.

use std::io;

/// A specialized [`Result`](std::result::Result) type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents all error cases a caller of this crate can observe.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Allocating a task's private stack failed.
    #[error("failed to allocate a {size}-byte task stack: {source}")]
    StackAlloc { size: usize, source: io::Error },

    /// `getcontext`/`makecontext` failed.
    #[error("context-switch primitive failed: {0}")]
    Context(io::Error),

    /// Spawning a worker OS thread failed. The environment keeps running
    /// with however many workers it already had.
    #[error("failed to spawn a worker thread: {0}")]
    WorkerSpawn(#[from] io::Error),

    /// A [`FiberMutex::try_lock`](crate::mutex::FiberMutex::try_lock) found
    /// the lock already held.
    #[error("lock is busy")]
    Busy,

    /// An I/O operation issued through the sync adapter failed. Carries the
    /// errno-style code the completion callback observed.
    #[error("operation failed (errno {errno}): {source}")]
    Op { errno: i32, source: io::Error },

    /// The environment is shutting down and can no longer accept new tasks.
    #[error("environment is shutting down")]
    ShuttingDown,
}

impl Error {
    /// The errno-style code a caller would see in the C API this crate is
    /// modeled on. Non-I/O errors map to `EINVAL` as a reasonable default.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Op { errno, .. } => *errno,
            Error::Busy => libc::EBUSY,
            Error::ShuttingDown => libc::ESHUTDOWN,
            Error::StackAlloc { source, .. } | Error::Context(source) => {
                source.raw_os_error().unwrap_or(libc::ENOMEM)
            }
            Error::WorkerSpawn(source) => source.raw_os_error().unwrap_or(libc::EAGAIN),
        }
    }
}
