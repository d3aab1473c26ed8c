//! A synchronous-over-asynchronous task runtime: a cooperative fiber
//! scheduler that lets code issuing callback-driven operations be written
//! as straight-line "blocking" calls while the underlying I/O remains
//! fully event-driven.
//!
//! - [Environments, worker pools, run/wait queues](env)
//! - [The task lifecycle and wait/wake protocol](task)
//! - [The fiber-aware mutex](mutex)
//! - [The sync adapter — wrapping any callback-driven op](adapter)
//! - [Representative wrapped operations](ops)
//! - [Error handling](error)
//!
//! A bounded pool of worker threads multiplexes many fibers: each fiber
//! owns a private stack and suspends itself ([`task::yield_now`],
//! [`task::wait_for`]) whenever it issues an asynchronous operation,
//! resuming when the matching completion callback [`task::Task::wake`]s it.
//! [`ops::fs`] is a representative instance of the pattern every wrapped
//! operation follows; application code can wrap its own callback-driven
//! APIs the same way using [`adapter::SyncArgs`].
//!
//! Out of scope: work stealing across distinct [`env::Environment`]s,
//! fairness guarantees stronger than FIFO within the run queue, preemption
//! of a running fiber, and priority scheduling.
pub mod adapter;
mod context;
pub mod current;
pub mod env;
pub mod error;
pub mod io_driver;
pub mod mutex;
pub mod ops;
pub mod task;
mod worker;

pub use env::{EnvConfig, Environment};
pub use error::{Error, Result};
pub use mutex::{FiberMutex, FiberMutexGuard};
pub use task::{Frame, Task, TaskId, TaskState};
