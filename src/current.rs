//! Ambient per-thread state the scheduler saves and restores around every
//! context swap.
//!
//! Two independent slots live here:
//!
//! - the **current task**, which is how a trampoline started by
//!   [`crate::context::Context::new`] finds out what it's supposed to run
//!   (see the module docs on [`crate::context`] for why this is a
//!   thread-local rather than a `makecontext` argument). Stored as a `Weak`
//!   rather than a raw pointer: a worker installs it by downgrading the
//!   `Arc` it already holds, and any code that needs the task back (the
//!   trampoline, the sync adapter stashing a handle for a completion
//!   callback to wake) just upgrades it, with ordinary `Arc` semantics
//!   instead of unsafe pointer lifetimes;
//! - the **current translator**, an opaque, crate-external ambient value
//!   (§6 of the design calls it "the ambient per-thread current translator
//!   value") that calling code may stash here and expect the scheduler to
//!   carry correctly across fiber switches, the same way the original saved
//!   and restored a thread-local `xlator_t *THIS` around every
//!   `swapcontext`. This crate treats it as an opaque `usize` (a cookie —
//!   typically a pointer cast by the caller) and never interprets it.
use std::cell::{Cell, RefCell};
use std::sync::{Arc, Weak};

use crate::task::Task;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Weak<Task>>> = RefCell::new(None);
    static CURRENT_TRANSLATOR: Cell<usize> = Cell::new(0);
}

/// Installs `task` as the thread's current task, returning whatever was
/// installed before. A [`crate::worker::Worker`] calls this immediately
/// before switching into a task, and restores the previous value
/// ([`restore_current_task`]) immediately after switching back out.
pub(crate) fn install_current_task(task: &Arc<Task>) -> Option<Weak<Task>> {
    CURRENT_TASK.with(|c| c.replace(Some(Arc::downgrade(task))))
}

/// Restores a thread's current task to whatever [`install_current_task`]
/// returned.
pub(crate) fn restore_current_task(prev: Option<Weak<Task>>) {
    CURRENT_TASK.with(|c| *c.borrow_mut() = prev);
}

/// The task the calling thread is currently running inside of, if any.
/// `None` when called from a plain (non-fiber) thread, or if the task has
/// since been destroyed (which should not happen while it's current, but
/// upgrading defensively rather than assuming it can't).
pub fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|c| c.borrow().as_ref().and_then(Weak::upgrade))
}

/// Whether the calling thread is currently executing inside a fiber.
pub fn in_fiber() -> bool {
    CURRENT_TASK.with(|c| c.borrow().is_some())
}

/// Reads the ambient "current translator" cookie for this thread.
pub fn current_translator() -> usize {
    CURRENT_TRANSLATOR.with(|c| c.get())
}

/// Installs a new "current translator" cookie, returning the previous one.
/// A [`crate::worker::Worker`] calls this around every context swap so that
/// the value follows whichever fiber is actually running, not whichever
/// thread happens to execute it.
pub fn set_current_translator(value: usize) -> usize {
    CURRENT_TRANSLATOR.with(|c| c.replace(value))
}

/// Upgrades a task's back-reference to its environment, panicking if the
/// environment has already been torn down. Internal convenience used
/// throughout `task.rs`/`worker.rs` — a task can't outlive the queues that
/// would be needed to ever run it again, but defensive code still checks.
pub(crate) fn upgrade_env<T>(weak: &Weak<T>) -> Arc<T> {
    weak.upgrade()
        .expect("task outlived its environment, which should be impossible")
}
