//! An OS thread running the fixed take-a-task / switch-in / decide / scale
//! loop described in §4.2.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crate::context::{self, Context};
use crate::current;
use crate::env::Environment;
use crate::error::Result;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkerId(u64);

impl WorkerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A worker OS thread. Holds a dedicated "scheduler" context that a task
/// swaps back to whenever it yields; see `crate::context` for why this is a
/// symmetric swap rather than a call/return.
pub(crate) struct Worker {
    id: WorkerId,
    env: Weak<Environment>,
    // SAFETY: only the OS thread running `Worker::run` for this worker ever
    // touches `sched_ctx` — it's the other side of every swap a task on
    // this worker performs, and a worker never runs more than one task at
    // once.
    sched_ctx: UnsafeCell<Context>,
}

// SAFETY: see the field comment above.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Raw access to this worker's scheduler context, for a running task's
    /// `wait_for` to swap back into. Safe under the single-owner
    /// discipline documented on the `sched_ctx` field.
    pub(crate) fn sched_context_mut(&self) -> &mut Context {
        // SAFETY: see the field comment on `sched_ctx`.
        unsafe { &mut *self.sched_ctx.get() }
    }

    /// Spawns a new worker thread bound to `env`, returning its handle and
    /// the `JoinHandle` for shutdown to wait on.
    pub(crate) fn spawn(env: &Arc<Environment>) -> Result<(Arc<Worker>, JoinHandle<()>)> {
        let id = WorkerId::next();
        let sched_ctx = Context::empty()?;
        let worker = Arc::new(Worker {
            id,
            env: Arc::downgrade(env),
            sched_ctx: UnsafeCell::new(sched_ctx),
        });
        let run_loop = worker.clone();
        let handle = std::thread::Builder::new()
            .name(format!("synctask-worker-{}", id.0))
            .spawn(move || run_loop.run())
            .map_err(crate::error::Error::WorkerSpawn)?;
        Ok((worker, handle))
    }

    fn run(self: Arc<Self>) {
        let env = current::upgrade_env(&self.env);
        loop {
            let task = match env.take_runnable(&self) {
                Some(task) => task,
                None => break,
            };
            self.switch_to(&env, &task);
            env.scale();
        }
    }

    /// Binds `task` to this worker, swaps into it, and on return either
    /// hands it off to `Task::finish` (if it reached `Done`) or decides
    /// run-vs-wait under the environment mutex (§4.2's post-switch step).
    fn switch_to(self: &Arc<Self>, env: &Arc<Environment>, task: &Arc<Task>) {
        task.set_proc(Some(Arc::downgrade(self)));

        let saved_translator = current::current_translator();
        let prev_task = current::install_current_task(task);
        // SAFETY: `task.ctx()` is exclusively owned by whichever worker is
        // currently executing it — that's this call, right now — and
        // `sched_context_mut` is exclusively owned by this worker's own OS
        // thread. The two sides never run concurrently: only one of
        // {worker, task} is ever actually executing at a time.
        let result = unsafe { context::swap(self.sched_context_mut(), &*task.ctx()) };
        current::restore_current_task(prev_task);
        current::set_current_translator(saved_translator);

        if let Err(e) = result {
            log::error!(target: "synctask::worker", "context switch failed: {e}");
            task.set_proc(None);
            return;
        }

        if task.is_done() {
            task.set_proc(None);
            task.finish();
            return;
        }

        task.set_proc(None);
        task.post_switch(env);
    }
}
