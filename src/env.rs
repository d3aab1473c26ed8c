//! The scheduler instance: worker pool, run/wait queues, and the shared
//! mutex/condvar pair that protects them.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::task::{Frame, Task};
use crate::worker::Worker;

/// Tunables for an [`Environment`]. Defaults match §6's suggested values.
#[derive(Debug, Clone, Copy)]
pub struct EnvConfig {
    /// Default stack size for tasks created in this environment.
    pub stack_size: usize,
    /// Minimum worker count; the environment keeps at least this many
    /// workers alive even when idle.
    pub proc_min: usize,
    /// Maximum worker count `scale` will ever grow to.
    pub proc_max: usize,
    /// How long an idle worker above `proc_min` waits for work before
    /// self-retiring.
    pub idle_timeout: Duration,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            stack_size: 256 * 1024,
            proc_min: 2,
            proc_max: 16,
            idle_timeout: Duration::from_secs(1),
        }
    }
}

pub(crate) struct EnvQueues {
    pub(crate) run_queue: VecDeque<Arc<Task>>,
    pub(crate) wait_queue: Vec<Arc<Task>>,
    pub(crate) workers: Vec<Arc<Worker>>,
    shutting_down: bool,
}

/// A process-scoped scheduler instance. Owns a worker pool sized between
/// [`EnvConfig::proc_min`] and [`EnvConfig::proc_max`], a FIFO run queue, a
/// wait queue, and the mutex/condvar pair that protects both — see §3 and
/// §5 of the design for the invariants this type upholds.
pub struct Environment {
    pub(crate) inner: Mutex<EnvQueues>,
    pub(crate) cond: Condvar,
    join_handles: Mutex<Vec<JoinHandle<()>>>,
    config: EnvConfig,
}

impl Environment {
    /// Creates a new environment and starts `proc_min` workers immediately
    /// (mirroring `syncenv_new`'s unconditional startup loop — scaling from
    /// zero only happens once work shows up, but the minimum is guaranteed
    /// up front).
    pub fn new(config: EnvConfig) -> Result<Arc<Environment>> {
        let env = Arc::new(Environment {
            inner: Mutex::new(EnvQueues {
                run_queue: VecDeque::new(),
                wait_queue: Vec::new(),
                workers: Vec::new(),
                shutting_down: false,
            }),
            cond: Condvar::new(),
            join_handles: Mutex::new(Vec::new()),
            config,
        });
        {
            let mut inner = env.inner.lock().unwrap();
            for _ in 0..env.config.proc_min {
                match Worker::spawn(&env) {
                    Ok((worker, handle)) => {
                        inner.workers.push(worker);
                        env.join_handles.lock().unwrap().push(handle);
                    }
                    Err(e) => {
                        log::error!(target: "synctask::env", "failed to spawn worker: {e}");
                        break;
                    }
                }
            }
        }
        Ok(env)
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Creates and dispatches a task, blocking the caller until it
    /// completes and returning its return value. Corresponds to `new(env,
    /// fn, cbk=null, frame, opaque)` in §6.
    pub fn spawn_sync<F>(self: &Arc<Self>, frame: Option<Frame>, func: F) -> Result<i32>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        if self.inner.lock().unwrap().shutting_down {
            return Err(Error::ShuttingDown);
        }
        let task = Task::create(self, self.config.stack_size, frame, Box::new(func), None)?;
        self.scale();
        Ok(task.join())
    }

    /// Creates and dispatches a task that invokes `cbk` with its return
    /// value when it completes; returns immediately. Corresponds to
    /// `new(env, fn, cbk=onDone, frame, opaque)` in §6.
    pub fn spawn_with_callback<F, C>(
        self: &Arc<Self>,
        frame: Option<Frame>,
        func: F,
        cbk: C,
    ) -> Result<()>
    where
        F: FnOnce() -> i32 + Send + 'static,
        C: FnOnce(i32) + Send + 'static,
    {
        if self.inner.lock().unwrap().shutting_down {
            return Err(Error::ShuttingDown);
        }
        Task::create(
            self,
            self.config.stack_size,
            frame,
            Box::new(func),
            Some(Box::new(cbk)),
        )?;
        self.scale();
        Ok(())
    }

    /// Pushes `task` onto the run queue and wakes workers blocked in
    /// `take_runnable`. The caller must already hold `inner` — used by
    /// [`crate::task::Task::wake`]/[`crate::task::Task::post_switch`] so the
    /// state-machine decision and the queue mutation happen under one
    /// uninterrupted critical section. Splitting those into two separately
    /// acquired locks is exactly the race the "transitions to RUN are
    /// performed only under the environment mutex" invariant (§3) rules out.
    /// Notifying is the caller's responsibility since it must happen after
    /// `inner` is dropped.
    pub(crate) fn push_run_locked(inner: &mut EnvQueues, task: Arc<Task>) {
        inner.run_queue.push_back(task);
    }

    /// Pushes `task` onto the wait queue. See [`Environment::push_run_locked`]
    /// for the locking discipline.
    pub(crate) fn push_wait_locked(inner: &mut EnvQueues, task: Arc<Task>) {
        inner.wait_queue.push(task);
    }

    /// Removes `task` from the wait queue, logging (not panicking) if it
    /// isn't there — a state-machine anomaly, not a caller error. See
    /// [`Environment::push_run_locked`] for the locking discipline.
    pub(crate) fn remove_from_wait_locked(inner: &mut EnvQueues, task: &Arc<Task>) {
        match inner.wait_queue.iter().position(|t| Arc::ptr_eq(t, task)) {
            Some(pos) => {
                inner.wait_queue.remove(pos);
            }
            None => {
                log::warn!(
                    target: "synctask::env",
                    "waking a task not found on the wait queue (state-machine anomaly)"
                );
            }
        }
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Current runnable-task count. Derived directly from the run queue's
    /// length rather than tracked as a separate counter — see DESIGN.md for
    /// why: mirroring the original's separately-maintained `runcount`
    /// integer would reproduce a double-accounting quirk in its `__run`/
    /// `__wait` bookkeeping that the testable invariant in §8 explicitly
    /// forbids.
    pub fn runcount(&self) -> usize {
        self.inner.lock().unwrap().run_queue.len()
    }

    pub fn waitcount(&self) -> usize {
        self.inner.lock().unwrap().wait_queue.len()
    }

    pub fn procs(&self) -> usize {
        self.inner.lock().unwrap().workers.len()
    }

    /// Pops the next runnable task for `worker`, blocking on the condition
    /// variable until one is available. Returns `None` if the environment
    /// is shutting down, or if `worker` idled past the configured timeout
    /// while above `proc_min` and should self-retire.
    pub(crate) fn take_runnable(&self, worker: &Worker) -> Option<Arc<Task>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.shutting_down {
                return None;
            }
            if let Some(task) = inner.run_queue.pop_front() {
                task.dispatch_reset();
                return Some(task);
            }
            let (guard, timeout) = self
                .cond
                .wait_timeout(inner, self.config.idle_timeout)
                .unwrap();
            inner = guard;
            if !inner.run_queue.is_empty() {
                continue;
            }
            if timeout.timed_out() && inner.workers.len() > self.config.proc_min {
                inner.workers.retain(|w| w.id() != worker.id());
                return None;
            }
        }
    }

    /// §4.3: one-way scale-up. Spawns workers until `procs` matches
    /// `min(runcount, proc_max)`, or stops early if a spawn fails.
    pub(crate) fn scale(self: &Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.workers.len() > inner.run_queue.len() {
            return;
        }
        let target = inner.run_queue.len().min(self.config.proc_max);
        while inner.workers.len() < target {
            match Worker::spawn(self) {
                Ok((worker, handle)) => {
                    inner.workers.push(worker);
                    self.join_handles.lock().unwrap().push(handle);
                }
                Err(e) => {
                    log::error!(target: "synctask::env", "failed to spawn worker: {e}");
                    break;
                }
            }
        }
    }

    /// Signal-drain-join shutdown (§9's "`syncenv_destroy` is empty" open
    /// question, resolved in DESIGN.md): marks the environment shutting
    /// down, wakes every worker so it notices on its next `take_runnable`
    /// poll, and joins all worker threads. Tasks still on the wait queue
    /// are dropped along with their stacks rather than awaited.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.shutting_down = true;
            inner.run_queue.clear();
            inner.wait_queue.clear();
        }
        self.cond.notify_all();
        let handles = std::mem::take(&mut *self.join_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_minimums() {
        let cfg = EnvConfig::default();
        assert_eq!(cfg.proc_min, 2);
        assert_eq!(cfg.proc_max, 16);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(1));
    }

    #[test]
    fn cold_start_spawns_proc_min_workers() {
        let env = Environment::new(EnvConfig {
            proc_min: 2,
            proc_max: 8,
            idle_timeout: Duration::from_millis(50),
            ..EnvConfig::default()
        })
        .unwrap();
        assert_eq!(env.procs(), 2);
        assert_eq!(env.runcount(), 0);
        env.shutdown();
    }

    #[test]
    fn synchronous_submit_returns_value() {
        let env = Environment::new(EnvConfig {
            proc_min: 1,
            proc_max: 4,
            idle_timeout: Duration::from_millis(50),
            ..EnvConfig::default()
        })
        .unwrap();
        let ret = env.spawn_sync(None, || 7).unwrap();
        assert_eq!(ret, 7);
        env.shutdown();
    }
}
