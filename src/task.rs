//! The unit of scheduled work: a stackful fiber with its own execution
//! context, a wait/wake protocol, and (for the synchronous case) a private
//! completion signal the creator blocks on.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::context::Context;
use crate::current;
use crate::env::Environment;
use crate::error::Result;
use crate::worker::Worker;

/// Opaque call-site identity metadata a task forwards to whatever wrapped
/// operation it performs. Stands in for the original's `call_frame_t`:
/// this crate doesn't know or care what a frame means beyond the `uid`/`gid`
/// a task defaults its own effective identity from.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub uid: u32,
    pub gid: u32,
}

impl Frame {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// A task's identity, unique within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A task's position in the scheduling state machine. See §4.1 of the
/// design for the legal transition table; `Suspend` is carried for
/// completeness (the original's `SYNCTASK_SUSPEND` enumerator) but nothing
/// in this crate ever transitions a task into it — no current caller needs
/// "create a task that doesn't start running yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Run,
    Wait,
    Suspend,
    Done,
}

/// The fields that are mutated only while `sched`'s mutex is held: the
/// wait/wake bookkeeping and the state-machine position. These need
/// cross-thread atomicity (an arbitrary thread calls `wake` while the
/// task's own worker thread reads/writes the same fields), so they live
/// behind a real lock rather than the `UnsafeCell` single-owner fields
/// below.
struct TaskSched {
    state: TaskState,
    woken: u32,
    waitfor: u32,
    slept: bool,
}

/// A stackful cooperative task. Every public operation that touches a
/// specific running fiber (`yield_now`, `wait_for`, `yawn`, `set_id`) is a
/// free function in this module operating on [`current::current_task`];
/// [`Task::wake`] is the only one callable from arbitrary threads, which is
/// why it takes `self: &Arc<Task>` rather than assuming the caller is the
/// task itself.
pub struct Task {
    id: TaskId,
    env: Weak<Environment>,
    frame: Frame,
    uid: AtomicU32,
    gid: AtomicU32,

    sched: Mutex<TaskSched>,

    // SAFETY: the four fields below are touched only by the single worker
    // thread currently executing this task — never concurrently by two
    // threads, and never by a thread other than the one running this
    // task's fiber code or the worker dispatching it. That discipline is
    // what licenses `UnsafeCell` instead of a lock here; `Send`/`Sync` are
    // asserted manually below.
    ctx: UnsafeCell<Context>,
    func: UnsafeCell<Option<Box<dyn FnOnce() -> i32 + Send>>>,
    cbk: UnsafeCell<Option<Box<dyn FnOnce(i32) + Send>>>,

    ret: AtomicU32,
    /// Whether this task was created without a completion callback, i.e.
    /// whether a creator is blocked on `done`/`done_cond` awaiting it.
    sync_mode: bool,
    done: Mutex<bool>,
    done_cond: Condvar,

    /// The worker currently executing this task, non-`None` only between
    /// switch-in and switch-out. Mirrors the original's `task->proc`
    /// pointer; represented as a `Weak` so there is no unsafe lifetime to
    /// reason about.
    proc: Mutex<Option<Weak<Worker>>>,

    /// Context-switch counter, incremented on every voluntary yield.
    /// Testing/diagnostic utility mirroring the teacher's `fiber::csw`
    /// module.
    csw: AtomicU64,
}

// SAFETY: see the field-level comment above; `ctx`/`func`/`cbk` are never
// accessed by more than one thread at a time by construction.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

extern "C" fn trampoline() {
    // SAFETY: the worker that switched us in installed this thread-local
    // immediately before the swap, per the trick documented in
    // `crate::context`.
    let task = current::current_task().expect("fiber trampoline invoked without a current task");
    task.run_and_finish();
}

impl Task {
    /// Creates a new task and dispatches it (wakes it exactly once, per
    /// §4.1), returning the shared handle. The task starts executing as
    /// soon as some worker picks it off the run queue — possibly before
    /// this function returns.
    pub(crate) fn create(
        env: &Arc<Environment>,
        stack_size: usize,
        frame: Option<Frame>,
        func: Box<dyn FnOnce() -> i32 + Send>,
        cbk: Option<Box<dyn FnOnce(i32) + Send>>,
    ) -> Result<Arc<Task>> {
        let frame = frame.unwrap_or_default();
        let ctx = Context::new(stack_size, trampoline)?;
        let sync_mode = cbk.is_none();
        let task = Arc::new(Task {
            id: TaskId::next(),
            env: Arc::downgrade(env),
            uid: AtomicU32::new(frame.uid),
            gid: AtomicU32::new(frame.gid),
            frame,
            sched: Mutex::new(TaskSched {
                state: TaskState::Init,
                woken: 0,
                waitfor: 0,
                slept: true,
            }),
            ctx: UnsafeCell::new(ctx),
            func: UnsafeCell::new(Some(func)),
            cbk: UnsafeCell::new(cbk),
            ret: AtomicU32::new(0),
            sync_mode,
            done: Mutex::new(false),
            done_cond: Condvar::new(),
            proc: Mutex::new(None),
            csw: AtomicU64::new(0),
        });
        task.wake();
        Ok(task)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn uid(&self) -> u32 {
        self.uid.load(Ordering::Relaxed)
    }

    pub fn gid(&self) -> u32 {
        self.gid.load(Ordering::Relaxed)
    }

    /// The call-site frame this task was created with.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Overrides effective identity. `None` leaves the corresponding field
    /// unchanged, mirroring the original's `uid != -1` check.
    pub fn set_id(&self, uid: Option<u32>, gid: Option<u32>) {
        if let Some(uid) = uid {
            self.uid.store(uid, Ordering::Relaxed);
        }
        if let Some(gid) = gid {
            self.gid.store(gid, Ordering::Relaxed);
        }
    }

    pub fn csw(&self) -> u64 {
        self.csw.load(Ordering::Relaxed)
    }

    pub(crate) fn env(&self) -> Arc<Environment> {
        current::upgrade_env(&self.env)
    }

    /// §4.5: increment `woken`; if the task was asleep and has accumulated
    /// enough wakes to satisfy `waitfor`, move it onto the run queue.
    /// Callable from any thread, including the task's own (though it's
    /// normally called on other tasks' handles by the sync adapter's
    /// completion callbacks).
    ///
    /// The environment's queue mutex is acquired *before* this task's own
    /// `sched` mutex, and held across the whole decide-and-enqueue step —
    /// matching §3's "transitions to RUN are performed only under the
    /// environment mutex". Without that, a concurrent `post_switch` could
    /// decide WAIT, get interleaved with this function deciding the task is
    /// already runnable, and the task would end up spliced onto both
    /// queues. Every other call site that needs both locks (`post_switch`,
    /// `Environment::take_runnable`) acquires them in this same order, so
    /// there's no lock-order inversion to deadlock on.
    pub fn wake(self: &Arc<Task>) {
        let env = self.env();
        {
            let mut inner = env.inner.lock().unwrap();
            let mut sched = self.sched.lock().unwrap();
            sched.woken = sched.woken.saturating_add(1);
            if sched.slept && sched.woken >= sched.waitfor {
                match sched.state {
                    TaskState::Wait => Environment::remove_from_wait_locked(&mut inner, self),
                    TaskState::Init | TaskState::Suspend => {}
                    TaskState::Run => {
                        log::warn!(
                            target: "synctask::task",
                            "waking task {:?} that already appears runnable",
                            self.id
                        );
                    }
                    TaskState::Done => {
                        log::warn!(
                            target: "synctask::task",
                            "waking already-completed task {:?}",
                            self.id
                        );
                        return;
                    }
                }
                sched.state = TaskState::Run;
                sched.slept = false;
                drop(sched);
                Environment::push_run_locked(&mut inner, self.clone());
            }
        }
        env.notify_all();
    }

    /// The worker-side half of the suspend decision (§4.2's post-switch
    /// step), invoked by [`crate::worker::Worker`] right after a swap
    /// returns with the task not yet `Done`. The task was already removed
    /// from the run queue by `take_runnable`, so this unconditionally puts
    /// it on exactly one queue.
    ///
    /// Acquires `env.inner` before `self.sched` and holds it across the
    /// decide-and-enqueue step, same order and same span as `wake` — see
    /// that method's doc comment for why a narrower critical section here
    /// would let a racing `wake` enqueue this task twice.
    pub(crate) fn post_switch(self: &Arc<Task>, env: &Arc<Environment>) {
        let mut inner = env.inner.lock().unwrap();
        let mut sched = self.sched.lock().unwrap();
        if sched.woken >= sched.waitfor {
            sched.state = TaskState::Run;
            sched.slept = false;
            drop(sched);
            Environment::push_run_locked(&mut inner, self.clone());
            drop(inner);
            env.notify_all();
        } else {
            sched.state = TaskState::Wait;
            sched.slept = true;
            drop(sched);
            Environment::push_wait_locked(&mut inner, self.clone());
        }
    }

    /// §4.2's "fetching" step: clears `woken`/`waitfor`/`slept` the instant
    /// this task is popped off the run queue to be switched into. Without
    /// this reset a task's *next* suspend point would inherit whatever
    /// `woken` count got it dispatched in the first place (e.g. the single
    /// self-wake every task gets on creation) and could never actually
    /// park — it would satisfy `woken >= waitfor` immediately and spin.
    pub(crate) fn dispatch_reset(&self) {
        let mut sched = self.sched.lock().unwrap();
        sched.woken = 0;
        sched.waitfor = 0;
        sched.slept = false;
    }

    pub(crate) fn is_done(&self) -> bool {
        self.sched.lock().unwrap().state == TaskState::Done
    }

    pub(crate) fn sync_mode(&self) -> bool {
        self.sync_mode
    }

    /// Sets the worker currently executing this task. Called by the
    /// worker immediately before and after a switch; `None` otherwise.
    pub(crate) fn set_proc(&self, proc: Option<Weak<Worker>>) {
        *self.proc.lock().unwrap() = proc;
    }

    fn proc(&self) -> Option<Arc<Worker>> {
        self.proc.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    /// Raw access to this task's context, for the worker's switch-in and
    /// this task's own `wait_for`. Both call sites uphold the single-owner
    /// discipline documented on the `ctx` field.
    pub(crate) fn ctx(&self) -> *mut Context {
        self.ctx.get()
    }

    /// `waitfor(task, 1)`.
    pub fn yield_now(&self) {
        self.wait_for(1)
    }

    /// §4.5: declares "I need `n` wakes before I may run again", then
    /// swaps back to the worker's scheduler context. Returns once some
    /// future swap resumes this task.
    pub fn wait_for(&self, n: u32) {
        let saved_translator = current::current_translator();
        {
            let mut sched = self.sched.lock().unwrap();
            sched.waitfor = n;
        }
        let proc = self
            .proc()
            .expect("wait_for called outside of a running task's worker");
        self.csw.fetch_add(1, Ordering::Relaxed);
        // SAFETY: `self.ctx` is exclusively owned by the worker thread
        // currently executing this task — which is this very call, running
        // on the task's own stack — and `proc.sched_context_mut()` is
        // exclusively owned by that same OS thread (it's the worker loop
        // that's blocked inside the matching `swap` call on the other
        // side). Neither side touches the other's context while this one
        // is running.
        unsafe {
            let ctx = &mut *self.ctx();
            let sched_ctx = proc.sched_context_mut();
            if let Err(e) = crate::context::swap(ctx, sched_ctx) {
                log::error!(target: "synctask::task", "context switch failed: {e}");
            }
        }
        current::set_current_translator(saved_translator);
    }

    /// §4.5: resets `woken = 0, waitfor = 0` — "I am about to issue a
    /// multi-completion operation; start counting from here."
    pub fn yawn(&self) {
        let mut sched = self.sched.lock().unwrap();
        sched.woken = 0;
        sched.waitfor = 0;
    }

    /// Runs on the task's own stack, invoked only from [`trampoline`].
    /// Calls the user function, stores its result, invokes the completion
    /// callback if any, marks the task `Done`, and yields one final time —
    /// matching §4.4 exactly. Never returns: the worker must not switch
    /// back into a `Done` task.
    fn run_and_finish(self: Arc<Task>) {
        // SAFETY: single-owner discipline — only this task's own execution
        // reaches here, exactly once.
        let func = unsafe { &mut *self.func.get() }
            .take()
            .expect("task function missing at trampoline entry");
        let ret = func();
        self.ret.store(ret as u32, Ordering::Relaxed);

        let cbk = unsafe { &mut *self.cbk.get() }.take();
        if let Some(cbk) = cbk {
            cbk(ret);
        }

        {
            let mut sched = self.sched.lock().unwrap();
            sched.state = TaskState::Done;
        }
        self.yield_now();
        unreachable!("a task must never be switched back into after reaching Done");
    }

    /// Called by the worker once it observes `Done` after a switch. For the
    /// synchronous (no-`cbk`) case, sets the private `done` flag and wakes
    /// the blocked creator; for fire-and-forget, there is nothing left to
    /// do — the task is destroyed when the last `Arc` reference (the
    /// worker's own, dropped at the top of its next loop iteration) goes
    /// away.
    pub(crate) fn finish(&self) {
        if self.sync_mode {
            let mut done = self.done.lock().unwrap();
            *done = true;
            self.done_cond.notify_all();
        }
    }

    /// Blocks until `finish` has been called, returning the user
    /// function's return value. Used only by the synchronous creation path.
    pub(crate) fn join(&self) -> i32 {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.done_cond.wait(done).unwrap();
        }
        self.ret.load(Ordering::Relaxed) as i32
    }
}

/// The currently running task, or `None` outside of a fiber. Exposed for
/// callers that want to stash a handle (the sync adapter does exactly
/// this, so a completion callback running on another thread can later call
/// [`Task::wake`] on it).
pub fn current() -> Option<Arc<Task>> {
    current::current_task()
}

/// `yield_now()` on the currently running task. Panics if called outside
/// of a fiber.
pub fn yield_now() {
    current().expect("yield_now called outside of a fiber").yield_now()
}

/// `wait_for(n)` on the currently running task. Panics if called outside
/// of a fiber.
pub fn wait_for(n: u32) {
    current().expect("wait_for called outside of a fiber").wait_for(n)
}

/// `yawn()` on the currently running task. Panics if called outside of a
/// fiber.
pub fn yawn() {
    current().expect("yawn called outside of a fiber").yawn()
}

/// `set_id` on the currently running task. Panics if called outside of a
/// fiber.
pub fn set_id(uid: Option<u32>, gid: Option<u32>) {
    current()
        .expect("set_id called outside of a fiber")
        .set_id(uid, gid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_increases() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b.0 > a.0);
    }

    #[test]
    fn frame_defaults_to_zero_identity() {
        let f = Frame::default();
        assert_eq!(f.uid, 0);
        assert_eq!(f.gid, 0);
    }
}
