//! A lock whose fiber waiters block by yielding — never by blocking their
//! worker thread — while non-fiber waiters block on a condition variable;
//! both classes may contend for the same lock at once. See §4.6.
//!
//! No recursion: locking a [`FiberMutex`] already held by the calling
//! fiber deadlocks it, same as the original `synclock_t`.
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex as StdMutex};

use crate::current;
use crate::error::{Error, Result};
use crate::task::Task;

struct Inner {
    held: bool,
    owner: Option<Arc<Task>>,
    fiber_waiters: VecDeque<Arc<Task>>,
}

/// A fiber-aware mutual-exclusion lock guarding a `T`.
///
/// `init`/`destroy` from §6 correspond to [`FiberMutex::new`] and `Drop`
/// respectively; there is nothing left to do on destruction since the
/// guard's RAII already forbids a held lock from outliving its data.
pub struct FiberMutex<T: ?Sized> {
    state: StdMutex<Inner>,
    cond: Condvar,
    /// `true` upgrades the owner-mismatch-on-unlock warning (§4.6, §7) from
    /// a debug log to an error log. Still never aborts — see §9's redesign
    /// note: this is the "expose a strict mode for tests" compromise, not a
    /// change to the tolerate-by-default behavior.
    strict: bool,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only ever reachable through a `FiberMutexGuard`, which
// `lock`/`try_lock` only ever hand out to the single task/thread that
// currently holds `state.held == true`.
unsafe impl<T: ?Sized + Send> Send for FiberMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for FiberMutex<T> {}

impl<T> FiberMutex<T> {
    /// Creates a new, unlocked mutex.
    pub fn new(value: T) -> Self {
        Self {
            state: StdMutex::new(Inner {
                held: false,
                owner: None,
                fiber_waiters: VecDeque::new(),
            }),
            cond: Condvar::new(),
            strict: false,
            data: UnsafeCell::new(value),
        }
    }

    /// Like [`FiberMutex::new`], but owner-mismatch-on-unlock is logged at
    /// `error` level instead of `debug` — see the `strict` field doc.
    pub fn new_strict(value: T) -> Self {
        let mut m = Self::new(value);
        m.strict = true;
        m
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> FiberMutex<T> {
    /// Acquires the lock, blocking the caller until it is available.
    ///
    /// If the caller is executing inside a fiber, blocking means: join the
    /// FIFO fiber wait list and yield — the worker thread is freed to run
    /// other fibers. If the caller is not in a fiber, blocking means an
    /// ordinary condition-variable wait, parking the OS thread.
    pub fn lock(&self) -> FiberMutexGuard<'_, T> {
        loop {
            let mut inner = self.state.lock().unwrap();
            if !inner.held {
                inner.held = true;
                inner.owner = current::current_task();
                return FiberMutexGuard { lock: self };
            }

            if let Some(task) = current::current_task() {
                inner.fiber_waiters.push_back(task.clone());
                drop(inner);
                task.yield_now();
                // We've been woken by `unlock`, which already popped us off
                // the wait list — but `unlock` doesn't hand the lock to us
                // directly (§4.6: "both rewake and race for it"), so loop
                // back and retry like any other contender.
                continue;
            }

            let _unused = self.cond.wait(inner).unwrap();
            // Dropped and reacquired by `wait`; loop back and retry.
        }
    }

    /// Acquires the lock without blocking, failing with [`Error::Busy`] if
    /// it's already held.
    pub fn try_lock(&self) -> Result<FiberMutexGuard<'_, T>> {
        let mut inner = self.state.lock().unwrap();
        if inner.held {
            return Err(Error::Busy);
        }
        inner.held = true;
        inner.owner = current::current_task();
        Ok(FiberMutexGuard { lock: self })
    }

    /// Returns a mutable reference to the protected data without locking —
    /// a `&mut FiberMutex` statically proves no guard can be outstanding.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self) {
        let mut inner = self.state.lock().unwrap();

        // Advisory ownership check (§4.6, §7): logged, never fatal, and
        // deliberately skipped when the unlocker isn't itself a fiber (a
        // non-fiber caller has no `current_task` to compare against, and
        // the original source only ever compares `synctask`s).
        if let (Some(owner), Some(caller)) = (&inner.owner, current::current_task()) {
            if !Arc::ptr_eq(owner, &caller) {
                if self.strict {
                    log::error!(
                        target: "synctask::mutex",
                        "fiber mutex unlocked by a task that doesn't own it"
                    );
                } else {
                    log::debug!(
                        target: "synctask::mutex",
                        "fiber mutex unlocked by a task that doesn't own it"
                    );
                }
            }
        }

        inner.held = false;
        inner.owner = None;
        // Wake at most one non-fiber waiter and the head fiber waiter.
        // Deliberately not a handoff to either: both rewake and race for
        // the lock on their next iteration through `lock`'s loop.
        self.cond.notify_one();
        let head = inner.fiber_waiters.pop_front();
        drop(inner);
        if let Some(task) = head {
            task.wake();
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for FiberMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("FiberMutex");
        match self.try_lock() {
            Ok(guard) => {
                d.field("data", &&*guard);
            }
            Err(_) => {
                d.field("data", &"<locked>");
            }
        }
        d.finish_non_exhaustive()
    }
}

/// RAII guard returned by [`FiberMutex::lock`]/[`FiberMutex::try_lock`].
/// Unlocks on drop.
pub struct FiberMutexGuard<'a, T: ?Sized> {
    lock: &'a FiberMutex<T>,
}

impl<T: ?Sized> Deref for FiberMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for FiberMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for FiberMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvConfig, Environment};
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    #[test]
    fn uncontended_lock_round_trips() {
        let m = FiberMutex::new(0);
        {
            let mut g = m.lock();
            *g += 1;
        }
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn owner_mismatch_on_unlock_is_logged_not_fatal() {
        // §4.6/§7: unlocking a lock held by a different fiber is an
        // advisory warning, never an abort. Exercised with `env_logger`
        // installed so the log-and-continue path actually emits.
        let _ = env_logger::builder().is_test(true).try_init();

        let env = Environment::new(EnvConfig {
            proc_min: 1,
            proc_max: 2,
            idle_timeout: Duration::from_millis(50),
            ..EnvConfig::default()
        })
        .unwrap();
        let mutex: StdArc<FiberMutex<()>> = StdArc::new(FiberMutex::new_strict(()));

        // F1 locks and leaks the guard (never unlocks it itself).
        let m1 = mutex.clone();
        env.spawn_sync(None, move || {
            let g = m1.lock();
            std::mem::forget(g);
            0
        })
        .unwrap();

        // F2 never held the lock but unlocks it anyway — the mismatch is
        // logged, the lock still ends up unlocked.
        let m2 = mutex.clone();
        env.spawn_sync(None, move || {
            m2.unlock();
            0
        })
        .unwrap();

        assert!(mutex.try_lock().is_ok());
        env.shutdown();
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = FiberMutex::new(());
        let g = m.lock();
        assert!(matches!(m.try_lock(), Err(Error::Busy)));
        drop(g);
        assert!(m.try_lock().is_ok());
    }

    #[test]
    fn lock_handoff_between_two_fibers() {
        // Scenario 5 from §8: F1 locks, F2 contends (joins the fiber wait
        // list and yields), F1 unlocks, F2 eventually acquires the lock.
        let env = Environment::new(EnvConfig {
            proc_min: 2,
            proc_max: 4,
            idle_timeout: Duration::from_millis(50),
            ..EnvConfig::default()
        })
        .unwrap();

        let mutex: StdArc<FiberMutex<u32>> = StdArc::new(FiberMutex::new(0));
        let m1 = mutex.clone();
        let m2 = mutex.clone();

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let env2 = env.clone();
        env.spawn_with_callback(
            None,
            move || {
                let mut g = m1.lock();
                // Hold the lock long enough that F2 is guaranteed to have
                // joined the fiber wait list before we release it.
                std::thread::sleep(Duration::from_millis(30));
                *g = 1;
                0
            },
            move |_| {
                tx.send(()).unwrap();
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(10));

        let ret = env2
            .spawn_sync(None, move || {
                let mut g = m2.lock();
                *g += 1;
                *g as i32
            })
            .unwrap();

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(ret, 2);
        assert_eq!(*mutex.lock(), 2);
        env.shutdown();
    }
}
