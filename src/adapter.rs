//! The sync adapter: the pattern every wrapped async operation in this
//! crate (and in any crate built on top of it) is composed from — see §4.7
//! of the design.
//!
//! A wrapped operation is three pieces:
//!
//! 1. an **argument block** ([`SyncArgs`]), created on the calling fiber
//!    and holding whatever result the async call eventually produces;
//! 2. a **completion callback**, run by the async layer (on a thread that
//!    is *not* the calling fiber's worker) which calls [`SyncArgs::complete`]
//!    — filling in the result and waking the fiber that's waiting on it;
//! 3. a **dispatch** step ([`SyncArgs::dispatch`]) that yields the calling
//!    fiber until the result has been filled in, then returns it.
//!
//! [`crate::ops::fs`] is the representative instance; any other
//! callback-driven API can be wrapped the same way.
use std::sync::{Arc, Mutex};

use crate::current;
use crate::task::Task;

/// One in-flight async call's argument block, bound to the fiber that
/// issued it. `T` is whatever the operation produces — typically a
/// `Result` of some op-specific success/error pair.
///
/// Precondition (§4.7): must be constructed from inside a fiber.
pub struct SyncArgs<T> {
    task: Arc<Task>,
    result: Mutex<Option<T>>,
}

impl<T> SyncArgs<T> {
    /// Binds a new argument block to the currently running fiber.
    ///
    /// # Panics
    ///
    /// Panics if called outside a fiber, matching §4.7's precondition —
    /// there is no fiber to wake when the completion callback runs.
    pub fn new() -> Arc<Self> {
        let task = current::current_task()
            .expect("SyncArgs::new called outside of a fiber — the sync adapter requires a calling fiber to wake");
        Arc::new(Self {
            task,
            result: Mutex::new(None),
        })
    }

    /// The completion callback's half of the contract: stores the result
    /// and wakes the fiber that's waiting on it. Called from whatever
    /// thread the async layer delivers completions on — never the calling
    /// fiber's own worker.
    pub fn complete(self: &Arc<Self>, value: T) {
        *self.result.lock().unwrap() = Some(value);
        self.task.wake();
    }

    /// Dispatch's final step: yields the calling fiber until `complete`
    /// has filled in a result, then takes and returns it.
    ///
    /// Tolerant of `complete` racing ahead of the yield (§5's wake/yield
    /// commutativity law): if the result is already there, returns
    /// immediately without ever swapping out.
    pub fn dispatch(self: &Arc<Self>) -> T {
        loop {
            if let Some(value) = self.result.lock().unwrap().take() {
                return value;
            }
            self.task.yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvConfig, Environment};
    use std::time::Duration;

    #[test]
    fn adapter_round_trip_returns_the_completed_value() {
        let env = Environment::new(EnvConfig {
            proc_min: 1,
            proc_max: 2,
            idle_timeout: Duration::from_millis(50),
            ..EnvConfig::default()
        })
        .unwrap();

        let ret = env
            .spawn_sync(None, || {
                let args = SyncArgs::new();
                let cbk_args = args.clone();
                // Stands in for an async layer that completes "immediately":
                // the adapter's law 3 ("adapter round-trip") requires the
                // wrapper to still resume exactly once with the right value.
                std::thread::spawn(move || cbk_args.complete(99));
                args.dispatch()
            })
            .unwrap();

        assert_eq!(ret, 99);
        env.shutdown();
    }
}
