//! A small callback-driven background I/O layer, standing in for the
//! "external collaborator" async layer the sync adapter (§4.7) exists to
//! wrap — the role GlusterFS's underlying translator stack, or Tarantool's
//! `coio`/`eio` thread pool, plays for their respective schedulers.
//!
//! [`IoDriver`] is a bounded pool of background threads that pull closures
//! off a queue and run them to completion. It knows nothing about fibers or
//! [`crate::adapter::SyncArgs`] — it just guarantees that whatever closure
//! it's handed runs on some thread other than the caller's, which is enough
//! to make [`crate::ops::fs`]'s wrappers genuinely asynchronous relative to
//! the calling fiber.
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send>;

struct Shared {
    queue: Mutex<VecDeque<Signal>>,
    cond: Condvar,
}

/// A bounded pool of background worker threads executing submitted jobs
/// FIFO. Jobs are expected to perform a blocking call and then invoke
/// their own completion logic (typically [`crate::adapter::SyncArgs::complete`])
/// before returning.
pub struct IoDriver {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

enum Signal {
    Job(Job),
    Shutdown,
}

impl IoDriver {
    /// Spawns `threads` background workers.
    pub fn new(threads: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        });
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads.max(1) {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("synctask-io-{i}"))
                .spawn(move || Self::run(shared))
                .map_err(crate::error::Error::WorkerSpawn)?;
            handles.push(handle);
        }
        Ok(Self {
            shared,
            handles: Mutex::new(handles),
        })
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let mut queue = shared.queue.lock().unwrap();
            let job = loop {
                if let Some(job) = queue.pop_front() {
                    break job;
                }
                queue = shared.cond.wait(queue).unwrap();
            };
            drop(queue);
            match job {
                Signal::Job(job) => job(),
                Signal::Shutdown => return,
            }
        }
    }

    /// Enqueues `job` for execution by some background worker. Returns
    /// immediately; `job` runs asynchronously relative to the caller.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(Signal::Job(Box::new(job)));
        self.shared.cond.notify_one();
    }

    /// Signals every worker to exit after finishing its current job, and
    /// joins all of them.
    pub fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        {
            let mut queue = self.shared.queue.lock().unwrap();
            for _ in &handles {
                queue.push_back(Signal::Shutdown);
            }
            self.shared.cond.notify_all();
        }
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for IoDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
