//! `SchedCtx` — the shared handles every task worker needs, without a
//! back-pointer to the coordinator.
//!
//! An explicit run context with lifetime tied to the coordinator, in place
//! of free-standing globals. `SchedCtx` is constructed once by
//! `ProxyScheduler` and handed to every [`crate::task::TaskWorker`] by value
//! (it is cheap to clone — two `Arc`s).

use std::sync::{Arc, Mutex};

use crate::sync::CountingSemaphore;

/// Shared scheduling context passed to every task worker.
#[derive(Clone)]
pub struct SchedCtx {
    /// Posted by period timers (and the test-completion timer); awaited by
    /// the coordinator's main loop.
    pub sched_sem: Arc<CountingSemaphore>,
    /// Dispatch trace: task ids appended in the order they resume execution.
    pub trace: Arc<Mutex<Vec<u32>>>,
}

impl SchedCtx {
    pub fn new() -> Self {
        Self {
            sched_sem: Arc::new(CountingSemaphore::new(0)),
            trace: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a dispatch (a worker resuming execution) in the shared trace.
    pub fn record_dispatch(&self, task_id: u32) {
        self.trace.lock().unwrap().push(task_id);
    }
}

impl Default for SchedCtx {
    fn default() -> Self {
        Self::new()
    }
}
