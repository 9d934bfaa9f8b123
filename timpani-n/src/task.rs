//! Task state and the per-task worker thread.
//!
//! [`TaskState`] is the plain-data, atomics-backed record a [`TaskWorker`]'s
//! thread and the coordinator both touch concurrently, and `TaskWorker` owns
//! the thread handle, its execution semaphore, and the task's own period
//! timer. No field here is guarded by a back-pointer to the scheduler;
//! everything the worker needs beyond its own state arrives once, by value,
//! as a [`SchedCtx`].
//!
//! The state machine below — AwaitingStart, TimerArm, Computing,
//! PeriodComplete, Preempted, TestDone — is dispatched entirely by the
//! coordinator's `release()`/`pause()` calls and OS priority, never by the
//! worker deciding on its own that it should run.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thread_priority::ThreadId as NativeThreadId;
use tracing::{debug, info};

use crate::ctx::SchedCtx;
use crate::error::ResourceInitError;
use crate::osprio::{self, OsPriority, SpinOutcome, REAL_TIME_QUANTUM, TIME_QUANTUM};
use crate::sync::CountingSemaphore;
use crate::timer::PeriodicTimer;

/// Cross-thread-visible state for one periodic task. Every field touched
/// from more than one thread is an atomic; the coordinator reads them to
/// drive scheduling decisions and to assemble `TDATA` telemetry, the
/// worker thread and its period timer callback write them.
pub struct TaskState {
    pub id: u32,
    /// Compute time budget per period, C, fixed for the task's lifetime.
    compute_time_ns: u64,
    /// Period, P, fixed for the task's lifetime.
    period_ns: u64,
    /// Absolute deadline of the current period, in ms since test start.
    deadline_ms: AtomicU64,
    /// Compute burnt so far within the current period.
    current_compute_ns: AtomicU64,
    /// Signed outstanding-work counter: incremented by a period event,
    /// decremented when the period's C is fully consumed. Positive when a
    /// period event fires means the previous period did not complete.
    compute_complete: AtomicI64,
    /// Set by the coordinator's `pause()`; observed at the next quantum
    /// boundary inside the burn loop.
    preempted: AtomicBool,
    test_running: AtomicBool,
    alive: AtomicBool,
    /// Last OS priority value installed by the coordinator, kept for
    /// telemetry/logging only — the OS is the source of truth.
    priority: AtomicU8,
    /// The worker thread's native id, stashed right after spawn so the
    /// coordinator can retarget its priority from another thread.
    native_id: Mutex<Option<NativeThreadId>>,

    // Accumulators surfaced verbatim in TDATA.
    deadline_events: AtomicU64,
    deadlines_missed: AtomicU64,
    total_computation_time_missed_ns: AtomicU64,
    total_computation_time_ns: AtomicU64,
    total_computation_cycles: AtomicU64,
    real_compute_time_ns: AtomicU64,
    /// Measured busy-spin overrun beyond the requested `REAL_TIME_QUANTUM`
    /// per iteration — dispatch/scheduling overhead, as distinct from the
    /// bookkeeping quantum credited to `total_computation_time_ns`.
    compute_transition_time_ns: AtomicU64,
}

impl TaskState {
    /// A freshly constructed task is already due its first period: the
    /// first `release()` (arm-timers phase) must actually wake it without
    /// waiting for a period event, so `compute_complete` starts at 1 and
    /// the first deadline is already `period_ms` out.
    pub fn new(id: u32, compute_ms: u64, period_ms: u64) -> Self {
        Self {
            id,
            compute_time_ns: compute_ms * 1_000_000,
            period_ns: period_ms * 1_000_000,
            deadline_ms: AtomicU64::new(period_ms),
            current_compute_ns: AtomicU64::new(0),
            compute_complete: AtomicI64::new(1),
            preempted: AtomicBool::new(false),
            test_running: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            priority: AtomicU8::new(0),
            native_id: Mutex::new(None),
            deadline_events: AtomicU64::new(0),
            deadlines_missed: AtomicU64::new(0),
            total_computation_time_missed_ns: AtomicU64::new(0),
            total_computation_time_ns: AtomicU64::new(0),
            total_computation_cycles: AtomicU64::new(0),
            real_compute_time_ns: AtomicU64::new(0),
            compute_transition_time_ns: AtomicU64::new(0),
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ns / 1_000_000
    }

    pub fn compute_time_ms(&self) -> u64 {
        self.compute_time_ns / 1_000_000
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms.load(Ordering::Acquire)
    }

    /// Exposed for policy unit tests that need to stage a specific
    /// deadline ordering without running a real period event.
    #[cfg(test)]
    pub fn deadline_ms_set(&self, v: u64) {
        self.deadline_ms.store(v, Ordering::Release);
    }

    /// Remaining compute time this period — the SCT sort key.
    pub fn remaining_ns(&self) -> u64 {
        self.compute_time_ns
            .saturating_sub(self.current_compute_ns.load(Ordering::Acquire))
    }

    /// Credit work directly, bypassing the burn loop. Exposed for policy
    /// unit tests that need to stage a remaining-time snapshot.
    #[cfg(test)]
    pub fn add_current_compute_ns(&self, ns: u64) {
        self.current_compute_ns.fetch_add(ns, Ordering::AcqRel);
    }

    pub fn has_outstanding_work(&self) -> bool {
        self.compute_complete.load(Ordering::Acquire) > 0
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_test_running(&self) -> bool {
        self.test_running.load(Ordering::Acquire)
    }

    pub fn is_preempted(&self) -> bool {
        self.preempted.load(Ordering::Acquire)
    }

    pub fn set_priority(&self, p: OsPriority) {
        self.priority.store(p, Ordering::Release);
    }

    pub fn priority(&self) -> OsPriority {
        self.priority.load(Ordering::Acquire)
    }

    pub fn native_id(&self) -> Option<NativeThreadId> {
        *self.native_id.lock().unwrap()
    }

    /// Invoked from the period-timer callback context. A no-op once
    /// `stop_test()` has cleared `test_running`, so a timer firing racily
    /// after teardown neither double-counts nor resurrects the worker.
    ///
    /// Returns `true` if this period's compute was not fully consumed — the
    /// caller emits the `MISSED` telemetry line for that case.
    pub fn period_event(&self) -> bool {
        if !self.is_test_running() {
            return false;
        }
        self.deadline_events.fetch_add(1, Ordering::AcqRel);
        let missed = self.compute_complete.load(Ordering::Acquire) > 0;
        if missed {
            self.deadlines_missed.fetch_add(1, Ordering::AcqRel);
            self.total_computation_time_missed_ns
                .fetch_add(self.remaining_ns(), Ordering::AcqRel);
        }
        self.deadline_ms.fetch_add(self.period_ms(), Ordering::AcqRel);
        self.compute_complete.fetch_add(1, Ordering::AcqRel);
        missed
    }

    /// Snapshot the counters needed for a `TDATA` line. Safe to call from
    /// any thread at any time; values may be mid-period.
    pub fn snapshot(&self) -> TaskSnapshot {
        let total_ns = self.total_computation_time_ns.load(Ordering::Acquire);
        let real_ns = self.real_compute_time_ns.load(Ordering::Acquire);
        let transition_ns = self.compute_transition_time_ns.load(Ordering::Acquire);
        let transition_fraction = if real_ns == 0 {
            0.0
        } else {
            transition_ns as f64 / real_ns as f64
        };
        let time_error_fraction = if total_ns == 0 {
            0.0
        } else {
            (total_ns as f64 - real_ns as f64) / total_ns as f64
        };
        TaskSnapshot {
            id: self.id,
            deadline_events: self.deadline_events.load(Ordering::Acquire),
            deadlines_missed: self.deadlines_missed.load(Ordering::Acquire),
            total_computation_time_missed_ns: self
                .total_computation_time_missed_ns
                .load(Ordering::Acquire),
            total_computation_time_ms: total_ns / 1_000_000,
            total_computation_cycles: self.total_computation_cycles.load(Ordering::Acquire),
            transition_fraction,
            real_compute_time_ms: real_ns / 1_000_000,
            time_error_fraction,
        }
    }
}

/// A point-in-time summary of one task, ready to format as `TDATA`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskSnapshot {
    pub id: u32,
    pub deadline_events: u64,
    pub deadlines_missed: u64,
    pub total_computation_time_missed_ns: u64,
    pub total_computation_time_ms: u64,
    pub total_computation_cycles: u64,
    pub transition_fraction: f64,
    pub real_compute_time_ms: u64,
    pub time_error_fraction: f64,
}

/// Owns one task's burn-loop thread, execution semaphore, and period timer.
pub struct TaskWorker {
    pub state: Arc<TaskState>,
    exec_sem: Arc<CountingSemaphore>,
    period_timer: Arc<Mutex<Option<PeriodicTimer>>>,
    handle: Option<JoinHandle<()>>,
}

impl TaskWorker {
    /// Launch the thread. It enters `AwaitingStart` immediately, blocked on
    /// its own execution semaphore; nothing else happens until the
    /// coordinator calls [`TaskWorker::release`] for the first time.
    ///
    /// `on_missed` is invoked from the period-timer thread whenever
    /// `period_event` reports a miss; callers wire it to telemetry.
    pub fn spawn(
        state: Arc<TaskState>,
        ctx: SchedCtx,
        on_missed: impl Fn(u32) + Send + Sync + 'static,
    ) -> Result<Self, ResourceInitError> {
        let exec_sem = Arc::new(CountingSemaphore::new(0));
        let period_timer = Arc::new(Mutex::new(None));

        let thread_state = Arc::clone(&state);
        let thread_sem = Arc::clone(&exec_sem);
        let thread_timer_slot = Arc::clone(&period_timer);
        let on_missed = Arc::new(on_missed);
        let handle = thread::Builder::new()
            .name(format!("task-{}", state.id))
            .spawn(move || burn_loop(thread_state, thread_sem, thread_timer_slot, ctx, on_missed))
            .map_err(ResourceInitError::ThreadSpawn)?;

        Ok(Self {
            state,
            exec_sem,
            period_timer,
            handle: Some(handle),
        })
    }

    /// Post the execution semaphore, but only if there is outstanding work
    /// for this task — a task that finished its period early between
    /// `pause()` and `release()` is correctly skipped.
    pub fn release(&self) {
        if self.state.has_outstanding_work() {
            self.exec_sem.post();
        }
    }

    /// Request preemption at the next quantum boundary.
    pub fn pause(&self) {
        self.state.preempted.store(true, Ordering::Release);
    }

    /// Clear `test_running` and unblock any pending wait so the worker can
    /// observe the flag and exit its loop.
    pub fn stop_test(&self) {
        self.state.test_running.store(false, Ordering::Release);
        self.exec_sem.post();
    }

    /// Terminate the worker thread entirely. Idempotent; safe at teardown.
    pub fn stop_task(&mut self) {
        self.state.alive.store(false, Ordering::Release);
        self.exec_sem.post();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn burn_loop(
    state: Arc<TaskState>,
    exec_sem: Arc<CountingSemaphore>,
    period_timer: Arc<Mutex<Option<PeriodicTimer>>>,
    ctx: SchedCtx,
    on_missed: Arc<dyn Fn(u32) + Send + Sync>,
) {
    *state.native_id.lock().unwrap() = Some(osprio::current_native_id());
    debug!(task = state.id, "worker awaiting start");

    // AwaitingStart: block for the arm-timers phase's first release.
    exec_sem.wait();
    if !state.is_alive() {
        return;
    }

    // TimerArm: arm the period timer, then ack once on the shared
    // scheduling semaphore so the coordinator's arm-timers phase can count
    // this task among the N acks it waits for.
    {
        let timer_state = Arc::clone(&state);
        let timer_ctx = ctx.clone();
        let on_missed = Arc::clone(&on_missed);
        let period = std::time::Duration::from_millis(state.period_ms());
        let timer = PeriodicTimer::periodic(period, move || {
            if timer_state.period_event() {
                on_missed(timer_state.id);
            }
            timer_ctx.sched_sem.post();
        });
        *period_timer.lock().unwrap() = Some(timer);
    }
    ctx.sched_sem.post();

    loop {
        exec_sem.wait();
        if !state.is_alive() || !state.is_test_running() {
            break;
        }

        ctx.record_dispatch(state.id);
        state.preempted.store(false, Ordering::Release);

        loop {
            if state.is_preempted() || !state.is_test_running() || !state.is_alive() {
                break;
            }

            let slice_start = Instant::now();
            let outcome = crate::osprio::busy_spin(REAL_TIME_QUANTUM, || {
                !state.is_preempted() && state.is_test_running() && state.is_alive()
            });
            let elapsed = slice_start.elapsed();

            state
                .total_computation_time_ns
                .fetch_add(TIME_QUANTUM.as_nanos() as u64, Ordering::AcqRel);
            state.current_compute_ns.fetch_add(
                TIME_QUANTUM.as_nanos() as u64,
                Ordering::AcqRel,
            );
            if outcome == SpinOutcome::Preempted {
                // The measured elapsed time on a preempted spin can be
                // near-zero (preemption may be observed before the first
                // spin iteration), so it isn't a reliable sample; credit the
                // fixed quantum instead, unavoidably.
                state
                    .real_compute_time_ns
                    .fetch_add(TIME_QUANTUM.as_nanos() as u64, Ordering::AcqRel);
                break;
            }

            state
                .real_compute_time_ns
                .fetch_add(elapsed.as_nanos() as u64, Ordering::AcqRel);
            if elapsed > REAL_TIME_QUANTUM {
                state.compute_transition_time_ns.fetch_add(
                    (elapsed - REAL_TIME_QUANTUM).as_nanos() as u64,
                    Ordering::AcqRel,
                );
            }

            if state.current_compute_ns.load(Ordering::Acquire) >= state.compute_time_ns {
                break;
            }
        }

        if state.current_compute_ns.load(Ordering::Acquire) >= state.compute_time_ns {
            state
                .total_computation_cycles
                .fetch_add(1, Ordering::AcqRel);
            state.compute_complete.fetch_sub(1, Ordering::AcqRel);
            state.current_compute_ns.store(0, Ordering::Release);
        }
    }

    *period_timer.lock().unwrap() = None;
    info!(task = state.id, "worker thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn noop_missed() -> impl Fn(u32) + Send + Sync + 'static {
        |_id: u32| {}
    }

    #[test]
    fn new_task_starts_due_for_its_first_period() {
        let t = TaskState::new(7, 20, 100);
        assert_eq!(t.period_ms(), 100);
        assert_eq!(t.compute_time_ms(), 20);
        assert_eq!(t.deadline_ms(), 100);
        assert!(t.has_outstanding_work());
        assert_eq!(t.remaining_ns(), 20_000_000);
    }

    #[test]
    fn period_event_on_incomplete_task_records_a_miss() {
        let t = TaskState::new(0, 10, 100);
        let missed = t.period_event();
        assert!(missed);
        assert_eq!(t.deadline_ms(), 200);
        let snap = t.snapshot();
        assert_eq!(snap.deadline_events, 1);
        assert_eq!(snap.deadlines_missed, 1);
        assert_eq!(snap.total_computation_time_missed_ns, 10_000_000);
    }

    #[test]
    fn period_event_after_stop_test_is_a_no_op() {
        let t = TaskState::new(0, 10, 100);
        t.test_running.store(false, Ordering::Release);
        let missed = t.period_event();
        assert!(!missed);
        assert_eq!(t.snapshot().deadline_events, 0);
    }

    #[test]
    fn release_without_outstanding_work_does_not_post() {
        // Exercise the gating logic release() implements, without a
        // competing worker thread also waiting on the same semaphore.
        let state = Arc::new(TaskState::new(1, 5, 100));
        state.compute_complete.store(0, Ordering::Release);
        let exec_sem = Arc::new(CountingSemaphore::new(0));
        if state.has_outstanding_work() {
            exec_sem.post();
        }
        // Prove wait() does observe a real post, to rule out a vacuous pass.
        exec_sem.post();
        exec_sem.wait();
    }

    #[test]
    fn worker_runs_one_period_to_completion_when_released_twice() {
        let ctx = SchedCtx::new();
        let state = Arc::new(TaskState::new(2, 1, 50));
        let mut worker =
            TaskWorker::spawn(Arc::clone(&state), ctx.clone(), noop_missed()).unwrap();
        // Arm-timers phase: first release, then wait for the ack.
        worker.release();
        ctx.sched_sem.wait();
        // Real start.
        worker.release();
        thread::sleep(Duration::from_millis(30));
        assert!(state.total_computation_cycles.load(Ordering::Acquire) >= 1);
        worker.stop_test();
        thread::sleep(Duration::from_millis(5));
        worker.stop_task();
    }

    #[test]
    fn pause_stops_compute_before_the_period_completes() {
        let ctx = SchedCtx::new();
        // Compute budget far larger than what one quantum can cover.
        let state = Arc::new(TaskState::new(3, 1000, 5000));
        let mut worker =
            TaskWorker::spawn(Arc::clone(&state), ctx.clone(), noop_missed()).unwrap();
        worker.release();
        ctx.sched_sem.wait();
        worker.release();
        thread::sleep(Duration::from_millis(5));
        worker.pause();
        thread::sleep(Duration::from_millis(5));
        let after_pause = state.current_compute_ns.load(Ordering::Acquire);
        assert!(after_pause < 1000 * 1_000_000);
        assert!(state.is_preempted());
        worker.stop_test();
        worker.stop_task();
    }
}
