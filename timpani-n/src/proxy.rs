//! The coordinator: owns the task set, the policy, the test timer, and the
//! shared scheduling semaphore, and runs the scheduling protocol.
//!
//! The protocol: arm-timers phase, prime priorities, a main loop that checks
//! whether the test has expired before doing any pause/reorder/install/
//! release work, then a termination sequence. No back-pointer from `Task` to
//! `ProxyScheduler` exists; everything a worker needs travels once as a
//! [`SchedCtx`].

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::ctx::SchedCtx;
use crate::error::ResourceInitError;
use crate::osprio::{self, OsPriority};
use crate::policy::Policy;
use crate::task::{TaskState, TaskWorker};
use crate::telemetry::{RunSummary, Telemetry};
use crate::timer::PeriodicTimer;

/// Gap maintained between the coordinator's priority and the highest-ranked
/// worker's.
const PRIORITY_OFFSET: u32 = 5;

pub struct ProxyScheduler<W: Write> {
    workers: Vec<TaskWorker>,
    policy: Policy,
    runtime: Duration,
    ctx: SchedCtx,
    time_expired: Arc<AtomicBool>,
    telemetry: Telemetry<W>,
    real_schedule_time: Duration,
    num_schedule_events: u64,
    /// Task ids reported by period-timer callbacks as missed, queued here
    /// since timer threads have no access to the telemetry writer; drained
    /// by the coordinator on its own thread between scheduling decisions.
    missed_ids: Arc<Mutex<Vec<u32>>>,
}

impl<W: Write> ProxyScheduler<W> {
    /// Construct the scheduler and spawn every worker thread (`Created` →
    /// `AwaitingStart`). Workers do nothing further until [`Self::run`]
    /// drives the arm-timers phase.
    ///
    /// Fails closed, before any thread runs at elevated priority, if the
    /// task count would push a worker's priority past the platform's range,
    /// or if a worker thread fails to spawn.
    pub fn new(
        policy: Policy,
        runtime: Duration,
        tasks: &[(u64, u64)],
        out: W,
    ) -> Result<Self, ResourceInitError> {
        let n = tasks.len();
        let highest = osprio::OS_DEFAULT_PRIORITY as u32 + n as u32 + 2 * PRIORITY_OFFSET;
        if highest > OsPriority::MAX as u32 {
            return Err(ResourceInitError::PriorityRangeExhausted(n));
        }

        let ctx = SchedCtx::new();
        let telemetry = Telemetry::new(out);
        let time_expired = Arc::new(AtomicBool::new(false));
        let missed_ids: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(n);
        for (idx, &(compute_ms, period_ms)) in tasks.iter().enumerate() {
            let state = Arc::new(TaskState::new(idx as u32, compute_ms, period_ms));
            let missed = Arc::clone(&missed_ids);
            let worker = TaskWorker::spawn(state, ctx.clone(), move |task_id| {
                missed.lock().unwrap().push(task_id);
            })?;
            workers.push(worker);
        }

        Ok(Self {
            workers,
            policy,
            runtime,
            ctx,
            time_expired,
            telemetry,
            real_schedule_time: Duration::ZERO,
            num_schedule_events: 0,
            missed_ids,
        })
    }

    fn drain_missed(&mut self) {
        let ids: Vec<u32> = std::mem::take(&mut *self.missed_ids.lock().unwrap());
        for id in ids {
            self.telemetry.missed(id);
        }
    }

    fn snapshot_states(&self) -> Vec<Arc<TaskState>> {
        self.workers.iter().map(|w| Arc::clone(&w.state)).collect()
    }

    fn release_all(&self, order: &[u32]) {
        for &id in order {
            self.workers[id as usize].release();
        }
    }

    fn pause_all(&self) {
        for w in &self.workers {
            w.pause();
        }
    }

    /// Install OS priorities per the rank mapping: rank 0 (highest
    /// priority) gets `base + (N-1)`, rank k gets `base + (N-1-k)`.
    fn install_priorities(&self, order: &[u32], base: OsPriority) {
        let n = order.len();
        for (rank, &id) in order.iter().enumerate() {
            let worker = &self.workers[id as usize];
            let prio = base.saturating_add((n - 1 - rank) as OsPriority);
            worker.state.set_priority(prio);
            if let Some(native) = worker.state.native_id() {
                osprio::set_thread_priority(native, prio, "task-worker");
            } else {
                warn!(task = id, "worker has no native id yet; priority not installed");
            }
        }
    }

    /// Run the full protocol to completion: arm timers, prime priorities,
    /// execute the main loop until the test timer expires, then tear down
    /// and emit final telemetry. Blocks the calling thread for the
    /// duration of the test.
    pub fn run(mut self) {
        osprio::calibrate_environment();

        let n = self.workers.len() as OsPriority;
        let coord_priority: OsPriority =
            osprio::OS_DEFAULT_PRIORITY.saturating_add(n + PRIORITY_OFFSET as OsPriority);
        osprio::set_current_thread_priority(coord_priority, "coordinator");
        // P_base = P_coord - N - 5, which is exactly the OS default: the
        // coordinator's elevation and the worker base are symmetric around
        // it by construction.
        let worker_base = osprio::OS_DEFAULT_PRIORITY;

        // 1. Initial ordering.
        let mut order = self.policy.order(&self.snapshot_states());

        let run_start = Instant::now();
        self.telemetry.start();

        // 2. Start the test timer: posts `time_expired` then the shared
        // scheduling semaphore, exactly once.
        let expired_flag = Arc::clone(&self.time_expired);
        let test_ctx = self.ctx.clone();
        let _test_timer = PeriodicTimer::one_shot(self.runtime, move || {
            expired_flag.store(true, Ordering::Release);
            test_ctx.sched_sem.post();
        });

        // 3/4. Workers are already running (spawned in `new`), currently
        // AwaitingStart. Arm-timers phase: release once each, then consume
        // exactly N acks.
        self.release_all(&order);
        for _ in 0..self.workers.len() {
            self.ctx.sched_sem.wait();
        }

        // 5. Prime priorities.
        self.install_priorities(&order, worker_base);

        // 6. Release all again — the first real start.
        self.release_all(&order);

        // 7. Main loop.
        loop {
            self.ctx.sched_sem.wait();

            // The test-completion wake races with ordinary scheduling wakes
            // on the same semaphore. Check the flag before doing any
            // pause/priority work for this wake, win or lose the race.
            if self.time_expired.load(Ordering::Acquire) {
                break;
            }

            self.drain_missed();
            let start = Instant::now();
            self.pause_all();
            order = self.policy.order(&self.snapshot_states());
            self.install_priorities(&order, worker_base);
            self.release_all(&order);
            self.real_schedule_time += start.elapsed();
            self.num_schedule_events += 1;
        }

        let real_runtime = run_start.elapsed();
        self.shutdown(real_runtime);
    }

    /// 8. Termination: stop every task, drop the test timer (already out
    /// of scope once `run` returns), log aggregate and per-task statistics,
    /// then join every worker thread.
    fn shutdown(mut self, real_runtime: Duration) {
        for w in &self.workers {
            w.stop_test();
        }
        self.drain_missed();

        self.telemetry.stop();

        let trace = self.ctx.trace.lock().unwrap().clone();
        self.telemetry.trace(&trace);

        let avg_schedule_overhead_s = if self.num_schedule_events == 0 {
            0.0
        } else {
            self.real_schedule_time.as_secs_f64() / self.num_schedule_events as f64
        };
        let real_runtime_s = real_runtime.as_secs_f64();
        let runtime_overshoot_fraction = if real_runtime_s == 0.0 {
            0.0
        } else {
            (real_runtime_s - self.runtime.as_secs_f64()) / real_runtime_s
        };
        self.telemetry.summary(RunSummary {
            avg_schedule_overhead_s,
            real_runtime_s,
            runtime_overshoot_fraction,
        });

        for w in &self.workers {
            self.telemetry.task_data(w.state.snapshot());
        }

        for w in &mut self.workers {
            w.stop_task();
        }

        info!(
            schedule_events = self.num_schedule_events,
            "run complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn single_task_short_run_completes_and_emits_protocol_lines() {
        let mut out = Vec::new();
        {
            let scheduler = ProxyScheduler::new(
                Policy::Rma,
                Duration::from_millis(150),
                &[(10, 50)],
                &mut out,
            )
            .unwrap();
            scheduler.run();
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("START\n"));
        assert!(text.contains("STOP\n"));
        assert!(text.contains("TRACE "));
        assert!(text.contains("PDATA "));
        assert!(text.contains("TDATA 0,"));
    }

    #[test]
    fn two_tasks_rma_run_completes_with_bounded_misses() {
        let mut out = Vec::new();
        {
            let scheduler = ProxyScheduler::new(
                Policy::Rma,
                Duration::from_millis(200),
                &[(20, 100), (40, 150)],
                &mut out,
            )
            .unwrap();
            scheduler.run();
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("TDATA 0,"));
        assert!(text.contains("TDATA 1,"));
    }

    #[test]
    fn overutilized_task_set_still_completes_the_run() {
        let mut out = Vec::new();
        {
            let scheduler = ProxyScheduler::new(
                Policy::Rma,
                Duration::from_millis(150),
                &[(80, 100), (80, 100)],
                &mut out,
            )
            .unwrap();
            scheduler.run();
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("STOP\n"));
    }
}
