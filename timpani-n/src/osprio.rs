//! OS scheduling primitives: thread priority, round-robin policy, busy-spin
//! quantum, and one-time environment calibration at process startup.

use std::time::{Duration, Instant};

use thread_priority::{
    set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
    ThreadId, ThreadPriority, ThreadPriorityValue, ThreadSchedulePolicy,
};
use tracing::warn;

/// Requested clock resolution for the scheduling loop.
pub const CLOCK_RESOLUTION: Duration = Duration::from_micros(50);

/// Bookkeeping quantum credited to `currentComputeTime`/`totalComputationTime`.
pub const TIME_QUANTUM: Duration = Duration::from_micros(100);

/// Real-time busy-spin duration requested per burn iteration.
pub const REAL_TIME_QUANTUM: Duration = Duration::from_micros(80);

/// A real OS priority value for the current platform's round-robin policy.
pub type OsPriority = u8;

/// Stand-in for the OS-provided default scheduling priority that
/// `P_coord`/`P_base` are computed relative to. `thread_priority`'s
/// cross-platform value range is small and platform-dependent, so a fixed
/// mid-range constant is used uniformly rather than querying an OS default
/// that would shrink the realtime headroom differently per platform.
pub const OS_DEFAULT_PRIORITY: OsPriority = 50;

/// Result of a single busy-spin request: whether it completed without being
/// observably preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinOutcome {
    Completed,
    Preempted,
}

/// Perform process-wide environment setup once at startup: request I/O
/// privileges (a no-op shim on platforms where this crate has none to
/// request) and calibrate the busy-spin loop.
///
/// Never fails: calibration/resolution requests that the OS declines are
/// logged as warnings, not fatal errors, since the protocol itself does not
/// depend on achieving the requested resolution.
pub fn calibrate_environment() {
    tracing::info!(
        resolution_us = CLOCK_RESOLUTION.as_micros(),
        "requesting clock resolution (best-effort)"
    );
    log_round_robin_priority_range();
    // A cycle-counting calibration would measure how many busy-loop
    // iterations are needed to hit REAL_TIME_QUANTUM on this CPU.
    // `Instant`-based spinning needs no such calibration since the spin loop
    // checks wall-clock time directly, so this step is a logged no-op.
}

#[cfg(unix)]
fn log_round_robin_priority_range() {
    // SAFETY: sched_get_priority_{min,max} take a plain integer policy id and
    // have no preconditions beyond a valid `policy` value.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_RR),
            libc::sched_get_priority_max(libc::SCHED_RR),
        )
    };
    tracing::debug!(min, max, "SCHED_RR priority range reported by the OS");
}

#[cfg(not(unix))]
fn log_round_robin_priority_range() {}

/// Busy-spin for approximately `dur`, checking `still_running` at a fine
/// granularity so callers can detect preemption requests promptly. Returns
/// `SpinOutcome::Preempted` if `still_running` flips to `false` mid-spin.
pub fn busy_spin(dur: Duration, mut still_running: impl FnMut() -> bool) -> SpinOutcome {
    let start = Instant::now();
    loop {
        if !still_running() {
            return SpinOutcome::Preempted;
        }
        if start.elapsed() >= dur {
            return SpinOutcome::Completed;
        }
        std::hint::spin_loop();
    }
}

/// Set an arbitrary OS thread's scheduling policy to round-robin with the
/// given priority. This is what the coordinator calls on every worker's
/// native id to install a freshly computed priority order. Logs and
/// continues on failure (e.g. missing `CAP_SYS_NICE`) rather than treating
/// it as fatal, since a missed priority installation doesn't invalidate the
/// rest of the run.
pub fn set_thread_priority(native: ThreadId, priority: OsPriority, context: &str) {
    let policy = ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::RoundRobin);
    let value = ThreadPriority::Crossplatform(ThreadPriorityValue(priority));
    if let Err(err) = set_thread_priority_and_policy(native, value, policy) {
        warn!(context, priority, error = ?err, "failed to set thread priority (continuing)");
    }
}

/// Set the *current* thread's own priority. Used by the coordinator thread
/// itself at startup to install its own elevated priority.
pub fn set_current_thread_priority(priority: OsPriority, context: &str) {
    set_thread_priority(thread_native_id(), priority, context);
}

/// The current thread's native id, to be stashed by a freshly spawned worker
/// so the coordinator can later retarget its priority from another thread.
pub fn current_native_id() -> ThreadId {
    thread_native_id()
}
