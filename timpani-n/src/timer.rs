//! Period and test-duration timers.
//!
//! Each timer's callback runs from a dedicated sleeper thread and does no
//! work beyond posting a semaphore and updating counters. One persistent
//! sleeper thread per timer is used instead of a fresh thread per firing,
//! since the latter would dominate the overhead this testbed is trying to
//! measure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

/// A periodic or one-shot timer backed by a dedicated sleeper thread.
///
/// Dropping (or calling [`PeriodicTimer::cancel`]) stops the sleeper after
/// its current sleep completes; there is no forced interruption.
pub struct PeriodicTimer {
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Arm a timer that invokes `callback` every `period` until cancelled.
    ///
    /// A failure to spawn the sleeper thread degrades to a logged warning
    /// and an inert, already-cancelled timer rather than a panic: once the
    /// run has started, a single timer's misfire is a data-quality problem
    /// for that task, not a reason to abort the whole test.
    pub fn periodic<F>(period: Duration, mut callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let spawned = thread::Builder::new()
            .name("period-timer".into())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    thread::sleep(period);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    callback();
                }
            });
        match spawned {
            Ok(handle) => Self {
                cancelled,
                handle: Some(handle),
            },
            Err(err) => {
                warn!(error = ?err, "failed to spawn period timer thread (continuing without it)");
                Self::dead()
            }
        }
    }

    /// Arm a timer that invokes `callback` exactly once after `delay`.
    ///
    /// See [`PeriodicTimer::periodic`] for the degrade-on-spawn-failure
    /// behavior.
    pub fn one_shot<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let spawned = thread::Builder::new()
            .name("test-timer".into())
            .spawn(move || {
                thread::sleep(delay);
                if !flag.load(Ordering::Acquire) {
                    callback();
                }
            });
        match spawned {
            Ok(handle) => Self {
                cancelled,
                handle: Some(handle),
            },
            Err(err) => {
                warn!(error = ?err, "failed to spawn one-shot timer thread (continuing without it)");
                Self::dead()
            }
        }
    }

    /// An already-cancelled timer with no backing thread, used as the
    /// degraded fallback when spawning fails.
    fn dead() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(true)),
            handle: None,
        }
    }

    /// Request cancellation. Does not block; the sleeper thread observes the
    /// flag at its next wakeup (periodic) or before firing (one-shot).
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            // The sleeper may still be mid-sleep; detach rather than block
            // the dropping thread for up to one full period/runtime.
            drop(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn periodic_timer_fires_multiple_times() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let mut timer = PeriodicTimer::periodic(Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(40));
        timer.cancel();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn one_shot_timer_fires_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let _timer = PeriodicTimer::one_shot(Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_fire_suppresses_one_shot() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let mut timer = PeriodicTimer::one_shot(Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
