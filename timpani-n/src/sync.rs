//! Minimal counting semaphore, built from a `Mutex` + `Condvar` pair rather
//! than raw FFI. Backs the shared scheduling semaphore and each task's own
//! execution semaphore.

use std::sync::{Condvar, Mutex};

/// A classic counting semaphore: `post()` increments the count and wakes one
/// waiter, `wait()` blocks until the count is positive then decrements it.
pub struct CountingSemaphore {
    count: Mutex<u64>,
    cond: Condvar,
}

impl CountingSemaphore {
    /// Create a new semaphore with the given initial count.
    pub fn new(initial: u64) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Increment the count and wake one blocked waiter, if any.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    /// Block until the count is positive, then consume one unit.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_post() {
        let sem = Arc::new(CountingSemaphore::new(0));
        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            sem2.wait();
        });

        thread::sleep(Duration::from_millis(20));
        sem.post();
        handle.join().expect("waiter thread panicked");
    }

    #[test]
    fn post_before_wait_is_remembered() {
        let sem = CountingSemaphore::new(0);
        sem.post();
        sem.post();
        // Two posts queued up; both should be consumable without blocking.
        sem.wait();
        sem.wait();
    }

    #[test]
    fn initial_count_is_immediately_available() {
        let sem = CountingSemaphore::new(3);
        sem.wait();
        sem.wait();
        sem.wait();
    }
}
