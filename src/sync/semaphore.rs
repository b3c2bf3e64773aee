//! Counting semaphores.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI32, Ordering};

/// A counting semaphore.
///
/// `release` increments the count and `wait` blocks until the count is
/// positive, then decrements it.
pub struct Semaphore {
    count: Mutex<i32>,
    condvar: Condvar,
}

impl Semaphore {
    /// Constructs a semaphore with the given initial count.
    pub fn new(count: i32) -> Self {
        Self {
            count: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    /// Increments the semaphore count by the specified amount.
    pub fn release(&self, count: i32) {
        debug_assert!(count > 0);
        let mut state = self.count.lock();
        *state += count;
        if count == 1 {
            self.condvar.notify_one();
        } else {
            self.condvar.notify_all();
        }
    }

    /// Decrements the semaphore count by 1, blocking until the count is
    /// positive.
    pub fn wait(&self) {
        let mut state = self.count.lock();
        while *state <= 0 {
            self.condvar.wait(&mut state);
        }
        *state -= 1;
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A semaphore which avoids blocking-primitive traffic while the counter
/// stays positive.
///
/// An atomic counter is kept in userspace; only when it goes non-positive
/// does a waiter fall through to the inner [Semaphore]. `release` hands the
/// inner semaphore exactly as many permits as there are recorded waiters,
/// so the uncontended release path is a single `fetch_add`.
pub struct FastSemaphore {
    semaphore: Semaphore,
    count: AtomicI32,
}

impl FastSemaphore {
    /// Constructs a semaphore with the given initial count.
    pub fn new(count: i32) -> Self {
        Self {
            semaphore: Semaphore::new(0),
            count: AtomicI32::new(count),
        }
    }

    /// Increments the semaphore count by the specified amount.
    pub fn release(&self, count: i32) {
        debug_assert!(count > 0);
        let prev = self.count.fetch_add(count, Ordering::Release);
        // A negative previous count records that many blocked waiters.
        let to_release = count.min(-prev);
        if to_release > 0 {
            self.semaphore.release(to_release);
        }
    }

    /// Decrements the semaphore count by 1, blocking while the count is
    /// non-positive.
    pub fn wait(&self) {
        let prev = self.count.fetch_sub(1, Ordering::Acquire);
        if prev <= 0 {
            self.semaphore.wait();
        }
    }
}

impl Default for FastSemaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn initial_permits_do_not_block() {
        let semaphore = Semaphore::new(2);
        semaphore.wait();
        semaphore.wait();
    }

    #[test]
    fn release_unblocks_waiters() {
        let semaphore = Arc::new(Semaphore::new(0));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let semaphore = semaphore.clone();
                std::thread::spawn(move || semaphore.wait())
            })
            .collect();

        semaphore.release(3);
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn fast_semaphore_uncontended_wait() {
        let semaphore = FastSemaphore::new(1);
        semaphore.wait();
    }

    #[test]
    fn fast_semaphore_release_unblocks_waiters() {
        let semaphore = Arc::new(FastSemaphore::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let semaphore = semaphore.clone();
                std::thread::spawn(move || semaphore.wait())
            })
            .collect();

        // Let some waiters record themselves before releasing.
        std::thread::sleep(std::time::Duration::from_millis(5));
        semaphore.release(2);
        semaphore.release(2);
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }
}
