//! A userspace futex: wait and wake on a 32-bit memory word.
//!
//! When there is no contention, signalling stays entirely in userspace; only
//! a thread that actually needs to block takes the slow path through its
//! wait node's event. Waiters are tracked in a small table of wait-queue
//! buckets selected by hashing the futex address, each bucket guarded by a
//! [SpinLock].
//!
//! `wait` has no timeout variant; a caller needing bounded waits must build
//! one externally.

use super::event::Event;
use super::spinlock::SpinLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Wait mask matching every waiter that did not ask for a specific mask bit.
pub const WAIT_MASK_ALL: u32 = 0x7FFF_FFFF;

/// Wait mask matching all waiters.
pub const WAIT_MASK_ANY: u32 = !0;

struct WaitNode {
    addr: usize,
    wait_mask: u32,
    event: Event,
}

struct Bucket {
    queue: SpinLock<Vec<Arc<WaitNode>>>,
}

// A prime number of buckets spreads addresses well, and there should not be
// many threads waiting at any one time.
const BUCKET_COUNT: usize = 37;

const EMPTY_BUCKET: Bucket = Bucket {
    queue: SpinLock::new(Vec::new()),
};
static BUCKETS: [Bucket; BUCKET_COUNT] = [EMPTY_BUCKET; BUCKET_COUNT];

fn bucket_for(value: &AtomicU32) -> &'static Bucket {
    let addr = value as *const AtomicU32 as usize;
    &BUCKETS[(addr >> 2) % BUCKET_COUNT]
}

/// The outcome of a [Futex::wait] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexWaitResult {
    /// The futex value no longer matched the expected value at enqueue time.
    Changed,
    /// The waiter was released by a [Futex::wake] call.
    WokenUp,
}

/// Futex wait and wake operations.
pub struct Futex;

impl Futex {
    /// Blocks the calling thread while `*value == expected`.
    ///
    /// The value is re-checked under the bucket lock before the waiter is
    /// enqueued, so a wake issued after the caller observed `expected`
    /// cannot be lost: either the value changed first and the call returns
    /// [FutexWaitResult::Changed] without blocking, or the waiter is
    /// enqueued and a subsequent wake will find it.
    ///
    /// `wait_mask` selects which wake calls may release this waiter and
    /// must be non-zero.
    pub fn wait(value: &AtomicU32, expected: u32, wait_mask: u32) -> FutexWaitResult {
        assert!(wait_mask != 0);

        let bucket = bucket_for(value);
        let node = Arc::new(WaitNode {
            addr: value as *const AtomicU32 as usize,
            wait_mask,
            event: Event::new(),
        });

        {
            let mut queue = bucket.queue.lock();
            if value.load(Ordering::Relaxed) != expected {
                return FutexWaitResult::Changed;
            }
            queue.push(node.clone());
        }

        node.event.wait();
        FutexWaitResult::WokenUp
    }

    /// Wakes up to `count` waiters blocked on `value` whose wait mask
    /// intersects `wake_mask`. Returns the number of waiters released.
    pub fn wake(value: &AtomicU32, count: u32, wake_mask: u32) -> u32 {
        assert!(wake_mask != 0);

        let bucket = bucket_for(value);
        let addr = value as *const AtomicU32 as usize;

        let mut woken = 0;
        let mut queue = bucket.queue.lock();
        let mut i = 0;
        while i < queue.len() && woken < count {
            if queue[i].addr == addr && queue[i].wait_mask & wake_mask != 0 {
                let node = queue.remove(i);
                node.event.set();
                woken += 1;
            } else {
                i += 1;
            }
        }
        woken
    }
}
