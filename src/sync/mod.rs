//! Low-level blocking and waking primitives.
//!
//! These primitives back parallel chunk iteration schedulers layered on top
//! of the storage core. They provide blocking and wake-up only, not data
//! protection: correctness of a parallel iteration still depends on the
//! caller handing disjoint chunk ranges to each worker.

pub mod event;
pub mod futex;
pub mod semaphore;
pub mod spinlock;

pub use event::Event;
pub use futex::{Futex, FutexWaitResult, WAIT_MASK_ALL, WAIT_MASK_ANY};
pub use semaphore::{FastSemaphore, Semaphore};
pub use spinlock::{SpinLock, SpinLockGuard};
