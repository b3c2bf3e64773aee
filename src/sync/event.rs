//! A manually reset condition flag.

use parking_lot::{Condvar, Mutex};

/// A single boolean condition threads can block on.
///
/// Once set, the event stays set until [reset](Self::reset) is called; a
/// `wait` against an already set event returns immediately. This is the
/// wake mechanism underpinning each futex wait node.
#[derive(Default)]
pub struct Event {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    /// Constructs an unset event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the condition and wakes all waiting threads.
    pub fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.condvar.notify_all();
    }

    /// Clears the condition.
    pub fn reset(&self) {
        *self.state.lock() = false;
    }

    /// Returns `true` if the condition is set.
    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Blocks until the condition is set.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.condvar.wait(&mut state);
        }
    }
}
