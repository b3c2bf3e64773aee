use cohort::sync::{Event, FastSemaphore, Futex, FutexWaitResult, SpinLock, WAIT_MASK_ANY};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn futex_wakes_all_concurrent_waiters() {
    const WAITERS: u32 = 8;

    let value = Arc::new(AtomicU32::new(0));
    let woken = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..WAITERS)
        .map(|_| {
            let value = value.clone();
            let woken = woken.clone();
            std::thread::spawn(move || {
                // A waiter either blocks until the wake below, or observes
                // the already-changed value and returns immediately.
                match Futex::wait(&value, 0, WAIT_MASK_ANY) {
                    FutexWaitResult::WokenUp | FutexWaitResult::Changed => {
                        woken.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    // Change the value, then wake until every enqueued waiter is released.
    value.store(1, Ordering::SeqCst);
    let mut released = 0;
    while released < WAITERS {
        released += Futex::wake(&value, WAITERS - released, WAIT_MASK_ANY);
        if released < WAITERS {
            std::thread::sleep(Duration::from_millis(1));
            // Waiters that saw the changed value were never enqueued.
            if woken.load(Ordering::SeqCst) == WAITERS as usize {
                break;
            }
        }
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::SeqCst), WAITERS as usize);
}

#[test]
fn futex_wake_releases_at_most_count_waiters() {
    const WAITERS: usize = 4;

    let value = Arc::new(AtomicU32::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..WAITERS)
        .map(|_| {
            let value = value.clone();
            let finished = finished.clone();
            std::thread::spawn(move || {
                Futex::wait(&value, 0, WAIT_MASK_ANY);
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    // Wait for every thread to actually block. The value stays at the
    // expected 0 so none can return through the changed-value path.
    let mut released = 0;
    while released < 2 {
        std::thread::sleep(Duration::from_millis(1));
        released += Futex::wake(&value, 2 - released, WAIT_MASK_ANY);
    }

    // Only the two woken threads may finish.
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(finished.load(Ordering::SeqCst), 2);

    // Release the rest.
    let mut remaining = (WAITERS - 2) as u32;
    while remaining > 0 {
        remaining -= Futex::wake(&value, remaining, WAIT_MASK_ANY);
        std::thread::sleep(Duration::from_millis(1));
    }
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(finished.load(Ordering::SeqCst), WAITERS);
}

#[test]
fn event_releases_all_waiters() {
    let event = Arc::new(Event::new());
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let event = event.clone();
            std::thread::spawn(move || event.wait())
        })
        .collect();

    std::thread::sleep(Duration::from_millis(5));
    event.set();
    for thread in threads {
        thread.join().unwrap();
    }
    assert!(event.is_set());
}

#[test]
fn fast_semaphore_balances_releases_and_waits() {
    const WORKERS: usize = 6;

    let semaphore = Arc::new(FastSemaphore::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..WORKERS)
        .map(|_| {
            let semaphore = semaphore.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                semaphore.wait();
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for _ in 0..WORKERS {
        semaphore.release(1);
    }
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(done.load(Ordering::SeqCst), WORKERS);
}

#[test]
fn spinlock_partitions_disjoint_ranges() {
    // Model of the parallel iteration contract: workers claim disjoint
    // ranges of a shared list under a spin lock and process them without
    // further coordination.
    const ITEMS: usize = 10_000;
    const WORKERS: usize = 4;

    let cursor = Arc::new(SpinLock::new(0usize));
    let processed = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..WORKERS)
        .map(|_| {
            let cursor = cursor.clone();
            let processed = processed.clone();
            std::thread::spawn(move || loop {
                let range = {
                    let mut next = cursor.lock();
                    if *next >= ITEMS {
                        break;
                    }
                    let start = *next;
                    let end = (start + 64).min(ITEMS);
                    *next = end;
                    start..end
                };
                processed.fetch_add(range.len(), Ordering::SeqCst);
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(processed.load(Ordering::SeqCst), ITEMS);
}
