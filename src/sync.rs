//! Hand-rolled counting semaphore bounding `max_workers` (spec.md §5).
//!
//! The worker pool is the only concurrency primitive this crate needs
//! beyond plain threads and channels, so it is built directly on
//! `Mutex`/`Condvar` rather than pulling in an async-runtime semaphore
//! for a single use site.

use std::sync::{Condvar, Mutex};

pub struct CountingSemaphore {
    state: Mutex<usize>,
    available: Condvar,
}

impl CountingSemaphore {
    pub fn new(permits: usize) -> Self {
        CountingSemaphore {
            state: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.state.lock().unwrap();
        while *permits == 0 {
            permits = self.available.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    /// Returns a permit, waking one waiter if any.
    pub fn release(&self) {
        let mut permits = self.state.lock().unwrap();
        *permits += 1;
        self.available.notify_one();
    }

    #[cfg(test)]
    pub fn available_permits(&self) -> usize {
        *self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_and_release_round_trip_the_permit_count() {
        let sem = CountingSemaphore::new(2);
        sem.acquire();
        sem.acquire();
        assert_eq!(sem.available_permits(), 0);
        sem.release();
        assert_eq!(sem.available_permits(), 1);
    }

    #[test]
    fn acquire_blocks_until_a_permit_is_released() {
        let sem = Arc::new(CountingSemaphore::new(1));
        sem.acquire();

        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            sem2.acquire();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        sem.release();
        handle.join().unwrap();
    }
}
