//! A plain counting semaphore: `Mutex` + `Condvar`, the shape `spec.md` §5
//! calls for behind the stream free list ("mutex + condvar behind a
//! counting semaphore").

use std::sync::{Condvar, Mutex};

pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    /// Blocks until a permit is available.
    pub fn acquire(&self) {
        let mut guard = self.permits.lock().unwrap();
        while *guard == 0 {
            guard = self.cv.wait(guard).unwrap();
        }
        *guard -= 1;
    }

    pub fn release(&self) {
        let mut guard = self.permits.lock().unwrap();
        *guard += 1;
        self.cv.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.permits.lock().unwrap()
    }
}
