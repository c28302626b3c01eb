//! A priority-classed executor pool: a bounded work queue serviced by a
//! fixed thread group. Grounded on
//! `src/tools/parallel_handler.rs`'s `ParallelHandler` (same
//! `crossbeam_channel::bounded` + `Vec<JoinHandle<()>>` shape), generalised
//! from "run this fixed handler on each item" to "run this submitted
//! closure", since the engine's two pools (`spec.md` §4.2) need to run
//! arbitrary iopx work, not one fixed handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use oarch_types::OaError;

use crate::tls::ArchTls;

pub type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

pub struct Executor {
    name: String,
    sender: Mutex<Option<Sender<BoxedTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Executor {
    /// `nthreads == 0` creates a pool that is present but never services
    /// work (mirrors `enable_fast_iosvc`/slow-pool-defaults-off).
    pub fn new(name: &str, nthreads: usize, queue_depth: usize) -> Arc<Self> {
        let (tx, rx) = bounded::<BoxedTask>(queue_depth.max(1));

        let mut handles = Vec::with_capacity(nthreads);
        for i in 0..nthreads {
            let rx = rx.clone();
            let thread_name = format!("{name}-{i}");
            handles.push(
                std::thread::Builder::new()
                    .name(thread_name.clone())
                    .spawn(move || {
                        // Install thread-local resource pools before
                        // servicing any work (spec.md §4.2).
                        ArchTls::with(|_| {});
                        while let Ok(task) = rx.recv() {
                            task();
                        }
                    })
                    .expect("failed to spawn executor worker thread"),
            );
        }

        Arc::new(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn submit(&self, task: BoxedTask) -> Result<(), OaError> {
        let guard = self.sender.lock().unwrap();
        match guard.as_ref() {
            Some(sender) => sender
                .send(task)
                .map_err(|_| OaError::not_ready(format!("executor {} is stopped", self.name))),
            None => Err(OaError::not_ready(format!("executor {} is stopped", self.name))),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Releases the keepalive (drops the sender, which closes the channel
    /// once drained) and joins all worker threads. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sender.lock().unwrap().take();
        let mut handles = self.handles.lock().unwrap();
        while let Some(handle) = handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn submits_run_and_stop_drains() {
        let exec = Executor::new("test", 2, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            exec.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        exec.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn stop_is_idempotent_and_submissions_fail_after() {
        let exec = Executor::new("test2", 1, 4);
        exec.stop();
        exec.stop();
        assert!(exec.submit(Box::new(|| {})).is_err());
    }
}
