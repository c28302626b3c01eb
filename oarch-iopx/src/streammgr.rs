//! Stream manager (`spec.md` §4.5): a bounded, semaphore-gated pool of
//! archive-store streams. Supplemented from
//! `original_source/include/cvlt_types.h`'s `cvlt_stream`/
//! `cvlt_stream_manager` for the per-stream operation surface.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use oarch_types::{OaResult, StreamBackend, StreamCtx};

use crate::semaphore::Semaphore;
use crate::tls::ArchTls;

pub struct Stream {
    id: usize,
    busy: AtomicBool,
    active: AtomicBool,
    guid: Mutex<Option<String>>,
    backend: Mutex<Box<dyn StreamBackend>>,
}

impl Stream {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn alloc_item(&self, guid: &str, path: &Path, size: u64) -> OaResult<()> {
        self.backend.lock().unwrap().alloc_item(guid, path, size)?;
        *self.guid.lock().unwrap() = Some(guid.to_string());
        Ok(())
    }

    pub fn release_item(&self) -> OaResult<()> {
        self.backend.lock().unwrap().release_item()?;
        *self.guid.lock().unwrap() = None;
        Ok(())
    }

    pub fn send_metadata(&self, flags: u32, bytes: &[u8]) -> OaResult<usize> {
        self.backend.lock().unwrap().send_metadata(flags, bytes)
    }

    pub fn send_data(&self, bytes: &[u8]) -> OaResult<usize> {
        self.backend.lock().unwrap().send_data(bytes)
    }

    pub fn receive_data(&self, offset: u64, guid: &str, buf: &mut [u8]) -> OaResult<usize> {
        self.backend.lock().unwrap().receive_data(offset, guid, buf)
    }

    pub fn get_ctx(&self, req_id: u64, len: usize, offset: u64) -> OaResult<StreamCtx> {
        self.backend.lock().unwrap().get_ctx(req_id, len, offset)
    }
}

pub struct StreamManager {
    streams: Vec<Arc<Stream>>,
    free: Mutex<VecDeque<usize>>,
    sem: Semaphore,
    num_streams: usize,
    enable_stream_reservation: bool,
}

impl StreamManager {
    pub fn new(backends: Vec<Box<dyn StreamBackend>>, enable_stream_reservation: bool) -> Arc<Self> {
        let num_streams = backends.len();
        let streams: Vec<Arc<Stream>> = backends
            .into_iter()
            .enumerate()
            .map(|(id, backend)| {
                Arc::new(Stream {
                    id,
                    busy: AtomicBool::new(false),
                    active: AtomicBool::new(false),
                    guid: Mutex::new(None),
                    backend: Mutex::new(backend),
                })
            })
            .collect();
        let free = Mutex::new((0..num_streams).collect());
        Arc::new(Self {
            streams,
            free,
            sem: Semaphore::new(num_streams),
            num_streams,
            enable_stream_reservation,
        })
    }

    /// Acquires a semaphore permit (may block), pops a free stream (FIFO)
    /// and marks it active.
    pub fn alloc_stream(self: &Arc<Self>) -> StreamLease {
        self.sem.acquire();
        let id = self
            .free
            .lock()
            .unwrap()
            .pop_front()
            .expect("semaphore permit without a free stream: accounting invariant violated");
        let stream = Arc::clone(&self.streams[id]);
        stream.active.store(true, Ordering::SeqCst);
        if self.enable_stream_reservation {
            stream.busy.store(true, Ordering::SeqCst);
            ArchTls::with(|tls| tls.stream_reservation = Some((id, String::new())));
        }
        StreamLease {
            manager: Arc::clone(self),
            stream,
        }
    }

    fn release(&self, stream: &Arc<Stream>) {
        if !stream.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if stream.guid.lock().unwrap().is_some() {
            let _ = stream.release_item();
        }
        stream.busy.store(false, Ordering::SeqCst);
        self.free.lock().unwrap().push_back(stream.id);
        self.sem.release();
    }

    pub fn live_streams(&self) -> usize {
        self.num_streams - self.free.lock().unwrap().len()
    }

    pub fn num_streams(&self) -> usize {
        self.num_streams
    }
}

/// RAII handle returned by `alloc_stream`; dropping it is `release_stream`.
pub struct StreamLease {
    manager: Arc<StreamManager>,
    stream: Arc<Stream>,
}

impl std::ops::Deref for StreamLease {
    type Target = Stream;
    fn deref(&self) -> &Stream {
        &self.stream
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        // Clear the TLS stash before returning to the scheduler idle state.
        ArchTls::with(|tls| {
            if matches!(&tls.stream_reservation, Some((id, _)) if *id == self.stream.id) {
                tls.stream_reservation = None;
            }
        });
        self.manager.release(&self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_driver::InMemoryArchiveDriver;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn backends(n: usize) -> Vec<Box<dyn StreamBackend>> {
        let driver = InMemoryArchiveDriver::new();
        (0..n).map(|_| Box::new(driver.new_stream_backend()) as Box<dyn StreamBackend>).collect()
    }

    #[test]
    fn backpressure_third_caller_waits_for_a_release() {
        let mgr = StreamManager::new(backends(2), false);
        let s1 = mgr.alloc_stream();
        let s2 = mgr.alloc_stream();
        assert_eq!(mgr.live_streams(), 2);

        let proceeded = Arc::new(AtomicUsize::new(0));
        let mgr2 = Arc::clone(&mgr);
        let proceeded2 = Arc::clone(&proceeded);
        let handle = std::thread::spawn(move || {
            let _s3 = mgr2.alloc_stream();
            proceeded2.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(proceeded.load(Ordering::SeqCst), 0, "third caller must block while pool is exhausted");

        drop(s1);
        handle.join().unwrap();
        assert_eq!(proceeded.load(Ordering::SeqCst), 1);
        drop(s2);
        assert_eq!(mgr.live_streams(), 0);
    }

    #[test]
    fn live_streams_never_exceeds_capacity_and_quiesces_to_zero() {
        let mgr = StreamManager::new(backends(3), false);
        let leases: Vec<_> = (0..3).map(|_| mgr.alloc_stream()).collect();
        assert!(mgr.live_streams() <= mgr.num_streams());
        drop(leases);
        assert_eq!(mgr.live_streams(), 0);
    }
}
