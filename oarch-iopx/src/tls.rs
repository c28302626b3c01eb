//! Per-worker-thread resource pools (`spec.md` §4.6), grounded on
//! `original_source/include/arch_tls.h` / `src/arch_tls.cpp`: each thread
//! lazily allocates its own pools on first use, removing lock contention on
//! the allocator hot path. `boost::thread_specific_ptr` becomes a plain
//! `thread_local!`.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use oarch_types::{File, Request};

/// Geometric-growth object pool. Mirrors the three counters
/// `original_source` logs: `alloced`, `freed`, `next_req_size`.
pub struct ObjectPool<T> {
    free: Vec<T>,
    factory: Box<dyn Fn() -> T>,
    alloced: u64,
    freed: u64,
    next_req_size: usize,
}

impl<T> ObjectPool<T> {
    fn new(factory: Box<dyn Fn() -> T>) -> Self {
        Self {
            free: Vec::new(),
            factory,
            alloced: 0,
            freed: 0,
            next_req_size: 1,
        }
    }

    pub fn acquire(&mut self) -> T {
        match self.free.pop() {
            Some(item) => item,
            None => {
                self.alloced += self.next_req_size as u64;
                for _ in 1..self.next_req_size {
                    self.free.push((self.factory)());
                }
                self.next_req_size = (self.next_req_size * 2).min(256);
                (self.factory)()
            }
        }
    }

    pub fn release(&mut self, item: T) {
        self.freed += 1;
        self.free.push(item);
    }

    pub fn alloced(&self) -> u64 {
        self.alloced
    }

    pub fn freed(&self) -> u64 {
        self.freed
    }

    pub fn next_req_size(&self) -> usize {
        self.next_req_size
    }
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

pub struct ArchTls {
    pub file_pool: ObjectPool<()>,
    pub req_pool: ObjectPool<()>,
    /// Optional thread-local stream reservation slot (`spec.md` §4.5):
    /// `(stream_id, guid)` while a stream is stashed for reuse.
    pub stream_reservation: Option<(usize, String)>,
}

impl ArchTls {
    fn new() -> Self {
        Self {
            file_pool: ObjectPool::new(Box::new(|| ())),
            req_pool: ObjectPool::new(Box::new(|| ())),
            stream_reservation: None,
        }
    }

    pub fn log_statistics(&self) {
        log::debug!(
            "file descriptor memory pool statistics allocated: {} freed: {} next size: {}",
            self.file_pool.alloced(),
            self.file_pool.freed(),
            self.file_pool.next_req_size(),
        );
        log::debug!(
            "request info memory pool statistics    allocated: {} freed: {} next size: {}",
            self.req_pool.alloced(),
            self.req_pool.freed(),
            self.req_pool.next_req_size(),
        );
    }

    /// Runs `f` against the current thread's pools, lazily initialising
    /// them on first use.
    pub fn with<R>(f: impl FnOnce(&mut ArchTls) -> R) -> R {
        TLS.with(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn alloc_arch_file(loc: oarch_types::Location) -> File {
        Self::with(|tls| {
            tls.file_pool.acquire();
        });
        File::new(loc)
    }

    pub fn alloc_iopx_req(op: oarch_types::OpKind) -> Request {
        Self::with(|tls| {
            tls.req_pool.acquire();
        });
        Request::new(op, next_seq())
    }

    pub fn release_file(_file: File) {
        Self::with(|tls| tls.file_pool.release(()));
    }

    pub fn release_req(_req: Request) {
        Self::with(|tls| tls.req_pool.release(()));
    }
}

thread_local! {
    static TLS: RefCell<ArchTls> = RefCell::new(ArchTls::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_counters_track_alloc_and_free() {
        let mut pool: ObjectPool<u32> = ObjectPool::new(Box::new(|| 0));
        let a = pool.acquire();
        let before_freed = pool.freed();
        pool.release(a);
        assert_eq!(pool.freed(), before_freed + 1);
        assert!(pool.alloced() >= 1);
    }

    #[test]
    fn file_and_req_pools_are_thread_local() {
        let file = ArchTls::alloc_arch_file(oarch_types::Location::new("p", "s", "/x"));
        ArchTls::release_file(file);
        let req = ArchTls::alloc_iopx_req(oarch_types::OpKind::Open);
        ArchTls::release_req(req);
    }
}
