//! Perf iopx (`spec.md` §4.7): a passthrough decorator that times every
//! operation and accumulates per-`OpKind` count/time/byte counters,
//! grounded on the atomic-counter diagnostics `arch_tls.rs` already uses
//! for pool statistics (`original_source/src/arch_tls.cpp`'s
//! `log_statistics`).
//!
//! `spec.md` splits completion into "synchronous return for sync ops;
//! `pread_cbk` for async pread". Both drivers in this workspace complete
//! `PreadAsync` inline within `call()` (see `oarch-driver`), so there is
//! never a genuine cross-thread completion below this layer; accounting
//! happens uniformly at the `call()` boundary. `pread_cbk` is still
//! implemented against the generator-completion shape the spec describes,
//! for a driver that completes pread asynchronously for real.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use oarch_types::{File, Iopx, OaResult, OpKind, Request};

#[derive(Default)]
struct PerfCounters {
    count: AtomicU64,
    time_nanos: AtomicU64,
    bytes: AtomicU64,
}

impl PerfCounters {
    fn record(&self, elapsed_nanos: u64, bytes: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.time_nanos.fetch_add(elapsed_nanos, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.count.load(Ordering::Relaxed),
            self.time_nanos.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

pub struct PerfIopx {
    child: Arc<dyn Iopx>,
    /// Per-layer monotonic sequence, independent of `req.seq`, per
    /// `spec.md` §4.7 ("an atomic counter"); it is the `starts` map key.
    next_seq: AtomicU64,
    starts: Mutex<HashMap<u64, Instant>>,
    /// `req.seq` → the `next_seq` assigned to it, so `pread_cbk` (which
    /// only carries `req`) can find its own start-time entry.
    seq_by_req: Mutex<HashMap<u64, u64>>,
    counters: RwLock<HashMap<OpKind, PerfCounters>>,
}

impl PerfIopx {
    pub fn new(child: Arc<dyn Iopx>) -> Self {
        Self {
            child,
            next_seq: AtomicU64::new(1),
            starts: Mutex::new(HashMap::new()),
            seq_by_req: Mutex::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    fn bytes_for(op: OpKind, req: &Request) -> u64 {
        match op {
            OpKind::Pread | OpKind::PreadAsync => req.result_int.max(0) as u64,
            OpKind::Pwrite => req.len as u64,
            _ => 0,
        }
    }

    fn record(&self, op: OpKind, seq: u64, req: &Request) {
        let start = self.starts.lock().unwrap().remove(&seq);
        let elapsed = start.map(|s| s.elapsed().as_nanos() as u64).unwrap_or(0);
        let bytes = Self::bytes_for(op, req);
        let counters = self.counters.read().unwrap();
        if let Some(c) = counters.get(&op) {
            c.record(elapsed, bytes);
            return;
        }
        drop(counters);
        self.counters
            .write()
            .unwrap()
            .entry(op)
            .or_insert_with(PerfCounters::default)
            .record(elapsed, bytes);
    }
}

impl Iopx for PerfIopx {
    fn call(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.starts.lock().unwrap().insert(seq, Instant::now());
        self.seq_by_req.lock().unwrap().insert(req.seq, seq);
        let op = req.op;
        let result = self.child.call(file, req);
        // Both drivers in this workspace complete PreadAsync inline, so the
        // completion time is already known by the time `call` returns; a
        // driver that genuinely defers would leave the entry for
        // `pread_cbk` to consume instead.
        if let Some(&seq) = self.seq_by_req.lock().unwrap().get(&req.seq) {
            if self.starts.lock().unwrap().contains_key(&seq) {
                self.record(op, seq, req);
                self.seq_by_req.lock().unwrap().remove(&req.seq);
            }
        }
        result
    }

    fn pread_cbk(&self, file: &File, req: &mut Request, status: OaResult<()>) {
        // Reachable only for a driver below this one that completes a
        // generator read on a different thread than the one that called
        // `call()`; none of the included drivers do.
        if let Some(seq) = self.seq_by_req.lock().unwrap().remove(&req.seq) {
            self.record(req.op, seq, req);
        }
        if let Some(child) = self.child() {
            child.pread_cbk(file, req, status);
        }
    }

    fn profile(&self) {
        for (op, counters) in self.counters.read().unwrap().iter() {
            let (count, time_nanos, bytes) = counters.snapshot();
            if count == 0 {
                continue;
            }
            let avg_nanos = time_nanos / count;
            let throughput = if time_nanos > 0 {
                (bytes as f64) / (time_nanos as f64 / 1e9)
            } else {
                0.0
            };
            log::info!(
                "perf {:?}: count={count} avg={avg_nanos}ns total_bytes={bytes} throughput={throughput:.0}B/s",
                op,
            );
        }
        if let Some(child) = self.child() {
            child.profile();
        }
    }

    fn child(&self) -> Option<&Arc<dyn Iopx>> {
        Some(&self.child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_driver::InMemoryArchiveDriver;
    use oarch_types::Location;

    #[test]
    fn accumulates_count_and_bytes_across_calls() {
        let driver: Arc<dyn Iopx> = Arc::new(InMemoryArchiveDriver::new());
        let perf = PerfIopx::new(driver);
        let mut file = File::new(Location::new("cvlt", "sp1", "/o"));

        let mut open_req = Request::new(OpKind::Open, 1);
        perf.call(&mut file, &mut open_req).unwrap();

        let mut write_req = Request::new(OpKind::Pwrite, 2);
        write_req.offset = 0;
        write_req.buf = vec![7u8; 256];
        write_req.len = 256;
        perf.call(&mut file, &mut write_req).unwrap();

        let mut read_req = Request::new(OpKind::Pread, 3);
        read_req.offset = 0;
        read_req.len = 256;
        perf.call(&mut file, &mut read_req).unwrap();

        let counters = perf.counters.read().unwrap();
        let (read_count, _, read_bytes) = counters.get(&OpKind::Pread).unwrap().snapshot();
        assert_eq!(read_count, 1);
        assert_eq!(read_bytes, 256);
        let (write_count, _, write_bytes) = counters.get(&OpKind::Pwrite).unwrap().snapshot();
        assert_eq!(write_count, 1);
        assert_eq!(write_bytes, 256);
    }

    #[test]
    fn profile_does_not_panic_when_empty() {
        let driver: Arc<dyn Iopx> = Arc::new(InMemoryArchiveDriver::new());
        let perf = PerfIopx::new(driver);
        perf.profile();
    }
}
