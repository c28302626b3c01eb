//! fd-cache iopx (`spec.md` §4.3) — the hardest component: amortises
//! `open` cost, coalesces redundant reads, and performs large-block
//! aligned read-ahead. Grounded on `original_source/include/fdcache_iopx.h`
//! for the slot/buffer/request-map shapes, with the coalescing mechanism
//! adapted from `pbs-tools/src/async_lru_cache.rs`'s
//! `AsyncCacher`/`BroadcastFuture` pattern (late arrivals attach to an
//! in-flight fetch instead of starting a second one) to this crate's
//! explicit callback/thread-pool model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use oarch_types::{File, Iopx, OaError, OaResult, OpKind, Request};

use crate::executor::Executor;
use crate::tls::{next_seq, ArchTls};

/// Default read-ahead buffer size: 4 MiB, aligned to a power of two.
pub const RA_BUFF_SIZE: usize = 4 * 1024 * 1024;
const RA_BIT_WIDTH: u32 = 22;
const RA_BIT_MASK: u64 = !((1u64 << RA_BIT_WIDTH) - 1);

fn aligned_offset(offset: u64) -> u64 {
    offset & RA_BIT_MASK
}

#[derive(Default)]
struct RaBuf {
    valid: bool,
    rd_in_progress: bool,
    aligned_offset: u64,
    bytes: usize,
    buffer: Vec<u8>,
}

impl RaBuf {
    fn covers(&self, offset: u64, len: usize) -> bool {
        self.valid && offset + len as u64 <= self.aligned_offset + self.bytes as u64
    }
}

#[derive(Default)]
struct SlotState {
    valid: bool,
    uuid: String,
    /// The cache's own long-lived open file against the child iopx,
    /// distinct from any caller's per-open `File`.
    driver_file: Option<File>,
    ra: RaBuf,
}

struct Slot {
    mutex: Mutex<SlotState>,
}

type SyncShared = (Mutex<Option<Result<Vec<u8>, String>>>, Condvar);

enum ParentWaiter {
    Sync {
        offset: u64,
        len: usize,
        shared: Arc<SyncShared>,
    },
    Async {
        offset: u64,
        len: usize,
        req: Request,
    },
}

fn register_waiter(parents: &mut Vec<ParentWaiter>, req: &mut Request) -> Option<Arc<SyncShared>> {
    if req.op == OpKind::PreadAsync {
        let owned = std::mem::replace(req, Request::new(OpKind::PreadAsync, req.seq));
        parents.push(ParentWaiter::Async {
            offset: owned.offset,
            len: owned.len,
            req: owned,
        });
        None
    } else {
        let shared: Arc<SyncShared> = Arc::new((Mutex::new(None), Condvar::new()));
        parents.push(ParentWaiter::Sync {
            offset: req.offset,
            len: req.len,
            shared: Arc::clone(&shared),
        });
        Some(shared)
    }
}

fn deliver(parents: Vec<ParentWaiter>, result: &Result<Vec<u8>, String>, aligned: u64) {
    for parent in parents {
        match parent {
            ParentWaiter::Sync { offset, len, shared } => {
                let payload = slice_for(result, aligned, offset, len);
                let (lock, cvar) = &*shared;
                *lock.lock().unwrap() = Some(payload);
                cvar.notify_all();
            }
            ParentWaiter::Async { offset, len, mut req } => {
                match slice_for(result, aligned, offset, len) {
                    Ok(data) => {
                        req.result_int = data.len() as i64;
                        req.buf = data;
                    }
                    Err(msg) => req.fail(OaError::Transient(anyhow::anyhow!(msg))),
                }
                req.complete();
            }
        }
    }
}

fn slice_for(result: &Result<Vec<u8>, String>, aligned: u64, offset: u64, len: usize) -> Result<Vec<u8>, String> {
    match result {
        Ok(buf) => {
            let start = (offset - aligned) as usize;
            let end = (start + len).min(buf.len());
            Ok(buf[start.min(buf.len())..end].to_vec())
        }
        Err(msg) => Err(msg.clone()),
    }
}

struct FdCacheState {
    capacity: usize,
    slots: Vec<Slot>,
    uuid_map: RwLock<HashMap<String, usize>>,
    request_map: Mutex<HashMap<String, Vec<ParentWaiter>>>,
    front: Mutex<usize>,
    rear: Mutex<usize>,
    live_count: AtomicUsize,
}

impl FdCacheState {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                mutex: Mutex::new(SlotState::default()),
            })
            .collect();
        Self {
            capacity,
            slots,
            uuid_map: RwLock::new(HashMap::new()),
            request_map: Mutex::new(HashMap::new()),
            front: Mutex::new(0),
            rear: Mutex::new(0),
            live_count: AtomicUsize::new(0),
        }
    }
}

pub struct FdCacheIopx {
    child: Arc<dyn Iopx>,
    state: Arc<FdCacheState>,
    executor: Arc<Executor>,
}

impl FdCacheIopx {
    pub fn new(child: Arc<dyn Iopx>, capacity: usize, executor: Arc<Executor>) -> Self {
        Self {
            child,
            state: Arc::new(FdCacheState::new(capacity)),
            executor,
        }
    }

    pub fn live_slots(&self) -> usize {
        self.state.uuid_map.read().unwrap().len()
    }

    fn invalidate(&self, uuid: &str) {
        if let Some(&idx) = self.state.uuid_map.read().unwrap().get(uuid) {
            self.state.slots[idx].mutex.lock().unwrap().ra = RaBuf::default();
        }
    }

    /// Open (intercepts): reserve-existing, or allocate/evict a slot, per
    /// `spec.md` §4.3.
    fn open(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        let uuid = file.loc.cache_key();

        loop {
            let existing = self.state.uuid_map.read().unwrap().get(&uuid).copied();
            if let Some(slot_idx) = existing {
                let mut state = self.state.slots[slot_idx].mutex.lock().unwrap();
                if state.valid && state.uuid == uuid {
                    let mut dup_req = ArchTls::alloc_iopx_req(OpKind::Dup);
                    let result = self.child.call(state.driver_file.as_mut().unwrap(), &mut dup_req);
                    let fd = dup_req.result_int;
                    ArchTls::release_req(dup_req);
                    result?;
                    file.set_fd(fd);
                    let _ = req;
                    return Ok(());
                }
                // Slot was evicted/reused under us; retry the lookup.
                continue;
            }
            break;
        }

        let mut uuid_map = self.state.uuid_map.write().unwrap();
        if let Some(&slot_idx) = uuid_map.get(&uuid) {
            drop(uuid_map);
            let mut state = self.state.slots[slot_idx].mutex.lock().unwrap();
            let mut dup_req = ArchTls::alloc_iopx_req(OpKind::Dup);
            let result = self.child.call(state.driver_file.as_mut().unwrap(), &mut dup_req);
            let fd = dup_req.result_int;
            ArchTls::release_req(dup_req);
            result?;
            file.set_fd(fd);
            return Ok(());
        }

        let slot_idx = {
            let mut front = self.state.front.lock().unwrap();
            let mut rear = self.state.rear.lock().unwrap();
            if self.state.live_count.load(Ordering::SeqCst) < self.state.capacity {
                let idx = *front;
                *front = (*front + 1) % self.state.capacity;
                self.state.live_count.fetch_add(1, Ordering::SeqCst);
                idx
            } else {
                let idx = *rear;
                *rear = (*rear + 1) % self.state.capacity;
                idx
            }
        };

        let mut state = self.state.slots[slot_idx].mutex.lock().unwrap();
        if state.valid {
            uuid_map.remove(&state.uuid);
            if let Some(mut old_file) = state.driver_file.take() {
                let mut close_req = ArchTls::alloc_iopx_req(OpKind::Close);
                let _ = self.child.call(&mut old_file, &mut close_req);
                ArchTls::release_req(close_req);
                ArchTls::release_file(old_file);
            }
            state.ra = RaBuf::default();
        }

        let mut driver_file = ArchTls::alloc_arch_file(file.loc.clone());
        let mut open_req = ArchTls::alloc_iopx_req(OpKind::Open);
        let open_result = self.child.call(&mut driver_file, &mut open_req);
        ArchTls::release_req(open_req);
        match open_result {
            Ok(()) => {
                state.valid = true;
                state.uuid = uuid.clone();
                state.driver_file = Some(driver_file);
                uuid_map.insert(uuid, slot_idx);
                drop(uuid_map);
                let mut dup_req = ArchTls::alloc_iopx_req(OpKind::Dup);
                let result = self.child.call(state.driver_file.as_mut().unwrap(), &mut dup_req);
                let fd = dup_req.result_int;
                ArchTls::release_req(dup_req);
                result?;
                file.set_fd(fd);
                Ok(())
            }
            Err(err) => {
                state.valid = false;
                Err(err)
            }
        }
    }

    fn pread(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        let uuid = file.loc.cache_key();
        let slot_idx = *self
            .state
            .uuid_map
            .read()
            .unwrap()
            .get(&uuid)
            .ok_or_else(|| OaError::corruption("pread on fd-cache with no cached slot for this uuid"))?;

        let aligned = aligned_offset(req.offset);
        let key = format!("{uuid}:{aligned}");

        let handle = {
            let mut state = self.state.slots[slot_idx].mutex.lock().unwrap();
            if !state.valid || state.uuid != uuid {
                return Err(OaError::corruption(
                    "fd-cache slot invalid or uuid mismatch: evicted and reused under this request",
                ));
            }

            if state.ra.covers(req.offset, req.len) {
                let start = (req.offset - state.ra.aligned_offset) as usize;
                let data = state.ra.buffer[start..start + req.len].to_vec();
                let n = data.len();
                req.buf = data;
                req.result_int = n as i64;
                if req.op == OpKind::PreadAsync {
                    req.complete();
                }
                return Ok(());
            }

            if state.ra.valid && state.ra.aligned_offset != aligned {
                state.ra.valid = false;
            } else if state.ra.valid {
                state.ra.valid = false;
            }

            let mut rqmap = self.state.request_map.lock().unwrap();
            if state.ra.rd_in_progress && state.ra.aligned_offset == aligned && rqmap.contains_key(&key) {
                let entry = rqmap.get_mut(&key).unwrap();
                register_waiter(entry, req)
            } else {
                state.ra.rd_in_progress = true;
                state.ra.aligned_offset = aligned;
                state.ra.valid = false;
                let entry = rqmap.entry(key.clone()).or_insert_with(Vec::new);
                let handle = register_waiter(entry, req);
                drop(rqmap);
                self.spawn_generator(slot_idx, key, aligned);
                handle
            }
        };

        match handle {
            None => Ok(()),
            Some(shared) => {
                let (lock, cvar) = &*shared;
                let mut guard = lock.lock().unwrap();
                while guard.is_none() {
                    guard = cvar.wait(guard).unwrap();
                }
                match guard.take().unwrap() {
                    Ok(data) => {
                        req.result_int = data.len() as i64;
                        req.buf = data;
                        Ok(())
                    }
                    Err(msg) => Err(OaError::Transient(anyhow::anyhow!(msg))),
                }
            }
        }
    }

    fn spawn_generator(&self, slot_idx: usize, key: String, aligned: u64) {
        let state = Arc::clone(&self.state);
        let child = Arc::clone(&self.child);
        let _ = self.executor.submit(Box::new(move || {
            let (loc, fd) = {
                let slot_state = state.slots[slot_idx].mutex.lock().unwrap();
                let driver_file = slot_state.driver_file.as_ref().expect("valid slot must have a driver file");
                (driver_file.loc.clone(), driver_file.fd())
            };
            let mut scratch = ArchTls::alloc_arch_file(loc);
            scratch.set_fd(fd);

            let mut gen_req = ArchTls::alloc_iopx_req(OpKind::Pread);
            gen_req.offset = aligned;
            gen_req.len = RA_BUFF_SIZE;
            let call_result = child.call(&mut scratch, &mut gen_req);

            let result: Result<Vec<u8>, String> = match call_result {
                Ok(()) => Ok(std::mem::take(&mut gen_req.buf)),
                Err(err) => Err(err.to_string()),
            };
            ArchTls::release_req(gen_req);
            ArchTls::release_file(scratch);

            {
                let mut slot_state = state.slots[slot_idx].mutex.lock().unwrap();
                if slot_state.valid {
                    match &result {
                        Ok(buf) => {
                            slot_state.ra.valid = true;
                            slot_state.ra.rd_in_progress = false;
                            slot_state.ra.aligned_offset = aligned;
                            slot_state.ra.bytes = buf.len();
                            slot_state.ra.buffer = buf.clone();
                        }
                        Err(_) => {
                            slot_state.ra.valid = false;
                            slot_state.ra.rd_in_progress = false;
                        }
                    }
                }
            }

            let parents = state.request_map.lock().unwrap().remove(&key).unwrap_or_default();
            deliver(parents, &result, aligned);
        }));
    }
}

impl Iopx for FdCacheIopx {
    fn call(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        match req.op {
            OpKind::Open => self.open(file, req),
            OpKind::Pread | OpKind::PreadAsync => self.pread(file, req),
            OpKind::Pwrite => {
                let uuid = file.loc.cache_key();
                let result = self.forward(file, req);
                self.invalidate(&uuid);
                result
            }
            OpKind::Close | OpKind::Ftruncate | OpKind::Truncate | OpKind::Fsetxattr | OpKind::Setxattr => {
                let uuid = file.loc.cache_key();
                self.invalidate(&uuid);
                self.forward(file, req)
            }
            _ => self.forward(file, req),
        }
    }

    fn pread_cbk(&self, file: &File, req: &mut Request, status: OaResult<()>) {
        if let Some(child) = self.child() {
            child.pread_cbk(file, req, status);
        }
    }

    fn child(&self) -> Option<&Arc<dyn Iopx>> {
        Some(&self.child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_driver::LocalVolumeDriver;
    use oarch_types::Location;
    use std::sync::atomic::AtomicU32;

    fn write_test_file(dir: &std::path::Path, name: &str, len: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.join(name), &data).unwrap();
        data
    }

    #[test]
    fn cache_hit_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_test_file(dir.path(), "u1", 5 * 1024 * 1024);
        let driver: Arc<dyn Iopx> = Arc::new(LocalVolumeDriver::new(dir.path()));
        let exec = Executor::new("fd-cache-test", 2, 16);
        let cache = FdCacheIopx::new(driver, 4, exec);

        let loc = Location::new("glusterfs", "store1", "u1");
        let mut file = File::new(loc);
        let mut open_req = Request::new(OpKind::Open, next_seq());
        cache.call(&mut file, &mut open_req).unwrap();

        let mut r1 = Request::new(OpKind::Pread, next_seq());
        r1.offset = 0;
        r1.len = 65536;
        cache.call(&mut file, &mut r1).unwrap();
        assert_eq!(r1.buf, data[0..65536]);

        let mut r2 = Request::new(OpKind::Pread, next_seq());
        r2.offset = 65536;
        r2.len = 65536;
        cache.call(&mut file, &mut r2).unwrap();
        assert_eq!(r2.buf, data[65536..131072]);
    }

    #[test]
    fn coalescing_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_test_file(dir.path(), "u2", 2 * 1024 * 1024);
        let driver: Arc<dyn Iopx> = Arc::new(LocalVolumeDriver::new(dir.path()));
        let exec = Executor::new("fd-cache-coalesce", 4, 16);
        let cache = Arc::new(FdCacheIopx::new(driver, 4, exec));

        let loc = Location::new("glusterfs", "store1", "u2");
        let mut file = File::new(loc);
        let mut open_req = Request::new(OpKind::Open, next_seq());
        cache.call(&mut file, &mut open_req).unwrap();
        let file = Arc::new(Mutex::new(file));

        let hits = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let cache = Arc::clone(&cache);
            let file = Arc::clone(&file);
            let hits = Arc::clone(&hits);
            handles.push(std::thread::spawn(move || {
                let mut req = Request::new(OpKind::Pread, next_seq());
                req.offset = 0;
                req.len = 1024 * 1024;
                let mut file = file.lock().unwrap();
                cache.call(&mut file, &mut req).unwrap();
                hits.fetch_add(1, Ordering::SeqCst);
                req.buf
            }));
        }
        let results: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], data[0..1024 * 1024]);
        assert_eq!(results[1], data[0..1024 * 1024]);
    }

    #[test]
    fn eviction_scenario_closes_old_fd_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        write_test_file(dir.path(), "u1", 4096);
        write_test_file(dir.path(), "u2", 4096);
        write_test_file(dir.path(), "u3", 4096);
        let driver: Arc<dyn Iopx> = Arc::new(LocalVolumeDriver::new(dir.path()));
        let exec = Executor::new("fd-cache-evict", 2, 16);
        let cache = FdCacheIopx::new(driver, 2, exec);

        for name in ["u1", "u2", "u3"] {
            let loc = Location::new("glusterfs", "store1", name);
            let mut file = File::new(loc);
            let mut open_req = Request::new(OpKind::Open, next_seq());
            cache.call(&mut file, &mut open_req).unwrap();
        }
        assert_eq!(cache.live_slots(), 2);
        assert!(!cache.state.uuid_map.read().unwrap().contains_key(&Location::new("glusterfs", "store1", "u1").cache_key()));

        // u1 was evicted; opening it again must succeed (re-open path).
        let loc = Location::new("glusterfs", "store1", "u1");
        let mut file = File::new(loc);
        let mut open_req = Request::new(OpKind::Open, next_seq());
        cache.call(&mut file, &mut open_req).unwrap();
        assert!(file.fd() >= 0);
    }
}
