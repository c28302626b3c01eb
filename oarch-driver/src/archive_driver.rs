//! `InMemoryArchiveDriver` — the sink/archive-store driver leaf, standing
//! in for the vendor archive-store library (`original_source`'s
//! `cvlt_types.h`). Also the `StreamBackend` factory used by the stream
//! manager: streams push bulk data into the same backing store this
//! driver's file ops read/write through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use oarch_types::{File, Iopx, OaError, OaResult, OpKind, Request, StreamBackend, StreamCtx};

type Store = Arc<Mutex<HashMap<String, Vec<u8>>>>;
type XattrStore = Arc<Mutex<HashMap<(String, String), Vec<u8>>>>;

pub struct InMemoryArchiveDriver {
    data: Store,
    xattrs: XattrStore,
    next_fd: AtomicI64,
    open_fds: Mutex<HashMap<i64, String>>,
}

impl Default for InMemoryArchiveDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryArchiveDriver {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            xattrs: Arc::new(Mutex::new(HashMap::new())),
            next_fd: AtomicI64::new(1),
            open_fds: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_stream_backend(&self) -> MemoryStreamBackend {
        MemoryStreamBackend {
            data: Arc::clone(&self.data),
            item: None,
            offset: 0,
        }
    }

    /// Test/inspection helper: current stored bytes for a uuid.
    pub fn contents(&self, uuid_str: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(uuid_str).cloned()
    }
}

impl Iopx for InMemoryArchiveDriver {
    fn call(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        let uuid_str = file.loc.uuid_str().to_string();
        match req.op {
            OpKind::Open => {
                self.data.lock().unwrap().entry(uuid_str.clone()).or_default();
                let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
                self.open_fds.lock().unwrap().insert(fd, uuid_str);
                file.set_fd(fd);
                file.set_raw_close(Arc::new(|_fd: i64| {}));
                Ok(())
            }
            OpKind::Close => {
                self.open_fds.lock().unwrap().remove(&file.fd());
                file.set_fd(-1);
                Ok(())
            }
            OpKind::Pwrite => {
                let mut store = self.data.lock().unwrap();
                let entry = store.entry(uuid_str).or_default();
                let end = req.offset as usize + req.buf.len();
                if entry.len() < end {
                    entry.resize(end, 0);
                }
                entry[req.offset as usize..end].copy_from_slice(&req.buf);
                req.result_int = req.buf.len() as i64;
                Ok(())
            }
            OpKind::Pread | OpKind::PreadAsync => {
                let store = self.data.lock().unwrap();
                let entry = store.get(&uuid_str).ok_or_else(|| OaError::Permanent(anyhow::anyhow!("no such object {uuid_str}")))?;
                let start = (req.offset as usize).min(entry.len());
                let end = (start + req.len).min(entry.len());
                req.buf = entry[start..end].to_vec();
                req.result_int = req.buf.len() as i64;
                if req.op == OpKind::PreadAsync {
                    req.complete();
                }
                Ok(())
            }
            OpKind::Fstat => {
                let store = self.data.lock().unwrap();
                req.result_int = store.get(&uuid_str).map(|v| v.len() as i64).unwrap_or(0);
                Ok(())
            }
            OpKind::Ftruncate => {
                let mut store = self.data.lock().unwrap();
                store.entry(uuid_str).or_default().resize(req.offset as usize, 0);
                Ok(())
            }
            OpKind::Fsetxattr => {
                self.xattrs
                    .lock()
                    .unwrap()
                    .insert((uuid_str, req.xattr_name.clone()), req.xattr_value.clone());
                Ok(())
            }
            OpKind::Fgetxattr => {
                let value = self
                    .xattrs
                    .lock()
                    .unwrap()
                    .get(&(uuid_str, req.xattr_name.clone()))
                    .cloned()
                    .ok_or_else(|| OaError::Permanent(anyhow::anyhow!("xattr not found")))?;
                req.result_int = value.len() as i64;
                req.buf = value;
                Ok(())
            }
            OpKind::Fremovexattr => {
                self.xattrs.lock().unwrap().remove(&(uuid_str, req.xattr_name.clone()));
                Ok(())
            }
            OpKind::Getuuid => {
                req.result_text = Some(file.loc.uuid_str().to_string());
                Ok(())
            }
            OpKind::Gethosts => {
                req.result_hosts = vec!["archive-store-sim".to_string()];
                Ok(())
            }
            OpKind::Dup => {
                req.result_int = file.fd();
                Ok(())
            }
            other => Err(OaError::not_ready(format!("{other:?} not supported by the archive-store driver"))),
        }
    }
}

/// `StreamBackend` over the same in-memory store, grounded on
/// `original_source/include/cvlt_types.h`'s `cvlt_stream`.
pub struct MemoryStreamBackend {
    data: Store,
    item: Option<String>,
    offset: u64,
}

impl StreamBackend for MemoryStreamBackend {
    fn alloc_item(&mut self, guid: &str, _path: &std::path::Path, size: u64) -> OaResult<()> {
        self.data.lock().unwrap().insert(guid.to_string(), vec![0u8; size as usize]);
        self.item = Some(guid.to_string());
        self.offset = 0;
        Ok(())
    }

    fn release_item(&mut self) -> OaResult<()> {
        self.item = None;
        self.offset = 0;
        Ok(())
    }

    fn send_metadata(&mut self, _flags: u32, bytes: &[u8]) -> OaResult<usize> {
        self.send_data(bytes)
    }

    fn send_data(&mut self, bytes: &[u8]) -> OaResult<usize> {
        let guid = self
            .item
            .as_ref()
            .ok_or_else(|| OaError::Corruption("send_data with no item allocated".into()))?;
        let mut store = self.data.lock().unwrap();
        let entry = store.entry(guid.clone()).or_default();
        let end = self.offset as usize + bytes.len();
        if entry.len() < end {
            entry.resize(end, 0);
        }
        entry[self.offset as usize..end].copy_from_slice(bytes);
        self.offset = end as u64;
        Ok(bytes.len())
    }

    fn receive_data(&mut self, offset: u64, guid: &str, buf: &mut [u8]) -> OaResult<usize> {
        let store = self.data.lock().unwrap();
        let entry = store
            .get(guid)
            .ok_or_else(|| OaError::Permanent(anyhow::anyhow!("no such stream item {guid}")))?;
        let start = (offset as usize).min(entry.len());
        let end = (start + buf.len()).min(entry.len());
        let n = end - start;
        buf[..n].copy_from_slice(&entry[start..end]);
        Ok(n)
    }

    fn get_ctx(&mut self, req_id: u64, len: usize, offset: u64) -> OaResult<StreamCtx> {
        Ok(StreamCtx { req_id, len, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_types::Location;

    #[test]
    fn pwrite_then_pread_round_trip() {
        let driver = InMemoryArchiveDriver::new();
        let mut file = File::new(Location::new("cvlt", "sp1", "/obj"));

        let mut open_req = Request::new(OpKind::Open, 1);
        driver.call(&mut file, &mut open_req).unwrap();

        let mut write_req = Request::new(OpKind::Pwrite, 2);
        write_req.offset = 0;
        write_req.buf = b"payload".to_vec();
        driver.call(&mut file, &mut write_req).unwrap();

        let mut read_req = Request::new(OpKind::Pread, 3);
        read_req.offset = 0;
        read_req.len = 7;
        driver.call(&mut file, &mut read_req).unwrap();
        assert_eq!(read_req.buf, b"payload");
    }

    #[test]
    fn stream_backend_round_trips_through_same_store() {
        let driver = InMemoryArchiveDriver::new();
        let mut stream = driver.new_stream_backend();
        stream.alloc_item("g1", std::path::Path::new("/x"), 16).unwrap();
        stream.send_data(b"hello").unwrap();
        let mut buf = vec![0u8; 5];
        stream.receive_data(0, "g1", &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }
}
