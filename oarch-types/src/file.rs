//! `File` — the handle type threaded through every iopx call.
//!
//! Grounded on `original_source/src/arch_file.cpp` / `include/arch_file.h`:
//! a spinlock-guarded info map, and a destructor that invokes `close`
//! through the owning iopx tree exactly once. The owner is a weak
//! back-reference (Design Notes §9: "express as a weak/back reference held
//! by the file; close is invoked through a resolved strong reference during
//! drop; if the iopx is already gone, the file simply releases its fd via
//! the driver vtable it captured at open time").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::file_info::FileInfoValue;
use crate::iopx_trait::Iopx;
use crate::location::Location;
use crate::req::{OpKind, Request};

/// Raw fd release captured at `open` time, used as the drop-time fallback
/// once the owning iopx tree is gone.
pub type RawCloseFn = dyn Fn(i64) + Send + Sync;

pub struct File {
    pub loc: Location,
    fd: AtomicI64,
    info: Mutex<HashMap<String, FileInfoValue>>,
    owner: Mutex<Option<Weak<dyn Iopx>>>,
    raw_close: Mutex<Option<Arc<RawCloseFn>>>,
    cbk_invoked: AtomicBool,
    failed: AtomicBool,
}

impl File {
    pub fn new(loc: Location) -> Self {
        Self {
            loc,
            fd: AtomicI64::new(-1),
            info: Mutex::new(HashMap::new()),
            owner: Mutex::new(None),
            raw_close: Mutex::new(None),
            cbk_invoked: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    pub fn fd(&self) -> i64 {
        self.fd.load(Ordering::Acquire)
    }

    pub fn set_fd(&self, fd: i64) {
        self.fd.store(fd, Ordering::Release);
    }

    /// Set by the driver leaf when `open` succeeds: a raw-close fallback
    /// that works even if the owning iopx tree is already gone by the time
    /// this file is dropped.
    pub fn set_raw_close(&self, raw_close: Arc<RawCloseFn>) {
        *self.raw_close.lock().unwrap() = Some(raw_close);
    }

    /// Set by whoever assembled the tree and drove this file's `open` to
    /// completion: the tree root `close` is invoked through on drop.
    pub fn publish_owner(&self, owner: &Arc<dyn Iopx>) {
        *self.owner.lock().unwrap() = Some(Arc::downgrade(owner));
    }

    pub fn set_file_info(&self, name: impl Into<String>, value: FileInfoValue) {
        self.info.lock().unwrap().insert(name.into(), value);
    }

    pub fn get_file_info(&self, name: &str) -> Option<FileInfoValue> {
        self.info.lock().unwrap().get(name).cloned()
    }

    pub fn erase_file_info(&self, name: &str) {
        self.info.lock().unwrap().remove(name);
    }

    pub fn cbk_invoked(&self) -> bool {
        self.cbk_invoked.load(Ordering::Acquire)
    }

    pub fn mark_cbk_invoked(&self) {
        self.cbk_invoked.store(true, Ordering::Release);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.fd() < 0 {
            return;
        }
        let owner = self.owner.lock().unwrap().take();
        if let Some(weak) = owner {
            if let Some(iopx) = weak.upgrade() {
                let mut req = Request::new(OpKind::Close, 0);
                let _ = iopx.call(self, &mut req);
                self.fd.store(-1, Ordering::Release);
                return;
            }
        }
        if let Some(raw_close) = self.raw_close.lock().unwrap().take() {
            raw_close(self.fd());
        }
        self.fd.store(-1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_map_round_trips() {
        let f = File::new(Location::new("glusterfs", "s1", "/a"));
        f.set_file_info("shard_size", FileInfoValue::Int(4 << 20));
        assert_eq!(f.get_file_info("shard_size").unwrap().as_int(), Some(4 << 20));
        f.erase_file_info("shard_size");
        assert!(f.get_file_info("shard_size").is_none());
    }

    #[test]
    fn falls_back_to_raw_close_when_owner_is_gone() {
        let called = Arc::new(AtomicBool::new(false));
        let called2 = Arc::clone(&called);
        let f = File::new(Location::new("glusterfs", "s1", "/a"));
        f.set_fd(42);
        *f.raw_close.lock().unwrap() = Some(Arc::new(move |_fd| called2.store(true, Ordering::SeqCst)));
        drop(f);
        assert!(called.load(Ordering::SeqCst));
    }
}
