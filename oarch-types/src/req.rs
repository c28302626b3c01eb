//! `Request` — the operation descriptor dispatched through an iopx tree.
//!
//! Flat and C-struct-like on purpose: it mirrors `original_source`'s
//! `req_t`, carrying every field any operation might need rather than an
//! enum-per-operation payload, which keeps the single `dispatch` method
//! (`Iopx::call`) uniform across the whole operation surface.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::OaError;
use crate::op::ScanType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Open,
    Close,
    Pread,
    PreadAsync,
    Pwrite,
    Fstat,
    Stat,
    Ftruncate,
    Truncate,
    Fsetxattr,
    Setxattr,
    Fgetxattr,
    Getxattr,
    Fremovexattr,
    Removexattr,
    Lseek,
    Getuuid,
    Gethosts,
    Mkdir,
    Resolve,
    Dup,
    Scan,
}

pub type CompletionCallback = Arc<dyn Fn(&mut Request) + Send + Sync>;

/// Allocated from a per-thread pool, filled by the caller, submitted,
/// released when the completion callback returns (`spec.md` §3).
pub struct Request {
    pub op: OpKind,
    pub seq: u64,

    pub offset: u64,
    pub len: usize,
    /// Read: filled with the result bytes. Write: the input bytes.
    pub buf: Vec<u8>,

    pub path: Option<PathBuf>,
    pub xattr_name: String,
    pub xattr_value: Vec<u8>,
    pub whence: i32,
    pub scan_type: Option<ScanType>,

    pub error: Option<OaError>,
    /// Bytes transferred, or any other small integer result (e.g. a dup'd
    /// fd), depending on `op`.
    pub result_int: i64,
    pub result_text: Option<String>,
    pub result_hosts: Vec<String>,

    pub callback: Option<CompletionCallback>,
    pub cookie: u64,
}

impl Request {
    pub fn new(op: OpKind, seq: u64) -> Self {
        Self {
            op,
            seq,
            offset: 0,
            len: 0,
            buf: Vec::new(),
            path: None,
            xattr_name: String::new(),
            xattr_value: Vec::new(),
            whence: 0,
            scan_type: None,
            error: None,
            result_int: 0,
            result_text: None,
            result_hosts: Vec::new(),
            callback: None,
            cookie: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn fail(&mut self, err: OaError) {
        self.error = Some(err);
    }

    /// Invokes the completion callback exactly once, per `spec.md` §5:
    /// "Completion callbacks on a single req are called exactly once."
    pub fn complete(&mut self) {
        if let Some(cb) = self.callback.take() {
            cb(self);
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("op", &self.op)
            .field("seq", &self.seq)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("error", &self.error)
            .field("result_int", &self.result_int)
            .finish()
    }
}
