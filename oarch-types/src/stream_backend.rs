//! `StreamBackend` — the per-stream vendor operation surface a driver
//! provides to the stream manager (`spec.md` §4.5), supplemented from
//! `original_source/include/cvlt_types.h`'s `cvlt_stream` class.

use std::path::Path;

use crate::error::OaResult;

/// Opaque per-request callback context handed to whatever async API the
/// concrete driver binds against. The core never inspects its contents.
#[derive(Debug, Clone)]
pub struct StreamCtx {
    pub req_id: u64,
    pub len: usize,
    pub offset: u64,
}

pub trait StreamBackend: Send {
    fn alloc_item(&mut self, guid: &str, path: &Path, size: u64) -> OaResult<()>;
    fn release_item(&mut self) -> OaResult<()>;
    fn send_metadata(&mut self, flags: u32, bytes: &[u8]) -> OaResult<usize>;
    fn send_data(&mut self, bytes: &[u8]) -> OaResult<usize>;
    fn receive_data(&mut self, offset: u64, guid: &str, buf: &mut [u8]) -> OaResult<usize>;
    fn get_ctx(&mut self, req_id: u64, len: usize, offset: u64) -> OaResult<StreamCtx>;
}
