//! The uniform iopx operation-dispatch trait (`spec.md` §4.1).
//!
//! Per Design Notes §9 ("Dispatch polymorphism across many operations...
//! model as a capability enum plus a single `dispatch(op, file, req)`
//! method on each layer"), the whole operation surface is expressed as one
//! `call` method keyed on `req.op`, rather than twenty-odd trait methods.
//! The key invariant named there still holds: an operation a layer does not
//! intercept forwards verbatim to the child.

use std::sync::Arc;

use crate::error::{OaError, OaResult};
use crate::file::File;
use crate::req::Request;

pub trait Iopx: Send + Sync {
    /// Services or forwards `req` against `file`. A successful return does
    /// not imply completion for asynchronous variants (`PreadAsync`);
    /// completion there is signalled via `req.callback`/`pread_cbk`.
    fn call(&self, file: &mut File, req: &mut Request) -> OaResult<()>;

    /// Fired when an async generator read completes. Decorators that don't
    /// originate pread generators just forward.
    fn pread_cbk(&self, file: &File, req: &mut Request, status: OaResult<()>) {
        if let Some(child) = self.child() {
            child.pread_cbk(file, req, status);
        }
    }

    /// Diagnostic dump; each decorator appends its own counters then
    /// forwards to the child.
    fn profile(&self) {
        if let Some(child) = self.child() {
            child.profile();
        }
    }

    /// `None` at the driver leaf; `Some` for every decorator.
    fn child(&self) -> Option<&Arc<dyn Iopx>> {
        None
    }

    /// Default fallback used by decorators for operations they don't
    /// intercept: forward to the child, or fail if this is the leaf and it
    /// didn't handle the operation itself.
    fn forward(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        match self.child() {
            Some(child) => child.call(file, req),
            None => Err(OaError::not_ready(format!("unsupported operation {:?}", req.op))),
        }
    }
}
