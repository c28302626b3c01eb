pub mod error;
pub mod file;
pub mod file_info;
pub mod iopx_trait;
pub mod location;
pub mod meta_entry;
pub mod op;
pub mod req;
pub mod stream_backend;
pub mod tree_config;

pub use error::{OaError, OaResult};
pub use file::{File, RawCloseFn};
pub use file_info::FileInfoValue;
pub use iopx_trait::Iopx;
pub use location::Location;
pub use meta_entry::{meta_key, MetaCacheEntry};
pub use op::{ArchOpType, ScanType};
pub use req::{CompletionCallback, OpKind, Request};
pub use stream_backend::{StreamBackend, StreamCtx};
pub use tree_config::IopxTreeConfig;
