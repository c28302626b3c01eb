//! The OpenArchive I/O pipeline core (`spec.md` §4): the iopx tree
//! (fd-cache, meta, perf), the engine that builds and runs it, the stream
//! manager, and the per-thread resource pools (`arch_tls`).

pub mod engine;
pub mod executor;
pub mod fdcache;
pub mod meta;
pub mod perf;
pub mod semaphore;
pub mod streammgr;
pub mod tls;
pub mod tree;

pub use engine::Engine;
pub use executor::{BoxedTask, Executor};
pub use fdcache::FdCacheIopx;
pub use meta::{InMemoryMcacheClient, McacheClient, MetaIopx, RealMcacheClient};
pub use perf::PerfIopx;
pub use semaphore::Semaphore;
pub use streammgr::{Stream, StreamLease, StreamManager};
pub use tls::ArchTls;
pub use tree::build_tree;
