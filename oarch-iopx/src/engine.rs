//! Engine (`spec.md` §4.2): owns the fast/slow executors and builds iopx
//! trees for a given product/store.
//!
//! `mktree` picks between the two reference drivers bundled in
//! `oarch-driver` based on `cfg.product` — this stands in for "the core
//! does not hardcode vendor libraries; it takes a vtable at engine
//! construction" (§6 "Driver vtables"): a production deployment would
//! register its own `gfapi`/vendor-archive-store driver the same way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use oarch_driver::{InMemoryArchiveDriver, LocalVolumeDriver};
use oarch_types::{Iopx, IopxTreeConfig, StreamBackend};

use crate::executor::Executor;
use crate::streammgr::StreamManager;
use crate::tree::build_tree;

pub const PRODUCT_DISTRIBUTED_VOLUME: &str = "glusterfs";
pub const PRODUCT_ARCHIVE_STORE: &str = "cvlt";

const DEFAULT_FAST_THREADS: usize = 4;
const DEFAULT_SLOW_THREADS: usize = 2;
const QUEUE_DEPTH: usize = 256;

/// Canonicalises a vendor archive-store id: trims whitespace, lowercases,
/// and strips a `cvlt://` scheme prefix if present.
pub fn map_cvlt_store_id(store: &str) -> String {
    let trimmed = store.trim();
    let without_scheme = trimmed.strip_prefix("cvlt://").unwrap_or(trimmed);
    without_scheme.to_lowercase()
}

pub struct Engine {
    fast: Arc<Executor>,
    slow: Arc<Executor>,
    memcache_url: Option<String>,
    enable_stream_reservation: bool,
    /// One bounded stream pool per canonical archive-store id this engine
    /// has built a tree for (`spec.md` §4.5); populated lazily by `mktree`.
    stream_managers: Mutex<HashMap<String, Arc<StreamManager>>>,
}

impl Engine {
    /// `enable_fast`/`enable_slow` gate whether the corresponding pool
    /// gets worker threads at all (`spec.md` §4.2: "fast defaults on, slow
    /// defaults off"); use `with_thread_counts` to size pools explicitly
    /// from `ArchiveStoreConfig`.
    pub fn new(enable_fast: bool, enable_slow: bool) -> Self {
        Self::with_thread_counts(
            if enable_fast { DEFAULT_FAST_THREADS } else { 0 },
            if enable_slow { DEFAULT_SLOW_THREADS } else { 0 },
        )
    }

    pub fn with_thread_counts(fast_threads: usize, slow_threads: usize) -> Self {
        Self {
            fast: Executor::new("iosvc-fast", fast_threads, QUEUE_DEPTH),
            slow: Executor::new("iosvc-slow", slow_threads, QUEUE_DEPTH),
            memcache_url: None,
            enable_stream_reservation: false,
            stream_managers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_memcache_url(mut self, url: impl Into<String>) -> Self {
        self.memcache_url = Some(url.into());
        self
    }

    /// Enables per-thread stream-handle reservation (`spec.md` §4.5): a
    /// thread that has just allocated a stream from one of this engine's
    /// pools may stash it in its thread-local slot for the duration of a
    /// file's work instead of re-acquiring the semaphore per operation.
    pub fn with_stream_reservation(mut self, enable: bool) -> Self {
        self.enable_stream_reservation = enable;
        self
    }

    /// Builds a tree for `cfg`, branching on `cfg.product` per `spec.md`
    /// §4.2: a distributed-volume product binds a source-FS driver rooted
    /// at `cfg.store`; a vendor archive-store product canonicalises
    /// `cfg.store` via `map_cvlt_store_id` first and gets a bounded stream
    /// pool (`cfg.num_streams`) registered against its canonical store id,
    /// reachable afterwards through `stream_manager`.
    pub fn mktree(&self, cfg: &IopxTreeConfig) -> Arc<dyn Iopx> {
        let driver: Arc<dyn Iopx> = match cfg.product.as_str() {
            PRODUCT_ARCHIVE_STORE => {
                let canonical = map_cvlt_store_id(&cfg.store);
                log::debug!("mktree: archive-store product, store '{}' canonicalised to '{canonical}'", cfg.store);
                let archive_driver = Arc::new(InMemoryArchiveDriver::new());
                self.ensure_stream_manager(&canonical, &archive_driver, cfg.num_streams);
                archive_driver
            }
            _ => {
                let root: PathBuf = cfg.store.clone().into();
                log::debug!("mktree: distributed-volume product, root '{}'", root.display());
                Arc::new(LocalVolumeDriver::new(root))
            }
        };
        build_tree(driver, cfg, self.memcache_url.as_deref(), Arc::clone(&self.fast))
    }

    /// Builds (on first call for this canonical store id) the bounded
    /// stream pool backing a just-built archive-store tree.
    fn ensure_stream_manager(&self, canonical_store: &str, driver: &Arc<InMemoryArchiveDriver>, num_streams: usize) {
        let mut managers = self.stream_managers.lock().unwrap();
        managers.entry(canonical_store.to_string()).or_insert_with(|| {
            let backends: Vec<Box<dyn StreamBackend>> = (0..num_streams.max(1))
                .map(|_| Box::new(driver.new_stream_backend()) as Box<dyn StreamBackend>)
                .collect();
            StreamManager::new(backends, self.enable_stream_reservation)
        });
    }

    /// The bounded stream pool (`spec.md` §4.5) registered for a
    /// product/store, or `None` if `mktree` has not yet built an
    /// archive-store tree for it. `product`/`store` go through
    /// `map_store_id` first, so callers can pass the same raw ids they
    /// gave `mktree`.
    pub fn stream_manager(&self, product: &str, store: &str) -> Option<Arc<StreamManager>> {
        let canonical = self.map_store_id(product, store);
        self.stream_managers.lock().unwrap().get(&canonical).cloned()
    }

    /// Translates a caller-supplied store identifier into its canonical
    /// form for `product`; `cvlt`-family products go through
    /// `map_cvlt_store_id`, everything else passes through unchanged.
    pub fn map_store_id(&self, product: &str, input: &str) -> String {
        match product {
            PRODUCT_ARCHIVE_STORE => map_cvlt_store_id(input),
            _ => input.to_string(),
        }
    }

    pub fn get_ioservice(&self, fast: bool) -> &Arc<Executor> {
        if fast {
            &self.fast
        } else {
            &self.slow
        }
    }

    pub fn get_num_fast_threads(&self) -> usize {
        self.fast.num_threads()
    }

    pub fn get_num_slow_threads(&self) -> usize {
        self.slow.num_threads()
    }

    /// Releases the keepalive of both pools and joins their threads.
    /// Idempotent (each `Executor::stop` is idempotent).
    pub fn stop(&self) {
        self.fast.stop();
        self.slow.stop();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_types::{File, Location, OpKind, Request};

    #[test]
    fn mktree_branches_on_product() {
        let engine = Engine::new(true, false);
        assert_eq!(engine.get_num_fast_threads(), DEFAULT_FAST_THREADS);
        assert_eq!(engine.get_num_slow_threads(), 0);

        let mut cvlt_cfg = IopxTreeConfig::new(PRODUCT_ARCHIVE_STORE, "CVLT://Sub1");
        cvlt_cfg.enable_meta_cache = false;
        cvlt_cfg.enable_fd_cache = false;
        let tree = engine.mktree(&cvlt_cfg);
        let mut file = File::new(Location::new(PRODUCT_ARCHIVE_STORE, "sub1", "/o"));
        let mut open_req = Request::new(OpKind::Open, 1);
        tree.call(&mut file, &mut open_req).unwrap();
    }

    #[test]
    fn stop_is_idempotent_and_submissions_fail_after() {
        let engine = Engine::new(true, true);
        engine.stop();
        engine.stop();
        assert!(engine.get_ioservice(true).submit(Box::new(|| {})).is_err());
    }

    #[test]
    fn map_store_id_canonicalises_only_archive_store_product() {
        let engine = Engine::new(false, false);
        assert_eq!(engine.map_store_id(PRODUCT_ARCHIVE_STORE, "CVLT://Sub1"), "sub1");
        assert_eq!(engine.map_store_id(PRODUCT_DISTRIBUTED_VOLUME, "/mnt/vol1"), "/mnt/vol1");
    }

    #[test]
    fn mktree_on_archive_store_registers_a_reachable_stream_manager() {
        let engine = Engine::new(true, false);
        assert!(engine.stream_manager(PRODUCT_ARCHIVE_STORE, "Sub2").is_none());

        let mut cfg = IopxTreeConfig::new(PRODUCT_ARCHIVE_STORE, "Sub2");
        cfg.enable_meta_cache = false;
        cfg.enable_fd_cache = false;
        cfg.num_streams = 2;
        let _tree = engine.mktree(&cfg);

        let mgr = engine.stream_manager(PRODUCT_ARCHIVE_STORE, "Sub2").expect("stream manager registered after mktree");
        assert_eq!(mgr.num_streams(), 2);
        let lease = mgr.alloc_stream();
        assert_eq!(mgr.live_streams(), 1);
        drop(lease);
        assert_eq!(mgr.live_streams(), 0);

        // Building a second tree for the same canonical store reuses the
        // pool rather than replacing it.
        let mgr2 = engine.stream_manager(PRODUCT_ARCHIVE_STORE, "sub2").unwrap();
        assert_eq!(mgr2.num_streams(), 2);
    }
}
