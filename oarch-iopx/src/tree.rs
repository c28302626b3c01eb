//! Tree construction (`spec.md` §4.1/§4.2): builds the linear
//! driver → perf → meta → fd-cache chain bottom-up, in the fixed order
//! `mktree` specifies.

use std::sync::Arc;

use oarch_types::{IopxTreeConfig, Iopx};

use crate::executor::Executor;
use crate::fdcache::FdCacheIopx;
use crate::meta::{InMemoryMcacheClient, McacheClient, MetaIopx, RealMcacheClient};
use crate::perf::PerfIopx;

/// Builds a tree above `driver` per `cfg`: perf always, meta when
/// `enable_meta_cache`, fd-cache when `enable_fd_cache` (read trees only).
/// `memcache_url = None` leaves the meta layer in permanent passthrough,
/// matching `spec.md` §4.4's symbol-resolution-failure clause.
pub fn build_tree(
    driver: Arc<dyn Iopx>,
    cfg: &IopxTreeConfig,
    memcache_url: Option<&str>,
    fast_executor: Arc<Executor>,
) -> Arc<dyn Iopx> {
    let mut root: Arc<dyn Iopx> = Arc::new(PerfIopx::new(driver));

    if cfg.enable_meta_cache {
        let client: Option<Arc<dyn McacheClient>> = match memcache_url {
            Some(url) => match RealMcacheClient::connect(url) {
                Ok(client) => Some(Arc::new(client)),
                Err(err) => {
                    log::warn!("meta iopx for {}/{}: {err}; falling back to in-memory cache", cfg.product, cfg.store);
                    Some(Arc::new(InMemoryMcacheClient::default()))
                }
            },
            None => None,
        };
        root = Arc::new(MetaIopx::new(root, client, cfg.meta_cache_ttl));
    }

    if cfg.enable_fd_cache {
        root = Arc::new(FdCacheIopx::new(root, cfg.fd_cache_size, fast_executor));
    }

    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_driver::InMemoryArchiveDriver;
    use oarch_types::{File, Location, OpKind, Request};

    #[test]
    fn disabled_layers_are_omitted_cache_disabled_forwards_verbatim() {
        let driver: Arc<dyn Iopx> = Arc::new(InMemoryArchiveDriver::new());
        let mut cfg = IopxTreeConfig::new("cvlt", "sp1");
        cfg.enable_meta_cache = false;
        cfg.enable_fd_cache = false;
        let exec = Executor::new("tree-test", 1, 4);
        let tree = build_tree(driver, &cfg, None, exec);

        let mut file = File::new(Location::new("cvlt", "sp1", "/o"));
        let mut open_req = Request::new(OpKind::Open, 1);
        tree.call(&mut file, &mut open_req).unwrap();
    }

    #[test]
    fn full_stack_opens_and_reads() {
        let driver: Arc<dyn Iopx> = Arc::new(InMemoryArchiveDriver::new());
        let mut cfg = IopxTreeConfig::new("cvlt", "sp1");
        cfg.enable_meta_cache = true;
        cfg.enable_fd_cache = false; // fd-cache is for read trees against path-addressed volumes
        let exec = Executor::new("tree-test2", 1, 4);
        let tree = build_tree(driver, &cfg, None, exec);

        let mut file = File::new(Location::new("cvlt", "sp1", "/o"));
        let mut open_req = Request::new(OpKind::Open, 1);
        tree.call(&mut file, &mut open_req).unwrap();

        let mut write_req = Request::new(OpKind::Pwrite, 2);
        write_req.buf = b"hello".to_vec();
        write_req.len = 5;
        tree.call(&mut file, &mut write_req).unwrap();

        let mut read_req = Request::new(OpKind::Pread, 3);
        read_req.len = 5;
        tree.call(&mut file, &mut read_req).unwrap();
        assert_eq!(read_req.buf, b"hello");
    }
}
