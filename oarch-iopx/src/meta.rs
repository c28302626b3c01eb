//! Meta iopx (`spec.md` §4.4): xattr get/set/remove interception backed by
//! an advisory memcache.
//!
//! The dynamic symbol-loading mechanism of
//! `original_source/include/mem_cache.h` is replaced per Design Notes §9
//! with an `McacheClient` trait: one concrete implementation wrapping the
//! real memcached wire protocol (the `memcache` crate — the one dependency
//! this repo adds beyond the teacher's own stack, see DESIGN.md) and one
//! in-memory implementation for tests and memcache-less modes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oarch_types::{meta_key, File, Iopx, MetaCacheEntry, OaError, OaResult, OpKind, Request};

pub trait McacheClient: Send + Sync {
    fn get(&self, key: &str) -> OaResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> OaResult<()>;
    fn remove(&self, key: &str) -> OaResult<()>;
}

/// Real memcached-backed client.
pub struct RealMcacheClient {
    inner: memcache::Client,
}

impl RealMcacheClient {
    /// Resolves and connects to the memcache wire endpoint. Per `spec.md`
    /// §4.4 ("the symbol table is resolved once at construction"), any
    /// failure here should cause the caller to build the meta iopx in its
    /// not-ready passthrough state rather than retry.
    pub fn connect(url: &str) -> OaResult<Self> {
        let inner = memcache::Client::connect(url)
            .map_err(|err| OaError::not_ready(format!("memcache connect {url}: {err}")))?;
        Ok(Self { inner })
    }
}

impl McacheClient for RealMcacheClient {
    fn get(&self, key: &str) -> OaResult<Option<Vec<u8>>> {
        self.inner
            .get(key)
            .map_err(|err| OaError::Transient(anyhow::anyhow!("memcache get: {err}")))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> OaResult<()> {
        self.inner
            .set(key, value, ttl.as_secs() as u32)
            .map_err(|err| OaError::Transient(anyhow::anyhow!("memcache set: {err}")))
    }

    fn remove(&self, key: &str) -> OaResult<()> {
        self.inner
            .delete(key)
            .map(|_| ())
            .map_err(|err| OaError::Transient(anyhow::anyhow!("memcache delete: {err}")))
    }
}

/// In-memory stand-in, used by tests and by `stub`/`scan` modes that run
/// without a memcache deployment.
#[derive(Default)]
pub struct InMemoryMcacheClient {
    entries: Mutex<HashMap<String, MetaCacheEntry>>,
}

impl McacheClient for InMemoryMcacheClient {
    fn get(&self, key: &str) -> OaResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> OaResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), MetaCacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    fn remove(&self, key: &str) -> OaResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

pub struct MetaIopx {
    child: Arc<dyn Iopx>,
    client: Option<Arc<dyn McacheClient>>,
    ttl: Duration,
    not_ready_logged: AtomicBool,
}

impl MetaIopx {
    /// `client = None` puts the iopx permanently into "not ready"
    /// passthrough, per `spec.md` §4.4's symbol-binding-failure clause.
    pub fn new(child: Arc<dyn Iopx>, client: Option<Arc<dyn McacheClient>>, ttl: Duration) -> Self {
        Self {
            child,
            client,
            ttl,
            not_ready_logged: AtomicBool::new(false),
        }
    }

    fn intercepted(&self, op: OpKind) -> bool {
        matches!(
            op,
            OpKind::Fsetxattr
                | OpKind::Setxattr
                | OpKind::Fgetxattr
                | OpKind::Getxattr
                | OpKind::Fremovexattr
                | OpKind::Removexattr
        )
    }

    fn warn_not_ready_once(&self) {
        if !self.not_ready_logged.swap(true, Ordering::SeqCst) {
            log::warn!("meta iopx has no memcache client; all operations passthrough");
        }
    }
}

impl Iopx for MetaIopx {
    fn call(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        if !self.intercepted(req.op) {
            return self.forward(file, req);
        }
        let Some(client) = self.client.as_ref() else {
            self.warn_not_ready_once();
            return self.forward(file, req);
        };
        let key = meta_key(&file.loc.cache_key(), &req.xattr_name);

        match req.op {
            OpKind::Fgetxattr | OpKind::Getxattr => match client.get(&key) {
                Ok(Some(value)) => {
                    req.result_int = value.len() as i64;
                    req.buf = value;
                    Ok(())
                }
                Ok(None) => {
                    let result = self.forward(file, req);
                    if result.is_ok() {
                        // Advisory: a failure to populate the cache is not
                        // surfaced as an operation error.
                        let _ = client.set(&key, &req.buf, self.ttl);
                    }
                    result
                }
                Err(_) => self.forward(file, req),
            },
            OpKind::Fsetxattr | OpKind::Setxattr => {
                self.forward(file, req)?;
                let _ = client.set(&key, &req.xattr_value, self.ttl);
                Ok(())
            }
            OpKind::Fremovexattr | OpKind::Removexattr => {
                self.forward(file, req)?;
                let _ = client.remove(&key);
                Ok(())
            }
            _ => unreachable!("intercepted() guards this match"),
        }
    }

    fn child(&self) -> Option<&Arc<dyn Iopx>> {
        Some(&self.child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_driver::InMemoryArchiveDriver;
    use oarch_types::Location;

    fn meta_over_mem() -> MetaIopx {
        let driver: Arc<dyn Iopx> = Arc::new(InMemoryArchiveDriver::new());
        MetaIopx::new(driver, Some(Arc::new(InMemoryMcacheClient::default())), Duration::from_secs(60))
    }

    #[test]
    fn set_then_get_round_trips() {
        let meta = meta_over_mem();
        let mut file = File::new(Location::new("cvlt", "sp1", "/o"));
        let mut open_req = Request::new(OpKind::Open, 1);
        meta.call(&mut file, &mut open_req).unwrap();

        let mut set_req = Request::new(OpKind::Fsetxattr, 2);
        set_req.xattr_name = "user.shard".to_string();
        set_req.xattr_value = b"4194304".to_vec();
        meta.call(&mut file, &mut set_req).unwrap();

        let mut get_req = Request::new(OpKind::Fgetxattr, 3);
        get_req.xattr_name = "user.shard".to_string();
        meta.call(&mut file, &mut get_req).unwrap();
        assert_eq!(get_req.buf, b"4194304");
    }

    #[test]
    fn miss_passes_through_and_then_populates_cache() {
        let meta = meta_over_mem();
        let mut file = File::new(Location::new("cvlt", "sp1", "/o"));
        let mut open_req = Request::new(OpKind::Open, 1);
        meta.call(&mut file, &mut open_req).unwrap();

        // Prime the child directly (bypassing the cache) so the first get
        // through `meta` is a genuine cache miss that must hit the child.
        let mut direct_set = Request::new(OpKind::Fsetxattr, 2);
        direct_set.xattr_name = "user.gfid".to_string();
        direct_set.xattr_value = b"v1".to_vec();
        meta.child().unwrap().call(&mut file, &mut direct_set).unwrap();

        let mut get_req = Request::new(OpKind::Fgetxattr, 3);
        get_req.xattr_name = "user.gfid".to_string();
        meta.call(&mut file, &mut get_req).unwrap();
        assert_eq!(get_req.buf, b"v1");

        // Second get must now be served from cache: break the child so a
        // forward would fail, and confirm the cached value still returns.
        let broken: Arc<dyn Iopx> = Arc::new(AlwaysFailIopx);
        let meta2 = MetaIopx::new(broken, meta.client.clone(), Duration::from_secs(60));
        let mut get_req2 = Request::new(OpKind::Fgetxattr, 4);
        get_req2.xattr_name = "user.gfid".to_string();
        meta2.call(&mut file, &mut get_req2).unwrap();
        assert_eq!(get_req2.buf, b"v1");
    }

    struct AlwaysFailIopx;
    impl Iopx for AlwaysFailIopx {
        fn call(&self, _file: &mut File, _req: &mut Request) -> OaResult<()> {
            Err(OaError::Permanent(anyhow::anyhow!("child unavailable")))
        }
    }

    #[test]
    fn missing_client_passes_through_every_operation() {
        let driver: Arc<dyn Iopx> = Arc::new(InMemoryArchiveDriver::new());
        let meta = MetaIopx::new(driver, None, Duration::from_secs(60));
        let mut file = File::new(Location::new("cvlt", "sp1", "/o"));
        let mut open_req = Request::new(OpKind::Open, 1);
        meta.call(&mut file, &mut open_req).unwrap();
        let mut set_req = Request::new(OpKind::Fsetxattr, 2);
        set_req.xattr_name = "user.shard".to_string();
        set_req.xattr_value = b"1".to_vec();
        meta.call(&mut file, &mut set_req).unwrap();
    }
}
