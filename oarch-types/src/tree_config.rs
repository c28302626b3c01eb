//! iopx tree configuration — tells the engine which decorators to place
//! above the driver when building a tree for a given product/store.

#[derive(Debug, Clone)]
pub struct IopxTreeConfig {
    pub product: String,
    pub store: String,
    pub desc: String,
    pub enable_fast_iosvc: bool,
    pub enable_meta_cache: bool,
    pub meta_cache_ttl: std::time::Duration,
    pub enable_fd_cache: bool,
    pub fd_cache_size: usize,
    /// Size of the bounded stream pool (`spec.md` §4.5) the engine builds
    /// for a tree rooted at an archive-store product; unused by other
    /// products.
    pub num_streams: usize,
}

impl IopxTreeConfig {
    pub fn new(product: impl Into<String>, store: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            store: store.into(),
            desc: String::new(),
            enable_fast_iosvc: true,
            enable_meta_cache: false,
            meta_cache_ttl: std::time::Duration::from_secs(60),
            enable_fd_cache: false,
            fd_cache_size: 32,
            num_streams: 4,
        }
    }
}
