//! A `Metadata cache entry`: the value half of the meta iopx's key/value
//! pair, mirroring the memcache wire's length-prefixed bytes plus ttl
//! (`original_source/include/mem_cache.h`'s `kvpair`).

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MetaCacheEntry {
    pub value: Vec<u8>,
    pub ttl: Duration,
    pub stored_at: Instant,
}

impl MetaCacheEntry {
    pub fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            ttl,
            stored_at: Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

/// Fingerprint a (uuid, xattr-name) pair into the memcache key, per
/// `spec.md` §4.4: "canonical concatenation of the file's uuid-string, a
/// separator, and the xattr name".
pub fn meta_key(uuid_str: &str, xattr_name: &str) -> String {
    let mut key = String::with_capacity(uuid_str.len() + 1 + xattr_name.len());
    key.push_str(uuid_str);
    key.push(':');
    key.push_str(xattr_name);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        assert_eq!(meta_key("abc", "user.shard"), "abc:user.shard");
        assert_eq!(meta_key("abc", "user.shard"), meta_key("abc", "user.shard"));
    }

    #[test]
    fn distinct_attrs_on_same_uuid_get_distinct_keys() {
        assert_ne!(meta_key("abc", "user.shard"), meta_key("abc", "user.gfid"));
    }
}
