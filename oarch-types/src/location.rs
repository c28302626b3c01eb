//! `Location` — product + store + path + uuid identifying an object.
//!
//! Grounded on `original_source/include/arch_loc.h`: `uuid_str` is a cached
//! canonical textual form of `uuid` that every setter must refresh.

use std::path::{Path, PathBuf};

use proxmox_uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Location {
    product_id: String,
    store_id: String,
    path: PathBuf,
    uuid: Uuid,
    uuid_str: String,
}

impl Location {
    /// A location addressed purely by path, with a nil uuid.
    pub fn new(product_id: impl Into<String>, store_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let uuid = Uuid::from(*uuid::NIL_BYTES);
        let uuid_str = uuid.to_string();
        Self {
            product_id: product_id.into(),
            store_id: store_id.into(),
            path: path.into(),
            uuid,
            uuid_str,
        }
    }

    pub fn with_uuid(
        product_id: impl Into<String>,
        store_id: impl Into<String>,
        path: impl Into<PathBuf>,
        uuid: Uuid,
    ) -> Self {
        let uuid_str = uuid.to_string();
        Self {
            product_id: product_id.into(),
            store_id: store_id.into(),
            path: path.into(),
            uuid,
            uuid_str,
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Canonical textual form of `uuid`, refreshed on every setter.
    pub fn uuid_str(&self) -> &str {
        &self.uuid_str
    }

    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid_str = uuid.to_string();
        self.uuid = uuid;
    }

    /// A nil-uuid location is legal (path-addressed).
    pub fn is_path_addressed(&self) -> bool {
        self.uuid.as_bytes() == uuid::NIL_BYTES
    }

    /// Identity key used by the fd-cache and meta caches: the uuid for
    /// uuid-addressed objects (vendor archive store), the store-qualified
    /// path for path-addressed ones (distributed volume). Using `uuid_str`
    /// alone would collide every path-addressed location onto the nil uuid.
    pub fn cache_key(&self) -> String {
        if self.is_path_addressed() {
            format!("{}:{}", self.store_id, self.path.display())
        } else {
            self.uuid_str.clone()
        }
    }
}

mod uuid {
    pub const NIL_BYTES: &[u8; 16] = &[0u8; 16];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_uuid_is_path_addressed() {
        let loc = Location::new("glusterfs", "store1", "/a/b/c");
        assert!(loc.is_path_addressed());
        assert_eq!(loc.uuid_str().len(), 36);
    }

    #[test]
    fn setting_uuid_refreshes_uuid_str() {
        let mut loc = Location::new("glusterfs", "store1", "/a/b/c");
        let before = loc.uuid_str().to_string();
        let fresh = proxmox_uuid::Uuid::generate();
        loc.set_uuid(fresh.clone());
        assert_ne!(before, loc.uuid_str());
        assert_eq!(loc.uuid_str(), fresh.to_string());
    }
}
