//! Key/value cache for transient engine state.
//!
//! `MemoryCache` is a concurrent key-value store backed by `DashMap`.
//! Values are cloned on read so no `DashMap` `Ref` is ever held across an
//! `.await` point. There is no eviction or TTL; callers encode expiry in the
//! key when they need it. Nothing the engine puts here is assumed to survive
//! a restart.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Pluggable cache backend.
pub trait Cache: Send + Sync {
    /// Insert or overwrite a key-value pair.
    fn put(&self, key: &str, value: Value);

    /// Get a cloned copy of the value at `key`, or `None` if absent.
    fn get(&self, key: &str) -> Option<Value>;

    /// Remove a key and return its value, if present.
    fn remove(&self, key: &str) -> Option<Value>;
}

/// Typed access on top of any [`Cache`].
pub trait CacheExt: Cache {
    /// Serialize `value` into the cache. Values that fail to serialize are skipped.
    fn put_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.put(key, v),
            Err(e) => tracing::warn!(key, error = %e, "cache value not serializable"),
        }
    }

    /// Read and deserialize the value at `key`. A value of the wrong shape reads as absent.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// In-process cache shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Cache for MemoryCache {
    fn put(&self, key: &str, value: Value) {
        self.inner.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn put_get_remove() {
        let cache = MemoryCache::new();
        cache.put("k", json!(1));
        assert_eq!(cache.get("k"), Some(json!(1)));
        assert_eq!(cache.remove("k"), Some(json!(1)));
        assert!(cache.get("k").is_none());
        assert!(cache.remove("k").is_none());
    }

    #[test]
    fn clones_share_state() {
        let cache = MemoryCache::new();
        let other = cache.clone();
        cache.put("shared", json!("yes"));
        assert_eq!(other.get("shared"), Some(json!("yes")));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn typed_access_through_trait_object() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Entry {
            name: String,
            hits: u32,
        }

        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let entry = Entry {
            name: "def".to_string(),
            hits: 3,
        };
        cache.put_as("entry", &entry);
        assert_eq!(cache.get_as::<Entry>("entry"), Some(entry));
        // wrong shape reads as absent
        assert_eq!(cache.get_as::<u32>("entry"), None);
    }

    #[tokio::test]
    async fn concurrent_writers() {
        let cache = MemoryCache::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let c = cache.clone();
            handles.push(tokio::spawn(async move {
                c.put(&format!("key-{i}"), json!(i));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len(), 16);
        assert!(cache.contains("key-7"));
    }
}
