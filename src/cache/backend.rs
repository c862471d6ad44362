//! Cache backend trait and the in-process reference implementation
//! (§4.8), grounded on `original_source/semantic_layer/cache/memory_cache.py`
//! and the teacher's `async_trait` + `dashmap` pattern for pluggable
//! concurrent collaborators.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: String, value: Value, ttl: Duration);
    async fn invalidate(&self, key: &str);
    async fn clear(&self);
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// TTL-expiring, DashMap-backed cache. Expired entries are reaped lazily
/// on `get`, matching the original's "check-then-evict on read" behavior
/// rather than running a background sweeper.
#[derive(Default, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let hit = self.entries.get(key).map(|e| (e.value.clone(), e.expires_at));
        match hit {
            Some((value, expires_at)) if expires_at > Instant::now() => Some(value),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: String, value: Value, ttl: Duration) {
        self.entries.insert(key, Entry { value, expires_at: Instant::now() + ttl });
    }

    async fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}
