//! TTL caches behind one async interface.
//!
//! The pipeline only ever sees `EvidenceCache`: `get` returns a fresh value
//! or nothing, `put` stores with a TTL. A persistent backend is a pluggable
//! collaborator; failures there are swallowed and treated as misses so a
//! broken store can never block screening.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Default TTL shared by the OCR and text-verdict caches.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
pub trait EvidenceCache: Send + Sync {
    /// Fresh value for `key`, or `None` on miss/expiry/backend failure.
    async fn get(&self, key: &str) -> Option<String>;
    /// Store `value` under `key` for `ttl`. Best-effort; errors are logged
    /// and dropped.
    async fn put(&self, key: &str, value: String, ttl: Duration);
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory tier: bounded capacity, oldest inserted entry evicted first,
/// last write wins. Reads race writes without coordination beyond the lock.
pub struct MemoryCache {
    capacity: usize,
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of live (possibly expired, not yet evicted) entries.
    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_sync(&self, key: &str, now: Instant) -> Option<String> {
        let state = self.inner.read().ok()?;
        let entry = state.entries.get(key)?;
        if entry.expires_at <= now {
            return None;
        }
        Some(entry.value.clone())
    }

    fn put_sync(&self, key: &str, value: String, ttl: Duration, now: Instant) {
        let Ok(mut state) = self.inner.write() else {
            return;
        };
        if !state.entries.contains_key(key) {
            state.order.push_back(key.to_string());
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        while state.entries.len() > self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl EvidenceCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.get_sync(key, Instant::now())
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        self.put_sync(key, value, ttl, Instant::now());
    }
}

/// Two-tier cache: fast in-memory front, optional persistent collaborator
/// behind it. Values found only in the persistent tier are promoted.
pub struct TieredCache {
    memory: MemoryCache,
    persistent: Option<std::sync::Arc<dyn EvidenceCache>>,
}

impl TieredCache {
    pub fn new(capacity: usize, persistent: Option<std::sync::Arc<dyn EvidenceCache>>) -> Self {
        Self {
            memory: MemoryCache::new(capacity),
            persistent,
        }
    }

    pub fn memory_only(capacity: usize) -> Self {
        Self::new(capacity, None)
    }
}

#[async_trait]
impl EvidenceCache for TieredCache {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(hit) = self.memory.get(key).await {
            return Some(hit);
        }
        let persistent = self.persistent.as_ref()?;
        let value = persistent.get(key).await?;
        self.memory.put(key, value.clone(), DEFAULT_TTL).await;
        Some(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        self.memory.put(key, value.clone(), ttl).await;
        if let Some(persistent) = &self.persistent {
            persistent.put(key, value, ttl).await;
        }
    }
}
