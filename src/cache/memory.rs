//! In-process backend on top of moka.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache;

use super::backend::{CacheBackend, effective_ttl};
use crate::Result;

/// Default maximum number of entries held in memory.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// A stored payload and its deadline.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Per-entry expiry: every insert (or overwrite) lives for its own TTL.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Thread-safe bounded in-memory cache with per-entry TTL.
///
/// moka evicts expired entries lazily; reads additionally compare against
/// the stored deadline so an entry is never served after its TTL.
pub struct MemoryBackend {
    cache: Cache<String, CacheEntry>,
}

impl MemoryBackend {
    /// Create a backend holding at most `max_entries` entries.
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.cache.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                self.cache.invalidate(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let Some(ttl) = effective_ttl(ttl) else {
            return Ok(());
        };
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return Ok(());
        };
        let entry = CacheEntry {
            value,
            ttl,
            expires_at,
        };
        self.cache.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key);
        Ok(())
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        match prefix {
            None => self.cache.invalidate_all(),
            Some(prefix) => {
                for (key, _) in self.cache.iter() {
                    if key.starts_with(prefix) {
                        self.cache.invalidate(key.as_str());
                    }
                }
            }
        }
        Ok(())
    }

    async fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}
